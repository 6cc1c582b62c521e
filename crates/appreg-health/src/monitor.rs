//! Health monitor: two background loops probing registered URLs.
//!
//! The healthy loop re-checks URLs currently "Healthy" to catch
//! regressions; the unhealthy loop re-checks everything else to catch
//! recoveries. Both share one [`HealthProber`] and stop on a `watch`
//! shutdown signal. In-flight probes finish before the loop exits.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use appreg_core::config::HealthConfig;
use appreg_core::epoch_secs;
use appreg_registry::{DiscoveryService, RegistryResult};

use crate::checker::{HealthProber, ProbeError, apply_status, health_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// URLs currently "Healthy".
    Healthy,
    /// Every other status, including never checked.
    Unhealthy,
}

impl LoopKind {
    pub fn name(self) -> &'static str {
        match self {
            LoopKind::Healthy => "healthy",
            LoopKind::Unhealthy => "unhealthy",
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub probed: usize,
    pub written: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct HealthMonitor {
    discovery: DiscoveryService,
    prober: HealthProber,
    config: HealthConfig,
}

/// Join handles of both loops.
pub struct MonitorHandles {
    pub healthy: JoinHandle<()>,
    pub unhealthy: JoinHandle<()>,
}

impl MonitorHandles {
    /// Wait for both loops to exit.
    pub async fn join(self) {
        for (kind, handle) in [(LoopKind::Healthy, self.healthy), (LoopKind::Unhealthy, self.unhealthy)] {
            if let Err(e) = handle.await {
                warn!(kind = kind.name(), error = %e, "health loop task failed");
            }
        }
    }
}

impl HealthMonitor {
    pub fn new(discovery: DiscoveryService, config: HealthConfig) -> Result<Self, ProbeError> {
        let prober = HealthProber::new(config.probe_timeout)?;
        Ok(Self::with_prober(discovery, prober, config))
    }

    pub fn with_prober(discovery: DiscoveryService, prober: HealthProber, config: HealthConfig) -> Self {
        Self { discovery, prober, config }
    }

    fn delay(&self, kind: LoopKind) -> Duration {
        match kind {
            LoopKind::Healthy => self.config.healthy_delay,
            LoopKind::Unhealthy => self.config.unhealthy_delay,
        }
    }

    /// Spawn both loops.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> MonitorHandles {
        let healthy = {
            let monitor = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { monitor.run(LoopKind::Healthy, shutdown).await })
        };
        let unhealthy = {
            let monitor = self.clone();
            tokio::spawn(async move { monitor.run(LoopKind::Unhealthy, shutdown).await })
        };
        info!(
            healthy_delay = ?self.config.healthy_delay,
            unhealthy_delay = ?self.config.unhealthy_delay,
            "health monitor started"
        );
        MonitorHandles { healthy, unhealthy }
    }

    /// Probe, sleep, repeat until shutdown.
    pub async fn run(&self, kind: LoopKind, mut shutdown: watch::Receiver<bool>) {
        let delay = self.delay(kind);
        debug!(kind = kind.name(), ?delay, "health loop starting");

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.check_once(kind, &shutdown).await {
                Ok(summary) if summary.probed > 0 => {
                    debug!(kind = kind.name(), probed = summary.probed, written = summary.written, "health pass done");
                }
                Ok(_) => {}
                Err(e) => warn!(kind = kind.name(), error = %e, "health pass failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }
        debug!(kind = kind.name(), "health loop stopped");
    }

    /// One pass over the due URLs of `kind`.
    pub async fn check_once(&self, kind: LoopKind, shutdown: &watch::Receiver<bool>) -> RegistryResult<PassSummary> {
        let staleness = self.config.staleness;
        let stale_before = epoch_secs().saturating_sub(staleness.as_secs());
        let due = self
            .discovery
            .candidate_urls(kind == LoopKind::Healthy, stale_before, self.config.require_active_instance)
            .await?;

        let mut summary = PassSummary::default();
        for mut url in due {
            if *shutdown.borrow() {
                break;
            }
            summary.probed += 1;

            let status = match self.prober.probe(&url).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(url = %health_url(&url), error = %e, "unreadable health status");
                    summary.failed += 1;
                    continue;
                }
            };

            let previous = url.health_status.clone();
            if !apply_status(&mut url, &status, epoch_secs(), staleness) {
                continue;
            }
            if let Err(e) = self.discovery.update_url(&mut url).await {
                warn!(url = %url.url, error = %e, "health write-back failed");
                summary.failed += 1;
                continue;
            }
            summary.written += 1;
            if !previous.eq_ignore_ascii_case(&status) {
                info!(url = %health_url(&url), from = %previous, to = %status, "health status changed");
            }
        }
        Ok(summary)
    }
}
