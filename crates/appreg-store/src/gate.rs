//! Readiness gate: repository access waits until the one-time schema
//! upgrade and purge have run.
//!
//! ```text
//! Uninitialized ──open()──▶ Upgrading ──ok──▶ Ready
//!                                  └──err──▶ Failed (terminal)
//! ```
//!
//! Waiters park on a watch channel instead of polling. `Failed` never
//! opens: waiters stay parked and later `open` calls return the first
//! failure without retrying.

use tokio::sync::{Mutex, watch};
use tracing::{error, info};

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Uninitialized,
    Upgrading,
    Ready,
    Failed(String),
}

pub struct ReadinessGate {
    state: watch::Sender<GateState>,
    /// Serializes `open` so exactly one caller runs the upgrade.
    init: Mutex<()>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Uninitialized);
        Self { state, init: Mutex::new(()) }
    }

    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.state.borrow() == GateState::Ready
    }

    /// Run `upgrade` once and open the gate if it succeeds.
    ///
    /// Concurrent callers wait for the first one; later callers get its result.
    pub async fn open<F>(&self, upgrade: F) -> StoreResult<()>
    where
        F: FnOnce() -> StoreResult<()>,
    {
        let _guard = self.init.lock().await;
        match self.state() {
            GateState::Ready => return Ok(()),
            GateState::Failed(reason) => return Err(StoreError::GateClosed(reason)),
            GateState::Uninitialized | GateState::Upgrading => {}
        }

        self.state.send_replace(GateState::Upgrading);
        match upgrade() {
            Ok(()) => {
                self.state.send_replace(GateState::Ready);
                info!("store ready");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                error!(error = %reason, "store upgrade failed; store stays closed");
                self.state.send_replace(GateState::Failed(reason));
                Err(e)
            }
        }
    }

    /// Park until the gate is `Ready`.
    pub async fn wait_ready(&self) -> StoreResult<()> {
        let mut rx = self.state.subscribe();
        rx.wait_for(|state| *state == GateState::Ready)
            .await
            .map(|_| ())
            .map_err(|_| StoreError::GateClosed("readiness gate dropped".to_string()))
    }
}
