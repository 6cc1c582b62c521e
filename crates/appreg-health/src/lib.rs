//! appreg-health — health probing for registered URLs.
//!
//! ```text
//! HealthMonitor
//!   ├── healthy loop     "Healthy" URLs past the staleness window → catch regressions
//!   ├── unhealthy loop   every other URL past the window          → catch recoveries
//!   └── HealthProber     GET url[:port]/microserviceHealth (hyper, tokio-rustls)
//! ```
//!
//! A probe result is written back only when the status changed, the URL
//! was never checked, or its last check is older than the window.

pub mod checker;
pub mod monitor;

pub use checker::{HEALTH_PATH, HealthProber, ProbeError, apply_status, extract_status, status_changed};
pub use monitor::{HealthMonitor, LoopKind, MonitorHandles, PassSummary};
