pub mod config;
pub mod duration;
pub mod identity;

pub use config::{ConfigError, RegistryConfig};
pub use duration::{format_duration, parse_duration};
pub use identity::ProcessIdentity;

/// Current UNIX time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
