//! appreg.toml configuration parser.
//!
//! Every section and field is optional; missing values take the defaults
//! below so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::serde_str;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub server: ServerConfig,
    pub registration: RegistrationConfig,
    pub discovery: DiscoveryConfig,
    pub health: HealthConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    /// Overrides the name this process registers itself under.
    pub application_name: Option<String>,
    /// Overrides the host name reported for this process.
    pub machine_name: Option<String>,
    /// Base URLs this process is reachable on; published as its discovery URLs.
    pub advertise: Vec<AdvertisedUrl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisedUrl {
    pub url: String,
    pub port: Option<u16>,
}

/// Whether unknown applications, instances, and versions may be created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub allow_new_application: bool,
    pub allow_new_instance: bool,
    pub allow_new_version: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Default for URL resolution when the caller does not choose.
    pub force_https_only: bool,
    /// When resolving without the https restriction, drop https URLs.
    pub exclude_https_urls: bool,
    /// A URL is only handed out if its last health check is this recent.
    #[serde(with = "serde_str")]
    pub staleness: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// A recorded status older than this is rewritten even if unchanged.
    #[serde(with = "serde_str")]
    pub staleness: Duration,
    #[serde(with = "serde_str")]
    pub healthy_delay: Duration,
    #[serde(with = "serde_str")]
    pub unhealthy_delay: Duration,
    #[serde(with = "serde_str")]
    pub probe_timeout: Duration,
    /// Only probe URLs that belong to an active instance.
    pub require_active_instance: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Drop and recreate every table when the store first opens.
    pub upgrade_on_start: bool,
    /// Delete every row when the store first opens.
    pub purge_on_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            data_dir: PathBuf::from("/var/lib/appreg"),
            application_name: None,
            machine_name: None,
            advertise: Vec::new(),
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            allow_new_application: true,
            allow_new_instance: true,
            allow_new_version: true,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            force_https_only: true,
            exclude_https_urls: false,
            staleness: Duration::from_secs(5 * 60),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(30),
            healthy_delay: Duration::from_secs(30),
            unhealthy_delay: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            require_active_instance: true,
        }
    }
}

impl RegistryConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
