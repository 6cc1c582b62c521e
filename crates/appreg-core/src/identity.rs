//! Identity of the running process, as it registers itself.

use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use crate::config::ServerConfig;

/// Name, version, build hash, and location of this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub application_name: String,
    pub version: String,
    /// Hex SHA-256 of the executable.
    pub hash: String,
    /// Directory the executable was started from.
    pub install_path: String,
    pub machine_name: String,
    /// Modification time of the executable, if the filesystem reports one.
    pub build_time: Option<u64>,
}

impl ProcessIdentity {
    /// Describe the current executable.
    ///
    /// `default_name` and `version` come from the binary; config overrides
    /// the name and the machine.
    pub fn current(
        server: &ServerConfig,
        default_name: &str,
        version: &str,
    ) -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        let install_path = exe
            .parent()
            .unwrap_or(exe.as_path())
            .to_string_lossy()
            .into_owned();

        Ok(Self {
            application_name: server
                .application_name
                .clone()
                .unwrap_or_else(|| default_name.to_string()),
            version: version.to_string(),
            hash: sha256_file(&exe)?,
            install_path,
            machine_name: server.machine_name.clone().unwrap_or_else(host_name),
            build_time: modified_secs(&exe),
        })
    }
}

/// Hex SHA-256 digest of a file.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Host name of this machine, or "localhost" when the OS does not report one.
pub fn host_name() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string())
}

fn modified_secs(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}
