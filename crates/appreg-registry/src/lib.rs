//! appreg-registry — registration and discovery services.
//!
//! Both services sit on a [`Directory`](appreg_store::Directory) and wait
//! on its readiness gate before touching the store.
//!
//! ```text
//! Registry
//!   ├── RegistrationService   register, verify, hierarchy, heartbeat, active flag
//!   │     └── DiscoveryService (URLs go down when an instance stops)
//!   └── DiscoveryService      records, URL resolution, routes, health trees
//! ```

pub mod discovery;
pub mod error;
pub mod registration;
pub mod status;

pub use discovery::{ActiveCheck, DiscoveryEntry, DiscoveryService, MethodEntry, RouteInfo, UrlEntry};
pub use error::{RegistryError, RegistryResult};
pub use registration::{
    HierarchyInfo, InstanceLocation, RegistrationRequest, RegistrationResult, RegistrationService,
    VerifyOutcome,
};
pub use status::{ApplicationHealth, InstanceHealth, UrlHealth, VersionHealth};

use appreg_core::RegistryConfig;
use appreg_store::Directory;

/// Both services over one directory.
#[derive(Clone)]
pub struct Registry {
    pub registration: RegistrationService,
    pub discovery: DiscoveryService,
}

impl Registry {
    pub fn new(directory: Directory, config: &RegistryConfig) -> Self {
        let discovery = DiscoveryService::new(directory.clone(), config.discovery.clone());
        let registration =
            RegistrationService::new(directory, config.registration.clone(), discovery.clone());
        Self { registration, discovery }
    }

    pub fn directory(&self) -> &Directory {
        self.discovery.directory()
    }
}
