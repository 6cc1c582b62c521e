//! Registration service: identity of applications, versions, and the
//! instances that run them.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use appreg_core::config::RegistrationConfig;
use appreg_core::{ProcessIdentity, epoch_secs};
use appreg_store::*;

use crate::discovery::{DiscoveryEntry, DiscoveryService};
use crate::error::{RegistryError, RegistryResult};

/// Who is registering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub application_name: String,
    pub version: String,
    pub hash: String,
    pub install_path: String,
    pub machine_name: String,
    #[serde(default)]
    pub build_time: Option<u64>,
}

impl From<&ProcessIdentity> for RegistrationRequest {
    fn from(identity: &ProcessIdentity) -> Self {
        Self {
            application_name: identity.application_name.clone(),
            version: identity.version.clone(),
            hash: identity.hash.clone(),
            install_path: identity.install_path.clone(),
            machine_name: identity.machine_name.clone(),
            build_time: identity.build_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub registry_id: RowId,
    pub version_id: RowId,
    pub instance_id: RowId,
    /// Something new was recorded by this call.
    pub upgraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyOutcome {
    AccessAllowed,
    UnknownApplication,
    NotActiveApplication,
    InvalidApplicationData,
}

/// An instance's place in the application tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyInfo {
    pub registry_id: RowId,
    pub version_id: RowId,
    pub instance_id: RowId,
    /// Older versions the instance has run, newest first.
    pub previous_version_ids: Vec<RowId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceLocation {
    pub install_path: String,
    pub machine_name: String,
}

#[derive(Clone)]
pub struct RegistrationService {
    directory: Directory,
    permissions: RegistrationConfig,
    discovery: DiscoveryService,
}

impl RegistrationService {
    pub fn new(directory: Directory, permissions: RegistrationConfig, discovery: DiscoveryService) -> Self {
        Self { directory, permissions, discovery }
    }

    /// Register an application instance, creating whatever is new.
    ///
    /// Permissions are checked for item, instance, then version, before
    /// anything is written. Re-registering a known triple writes nothing.
    pub async fn register(&self, request: &RegistrationRequest) -> RegistryResult<RegistrationResult> {
        let repos = self.directory.repositories().await?;
        let now = epoch_secs();

        let item = repos.item(&request.application_name, now)?;
        let mut version = repos.version(&request.version, &request.hash, request.build_time, now)?;
        let instance = repos.instance(&request.install_path, &request.machine_name, now)?;

        let new_item = item.id == 0;
        let new_instance = instance.id == 0;
        let new_version = version.id == 0;

        self.check_permission(new_item, self.permissions.allow_new_application, "application", request)?;
        self.check_permission(new_instance, self.permissions.allow_new_instance, "instance", request)?;
        self.check_permission(new_version, self.permissions.allow_new_version, "version", request)?;

        if !(new_item || new_instance || new_version) {
            return Ok(RegistrationResult {
                registry_id: item.id,
                version_id: version.id,
                instance_id: instance.id,
                upgraded: false,
            });
        }

        if new_version && !new_item {
            version.previous_version_id = repos
                .versions_of_item(item.id)?
                .into_iter()
                .max_by_key(|v| v.first_install)
                .map(|v| v.id);
        }

        let mut graph = EntityGraph::new();
        let item = graph.add(item);
        let version = graph.add(version);
        let instance = graph.add(instance);
        graph.link(AssociationKind::ItemVersion, item, version);
        graph.link(AssociationKind::VersionInstance, version, instance);
        repos.store().save_graph(&mut graph, &[item, version, instance])?;

        let result = RegistrationResult {
            registry_id: graph.node(item).id(),
            version_id: graph.node(version).id(),
            instance_id: graph.node(instance).id(),
            upgraded: true,
        };
        info!(
            application = %request.application_name,
            version = %request.version,
            machine = %request.machine_name,
            new_item,
            new_version,
            new_instance,
            instance_id = result.instance_id,
            "registered"
        );
        Ok(result)
    }

    fn check_permission(
        &self,
        is_new: bool,
        allowed: bool,
        what: &'static str,
        request: &RegistrationRequest,
    ) -> RegistryResult<()> {
        if is_new && !allowed {
            warn!(
                application = %request.application_name,
                version = %request.version,
                machine = %request.machine_name,
                "registration refused: new {what} not allowed"
            );
            return Err(RegistryError::PermissionDenied(what));
        }
        Ok(())
    }

    /// Check that an active instance really runs `version` with `hash`.
    pub async fn verify(&self, instance_id: RowId, version: &str, hash: &str) -> RegistryResult<VerifyOutcome> {
        let repos = self.directory.repositories().await?;
        let Some(instance) = repos.get::<RegistryInstance>(instance_id)? else {
            return Ok(VerifyOutcome::UnknownApplication);
        };
        if !instance.active {
            return Ok(VerifyOutcome::NotActiveApplication);
        }

        let matches = repos
            .versions_of_instance(instance_id)?
            .iter()
            .any(|v| v.version.eq_ignore_ascii_case(version) && v.hash == hash);
        Ok(if matches { VerifyOutcome::AccessAllowed } else { VerifyOutcome::InvalidApplicationData })
    }

    /// Current version (latest first install) and the older ones, newest first.
    pub async fn hierarchy(&self, instance_id: RowId) -> RegistryResult<HierarchyInfo> {
        let repos = self.directory.repositories().await?;
        let mut versions = repos.versions_of_instance(instance_id)?;
        let current = versions
            .iter()
            .max_by_key(|v| v.first_install)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("versions of instance {instance_id}")))?;
        let registry_id = repos
            .items_of_version(current.id)?
            .first()
            .map(|i| i.id)
            .ok_or_else(|| RegistryError::NotFound(format!("application of version {}", current.id)))?;

        versions.retain(|v| v.id != current.id);
        versions.sort_by_key(|v| Reverse(v.first_install));
        Ok(HierarchyInfo {
            registry_id,
            version_id: current.id,
            instance_id,
            previous_version_ids: versions.into_iter().map(|v| v.id).collect(),
        })
    }

    /// Application name of an instance.
    pub async fn who_is(&self, instance_id: RowId) -> RegistryResult<String> {
        let repos = self.directory.repositories().await?;
        let not_found = || RegistryError::NotFound(format!("instance {instance_id}"));
        if repos.get::<RegistryInstance>(instance_id)?.is_none() {
            return Err(not_found());
        }
        let version = repos.versions_of_instance(instance_id)?.into_iter().next().ok_or_else(not_found)?;
        let item = repos.items_of_version(version.id)?.into_iter().next().ok_or_else(not_found)?;
        Ok(item.application_name)
    }

    pub async fn location(&self, instance_id: RowId) -> RegistryResult<InstanceLocation> {
        let repos = self.directory.repositories().await?;
        let instance: RegistryInstance = repos
            .get(instance_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("instance {instance_id}")))?;
        Ok(InstanceLocation { install_path: instance.install_path, machine_name: instance.machine_name })
    }

    /// Count a heartbeat; a beating instance is active.
    pub async fn increment_heartbeat(&self, instance_id: RowId) -> RegistryResult<RegistryInstance> {
        let repos = self.directory.repositories().await?;
        let mut instance: RegistryInstance = repos
            .get(instance_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("instance {instance_id}")))?;
        instance.heartbeats += 1;
        instance.last_heartbeat = Some(epoch_secs());
        instance.active = true;
        repos.store().save_record(&mut instance)?;
        Ok(instance)
    }

    /// Mark an instance started or stopped. Stopping also takes its URLs down.
    pub async fn set_active_flag(&self, instance_id: RowId, starting: bool) -> RegistryResult<()> {
        let repos = self.directory.repositories().await?;
        let mut instance: RegistryInstance = repos
            .get(instance_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("instance {instance_id}")))?;
        instance.active = starting;
        if starting {
            instance.last_start = epoch_secs();
        }
        repos.store().save_record(&mut instance)?;
        info!(instance_id, active = starting, "instance active flag set");

        if !starting {
            self.discovery.set_urls_down(instance_id).await?;
        }
        Ok(())
    }

    /// Register this process in its own directory and publish its routes.
    ///
    /// Opens the readiness gate first, so the store is upgraded or purged
    /// before anything is written.
    pub async fn register_self(
        &self,
        identity: &ProcessIdentity,
        init: InitOptions,
        entries: Vec<DiscoveryEntry>,
    ) -> RegistryResult<RegistrationResult> {
        self.directory.initialize(init).await?;
        let result = self.register(&RegistrationRequest::from(identity)).await?;

        for mut entry in entries {
            entry.instance_id = result.instance_id;
            entry.version_id = result.version_id;
            self.discovery.add_discovery_records(&entry).await?;
        }
        self.set_active_flag(result.instance_id, true).await?;
        info!(
            application = %identity.application_name,
            instance_id = result.instance_id,
            "self-registration complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use appreg_core::RegistryConfig;

    use super::*;
    use crate::Registry;
    use crate::discovery::{MethodEntry, UrlEntry};

    pub(crate) async fn test_registry() -> Registry {
        registry_with(RegistryConfig::default()).await
    }

    pub(crate) async fn registry_with(config: RegistryConfig) -> Registry {
        let directory = Directory::new(Store::open_in_memory().unwrap());
        directory.initialize(InitOptions::default()).await.unwrap();
        Registry::new(directory, &config)
    }

    pub(crate) fn request(name: &str, version: &str, path: &str) -> RegistrationRequest {
        RegistrationRequest {
            application_name: name.to_string(),
            version: version.to_string(),
            hash: format!("{name}-{version}-hash"),
            install_path: path.to_string(),
            machine_name: "host-a".to_string(),
            build_time: None,
        }
    }

    pub(crate) async fn registered(registry: &Registry, name: &str, path: &str) -> RegistrationResult {
        registry.registration.register(&request(name, "1.0.0", path)).await.unwrap()
    }

    /// Back-date a version so ordering by first install is deterministic.
    fn set_first_install(registry: &Registry, version_id: RowId, at: u64) {
        let store = registry.discovery.directory().store();
        let mut v: RegistryVersion = store.get(version_id).unwrap().unwrap();
        v.first_install = at;
        store.update(&v).unwrap();
    }

    #[tokio::test]
    async fn register_twice_is_idempotent() {
        let registry = test_registry().await;
        let req = request("billing", "1.0.0", "/opt/billing");

        let first = registry.registration.register(&req).await.unwrap();
        assert!(first.upgraded);
        assert!(first.registry_id > 0 && first.version_id > 0 && first.instance_id > 0);

        let writes = registry.discovery.directory().store().write_count();
        let second = registry.registration.register(&req).await.unwrap();
        assert!(!second.upgraded);
        assert_eq!(
            (second.registry_id, second.version_id, second.instance_id),
            (first.registry_id, first.version_id, first.instance_id)
        );
        assert_eq!(registry.discovery.directory().store().write_count(), writes);
    }

    #[tokio::test]
    async fn new_version_links_to_previous() {
        let registry = test_registry().await;
        let first = registry.registration.register(&request("billing", "1.0.0", "/opt/billing")).await.unwrap();
        set_first_install(&registry, first.version_id, 100);

        let second = registry.registration.register(&request("billing", "1.1.0", "/opt/billing")).await.unwrap();
        assert!(second.upgraded);
        assert_eq!(second.registry_id, first.registry_id);
        assert_eq!(second.instance_id, first.instance_id);
        assert_ne!(second.version_id, first.version_id);

        let store = registry.discovery.directory().store();
        let v: RegistryVersion = store.get(second.version_id).unwrap().unwrap();
        assert_eq!(v.previous_version_id, Some(first.version_id));
    }

    #[tokio::test]
    async fn denied_registration_writes_nothing() {
        let mut config = RegistryConfig::default();
        config.registration.allow_new_instance = false;
        let registry = registry_with(config).await;

        let err = registry
            .registration
            .register(&request("billing", "1.0.0", "/opt/billing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::PermissionDenied("instance")));

        let store = registry.discovery.directory().store();
        assert_eq!(store.count::<RegistryItem>().unwrap(), 0);
        assert_eq!(store.count::<RegistryVersion>().unwrap(), 0);
        assert_eq!(store.count::<RegistryInstance>().unwrap(), 0);
    }

    #[tokio::test]
    async fn application_permission_is_checked_first() {
        let mut config = RegistryConfig::default();
        config.registration.allow_new_application = false;
        config.registration.allow_new_version = false;
        let registry = registry_with(config).await;

        let err = registry
            .registration
            .register(&request("billing", "1.0.0", "/opt/billing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::PermissionDenied("application")));
    }

    #[tokio::test]
    async fn verify_outcomes() {
        let registry = test_registry().await;
        let ids = registered(&registry, "billing", "/opt/billing").await;
        let hash = "billing-1.0.0-hash";

        assert_eq!(
            registry.registration.verify(999, "1.0.0", hash).await.unwrap(),
            VerifyOutcome::UnknownApplication
        );
        assert_eq!(
            registry.registration.verify(ids.instance_id, "1.0.0", hash).await.unwrap(),
            VerifyOutcome::NotActiveApplication
        );

        registry.registration.set_active_flag(ids.instance_id, true).await.unwrap();
        assert_eq!(
            registry.registration.verify(ids.instance_id, "1.0.0", hash).await.unwrap(),
            VerifyOutcome::AccessAllowed
        );
        assert_eq!(
            registry.registration.verify(ids.instance_id, "1.0.0", "other").await.unwrap(),
            VerifyOutcome::InvalidApplicationData
        );
        assert_eq!(
            registry.registration.verify(ids.instance_id, "2.0.0", hash).await.unwrap(),
            VerifyOutcome::InvalidApplicationData
        );
    }

    #[tokio::test]
    async fn verify_version_is_case_insensitive_hash_is_not() {
        let registry = test_registry().await;
        let ids = registry
            .registration
            .register(&request("billing", "1.0.0-RC1", "/opt/billing"))
            .await
            .unwrap();
        registry.registration.set_active_flag(ids.instance_id, true).await.unwrap();

        let hash = "billing-1.0.0-RC1-hash";
        assert_eq!(
            registry.registration.verify(ids.instance_id, "1.0.0-rc1", hash).await.unwrap(),
            VerifyOutcome::AccessAllowed
        );
        assert_eq!(
            registry
                .registration
                .verify(ids.instance_id, "1.0.0-RC1", &hash.to_uppercase())
                .await
                .unwrap(),
            VerifyOutcome::InvalidApplicationData
        );
    }

    #[tokio::test]
    async fn hierarchy_orders_previous_versions_newest_first() {
        let registry = test_registry().await;
        let v1 = registry.registration.register(&request("billing", "1.0.0", "/opt/billing")).await.unwrap();
        let v2 = registry.registration.register(&request("billing", "1.1.0", "/opt/billing")).await.unwrap();
        let v3 = registry.registration.register(&request("billing", "1.2.0", "/opt/billing")).await.unwrap();
        set_first_install(&registry, v1.version_id, 100);
        set_first_install(&registry, v2.version_id, 200);
        set_first_install(&registry, v3.version_id, 300);

        let info = registry.registration.hierarchy(v1.instance_id).await.unwrap();
        assert_eq!(info.registry_id, v1.registry_id);
        assert_eq!(info.version_id, v3.version_id);
        assert_eq!(info.instance_id, v1.instance_id);
        assert_eq!(info.previous_version_ids, vec![v2.version_id, v1.version_id]);
    }

    #[tokio::test]
    async fn hierarchy_of_unknown_instance_is_not_found() {
        let registry = test_registry().await;
        let err = registry.registration.hierarchy(42).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn who_is_and_location() {
        let registry = test_registry().await;
        let ids = registered(&registry, "billing", "/opt/billing").await;

        assert_eq!(registry.registration.who_is(ids.instance_id).await.unwrap(), "billing");
        assert_eq!(
            registry.registration.location(ids.instance_id).await.unwrap(),
            InstanceLocation { install_path: "/opt/billing".to_string(), machine_name: "host-a".to_string() }
        );

        assert!(matches!(registry.registration.who_is(77).await, Err(RegistryError::NotFound(_))));
        assert!(matches!(registry.registration.location(77).await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn heartbeat_counts_and_activates() {
        let registry = test_registry().await;
        let ids = registered(&registry, "billing", "/opt/billing").await;

        let instance = registry.registration.increment_heartbeat(ids.instance_id).await.unwrap();
        assert_eq!(instance.heartbeats, 2);
        assert!(instance.active);
        assert!(instance.last_heartbeat.is_some());

        let instance = registry.registration.increment_heartbeat(ids.instance_id).await.unwrap();
        assert_eq!(instance.heartbeats, 3);
    }

    #[tokio::test]
    async fn set_active_flag_on_missing_instance_is_not_found() {
        let registry = test_registry().await;
        let err = registry.registration.set_active_flag(5, true).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn register_self_opens_gate_and_publishes_routes() {
        let directory = Directory::new(Store::open_in_memory().unwrap());
        let registry = Registry::new(directory.clone(), &RegistryConfig::default());
        let identity = ProcessIdentity {
            application_name: "appreg".to_string(),
            version: "0.1.0".to_string(),
            hash: "abc".to_string(),
            install_path: "/usr/local/bin".to_string(),
            machine_name: "host-a".to_string(),
            build_time: None,
        };
        let entry = DiscoveryEntry {
            instance_id: 0,
            version_id: 0,
            friendly_name: "ApplicationRegistry".to_string(),
            controller_name: "Registry".to_string(),
            controller_route: "api/v1/registry".to_string(),
            urls: vec![UrlEntry { url: "https://host-a".to_string(), port: Some(8443) }],
            methods: vec![MethodEntry {
                http_method: "POST".to_string(),
                method_name: "Register".to_string(),
                template: "register".to_string(),
            }],
        };

        let result = registry
            .registration
            .register_self(&identity, InitOptions::default(), vec![entry])
            .await
            .unwrap();

        assert!(directory.gate().is_ready());
        let repos = directory.repositories().await.unwrap();
        let instance: RegistryInstance = repos.get(result.instance_id).unwrap().unwrap();
        assert!(instance.active);
        assert_eq!(repos.urls_of_instance(result.instance_id).unwrap().len(), 1);
        assert_eq!(registry.discovery.routes("applicationregistry").await.unwrap().len(), 1);
    }
}
