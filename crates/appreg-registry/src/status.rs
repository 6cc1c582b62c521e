//! Health trees: application → versions → instances, friendly names, URLs.

use serde::{Deserialize, Serialize};

use appreg_store::*;

use crate::discovery::DiscoveryService;
use crate::error::RegistryResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationHealth {
    pub application_name: String,
    pub first_install: u64,
    pub versions: Vec<VersionHealth>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHealth {
    pub version_id: RowId,
    pub version: String,
    pub first_install: u64,
    pub instances: Vec<InstanceHealth>,
    pub friendly_names: Vec<String>,
    pub urls: Vec<UrlHealth>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub instance_id: RowId,
    pub machine_name: String,
    pub install_path: String,
    pub heartbeats: u64,
    pub last_heartbeat: Option<u64>,
    pub last_start: u64,
    pub install_time: u64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlHealth {
    pub url: String,
    pub port: Option<u16>,
    pub health_status: String,
    pub last_health_check: Option<u64>,
}

impl From<RegistryInstance> for InstanceHealth {
    fn from(i: RegistryInstance) -> Self {
        Self {
            instance_id: i.id,
            machine_name: i.machine_name,
            install_path: i.install_path,
            heartbeats: i.heartbeats,
            last_heartbeat: i.last_heartbeat,
            last_start: i.last_start,
            install_time: i.install_time,
            active: i.active,
        }
    }
}

impl From<DiscoveryUrl> for UrlHealth {
    fn from(u: DiscoveryUrl) -> Self {
        Self { url: u.url, port: u.port, health_status: u.health_status, last_health_check: u.last_health_check }
    }
}

impl DiscoveryService {
    /// Every application with every version.
    pub async fn all_application_health(&self) -> RegistryResult<Vec<ApplicationHealth>> {
        let repos = self.directory().repositories().await?;
        let mut apps = Vec::new();
        for item in repos.store().list::<RegistryItem>()? {
            apps.push(full_tree(&repos, item)?);
        }
        Ok(apps)
    }

    /// The full tree of the application publishing `friendly_name`, or
    /// nothing if the name is unknown.
    pub async fn application_health_by_friendly_name(
        &self,
        friendly_name: &str,
    ) -> RegistryResult<Vec<ApplicationHealth>> {
        let repos = self.directory().repositories().await?;
        let Some(discovery_item) = repos.discovery_item_by_name(friendly_name)? else {
            return Ok(Vec::new());
        };
        let Some(version) = repos.versions_of_discovery_item(discovery_item.id)?.into_iter().next() else {
            return Ok(Vec::new());
        };
        let Some(item) = repos.items_of_version(version.id)?.into_iter().next() else {
            return Ok(Vec::new());
        };
        Ok(vec![full_tree(&repos, item)?])
    }

    /// Per application, only the latest version and its most recently
    /// started instance.
    pub async fn latest_application_health(&self) -> RegistryResult<Vec<ApplicationHealth>> {
        let repos = self.directory().repositories().await?;
        let mut apps = Vec::new();
        for item in repos.store().list::<RegistryItem>()? {
            let latest = repos
                .versions_of_item(item.id)?
                .into_iter()
                .max_by_key(|v| v.first_install);
            let versions = match latest {
                Some(version) => vec![latest_version(&repos, version)?],
                None => Vec::new(),
            };
            apps.push(ApplicationHealth {
                application_name: item.application_name,
                first_install: item.first_install,
                versions,
            });
        }
        Ok(apps)
    }
}

fn full_tree(repos: &Repositories<'_>, item: RegistryItem) -> RegistryResult<ApplicationHealth> {
    let mut versions = Vec::new();
    for version in repos.versions_of_item(item.id)? {
        let instances = repos.instances_of_version(version.id)?;
        let mut friendly_names = Vec::new();
        let mut urls = Vec::new();
        for d in repos.discovery_items_of_version(version.id)? {
            urls.extend(repos.urls_of_discovery_item(d.id)?.into_iter().map(UrlHealth::from));
            friendly_names.push(d.friendly_name);
        }
        versions.push(VersionHealth {
            version_id: version.id,
            version: version.version,
            first_install: version.first_install,
            instances: instances.into_iter().map(InstanceHealth::from).collect(),
            friendly_names,
            urls,
        });
    }
    Ok(ApplicationHealth { application_name: item.application_name, first_install: item.first_install, versions })
}

fn latest_version(repos: &Repositories<'_>, version: RegistryVersion) -> RegistryResult<VersionHealth> {
    let instance = repos
        .instances_of_version(version.id)?
        .into_iter()
        .max_by_key(|i| i.last_start);

    let mut friendly_names: Vec<String> = Vec::new();
    let mut urls: Vec<UrlHealth> = Vec::new();
    for d in repos.discovery_items_of_version(version.id)? {
        for u in repos.urls_of_discovery_item(d.id)? {
            if !urls.iter().any(|seen| seen.url == u.url && seen.port == u.port) {
                urls.push(u.into());
            }
        }
        if !friendly_names.contains(&d.friendly_name) {
            friendly_names.push(d.friendly_name);
        }
    }

    Ok(VersionHealth {
        version_id: version.id,
        version: version.version,
        first_install: version.first_install,
        instances: instance.into_iter().map(InstanceHealth::from).collect(),
        friendly_names,
        urls,
    })
}
