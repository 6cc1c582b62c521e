//! Discovery service: records which URLs and routes an instance exposes
//! under a friendly name, and resolves friendly names back to healthy URLs.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use appreg_core::config::DiscoveryConfig;
use appreg_core::epoch_secs;
use appreg_store::*;

use crate::error::{RegistryError, RegistryResult};

/// Everything one controller of one instance exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEntry {
    #[serde(default)]
    pub instance_id: RowId,
    #[serde(default)]
    pub version_id: RowId,
    pub friendly_name: String,
    pub controller_name: String,
    pub controller_route: String,
    #[serde(default)]
    pub urls: Vec<UrlEntry>,
    #[serde(default)]
    pub methods: Vec<MethodEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlEntry {
    pub url: String,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodEntry {
    pub http_method: String,
    pub method_name: String,
    pub template: String,
}

/// One route of a friendly name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub http_method: String,
    pub route: String,
    pub method_name: String,
}

/// Answer to "is this instance serving this friendly name right now".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCheck {
    /// The instance exists.
    pub is_available: bool,
    pub is_active: bool,
}

#[derive(Clone)]
pub struct DiscoveryService {
    directory: Directory,
    config: DiscoveryConfig,
}

impl DiscoveryService {
    pub fn new(directory: Directory, config: DiscoveryConfig) -> Self {
        Self { directory, config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub(crate) fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Record an instance's URLs and routes for one friendly name.
    ///
    /// The instance and version must already be registered.
    pub async fn add_discovery_records(&self, entry: &DiscoveryEntry) -> RegistryResult<DiscoveryItem> {
        let repos = self.directory.repositories().await?;
        let instance: RegistryInstance = repos
            .get(entry.instance_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("instance {}", entry.instance_id)))?;
        let version: RegistryVersion = repos
            .get(entry.version_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("version {}", entry.version_id)))?;

        let mut graph = EntityGraph::new();
        let item = graph.add(repos.discovery_item(
            &entry.friendly_name,
            &entry.controller_name,
            &entry.controller_route,
        )?);
        let instance = graph.add(instance);
        let version = graph.add(version);
        graph.link(AssociationKind::VersionDiscoveryItem, version, item);

        let mut seen_urls = Vec::new();
        for u in &entry.urls {
            if seen_urls.contains(&(&u.url, u.port)) {
                continue;
            }
            seen_urls.push((&u.url, u.port));
            let url = graph.add(repos.url(&u.url, u.port)?);
            graph.link(AssociationKind::InstanceUrl, instance, url);
            graph.link(AssociationKind::UrlDiscoveryItem, url, item);
        }

        let mut seen_methods = Vec::new();
        for m in &entry.methods {
            let key = (&m.http_method, &m.method_name, &m.template);
            if seen_methods.contains(&key) {
                continue;
            }
            seen_methods.push(key);
            let method = graph.add(repos.method(&m.http_method, &m.method_name, &m.template)?);
            graph.link(AssociationKind::MethodDiscoveryItem, method, item);
        }

        repos.store().save_graph(&mut graph, &[item])?;
        let saved = graph
            .get::<DiscoveryItem>(item)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(entry.friendly_name.clone()))?;
        info!(
            friendly_name = %saved.friendly_name,
            id = saved.id,
            urls = seen_urls.len(),
            methods = seen_methods.len(),
            "discovery records saved"
        );
        Ok(saved)
    }

    /// Healthy, recently checked URLs serving `friendly_name`, formatted as
    /// `url[:port]/controller_route`, deduplicated, in link order.
    pub async fn urls_for_friendly_name(
        &self,
        friendly_name: &str,
        limit_to_https: bool,
    ) -> RegistryResult<Vec<String>> {
        let repos = self.directory.repositories().await?;
        let Some(item) = repos.discovery_item_by_name(friendly_name)? else {
            debug!(%friendly_name, "no discovery item");
            return Ok(Vec::new());
        };

        let fresh_after = epoch_secs().saturating_sub(self.config.staleness.as_secs());
        let route = item.controller_route.trim_start_matches('/');
        let mut resolved: Vec<String> = Vec::new();
        for url in repos.urls_of_discovery_item(item.id)? {
            let scheme_ok = if limit_to_https {
                url.is_https()
            } else if self.config.exclude_https_urls {
                !url.is_https()
            } else {
                true
            };
            let fresh = url.last_health_check.is_some_and(|t| t > fresh_after);
            if !(scheme_ok && url.is_healthy() && fresh) {
                continue;
            }
            let formatted = format!("{}/{route}", url.base());
            if !resolved.contains(&formatted) {
                resolved.push(formatted);
            }
        }
        Ok(resolved)
    }

    /// Whether the instance currently serves `friendly_name` on healthy URLs only.
    ///
    /// Any non-healthy URL of the instance that serves the name makes the
    /// answer false, even when other URLs serving it are healthy.
    pub async fn is_active(&self, friendly_name: &str, instance_id: RowId) -> RegistryResult<ActiveCheck> {
        let repos = self.directory.repositories().await?;
        if repos.get::<RegistryInstance>(instance_id)?.is_none() {
            return Ok(ActiveCheck::default());
        }

        let mut found = false;
        let mut valid = true;
        for url in repos.urls_of_instance(instance_id)? {
            let serves_name = repos
                .discovery_items_of_url(url.id)?
                .iter()
                .any(|d| d.friendly_name.eq_ignore_ascii_case(friendly_name));
            if !serves_name {
                continue;
            }
            found = true;
            if !url.is_healthy() {
                valid = false;
            }
        }
        Ok(ActiveCheck { is_available: true, is_active: found && valid })
    }

    /// Force every URL of the instance to "Down".
    pub async fn set_urls_down(&self, instance_id: RowId) -> RegistryResult<()> {
        let repos = self.directory.repositories().await?;
        let urls = repos.urls_of_instance(instance_id)?;
        for mut url in urls {
            url.health_status = DOWN.to_string();
            repos.store().save_record(&mut url)?;
        }
        info!(instance_id, "instance URLs marked down");
        Ok(())
    }

    /// Verb, route template, and method name of every route under `friendly_name`.
    pub async fn routes(&self, friendly_name: &str) -> RegistryResult<Vec<RouteInfo>> {
        let repos = self.directory.repositories().await?;
        let Some(item) = repos.discovery_item_by_name(friendly_name)? else {
            return Ok(Vec::new());
        };
        Ok(repos
            .methods_of_discovery_item(item.id)?
            .into_iter()
            .map(|m| RouteInfo {
                http_method: m.http_method,
                route: m.template,
                method_name: m.method_name,
            })
            .collect())
    }

    /// Persist one URL row (health write-back).
    pub async fn update_url(&self, url: &mut DiscoveryUrl) -> RegistryResult<()> {
        let repos = self.directory.repositories().await?;
        if url.id == 0 {
            warn!(url = %url.url, "refusing to write back an unsaved URL");
            return Err(RegistryError::NotFound(url.url.clone()));
        }
        repos.store().save_record(url)?;
        Ok(())
    }

    /// URLs due for a probe.
    ///
    /// `healthy` picks URLs currently "Healthy" (else every other status,
    /// including never checked). A URL is due when it was never checked or
    /// last checked before `stale_before`. With `require_active_instance`,
    /// only URLs of at least one active instance qualify.
    pub async fn candidate_urls(
        &self,
        healthy: bool,
        stale_before: u64,
        require_active_instance: bool,
    ) -> RegistryResult<Vec<DiscoveryUrl>> {
        let repos = self.directory.repositories().await?;
        let due = repos.store().select(|u: &DiscoveryUrl| {
            u.is_healthy() == healthy && u.last_health_check.is_none_or(|t| t < stale_before)
        })?;
        if !require_active_instance {
            return Ok(due);
        }

        let mut active = Vec::with_capacity(due.len());
        for url in due {
            if repos.instances_of_url(url.id)?.iter().any(|i| i.active) {
                active.push(url);
            }
        }
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::tests::{registered, test_registry};

    fn entry(instance_id: RowId, version_id: RowId, name: &str, urls: &[(&str, Option<u16>)]) -> DiscoveryEntry {
        DiscoveryEntry {
            instance_id,
            version_id,
            friendly_name: name.to_string(),
            controller_name: format!("{name}Controller"),
            controller_route: format!("api/{}", name.to_lowercase()),
            urls: urls
                .iter()
                .map(|(u, p)| UrlEntry { url: u.to_string(), port: *p })
                .collect(),
            methods: vec![
                MethodEntry {
                    http_method: "GET".to_string(),
                    method_name: "List".to_string(),
                    template: "items".to_string(),
                },
                MethodEntry {
                    http_method: "POST".to_string(),
                    method_name: "Add".to_string(),
                    template: "items".to_string(),
                },
            ],
        }
    }

    fn set_health(registry: &crate::Registry, url: &str, status: &str, checked: Option<u64>) {
        let store = registry.discovery.directory().store();
        for mut row in store.select(|u: &DiscoveryUrl| u.url == url).unwrap() {
            row.health_status = status.to_string();
            row.last_health_check = checked;
            store.update(&row).unwrap();
        }
    }

    #[tokio::test]
    async fn add_records_links_urls_methods_and_version() {
        let registry = test_registry().await;
        let ids = registered(&registry, "billing", "/opt/billing").await;

        let item = registry
            .discovery
            .add_discovery_records(&entry(
                ids.instance_id,
                ids.version_id,
                "Billing",
                &[("https://a.example", Some(8443)), ("http://a.example", Some(8080))],
            ))
            .await
            .unwrap();
        assert!(item.id > 0);

        let repos = registry.discovery.directory().repositories().await.unwrap();
        assert_eq!(repos.urls_of_instance(ids.instance_id).unwrap().len(), 2);
        assert_eq!(repos.urls_of_discovery_item(item.id).unwrap().len(), 2);
        assert_eq!(repos.methods_of_discovery_item(item.id).unwrap().len(), 2);
        assert_eq!(repos.discovery_items_of_version(ids.version_id).unwrap()[0].id, item.id);
    }

    #[tokio::test]
    async fn add_records_twice_creates_no_duplicates() {
        let registry = test_registry().await;
        let ids = registered(&registry, "billing", "/opt/billing").await;
        let e = entry(ids.instance_id, ids.version_id, "Billing", &[("https://a", Some(1)), ("https://a", Some(1))]);

        registry.discovery.add_discovery_records(&e).await.unwrap();
        registry.discovery.add_discovery_records(&e).await.unwrap();

        let store = registry.discovery.directory().store();
        assert_eq!(store.count::<DiscoveryUrl>().unwrap(), 1);
        assert_eq!(store.count::<DiscoveryItem>().unwrap(), 1);
        assert_eq!(store.count::<DiscoveryMethod>().unwrap(), 2);
        assert_eq!(store.links(AssociationKind::InstanceUrl).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn friendly_names_differing_in_case_share_one_item() {
        let registry = test_registry().await;
        let ids = registered(&registry, "billing", "/opt/billing").await;
        let first = registry
            .discovery
            .add_discovery_records(&entry(ids.instance_id, ids.version_id, "Billing", &[("https://a.example", Some(1))]))
            .await
            .unwrap();
        let second = registry
            .discovery
            .add_discovery_records(&entry(ids.instance_id, ids.version_id, "billing", &[("https://b.example", Some(2))]))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.friendly_name, "Billing");

        let store = registry.discovery.directory().store();
        assert_eq!(store.count::<DiscoveryItem>().unwrap(), 1);

        let now = epoch_secs();
        set_health(&registry, "https://a.example", HEALTHY, Some(now));
        set_health(&registry, "https://b.example", HEALTHY, Some(now));
        let mut urls = registry.discovery.urls_for_friendly_name("billing", true).await.unwrap();
        urls.sort();
        assert_eq!(urls, ["https://a.example:1/api/billing", "https://b.example:2/api/billing"]);
    }

    #[tokio::test]
    async fn add_records_for_unknown_instance_fails() {
        let registry = test_registry().await;
        let err = registry
            .discovery
            .add_discovery_records(&entry(42, 1, "Billing", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn https_only_resolution_formats_and_dedups() {
        let registry = test_registry().await;
        let ids = registered(&registry, "foo", "/opt/foo").await;
        registry
            .discovery
            .add_discovery_records(&entry(
                ids.instance_id,
                ids.version_id,
                "Foo",
                &[("https://a", Some(8443)), ("https://a/", Some(8443)), ("http://a", Some(8080))],
            ))
            .await
            .unwrap();
        let now = epoch_secs();
        for u in ["https://a", "https://a/", "http://a"] {
            set_health(&registry, u, HEALTHY, Some(now));
        }

        let urls = registry.discovery.urls_for_friendly_name("Foo", true).await.unwrap();
        assert_eq!(urls, vec!["https://a:8443/api/foo".to_string()]);

        let all = registry.discovery.urls_for_friendly_name("Foo", false).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&"http://a:8080/api/foo".to_string()));
    }

    #[tokio::test]
    async fn resolution_skips_unhealthy_and_stale_urls() {
        let registry = test_registry().await;
        let ids = registered(&registry, "foo", "/opt/foo").await;
        registry
            .discovery
            .add_discovery_records(&entry(
                ids.instance_id,
                ids.version_id,
                "Foo",
                &[("https://fresh", None), ("https://stale", None), ("https://down", None), ("https://never", None)],
            ))
            .await
            .unwrap();
        let now = epoch_secs();
        set_health(&registry, "https://fresh", "healthy", Some(now));
        set_health(&registry, "https://stale", HEALTHY, Some(now - 600));
        set_health(&registry, "https://down", DOWN, Some(now));
        set_health(&registry, "https://never", HEALTHY, None);

        let urls = registry.discovery.urls_for_friendly_name("Foo", true).await.unwrap();
        assert_eq!(urls, vec!["https://fresh/api/foo".to_string()]);
    }

    #[tokio::test]
    async fn unknown_friendly_name_resolves_to_nothing() {
        let registry = test_registry().await;
        assert!(registry.discovery.urls_for_friendly_name("Nope", true).await.unwrap().is_empty());
        assert!(registry.discovery.routes("Nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn routes_list_methods() {
        let registry = test_registry().await;
        let ids = registered(&registry, "foo", "/opt/foo").await;
        registry
            .discovery
            .add_discovery_records(&entry(ids.instance_id, ids.version_id, "Foo", &[]))
            .await
            .unwrap();

        let routes = registry.discovery.routes("Foo").await.unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(
            routes[0],
            RouteInfo {
                http_method: "GET".to_string(),
                route: "items".to_string(),
                method_name: "List".to_string()
            }
        );
    }

    #[tokio::test]
    async fn is_active_requires_a_healthy_url_serving_the_name() {
        let registry = test_registry().await;
        let ids = registered(&registry, "foo", "/opt/foo").await;
        registry
            .discovery
            .add_discovery_records(&entry(ids.instance_id, ids.version_id, "Foo", &[("https://a", None)]))
            .await
            .unwrap();

        let check = registry.discovery.is_active("foo", ids.instance_id).await.unwrap();
        assert_eq!(check, ActiveCheck { is_available: true, is_active: false });

        set_health(&registry, "https://a", HEALTHY, Some(epoch_secs()));
        let check = registry.discovery.is_active("FOO", ids.instance_id).await.unwrap();
        assert!(check.is_active);

        let other = registry.discovery.is_active("Bar", ids.instance_id).await.unwrap();
        assert_eq!(other, ActiveCheck { is_available: true, is_active: false });

        let missing = registry.discovery.is_active("Foo", 999).await.unwrap();
        assert_eq!(missing, ActiveCheck::default());
    }

    #[tokio::test]
    async fn is_active_one_unhealthy_url_poisons_the_answer() {
        let registry = test_registry().await;
        let ids = registered(&registry, "foo", "/opt/foo").await;
        registry
            .discovery
            .add_discovery_records(&entry(
                ids.instance_id,
                ids.version_id,
                "Foo",
                &[("https://a", None), ("https://b", None)],
            ))
            .await
            .unwrap();
        let now = epoch_secs();
        set_health(&registry, "https://a", HEALTHY, Some(now));
        set_health(&registry, "https://b", DOWN, Some(now));

        // One healthy URL serves Foo, but the unhealthy one wins.
        let check = registry.discovery.is_active("Foo", ids.instance_id).await.unwrap();
        assert!(check.is_available);
        assert!(!check.is_active);
    }

    #[tokio::test]
    async fn candidates_split_by_health_and_staleness() {
        let registry = test_registry().await;
        let ids = registered(&registry, "foo", "/opt/foo").await;
        registry
            .discovery
            .add_discovery_records(&entry(
                ids.instance_id,
                ids.version_id,
                "Foo",
                &[("https://ok", None), ("https://old", None), ("https://new", None), ("https://bad", None)],
            ))
            .await
            .unwrap();
        let now = epoch_secs();
        set_health(&registry, "https://ok", HEALTHY, Some(now));
        set_health(&registry, "https://old", HEALTHY, Some(now - 100));
        set_health(&registry, "https://bad", DOWN, Some(now - 100));

        let stale_before = now - 30;
        let healthy = registry.discovery.candidate_urls(true, stale_before, false).await.unwrap();
        assert_eq!(healthy.iter().map(|u| u.url.as_str()).collect::<Vec<_>>(), ["https://old"]);

        let unhealthy = registry.discovery.candidate_urls(false, stale_before, false).await.unwrap();
        let mut names: Vec<_> = unhealthy.iter().map(|u| u.url.as_str()).collect();
        names.sort();
        assert_eq!(names, ["https://bad", "https://new"]);

        // The instance is not active yet.
        assert!(registry.discovery.candidate_urls(false, stale_before, true).await.unwrap().is_empty());
        registry.registration.set_active_flag(ids.instance_id, true).await.unwrap();
        assert_eq!(registry.discovery.candidate_urls(false, stale_before, true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn deactivation_empties_resolution() {
        let registry = test_registry().await;
        let ids = registered(&registry, "foo", "/opt/foo").await;
        registry
            .discovery
            .add_discovery_records(&entry(ids.instance_id, ids.version_id, "Foo", &[("https://a", Some(443))]))
            .await
            .unwrap();
        registry.registration.set_active_flag(ids.instance_id, true).await.unwrap();
        set_health(&registry, "https://a", HEALTHY, Some(epoch_secs()));
        assert_eq!(registry.discovery.urls_for_friendly_name("Foo", true).await.unwrap().len(), 1);

        registry.registration.set_active_flag(ids.instance_id, false).await.unwrap();

        assert!(registry.discovery.urls_for_friendly_name("Foo", true).await.unwrap().is_empty());
        let repos = registry.discovery.directory().repositories().await.unwrap();
        assert!(repos.urls_of_instance(ids.instance_id).unwrap().iter().all(|u| u.health_status == DOWN));
    }

    #[tokio::test]
    async fn update_url_rejects_unsaved_rows() {
        let registry = test_registry().await;
        let mut url = DiscoveryUrl::new("https://a", None);
        assert!(registry.discovery.update_url(&mut url).await.is_err());
    }
}
