//! Entity repositories: create-or-find by natural key and typed navigation
//! across association tables.
//!
//! [`Directory`] owns the store and its readiness gate; every repository
//! handle is obtained through [`Directory::repositories`], which waits for
//! the gate to open.

use std::sync::Arc;

use crate::error::StoreResult;
use crate::gate::ReadinessGate;
use crate::schema::{Record, RowId};
use crate::store::Store;
use crate::types::*;

/// Work done once, before the store opens for business.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitOptions {
    /// Drop and recreate every table.
    pub upgrade: bool,
    /// Delete every row.
    pub purge: bool,
}

/// The store behind its readiness gate. Cheap to clone.
#[derive(Clone)]
pub struct Directory {
    store: Store,
    gate: Arc<ReadinessGate>,
}

impl Directory {
    pub fn new(store: Store) -> Self {
        Self { store, gate: Arc::new(ReadinessGate::new()) }
    }

    /// Run the one-time upgrade/purge and open the gate. Idempotent.
    pub async fn initialize(&self, options: InitOptions) -> StoreResult<()> {
        let store = self.store.clone();
        self.gate
            .open(move || {
                if options.upgrade {
                    store.recreate_tables()?;
                }
                if options.purge {
                    store.purge()?;
                }
                Ok(())
            })
            .await
    }

    /// Repository access; parks until the gate is open.
    pub async fn repositories(&self) -> StoreResult<Repositories<'_>> {
        self.gate.wait_ready().await?;
        Ok(Repositories { store: &self.store })
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Raw store access, bypassing the gate.
    pub fn store(&self) -> &Store {
        &self.store
    }
}

/// Typed queries over an open store.
#[derive(Clone, Copy)]
pub struct Repositories<'a> {
    store: &'a Store,
}

impl<'a> Repositories<'a> {
    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// Stored row with `probe`'s natural key, or `probe` itself (id 0) if none.
    pub fn create_or_find<T: Record>(&self, probe: T) -> StoreResult<T> {
        Ok(self.store.find_by_natural_key(&probe)?.unwrap_or(probe))
    }

    pub fn get<T: Record>(&self, id: RowId) -> StoreResult<Option<T>> {
        self.store.get(id)
    }

    // ── Create-or-find ─────────────────────────────────────────────

    pub fn item(&self, application_name: &str, now: u64) -> StoreResult<RegistryItem> {
        self.create_or_find(RegistryItem::new(application_name, now))
    }

    pub fn version(
        &self,
        version: &str,
        hash: &str,
        build_time: Option<u64>,
        now: u64,
    ) -> StoreResult<RegistryVersion> {
        self.create_or_find(RegistryVersion::new(version, hash, build_time, now))
    }

    pub fn instance(
        &self,
        install_path: &str,
        machine_name: &str,
        now: u64,
    ) -> StoreResult<RegistryInstance> {
        self.create_or_find(RegistryInstance::new(install_path, machine_name, now))
    }

    /// Friendly names match the way [`Self::discovery_item_by_name`] does.
    pub fn discovery_item(
        &self,
        friendly_name: &str,
        controller_name: &str,
        controller_route: &str,
    ) -> StoreResult<DiscoveryItem> {
        match self.discovery_item_by_name(friendly_name)? {
            Some(found) => Ok(found),
            None => Ok(DiscoveryItem::new(friendly_name, controller_name, controller_route)),
        }
    }

    pub fn method(
        &self,
        http_method: &str,
        method_name: &str,
        template: &str,
    ) -> StoreResult<DiscoveryMethod> {
        self.create_or_find(DiscoveryMethod::new(http_method, method_name, template))
    }

    pub fn url(&self, url: &str, port: Option<u16>) -> StoreResult<DiscoveryUrl> {
        self.create_or_find(DiscoveryUrl::new(url, port))
    }

    /// Lookup ignores ASCII case; the lowest id wins if several match.
    pub fn discovery_item_by_name(&self, friendly_name: &str) -> StoreResult<Option<DiscoveryItem>> {
        Ok(self
            .store
            .select(|d: &DiscoveryItem| d.friendly_name.eq_ignore_ascii_case(friendly_name))?
            .into_iter()
            .next())
    }

    // ── Navigation ─────────────────────────────────────────────────

    /// Rows linked on the right of `left`, in id order. Dangling ids are skipped.
    pub fn linked_right<T: Record>(&self, kind: AssociationKind, left: RowId) -> StoreResult<Vec<T>> {
        self.load_all(self.store.right_ids(kind, left)?)
    }

    /// Rows linked on the left of `right`, in id order. Dangling ids are skipped.
    pub fn linked_left<T: Record>(&self, kind: AssociationKind, right: RowId) -> StoreResult<Vec<T>> {
        self.load_all(self.store.left_ids(kind, right)?)
    }

    fn load_all<T: Record>(&self, ids: Vec<RowId>) -> StoreResult<Vec<T>> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = self.store.get(id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub fn versions_of_item(&self, item_id: RowId) -> StoreResult<Vec<RegistryVersion>> {
        self.linked_right(AssociationKind::ItemVersion, item_id)
    }

    pub fn items_of_version(&self, version_id: RowId) -> StoreResult<Vec<RegistryItem>> {
        self.linked_left(AssociationKind::ItemVersion, version_id)
    }

    pub fn instances_of_version(&self, version_id: RowId) -> StoreResult<Vec<RegistryInstance>> {
        self.linked_right(AssociationKind::VersionInstance, version_id)
    }

    pub fn versions_of_instance(&self, instance_id: RowId) -> StoreResult<Vec<RegistryVersion>> {
        self.linked_left(AssociationKind::VersionInstance, instance_id)
    }

    pub fn urls_of_instance(&self, instance_id: RowId) -> StoreResult<Vec<DiscoveryUrl>> {
        self.linked_right(AssociationKind::InstanceUrl, instance_id)
    }

    pub fn instances_of_url(&self, url_id: RowId) -> StoreResult<Vec<RegistryInstance>> {
        self.linked_left(AssociationKind::InstanceUrl, url_id)
    }

    pub fn discovery_items_of_url(&self, url_id: RowId) -> StoreResult<Vec<DiscoveryItem>> {
        self.linked_right(AssociationKind::UrlDiscoveryItem, url_id)
    }

    pub fn urls_of_discovery_item(&self, item_id: RowId) -> StoreResult<Vec<DiscoveryUrl>> {
        self.linked_left(AssociationKind::UrlDiscoveryItem, item_id)
    }

    pub fn methods_of_discovery_item(&self, item_id: RowId) -> StoreResult<Vec<DiscoveryMethod>> {
        self.linked_left(AssociationKind::MethodDiscoveryItem, item_id)
    }

    pub fn discovery_items_of_version(&self, version_id: RowId) -> StoreResult<Vec<DiscoveryItem>> {
        self.linked_right(AssociationKind::VersionDiscoveryItem, version_id)
    }

    pub fn versions_of_discovery_item(&self, item_id: RowId) -> StoreResult<Vec<RegistryVersion>> {
        self.linked_left(AssociationKind::VersionDiscoveryItem, item_id)
    }
}
