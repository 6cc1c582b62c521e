//! Entities and associations of the registry graph.
//!
//! Timestamps are UNIX epoch seconds.

use serde::{Deserialize, Serialize};

use crate::schema::{FieldDescriptor, FieldKind, FieldValue, Record, RowId};
use crate::tables::{self, AssociationTable, IdentityTable};

/// Status a probe reports for a reachable, working endpoint.
pub const HEALTHY: &str = "Healthy";

/// Status written for unreachable endpoints and deactivated instances.
pub const DOWN: &str = "Down";

// ── Identity entities ──────────────────────────────────────────

/// A registered application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryItem {
    pub id: RowId,
    pub application_name: String,
    pub first_install: u64,
}

/// One (version, hash) build of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryVersion {
    pub id: RowId,
    pub version: String,
    pub hash: String,
    pub previous_version_id: Option<RowId>,
    pub build_time: Option<u64>,
    pub first_install: u64,
}

/// A running (or previously running) copy of a version on one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryInstance {
    pub id: RowId,
    pub machine_name: String,
    pub install_path: String,
    pub heartbeats: u64,
    pub last_heartbeat: Option<u64>,
    pub last_start: u64,
    pub install_time: u64,
    pub active: bool,
}

/// A named service surface (controller) exposed by applications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryItem {
    pub id: RowId,
    pub friendly_name: String,
    pub controller_name: String,
    pub controller_route: String,
}

/// One route of a discovery item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMethod {
    pub id: RowId,
    pub http_method: String,
    pub method_name: String,
    pub template: String,
}

/// A base URL an instance listens on, with its last probed health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryUrl {
    pub id: RowId,
    pub url: String,
    pub port: Option<u16>,
    /// Empty until the first probe.
    pub health_status: String,
    pub last_health_check: Option<u64>,
}

impl RegistryItem {
    pub fn new(application_name: &str, now: u64) -> Self {
        Self { id: 0, application_name: application_name.to_string(), first_install: now }
    }
}

impl RegistryVersion {
    pub fn new(version: &str, hash: &str, build_time: Option<u64>, now: u64) -> Self {
        Self {
            id: 0,
            version: version.to_string(),
            hash: hash.to_string(),
            previous_version_id: None,
            build_time,
            first_install: now,
        }
    }
}

impl RegistryInstance {
    /// A new instance counts its registration as the first heartbeat.
    pub fn new(install_path: &str, machine_name: &str, now: u64) -> Self {
        Self {
            id: 0,
            machine_name: machine_name.to_string(),
            install_path: install_path.to_string(),
            heartbeats: 1,
            last_heartbeat: Some(now),
            last_start: now,
            install_time: now,
            active: false,
        }
    }
}

impl DiscoveryItem {
    pub fn new(friendly_name: &str, controller_name: &str, controller_route: &str) -> Self {
        Self {
            id: 0,
            friendly_name: friendly_name.to_string(),
            controller_name: controller_name.to_string(),
            controller_route: controller_route.to_string(),
        }
    }
}

impl DiscoveryMethod {
    pub fn new(http_method: &str, method_name: &str, template: &str) -> Self {
        Self {
            id: 0,
            http_method: http_method.to_string(),
            method_name: method_name.to_string(),
            template: template.to_string(),
        }
    }
}

impl DiscoveryUrl {
    pub fn new(url: &str, port: Option<u16>) -> Self {
        Self {
            id: 0,
            url: url.to_string(),
            port,
            health_status: String::new(),
            last_health_check: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health_status.eq_ignore_ascii_case(HEALTHY)
    }

    pub fn is_https(&self) -> bool {
        self.url
            .get(..8)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
    }

    /// `url[:port]`, without a trailing slash. Port 0 counts as absent.
    pub fn base(&self) -> String {
        let url = self.url.trim_end_matches('/');
        match self.port {
            Some(port) if port > 0 => format!("{url}:{port}"),
            _ => url.to_string(),
        }
    }
}

// ── Record impls ───────────────────────────────────────────────

impl Record for RegistryItem {
    const NAME: &'static str = "registry_items";
    const TABLE: IdentityTable = tables::REGISTRY_ITEMS;
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::id(),
        FieldDescriptor::key("application_name", FieldKind::Text),
        FieldDescriptor::column("first_install", FieldKind::Timestamp),
    ];

    fn id(&self) -> RowId {
        self.id
    }

    fn set_id(&mut self, id: RowId) {
        self.id = id;
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => self.id.into(),
            "application_name" => self.application_name.as_str().into(),
            "first_install" => self.first_install.into(),
            _ => FieldValue::Null,
        }
    }
}

impl Record for RegistryVersion {
    const NAME: &'static str = "registry_versions";
    const TABLE: IdentityTable = tables::REGISTRY_VERSIONS;
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::id(),
        FieldDescriptor::key("version", FieldKind::Text),
        FieldDescriptor::key("hash", FieldKind::Text),
        FieldDescriptor::nullable("previous_version_id", FieldKind::Id),
        FieldDescriptor::nullable("build_time", FieldKind::Timestamp),
        FieldDescriptor::column("first_install", FieldKind::Timestamp),
    ];

    fn id(&self) -> RowId {
        self.id
    }

    fn set_id(&mut self, id: RowId) {
        self.id = id;
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => self.id.into(),
            "version" => self.version.as_str().into(),
            "hash" => self.hash.as_str().into(),
            "previous_version_id" => self.previous_version_id.into(),
            "build_time" => self.build_time.into(),
            "first_install" => self.first_install.into(),
            _ => FieldValue::Null,
        }
    }
}

impl Record for RegistryInstance {
    const NAME: &'static str = "registry_instances";
    const TABLE: IdentityTable = tables::REGISTRY_INSTANCES;
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::id(),
        FieldDescriptor::key("install_path", FieldKind::Text),
        FieldDescriptor::key("machine_name", FieldKind::Text),
        FieldDescriptor::column("heartbeats", FieldKind::Integer),
        FieldDescriptor::nullable("last_heartbeat", FieldKind::Timestamp),
        FieldDescriptor::column("last_start", FieldKind::Timestamp),
        FieldDescriptor::column("install_time", FieldKind::Timestamp),
        FieldDescriptor::column("active", FieldKind::Boolean),
    ];

    fn id(&self) -> RowId {
        self.id
    }

    fn set_id(&mut self, id: RowId) {
        self.id = id;
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => self.id.into(),
            "machine_name" => self.machine_name.as_str().into(),
            "install_path" => self.install_path.as_str().into(),
            "heartbeats" => self.heartbeats.into(),
            "last_heartbeat" => self.last_heartbeat.into(),
            "last_start" => self.last_start.into(),
            "install_time" => self.install_time.into(),
            "active" => self.active.into(),
            _ => FieldValue::Null,
        }
    }
}

impl Record for DiscoveryItem {
    const NAME: &'static str = "discovery_items";
    const TABLE: IdentityTable = tables::DISCOVERY_ITEMS;
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::id(),
        FieldDescriptor::key("friendly_name", FieldKind::Text),
        FieldDescriptor::column("controller_name", FieldKind::Text),
        FieldDescriptor::column("controller_route", FieldKind::Text),
    ];

    fn id(&self) -> RowId {
        self.id
    }

    fn set_id(&mut self, id: RowId) {
        self.id = id;
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => self.id.into(),
            "friendly_name" => self.friendly_name.as_str().into(),
            "controller_name" => self.controller_name.as_str().into(),
            "controller_route" => self.controller_route.as_str().into(),
            _ => FieldValue::Null,
        }
    }
}

impl Record for DiscoveryMethod {
    const NAME: &'static str = "discovery_methods";
    const TABLE: IdentityTable = tables::DISCOVERY_METHODS;
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::id(),
        FieldDescriptor::key("http_method", FieldKind::Text),
        FieldDescriptor::key("method_name", FieldKind::Text),
        FieldDescriptor::key("template", FieldKind::Text),
    ];

    fn id(&self) -> RowId {
        self.id
    }

    fn set_id(&mut self, id: RowId) {
        self.id = id;
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => self.id.into(),
            "http_method" => self.http_method.as_str().into(),
            "method_name" => self.method_name.as_str().into(),
            "template" => self.template.as_str().into(),
            _ => FieldValue::Null,
        }
    }
}

impl Record for DiscoveryUrl {
    const NAME: &'static str = "discovery_urls";
    const TABLE: IdentityTable = tables::DISCOVERY_URLS;
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::id(),
        FieldDescriptor::key("url", FieldKind::Text),
        FieldDescriptor::nullable_key("port", FieldKind::Integer),
        FieldDescriptor::column("health_status", FieldKind::Text),
        FieldDescriptor::nullable("last_health_check", FieldKind::Timestamp),
    ];

    fn id(&self) -> RowId {
        self.id
    }

    fn set_id(&mut self, id: RowId) {
        self.id = id;
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => self.id.into(),
            "url" => self.url.as_str().into(),
            "port" => self.port.map(u64::from).into(),
            "health_status" => self.health_status.as_str().into(),
            "last_health_check" => self.last_health_check.into(),
            _ => FieldValue::Null,
        }
    }
}

// ── Associations ───────────────────────────────────────────────

/// The six join tables of the graph. Each row links a left id to a right id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationKind {
    /// RegistryItem → RegistryVersion
    ItemVersion,
    /// RegistryVersion → RegistryInstance
    VersionInstance,
    /// RegistryInstance → DiscoveryUrl
    InstanceUrl,
    /// DiscoveryUrl → DiscoveryItem
    UrlDiscoveryItem,
    /// DiscoveryMethod → DiscoveryItem
    MethodDiscoveryItem,
    /// RegistryVersion → DiscoveryItem
    VersionDiscoveryItem,
}

impl AssociationKind {
    pub const ALL: [AssociationKind; 6] = [
        AssociationKind::ItemVersion,
        AssociationKind::VersionInstance,
        AssociationKind::InstanceUrl,
        AssociationKind::UrlDiscoveryItem,
        AssociationKind::MethodDiscoveryItem,
        AssociationKind::VersionDiscoveryItem,
    ];

    pub fn table(self) -> AssociationTable {
        match self {
            AssociationKind::ItemVersion => tables::ITEM_VERSIONS,
            AssociationKind::VersionInstance => tables::VERSION_INSTANCES,
            AssociationKind::InstanceUrl => tables::INSTANCE_URLS,
            AssociationKind::UrlDiscoveryItem => tables::URL_DISCOVERY_ITEMS,
            AssociationKind::MethodDiscoveryItem => tables::METHOD_DISCOVERY_ITEMS,
            AssociationKind::VersionDiscoveryItem => tables::VERSION_DISCOVERY_ITEMS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AssociationKind::ItemVersion => "item_versions",
            AssociationKind::VersionInstance => "version_instances",
            AssociationKind::InstanceUrl => "instance_urls",
            AssociationKind::UrlDiscoveryItem => "url_discovery_items",
            AssociationKind::MethodDiscoveryItem => "method_discovery_items",
            AssociationKind::VersionDiscoveryItem => "version_discovery_items",
        }
    }

    /// Identity tables on the (left, right) side of this association.
    pub fn endpoints(self) -> (&'static str, &'static str) {
        match self {
            AssociationKind::ItemVersion => (RegistryItem::NAME, RegistryVersion::NAME),
            AssociationKind::VersionInstance => (RegistryVersion::NAME, RegistryInstance::NAME),
            AssociationKind::InstanceUrl => (RegistryInstance::NAME, DiscoveryUrl::NAME),
            AssociationKind::UrlDiscoveryItem => (DiscoveryUrl::NAME, DiscoveryItem::NAME),
            AssociationKind::MethodDiscoveryItem => (DiscoveryMethod::NAME, DiscoveryItem::NAME),
            AssociationKind::VersionDiscoveryItem => (RegistryVersion::NAME, DiscoveryItem::NAME),
        }
    }
}

/// One join row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssociationRow {
    pub kind: AssociationKind,
    pub left: RowId,
    pub right: RowId,
}

impl AssociationRow {
    pub fn new(kind: AssociationKind, left: RowId, right: RowId) -> Self {
        Self { kind, left, right }
    }

    /// Comma-joined foreign keys.
    pub fn key(&self) -> String {
        format!("{},{}", self.left, self.right)
    }
}
