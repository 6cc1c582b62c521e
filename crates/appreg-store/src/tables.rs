//! redb table definitions for the appreg store.
//!
//! Identity tables use `u64` row ids and `&[u8]` values (JSON-serialized
//! records). Association tables are keyed by `(left_id, right_id)` and
//! carry no value.

use redb::TableDefinition;

/// Identity table: row id → JSON record.
pub type IdentityTable = TableDefinition<'static, u64, &'static [u8]>;

/// Association table: `(left_id, right_id)` → nothing.
pub type AssociationTable = TableDefinition<'static, (u64, u64), ()>;

/// Last id handed out, keyed by identity table name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub const REGISTRY_ITEMS: IdentityTable = TableDefinition::new("registry_items");
pub const REGISTRY_VERSIONS: IdentityTable = TableDefinition::new("registry_versions");
pub const REGISTRY_INSTANCES: IdentityTable = TableDefinition::new("registry_instances");
pub const DISCOVERY_ITEMS: IdentityTable = TableDefinition::new("discovery_items");
pub const DISCOVERY_METHODS: IdentityTable = TableDefinition::new("discovery_methods");
pub const DISCOVERY_URLS: IdentityTable = TableDefinition::new("discovery_urls");

pub const ITEM_VERSIONS: AssociationTable = TableDefinition::new("item_versions");
pub const VERSION_INSTANCES: AssociationTable = TableDefinition::new("version_instances");
pub const INSTANCE_URLS: AssociationTable = TableDefinition::new("instance_urls");
pub const URL_DISCOVERY_ITEMS: AssociationTable = TableDefinition::new("url_discovery_items");
pub const METHOD_DISCOVERY_ITEMS: AssociationTable =
    TableDefinition::new("method_discovery_items");
pub const VERSION_DISCOVERY_ITEMS: AssociationTable =
    TableDefinition::new("version_discovery_items");
