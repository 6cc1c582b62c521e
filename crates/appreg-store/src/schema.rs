//! Field descriptors and the `Record` trait shared by every identity entity.
//!
//! Each entity declares its columns once. The store uses the declaration to
//! find rows by natural key and to reject rows with missing required fields.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::tables::IdentityTable;

/// Surrogate row id. `0` means the row has not been persisted yet.
pub type RowId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Text,
    Integer,
    Boolean,
    Timestamp,
}

/// One column of an identity entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    /// Part of the natural key used by create-or-find.
    pub natural_key: bool,
}

impl FieldDescriptor {
    pub const fn id() -> Self {
        Self { name: "id", kind: FieldKind::Id, nullable: false, natural_key: false }
    }

    pub const fn key(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, nullable: false, natural_key: true }
    }

    pub const fn nullable_key(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, nullable: true, natural_key: true }
    }

    pub const fn column(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, nullable: false, natural_key: false }
    }

    pub const fn nullable(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, nullable: true, natural_key: false }
    }
}

/// A single field value, as compared by natural-key lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(u64),
    Boolean(bool),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

/// An entity with a surrogate id stored in its own table.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const NAME: &'static str;
    const TABLE: IdentityTable;
    const FIELDS: &'static [FieldDescriptor];

    fn id(&self) -> RowId;
    fn set_id(&mut self, id: RowId);

    /// Value of the named column; `Null` for unknown names.
    fn field(&self, name: &str) -> FieldValue;

    /// Values of the natural-key columns, in declaration order.
    fn natural_key(&self) -> Vec<FieldValue> {
        Self::FIELDS
            .iter()
            .filter(|f| f.natural_key)
            .map(|f| self.field(f.name))
            .collect()
    }

    /// Name of the first required column that holds no value.
    fn missing_required(&self) -> Option<&'static str> {
        Self::FIELDS
            .iter()
            .filter(|f| !f.nullable && f.kind != FieldKind::Id)
            .find(|f| self.field(f.name) == FieldValue::Null)
            .map(|f| f.name)
    }
}
