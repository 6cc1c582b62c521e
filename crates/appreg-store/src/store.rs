//! Store — redb-backed row persistence for the registry graph.
//!
//! Offers the primitive operations the graph engine is built on:
//! insert-returning-id, update-by-id, filtered select, count, and delete for
//! identity records, plus insert-if-absent and lookups for association rows.
//! Records are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, WriteTransaction};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::schema::{Record, RowId};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Run `$body` once for every identity table, with `$def` bound to its definition.
macro_rules! for_each_identity_table {
    ($def:ident => $body:block) => {{
        for $def in [
            RegistryItem::TABLE,
            RegistryVersion::TABLE,
            RegistryInstance::TABLE,
            DiscoveryItem::TABLE,
            DiscoveryMethod::TABLE,
            DiscoveryUrl::TABLE,
        ] $body
    }};
}

/// Thread-safe row store backed by redb.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    /// Committed row writes since open.
    writes: Arc<AtomicU64>,
}

impl Store {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        create_tables(&txn)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Number of row writes (inserts, updates, link inserts, deletes) committed
    /// through this handle and its clones.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn record_writes(&self, n: u64) {
        self.writes.fetch_add(n, Ordering::Relaxed);
    }

    // ── Schema maintenance ─────────────────────────────────────────

    /// Drop every table and create it again, empty.
    pub fn recreate_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for_each_identity_table!(def => {
            txn.delete_table(def).map_err(map_err!(Table))?;
        });
        for kind in AssociationKind::ALL {
            txn.delete_table(kind.table()).map_err(map_err!(Table))?;
        }
        txn.delete_table(SEQUENCES).map_err(map_err!(Table))?;
        create_tables(&txn)?;
        txn.commit().map_err(map_err!(Transaction))?;
        info!("store tables recreated");
        Ok(())
    }

    /// Delete every row, associations first. Id sequences keep counting.
    /// Returns the number of rows removed.
    pub fn purge(&self) -> StoreResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0u64;
        for kind in AssociationKind::ALL {
            let mut table = txn.open_table(kind.table()).map_err(map_err!(Table))?;
            let keys: Vec<(u64, u64)> = table
                .iter()
                .map_err(map_err!(Read))?
                .map(|entry| entry.map(|(k, _)| k.value()))
                .collect::<Result<_, _>>()
                .map_err(map_err!(Read))?;
            for key in &keys {
                table.remove(key).map_err(map_err!(Write))?;
            }
            removed += keys.len() as u64;
        }
        for_each_identity_table!(def => {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let keys: Vec<u64> = table
                .iter()
                .map_err(map_err!(Read))?
                .map(|entry| entry.map(|(k, _)| k.value()))
                .collect::<Result<_, _>>()
                .map_err(map_err!(Read))?;
            for key in &keys {
                table.remove(key).map_err(map_err!(Write))?;
            }
            removed += keys.len() as u64;
        });
        txn.commit().map_err(map_err!(Transaction))?;
        info!(removed, "store purged");
        Ok(removed)
    }

    // ── Identity records ───────────────────────────────────────────

    /// Insert a new record under a freshly generated id and return the id.
    /// The id already on `row` is ignored.
    pub fn insert<T: Record>(&self, row: &T) -> StoreResult<RowId> {
        if let Some(field) = row.missing_required() {
            return Err(StoreError::DataIntegrity(format!(
                "{} row is missing required field {field}",
                T::NAME
            )));
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id = {
            let mut sequences = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let last = sequences
                .get(T::NAME)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            let next = last + 1;
            sequences.insert(T::NAME, next).map_err(map_err!(Write))?;
            next
        };
        let mut stored = row.clone();
        stored.set_id(id);
        let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
        {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.record_writes(1);
        debug!(table = T::NAME, id, "row inserted");
        Ok(id)
    }

    /// Overwrite the record stored under `row.id()`. Returns false (and writes
    /// nothing) when no such row exists.
    pub fn update<T: Record>(&self, row: &T) -> StoreResult<bool> {
        let id = row.id();
        let value = serde_json::to_vec(row).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            existed = table.get(id).map_err(map_err!(Read))?.is_some();
            if existed {
                table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if existed {
            self.record_writes(1);
            debug!(table = T::NAME, id, "row updated");
        }
        Ok(existed)
    }

    /// Get a record by id.
    pub fn get<T: Record>(&self, id: RowId) -> StoreResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let row: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    /// All records matching `filter`, in id order.
    pub fn select<T: Record>(&self, filter: impl Fn(&T) -> bool) -> StoreResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let row: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if filter(&row) {
                results.push(row);
            }
        }
        Ok(results)
    }

    /// All records of one table, in id order.
    pub fn list<T: Record>(&self) -> StoreResult<Vec<T>> {
        self.select(|_: &T| true)
    }

    /// Number of rows in one identity table.
    pub fn count<T: Record>(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    /// Delete a record by id. Returns true if it existed.
    pub fn delete<T: Record>(&self, id: RowId) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if existed {
            self.record_writes(1);
        }
        debug!(table = T::NAME, id, existed, "row deleted");
        Ok(existed)
    }

    /// The stored row whose natural key equals `probe`'s, if any.
    pub fn find_by_natural_key<T: Record>(&self, probe: &T) -> StoreResult<Option<T>> {
        let key = probe.natural_key();
        Ok(self
            .select(|row: &T| row.natural_key() == key)?
            .into_iter()
            .next())
    }

    // ── Associations ───────────────────────────────────────────────

    /// Whether the join row exists.
    pub fn link_exists(&self, row: &AssociationRow) -> StoreResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(row.kind.table()).map_err(map_err!(Table))?;
        Ok(table
            .get((row.left, row.right))
            .map_err(map_err!(Read))?
            .is_some())
    }

    /// Insert the join row unless it already exists. Returns true if inserted.
    pub fn insert_link(&self, row: &AssociationRow) -> StoreResult<bool> {
        if row.left == 0 || row.right == 0 {
            return Err(StoreError::DataIntegrity(format!(
                "{} row {} references an unsaved record",
                row.kind.name(),
                row.key()
            )));
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted;
        {
            let mut table = txn.open_table(row.kind.table()).map_err(map_err!(Table))?;
            let key = (row.left, row.right);
            inserted = table.get(key).map_err(map_err!(Read))?.is_none();
            if inserted {
                table.insert(key, ()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if inserted {
            self.record_writes(1);
            debug!(table = row.kind.name(), key = %row.key(), "link inserted");
        }
        Ok(inserted)
    }

    /// Right-hand ids linked to `left`, ascending.
    pub fn right_ids(&self, kind: AssociationKind, left: RowId) -> StoreResult<Vec<RowId>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(kind.table()).map_err(map_err!(Table))?;
        let mut ids = Vec::new();
        for entry in table
            .range((left, 0u64)..=(left, u64::MAX))
            .map_err(map_err!(Read))?
        {
            let (key, _) = entry.map_err(map_err!(Read))?;
            ids.push(key.value().1);
        }
        Ok(ids)
    }

    /// Left-hand ids linked to `right`, ascending.
    pub fn left_ids(&self, kind: AssociationKind, right: RowId) -> StoreResult<Vec<RowId>> {
        Ok(self
            .links(kind)?
            .into_iter()
            .filter_map(|(l, r)| (r == right).then_some(l))
            .collect())
    }

    /// Every `(left, right)` pair of one association.
    pub fn links(&self, kind: AssociationKind) -> StoreResult<Vec<(RowId, RowId)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(kind.table()).map_err(map_err!(Table))?;
        let mut pairs = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            pairs.push(key.value());
        }
        Ok(pairs)
    }
}

/// Opening a table in a write transaction creates it if absent.
fn create_tables(txn: &WriteTransaction) -> StoreResult<()> {
    txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    for_each_identity_table!(def => {
        txn.open_table(def).map_err(map_err!(Table))?;
    });
    for kind in AssociationKind::ALL {
        txn.open_table(kind.table()).map_err(map_err!(Table))?;
    }
    Ok(())
}
