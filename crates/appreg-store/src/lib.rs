//! appreg-store — graph persistence for the application registry.
//!
//! Backed by [redb](https://docs.rs/redb). Six identity tables hold the
//! registry entities (items, versions, instances, discovery items, methods,
//! URLs) and six association tables link them.
//!
//! # Architecture
//!
//! ```text
//! Directory (readiness gate)
//!   └── Repositories   create-or-find by natural key, typed navigation
//!         └── Store    insert/update/select/count/delete, join rows
//!               └── engine: save an EntityGraph with a CycleTracker
//! ```
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns. The
//! `Store` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`) and can
//! be shared across async tasks.

pub mod engine;
pub mod error;
pub mod gate;
pub mod graph;
pub mod repository;
pub mod schema;
pub mod store;
pub mod tables;
pub mod tracker;
pub mod types;

pub use engine::SaveOutcome;
pub use error::{StoreError, StoreResult};
pub use gate::{GateState, ReadinessGate};
pub use graph::{Entity, EntityGraph, GraphNode, NodeIx};
pub use repository::{Directory, InitOptions, Repositories};
pub use schema::{FieldDescriptor, FieldKind, FieldValue, Record, RowId};
pub use store::Store;
pub use tracker::CycleTracker;
pub use types::*;
