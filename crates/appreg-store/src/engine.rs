//! Graph persistence engine.
//!
//! Saving a node writes the node itself, then walks every association edge
//! touching it: the far endpoint is saved first (recursively), then the join
//! row is inserted if absent. A [`CycleTracker`] scoped to the top-level call
//! guarantees each `(table, key)` pair is written at most once, so cyclic
//! graphs terminate.

use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};
use crate::graph::{EntityGraph, NodeIx, with_record};
use crate::schema::{Record, RowId};
use crate::store::Store;
use crate::tracker::CycleTracker;
use crate::types::AssociationRow;

/// What a single save did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The row was inserted or updated; its associations still need saving.
    Saved(RowId),
    /// Nothing further to do: already written in this operation, or a join row.
    Skipped,
}

impl Store {
    /// Save `roots` and everything reachable from them, sharing one tracker.
    pub fn save_graph(&self, graph: &mut EntityGraph, roots: &[NodeIx]) -> StoreResult<()> {
        let mut tracker = CycleTracker::new();
        for &root in roots {
            self.save_node(graph, root, &mut tracker)?;
        }
        debug!(nodes = graph.len(), rows = tracker.len(), "graph saved");
        Ok(())
    }

    /// Save a single record with its own tracker. Stamps the id on insert.
    pub fn save_record<T: Record>(&self, row: &mut T) -> StoreResult<SaveOutcome> {
        let mut tracker = CycleTracker::new();
        self.save_identity(row, &mut tracker)
    }

    /// Save one node, then descend into its associations if it was written.
    pub fn save_node(
        &self,
        graph: &mut EntityGraph,
        ix: NodeIx,
        tracker: &mut CycleTracker,
    ) -> StoreResult<SaveOutcome> {
        let outcome = with_record!(graph.node_mut(ix), row => self.save_identity(row, tracker))?;
        if outcome == SaveOutcome::Skipped {
            return Ok(outcome);
        }

        for edge in graph.edges_of(ix) {
            let other = if edge.left == ix { edge.right } else { edge.left };
            self.save_node(graph, other, tracker)?;
            let row = AssociationRow::new(
                edge.kind,
                graph.node(edge.left).id(),
                graph.node(edge.right).id(),
            );
            self.save_association(&row, tracker)?;
        }
        Ok(outcome)
    }

    /// Insert (id = 0) or update (id > 0, first visit) an identity record.
    pub fn save_identity<T: Record>(
        &self,
        row: &mut T,
        tracker: &mut CycleTracker,
    ) -> StoreResult<SaveOutcome> {
        let id = row.id();
        if id > 0 {
            if !tracker.visit(T::NAME, &id.to_string()) {
                trace!(table = T::NAME, id, "already saved in this operation");
                return Ok(SaveOutcome::Skipped);
            }
            self.update(row)?;
            return Ok(SaveOutcome::Saved(id));
        }

        let id = self.insert(row)?;
        if id == 0 {
            return Err(StoreError::DataIntegrity(format!(
                "insert into {} did not produce an id",
                T::NAME
            )));
        }
        row.set_id(id);
        tracker.visit(T::NAME, &id.to_string());
        Ok(SaveOutcome::Saved(id))
    }

    /// Insert a join row if absent. Never updates; always `Skipped`.
    pub fn save_association(
        &self,
        row: &AssociationRow,
        tracker: &mut CycleTracker,
    ) -> StoreResult<SaveOutcome> {
        if tracker.visit(row.kind.name(), &row.key()) {
            self.insert_link(row)?;
        }
        Ok(SaveOutcome::Skipped)
    }
}
