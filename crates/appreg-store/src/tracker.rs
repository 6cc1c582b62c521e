//! Per-operation record of which rows a graph save has already written.

use std::collections::HashMap;

/// Visited set keyed by `(table, key)`.
///
/// The key is the row id for identity records and the comma-joined foreign
/// keys for association rows. One tracker lives for exactly one top-level
/// save; it is never shared between operations.
#[derive(Debug, Default)]
pub struct CycleTracker {
    visits: HashMap<(&'static str, String), u32>,
}

impl CycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a visit. Returns true only the first time a pair is seen.
    pub fn visit(&mut self, table: &'static str, key: &str) -> bool {
        let count = self.visits.entry((table, key.to_string())).or_insert(0);
        *count += 1;
        *count == 1
    }

    pub fn has_visited(&self, table: &'static str, key: &str) -> bool {
        self.visits.contains_key(&(table, key.to_string()))
    }

    /// How many times a pair was offered, including the first.
    pub fn visits(&self, table: &'static str, key: &str) -> u32 {
        self.visits
            .get(&(table, key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Number of distinct pairs visited.
    pub fn len(&self) -> usize {
        self.visits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }
}
