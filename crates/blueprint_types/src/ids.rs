// Ids - Node and pin identifiers
//
// Nodes and pins share one id namespace per graph. Ids are handed out by a
// monotonic generator whose watermark is persisted with the graph.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifier of a node or pin within one graph
pub type IdType = u32;

/// Id that is never issued; stands for "no id"
pub const INVALID_ID: IdType = 0;

// ─────────────────────────────────────────────────────────────────────────────
// Id Generator
// ─────────────────────────────────────────────────────────────────────────────

/// Monotonic id source shared by nodes and pins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdGenerator {
    next: IdType,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Issue the next id
    pub fn generate(&mut self) -> IdType {
        let id = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        id
    }

    /// Watermark: the id the next call to `generate` returns
    pub fn state(&self) -> IdType {
        self.next
    }

    /// Restore a persisted watermark
    pub fn set_state(&mut self, state: IdType) {
        self.next = state.max(1);
    }

    /// Make sure `id` is never issued again
    pub fn observe(&mut self, id: IdType) {
        if id >= self.next {
            self.next = id.saturating_add(1);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Id Map
// ─────────────────────────────────────────────────────────────────────────────

/// Old → new id translation used when saving or importing fragments
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    map: HashMap<IdType, IdType>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: IdType, to: IdType) {
        self.map.insert(from, to);
    }

    /// Translated id, or `id` itself when unmapped
    pub fn resolve(&self, id: IdType) -> IdType {
        self.map.get(&id).copied().unwrap_or(id)
    }

    /// Translated id only when mapped
    pub fn get(&self, id: IdType) -> Option<IdType> {
        self.map.get(&id).copied()
    }

    pub fn contains(&self, id: IdType) -> bool {
        self.map.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_is_monotonic() {
        let mut ids = IdGenerator::new();
        let a = ids.generate();
        let b = ids.generate();
        assert_eq!(a, 1);
        assert!(b > a);
        assert_eq!(ids.state(), 3);
    }

    #[test]
    fn test_generator_state_roundtrip() {
        let mut ids = IdGenerator::new();
        ids.set_state(40);
        assert_eq!(ids.generate(), 40);
        ids.observe(100);
        assert_eq!(ids.generate(), 101);
        ids.observe(5);
        assert_eq!(ids.state(), 102);
    }

    #[test]
    fn test_generator_never_issues_zero() {
        let mut ids = IdGenerator::new();
        ids.set_state(0);
        assert_ne!(ids.generate(), INVALID_ID);
    }

    #[test]
    fn test_id_map() {
        let mut map = IdMap::new();
        map.insert(3, 30);
        assert_eq!(map.resolve(3), 30);
        assert_eq!(map.resolve(4), 4);
        assert_eq!(map.get(4), None);
    }
}
