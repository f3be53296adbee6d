//! Explicit mapping from entity class to its collaborator.

use crate::error::{SyncError, SyncResult};
use std::collections::BTreeMap;
use wattsync_protocol::EntityClass;

/// A per-class lookup table, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Registry<T> {
    entries: BTreeMap<EntityClass, T>,
}

impl<T> Registry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registers `value` for `class`, replacing any previous entry.
    pub fn with(mut self, class: EntityClass, value: T) -> Self {
        self.entries.insert(class, value);
        self
    }

    /// Registers `value` for `class` in place.
    pub fn insert(&mut self, class: EntityClass, value: T) -> Option<T> {
        self.entries.insert(class, value)
    }

    /// Returns the entry for `class`.
    pub fn get(&self, class: EntityClass) -> SyncResult<&T> {
        self.entries
            .get(&class)
            .ok_or(SyncError::UnknownClass(class))
    }

    /// Registered classes, in dispatch order.
    pub fn classes(&self) -> impl Iterator<Item = EntityClass> + '_ {
        self.entries.keys().copied()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
