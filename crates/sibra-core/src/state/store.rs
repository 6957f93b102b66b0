//! Keyed collection of steady reservation entries.
//!
//! The store exclusively owns steady entries; everything else holds
//! `Arc` handles looked up by id. Write operations that modify indexes
//! take the store lock before the per-entry lock, never the reverse.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use sibra_proto::ResvId;

use crate::{error::StateError, state::steady::SteadyEntry};

/// Map from reservation id to steady entry.
#[derive(Debug, Default)]
pub struct SteadyMap {
    inner: RwLock<HashMap<ResvId, Arc<SteadyEntry>>>,
}

impl SteadyMap {
    /// Look up an entry by id.
    pub fn get(&self, id: ResvId) -> Option<Arc<SteadyEntry>> {
        self.inner.read().get(&id).cloned()
    }

    /// Insert a fresh entry; ids are unique.
    pub fn insert(&self, entry: Arc<SteadyEntry>) -> Result<(), StateError> {
        let mut map = self.inner.write();
        if map.contains_key(&entry.id) {
            return Err(StateError::ResvExists { id: entry.id });
        }
        map.insert(entry.id, entry);
        Ok(())
    }

    /// Remove and return an entry.
    pub fn remove(&self, id: ResvId) -> Option<Arc<SteadyEntry>> {
        self.inner.write().remove(&id)
    }

    /// Snapshot of all reservation ids.
    pub fn ids(&self) -> Vec<ResvId> {
        self.inner.read().keys().copied().collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
