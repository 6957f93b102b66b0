//! Temporary-index table.
//!
//! Every admitted steady index starts as `Temp` with a matching slot
//! here. If the index confirmation does not arrive within the TTL, a
//! periodic sweep returns the expired slots and the caller collects the
//! indexes outside this table's lock, so eviction never re-enters the
//! admission lock from below.

use std::collections::HashMap;

use parking_lot::Mutex;
use sibra_proto::{Index, ResvId};

/// Default time a temporary index may stay unconfirmed.
pub const TEMP_RESV_EXPIRY_MS: u64 = 1_000;

/// Interval between eviction sweeps.
pub const TEMP_GC_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Copy)]
struct TempSlot {
    expires_at_ms: u64,
}

/// Table of unconfirmed `(reservation, index)` pairs.
#[derive(Debug, Default)]
pub struct TempTable {
    inner: Mutex<HashMap<(ResvId, u8), TempSlot>>,
}

impl TempTable {
    /// Track a freshly admitted index for `ttl_ms`.
    pub fn set(&self, id: ResvId, idx: Index, ttl_ms: u64, now_ms: u64) {
        self.inner
            .lock()
            .insert((id, idx.get()), TempSlot { expires_at_ms: now_ms + ttl_ms });
    }

    /// Drop a slot after its index was confirmed. Returns whether the
    /// slot was still present.
    pub fn delete(&self, id: ResvId, idx: Index) -> bool {
        self.inner.lock().remove(&(id, idx.get())).is_some()
    }

    /// Whether a live slot exists for the pair.
    pub fn contains(&self, id: ResvId, idx: Index, now_ms: u64) -> bool {
        self.inner
            .lock()
            .get(&(id, idx.get()))
            .is_some_and(|slot| slot.expires_at_ms > now_ms)
    }

    /// Remove every expired slot and return the affected pairs for
    /// collection by the caller.
    pub fn purge_expired(&self, now_ms: u64) -> Vec<(ResvId, Index)> {
        let mut map = self.inner.lock();
        let expired: Vec<(ResvId, u8)> = map
            .iter()
            .filter(|(_, slot)| slot.expires_at_ms <= now_ms)
            .map(|(key, _)| *key)
            .collect();
        let mut out = Vec::with_capacity(expired.len());
        for key in expired {
            map.remove(&key);
            if let Ok(idx) = Index::new(key.1) {
                out.push((key.0, idx));
            }
        }
        out
    }

    /// Number of tracked slots.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no slots are tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
