//! Initiator-side view of reservations in flight.
//!
//! The reservation initiator records each granted block here so the
//! confirmation supervisors can find and promote it. Entries live at
//! most a full steady lifetime and are swept at the same period.

use std::collections::HashMap;

use parking_lot::Mutex;
use sibra_proto::{
    Block, Index, MAX_STEADY_TICKS, ResvId, State, TICK_INTERVAL_SECS,
};

/// Lifetime of a local reservation record.
pub const LOCAL_RESV_EXPIRY_MS: u64 = MAX_STEADY_TICKS as u64 * TICK_INTERVAL_SECS * 1_000;

/// Interval between local-record sweeps.
pub const LOCAL_GC_INTERVAL_MS: u64 = LOCAL_RESV_EXPIRY_MS;

/// One granted reservation block as seen by the initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResvEntry {
    /// Reservation id.
    pub id: ResvId,
    /// Confirmation progress of the index.
    pub state: State,
    /// The granted block, including stamped opaque fields.
    pub block: Block,
    /// When the grant was recorded, unix milliseconds.
    pub creation_ms: u64,
}

/// Map of local reservation records keyed by `(id, index)`.
#[derive(Debug, Default)]
pub struct LocalResvs {
    inner: Mutex<HashMap<(ResvId, u8), (LocalResvEntry, u64)>>,
}

impl LocalResvs {
    /// Record a granted block.
    pub fn set(&self, id: ResvId, idx: Index, entry: LocalResvEntry, now_ms: u64) {
        self.inner
            .lock()
            .insert((id, idx.get()), (entry, now_ms + LOCAL_RESV_EXPIRY_MS));
    }

    /// Snapshot of one record.
    pub fn get(&self, id: ResvId, idx: Index) -> Option<LocalResvEntry> {
        self.inner.lock().get(&(id, idx.get())).map(|(entry, _)| entry.clone())
    }

    /// Update the confirmation state of a record. Returns whether the
    /// record exists.
    pub fn set_state(&self, id: ResvId, idx: Index, state: State) -> bool {
        let mut map = self.inner.lock();
        match map.get_mut(&(id, idx.get())) {
            Some((entry, _)) => {
                entry.state = state;
                true
            },
            None => false,
        }
    }

    /// All records for a reservation, ordered by index.
    pub fn get_all(&self, id: ResvId) -> Vec<LocalResvEntry> {
        let map = self.inner.lock();
        let mut out: Vec<LocalResvEntry> = (0..sibra_proto::NUM_INDEXES)
            .filter_map(|idx| map.get(&(id, idx)).map(|(entry, _)| entry.clone()))
            .collect();
        out.sort_by_key(|entry| entry.block.info.index);
        out
    }

    /// Drop a record.
    pub fn delete(&self, id: ResvId, idx: Index) {
        self.inner.lock().remove(&(id, idx.get()));
    }

    /// Remove every expired record.
    pub fn purge_expired(&self, now_ms: u64) {
        self.inner.lock().retain(|_, (_, expires)| *expires > now_ms);
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no records exist.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
