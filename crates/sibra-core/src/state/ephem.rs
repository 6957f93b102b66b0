//! Ephemeral reservation entries.
//!
//! An ephemeral entry lives on its parent steady entry and tracks the
//! active index plus the previous one during a renewal. At a
//! steady-to-steady transfer hop the same ephemeral id is registered on
//! both adjacent steady entries.

use std::collections::HashMap;

use parking_lot::Mutex;
use sibra_proto::{Bps, Info, ResvId};

use crate::error::StateError;

/// One ephemeral index: the granted info and the ledger allocation
/// backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EphemIdx {
    /// Granted reservation info.
    pub info: Info,
    /// Bandwidth drawn from the parent's ephemeral ledger.
    pub allocated: Bps,
}

/// An ephemeral reservation registered on one steady entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EphemEntry {
    /// Ephemeral reservation id.
    pub id: ResvId,
    /// Currently active index.
    pub active: EphemIdx,
    /// The superseded index while a renewal is in flight.
    pub last: Option<EphemIdx>,
}

impl EphemEntry {
    fn renew(&mut self, info: Info, allocated: Bps) -> Result<(), StateError> {
        if info.index != self.active.info.index.next() {
            return Err(StateError::InfoNotMatching);
        }
        self.last = Some(self.active);
        self.active = EphemIdx { info, allocated };
        Ok(())
    }

    /// Drop the index matching `failed`, restoring the superseded one if
    /// it exists. Returns the removed index and whether the entry is now
    /// empty.
    fn clean_up(&mut self, failed: &Info) -> Result<(EphemIdx, bool), StateError> {
        if self.active.info.index != failed.index
            || self.active.info.exp_tick != failed.exp_tick
        {
            return Err(StateError::InfoNotMatching);
        }
        let cleaned = self.active;
        match self.last.take() {
            Some(last) => {
                self.active = last;
                Ok((cleaned, false))
            },
            None => Ok((cleaned, true)),
        }
    }
}

/// Ephemeral reservations keyed by id, per steady entry.
#[derive(Debug, Default)]
pub struct EphemMap {
    inner: Mutex<HashMap<ResvId, EphemEntry>>,
}

impl EphemMap {
    /// Register a fresh ephemeral reservation.
    pub fn add(&self, id: ResvId, active: EphemIdx) -> Result<(), StateError> {
        let mut map = self.inner.lock();
        if map.contains_key(&id) {
            return Err(StateError::ResvExists { id });
        }
        map.insert(id, EphemEntry { id, active, last: None });
        Ok(())
    }

    /// Snapshot of an entry.
    pub fn get(&self, id: ResvId) -> Option<EphemEntry> {
        self.inner.lock().get(&id).copied()
    }

    /// Whether an entry exists.
    pub fn contains(&self, id: ResvId) -> bool {
        self.inner.lock().contains_key(&id)
    }

    /// Remove an entry unconditionally.
    pub fn delete(&self, id: ResvId) {
        self.inner.lock().remove(&id);
    }

    /// Apply a renewal: the new index must directly follow the active
    /// one; the superseded index is kept for rollback.
    pub fn renew(&self, id: ResvId, info: Info, allocated: Bps) -> Result<(), StateError> {
        let mut map = self.inner.lock();
        let entry = map.get_mut(&id).ok_or(StateError::ResvNonExistent { id })?;
        entry.renew(info, allocated)
    }

    /// Clean up the index matching `failed`. Restores the superseded
    /// index when one exists, removes the entry otherwise. Returns the
    /// removed index, or `None` when the entry was already cleaned.
    pub fn clean_up(&self, id: ResvId, failed: &Info) -> Result<Option<EphemIdx>, StateError> {
        let mut map = self.inner.lock();
        let Some(entry) = map.get_mut(&id) else {
            return Ok(None);
        };
        let (cleaned, empty) = entry.clean_up(failed)?;
        if empty {
            map.remove(&id);
        }
        Ok(Some(cleaned))
    }

    /// Number of registered ephemeral reservations.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no ephemeral reservations are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use sibra_proto::{As, BwCls, Index, PathType, RttCls, Tick};

    use super::*;

    fn id() -> ResvId {
        ResvId::ephemeral(As(1), [5u8; 10])
    }

    fn info(index: u8, exp: u32) -> Info {
        Info {
            exp_tick: Tick(exp),
            bw_cls: BwCls(8),
            rtt_cls: RttCls(10),
            index: Index::new(index).unwrap(),
            forward: true,
            path_type: PathType::Ephemeral,
            fail_hop: 0,
        }
    }

    #[test]
    fn add_get_delete() {
        let map = EphemMap::default();
        map.add(id(), EphemIdx { info: info(0, 100), allocated: Bps(500) }).unwrap();
        assert!(map.contains(id()));
        assert!(matches!(
            map.add(id(), EphemIdx { info: info(0, 100), allocated: Bps(500) }),
            Err(StateError::ResvExists { .. })
        ));
        map.delete(id());
        assert!(!map.contains(id()));
    }

    #[test]
    fn renewal_requires_successor_index() {
        let map = EphemMap::default();
        map.add(id(), EphemIdx { info: info(0, 100), allocated: Bps(500) }).unwrap();
        assert_eq!(
            map.renew(id(), info(2, 104), Bps(500)),
            Err(StateError::InfoNotMatching)
        );
        map.renew(id(), info(1, 104), Bps(600)).unwrap();
        let entry = map.get(id()).unwrap();
        assert_eq!(entry.active.info.index, Index::new(1).unwrap());
        assert_eq!(entry.last.unwrap().info.index, Index::ZERO);
    }

    #[test]
    fn clean_up_restores_superseded_index() {
        let map = EphemMap::default();
        map.add(id(), EphemIdx { info: info(0, 100), allocated: Bps(500) }).unwrap();
        map.renew(id(), info(1, 104), Bps(600)).unwrap();
        let cleaned = map.clean_up(id(), &info(1, 104)).unwrap().unwrap();
        assert_eq!(cleaned.allocated, Bps(600));
        let entry = map.get(id()).unwrap();
        assert_eq!(entry.active.info.index, Index::ZERO);
        assert_eq!(entry.last, None);
    }

    #[test]
    fn clean_up_removes_sole_index() {
        let map = EphemMap::default();
        map.add(id(), EphemIdx { info: info(0, 100), allocated: Bps(500) }).unwrap();
        let cleaned = map.clean_up(id(), &info(0, 100)).unwrap().unwrap();
        assert_eq!(cleaned.allocated, Bps(500));
        assert!(!map.contains(id()));
        // Cleaning again is a no-op, not an error.
        assert_eq!(map.clean_up(id(), &info(0, 100)), Ok(None));
    }

    #[test]
    fn clean_up_rejects_mismatched_info() {
        let map = EphemMap::default();
        map.add(id(), EphemIdx { info: info(0, 100), allocated: Bps(500) }).unwrap();
        assert_eq!(
            map.clean_up(id(), &info(0, 101)),
            Err(StateError::InfoNotMatching)
        );
    }
}
