//! Admission control.
//!
//! One `SibraAlgo` instance per service holds the reservation store, the
//! temp table and the per-source aggregates. Steady admission is a single
//! critical section behind the algorithm lock; ephemeral admission only
//! touches the affected steady entries and their ledgers.
//!
//! Lock order: algorithm >> store >> steady entry >> ledger >> temp slot.
//! Temp-table eviction acquires locks bottom-up by design, so the sweep
//! only drains the table and the indexes are collected afterwards from
//! above the algorithm lock.

mod ephem;
mod steady;

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use sibra_proto::{BwCls, FailCode, Index, Info, IsdAs, ResvId, State, Tick};
use tracing::{debug, warn};

use crate::{
    config::{IfTuple, Matrix, Topology},
    error::{AdmissionError, StateError},
    state::{SteadyMap, TempTable},
};

/// Parameters of one steady admission decision.
#[derive(Debug, Clone, Copy)]
pub struct AdmParams<'a> {
    /// Interface pair in reservation direction.
    pub ifids: IfTuple,
    /// Source AS of the reservation.
    pub src: IsdAs,
    /// Id of the reservation being requested.
    pub req_id: ResvId,
    /// Whether this is a setup (no prior index for the id).
    pub setup: bool,
    /// The request under admission.
    pub req: &'a sibra_proto::request::SteadyReq,
    /// Path type of the active block on renewals.
    pub active_path_type: Option<sibra_proto::PathType>,
    /// Smallest maximum offered by the upstream hops, capped by the
    /// requested maximum.
    pub prev_bw: BwCls,
}

/// Outcome of a steady admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteadyDecision {
    /// Granted bandwidth class; meaningful when accepted.
    pub alloc_bw: BwCls,
    /// Largest class this AS could grant.
    pub max_bw: BwCls,
    /// Smallest class the initiator accepts, echoed back.
    pub min_bw: BwCls,
    /// Whether the request was admitted here.
    pub accepted: bool,
}

/// Outcome of an ephemeral admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EphemDecision {
    /// Granted bandwidth class; meaningful when `fail_code` is `None`.
    pub alloc_bw: BwCls,
    /// Largest class this AS could grant.
    pub max_bw: BwCls,
    /// Why admission failed, or `None`.
    pub fail_code: FailCode,
}

impl EphemDecision {
    pub(crate) fn fail(code: FailCode) -> Self {
        Self { alloc_bw: BwCls(0), max_bw: BwCls(0), fail_code: code }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Aggregates {
    /// Reservation ids per source AS, feeding the demand sums.
    pub(crate) src_to_ids: HashMap<IsdAs, HashSet<ResvId>>,
}

/// The per-AS admission algorithm and reservation state.
#[derive(Debug)]
pub struct SibraAlgo {
    pub(crate) topo: Topology,
    pub(crate) matrix: Matrix,
    pub(crate) delta: f64,
    /// Steady reservations by id.
    pub store: SteadyMap,
    /// Unconfirmed indexes awaiting their confirmation.
    pub temp: TempTable,
    pub(crate) adm: Mutex<Aggregates>,
}

impl SibraAlgo {
    /// Build the algorithm from topology, pair weights and headroom.
    pub fn new(topo: Topology, matrix: Matrix, delta: f64) -> Self {
        Self {
            topo,
            matrix,
            delta,
            store: SteadyMap::default(),
            temp: TempTable::default(),
            adm: Mutex::new(Aggregates::default()),
        }
    }

    /// The interface map this algorithm admits against.
    pub fn topo(&self) -> &Topology {
        &self.topo
    }

    /// Record that this hop issued the opaque field for a confirmed
    /// steady index.
    pub fn promote_to_sof_created(
        &self,
        ifids: IfTuple,
        id: ResvId,
        info: &Info,
        now_ms: u64,
    ) -> Result<(), AdmissionError> {
        let entry = self.store.get(id).ok_or(StateError::ResvNonExistent { id })?;
        if entry.ifids != ifids {
            return Err(StateError::InfoNotMatching.into());
        }
        entry.promote_to_sof_created(info, now_ms / 1_000)?;
        Ok(())
    }

    /// Confirm an index to `Pending`; the temp slot is released so the
    /// sweep no longer collects it.
    pub fn promote_to_pending(
        &self,
        ifids: IfTuple,
        id: ResvId,
        idx: Index,
    ) -> Result<(), AdmissionError> {
        let entry = self.store.get(id).ok_or(StateError::ResvNonExistent { id })?;
        if entry.ifids != ifids {
            return Err(StateError::InfoNotMatching.into());
        }
        entry.promote_to_pending(idx)?;
        self.temp.delete(id, idx);
        Ok(())
    }

    /// Confirm an index to `Active`, superseding older indexes.
    pub fn promote_to_active(
        &self,
        ifids: IfTuple,
        id: ResvId,
        idx: Index,
        info: &Info,
        now_ms: u64,
    ) -> Result<(), AdmissionError> {
        let entry = self.store.get(id).ok_or(StateError::ResvNonExistent { id })?;
        if entry.ifids != ifids {
            return Err(StateError::InfoNotMatching.into());
        }
        entry.promote_to_active(idx, info, now_ms)?;
        self.temp.delete(id, idx);
        Ok(())
    }

    /// Collect one timed-out temporary index, removing the whole entry
    /// when nothing live remains.
    pub fn collect_temp(&self, id: ResvId, idx: Index, now_ms: u64) -> Result<(), StateError> {
        let now_s = now_ms / 1_000;
        let mut agg = self.adm.lock();
        let entry = self.store.get(id).ok_or(StateError::ResvNonExistent { id })?;
        entry.collect_temp_idx(idx, now_s)?;
        if entry.expired(now_s) && entry.live_indexes(now_s) == 0 {
            self.store.remove(id);
            Self::forget_id(&mut agg, entry.src, id);
        }
        Ok(())
    }

    /// Sweep the temp table and collect every expired index. Runs the
    /// table drain below any other lock, then collects from the top.
    pub fn purge_temp(&self, now_ms: u64) -> usize {
        let evicted = self.temp.purge_expired(now_ms);
        let count = evicted.len();
        for (id, idx) in evicted {
            debug!(%id, %idx, "evicting expired temporary index");
            if let Err(err) = self.collect_temp(id, idx, now_ms) {
                warn!(%id, %idx, %err, "unable to collect temporary index");
            }
        }
        count
    }

    /// Drop steady entries whose active index expired with nothing else
    /// live.
    pub fn purge_steady(&self, now_ms: u64) -> usize {
        let now_s = now_ms / 1_000;
        let mut agg = self.adm.lock();
        let mut removed = 0;
        for id in self.store.ids() {
            let Some(entry) = self.store.get(id) else { continue };
            if entry.expired(now_s) && entry.live_indexes(now_s) == 0 {
                self.store.remove(id);
                Self::forget_id(&mut agg, entry.src, id);
                removed += 1;
            }
        }
        removed
    }

    /// Remove a single non-active index, as requested by a steady
    /// clean-up.
    pub fn clean_steady_index(
        &self,
        id: ResvId,
        idx: Index,
        now_ms: u64,
    ) -> Result<(), StateError> {
        let now_s = now_ms / 1_000;
        let entry = self.store.get(id).ok_or(StateError::ResvNonExistent { id })?;
        if let Some(sub) = entry.index_state(idx)
            && sub.state == State::Active
        {
            return Err(StateError::InvalidState { idx, state: State::Active });
        }
        entry.del_idx(idx, now_s);
        self.temp.delete(id, idx);
        Ok(())
    }

    /// Tear the whole reservation down, releasing every index and all
    /// ephemeral state registered on it.
    pub fn teardown_steady(&self, id: ResvId) -> Result<(), StateError> {
        let mut agg = self.adm.lock();
        let entry = self.store.remove(id).ok_or(StateError::ResvNonExistent { id })?;
        Self::forget_id(&mut agg, entry.src, id);
        Ok(())
    }

    pub(crate) fn forget_id(agg: &mut Aggregates, src: IsdAs, id: ResvId) {
        if let Some(ids) = agg.src_to_ids.get_mut(&src) {
            ids.remove(&id);
            if ids.is_empty() {
                agg.src_to_ids.remove(&src);
            }
        }
    }

    pub(crate) fn tick_of(now_ms: u64) -> Tick {
        Tick::from_unix(now_ms / 1_000)
    }
}
