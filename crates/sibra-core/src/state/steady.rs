//! Steady reservation entries and their index state machine.
//!
//! A steady entry owns 16 index slots. Indexes move through
//! `Temp -> Temp(SOF created) -> Pending -> Active -> Void`; at most one
//! index is `Active` and `active_index` points at it. Promotion to
//! `Active` evicts every slot on the ring between the previous active
//! index and the new one, and resizes the embedded ephemeral-bandwidth
//! provider to the confirmed class.

use parking_lot::RwLock;
use sibra_proto::{Bps, BwCls, Index, Info, IsdAs, NUM_INDEXES, ResvId, State, Tick};

use crate::{config::IfTuple, error::StateError, ledger::BwProvider, state::ephem::EphemMap};

/// One reservation index slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteadyIdx {
    /// Admitted reservation info; `bw_cls` holds the granted class.
    pub info: Info,
    /// Minimum class the initiator accepts.
    pub min_bw: BwCls,
    /// Maximum class the initiator requested.
    pub max_bw: BwCls,
    /// Lifecycle state.
    pub state: State,
    /// Whether this hop's opaque field has been issued for the index.
    pub sof_created: bool,
    /// Traffic split class (carried, not interpreted).
    pub split_cls: u8,
    /// End-AS properties (carried, not interpreted).
    pub end_props: u8,
}

impl SteadyIdx {
    /// A freshly admitted index in `Temp` state.
    pub fn temp(info: Info, min_bw: BwCls, max_bw: BwCls) -> Self {
        Self { info, min_bw, max_bw, state: State::Temp, sof_created: false, split_cls: 0, end_props: 0 }
    }

    /// Whether the index still counts: not void and not expired.
    pub fn live(&self, now_s: u64) -> bool {
        self.state != State::Void && now_s < self.info.exp_tick.as_unix()
    }
}

fn infos_match(stored: &Info, presented: &Info) -> bool {
    stored.exp_tick == presented.exp_tick
        && stored.bw_cls == presented.bw_cls
        && stored.rtt_cls == presented.rtt_cls
        && stored.index == presented.index
        && stored.path_type == presented.path_type
}

#[derive(Debug)]
struct EntryState {
    indexes: [Option<SteadyIdx>; NUM_INDEXES as usize],
    active_index: Index,
    /// Cached `max over live indexes of granted bandwidth`.
    allocated: Bps,
    /// Cached `max over live indexes of requested maximum`.
    last_max: Bps,
}

impl EntryState {
    fn alloc_bw(&self, now_s: u64) -> Bps {
        self.indexes
            .iter()
            .flatten()
            .filter(|idx| idx.live(now_s))
            .map(|idx| idx.info.bw_cls.bps())
            .max()
            .unwrap_or(Bps(0))
    }

    fn max_bw(&self, now_s: u64) -> Bps {
        self.indexes
            .iter()
            .flatten()
            .filter(|idx| idx.live(now_s))
            .map(|idx| idx.max_bw.bps())
            .max()
            .unwrap_or(Bps(0))
    }

    fn refresh_caches(&mut self, now_s: u64) {
        self.allocated = self.alloc_bw(now_s);
        self.last_max = self.max_bw(now_s);
    }

    fn expired(&self, now_s: u64) -> bool {
        self.indexes[usize::from(self.active_index.get())]
            .as_ref()
            .is_none_or(|idx| !idx.live(now_s))
    }
}

/// A steady reservation at this AS.
#[derive(Debug)]
pub struct SteadyEntry {
    /// Source AS that owns the reservation.
    pub src: IsdAs,
    /// Reservation id.
    pub id: ResvId,
    /// Interface pair in reservation direction.
    pub ifids: IfTuple,
    state: RwLock<EntryState>,
    ephemeral_bw: BwProvider,
    /// Ephemeral reservations registered on this steady entry.
    pub ephem_map: EphemMap,
}

impl SteadyEntry {
    /// A fresh entry with no indexes and zero ephemeral capacity.
    pub fn new(src: IsdAs, id: ResvId, ifids: IfTuple, now: Tick) -> Self {
        Self {
            src,
            id,
            ifids,
            state: RwLock::new(EntryState {
                indexes: [None; NUM_INDEXES as usize],
                active_index: Index::ZERO,
                allocated: Bps(0),
                last_max: Bps(0),
            }),
            ephemeral_bw: BwProvider::new(Bps(0), now),
            ephem_map: EphemMap::default(),
        }
    }

    /// Ledger backing ephemeral allocations on this reservation.
    pub fn ephemeral_bw(&self) -> &BwProvider {
        &self.ephemeral_bw
    }

    /// Add a freshly admitted index. The slot must be empty or hold a
    /// dead index.
    pub fn add_idx(&self, idx: SteadyIdx, now_s: u64) -> Result<(), StateError> {
        let mut state = self.state.write();
        let slot = usize::from(idx.info.index.get());
        if state.indexes[slot].as_ref().is_some_and(|prev| prev.live(now_s)) {
            return Err(StateError::IndexExists { id: self.id, idx: idx.info.index });
        }
        state.indexes[slot] = Some(idx);
        state.refresh_caches(now_s);
        Ok(())
    }

    /// Clear an index slot unconditionally.
    pub fn del_idx(&self, idx: Index, now_s: u64) {
        let mut state = self.state.write();
        state.indexes[usize::from(idx.get())] = None;
        state.refresh_caches(now_s);
    }

    /// Record that this hop issued the opaque field for the index.
    ///
    /// The confirmed info must agree with the admitted one; the confirmed
    /// bandwidth class may shrink to the end-to-end minimum but never
    /// grow past the admitted grant.
    pub fn promote_to_sof_created(&self, info: &Info, now_s: u64) -> Result<(), StateError> {
        let mut state = self.state.write();
        let slot = usize::from(info.index.get());
        let Some(idx) = state.indexes[slot].as_mut() else {
            return Err(StateError::IndexNonExistent { idx: info.index });
        };
        if idx.state != State::Temp {
            return Err(StateError::InvalidState { idx: info.index, state: idx.state });
        }
        if idx.sof_created {
            return Err(StateError::SofAlreadyCreated { idx: info.index });
        }
        if info.bw_cls > idx.info.bw_cls {
            return Err(StateError::BwExceedsAdmitted {
                idx: info.index,
                max: idx.info.bw_cls.0,
                actual: info.bw_cls.0,
            });
        }
        if idx.info.exp_tick != info.exp_tick
            || idx.info.rtt_cls != info.rtt_cls
            || idx.info.path_type != info.path_type
            || info.fail_hop != 0
        {
            return Err(StateError::InfoNotMatching);
        }
        idx.sof_created = true;
        idx.info.bw_cls = info.bw_cls;
        state.refresh_caches(now_s);
        Ok(())
    }

    /// Advance an index from `Temp` (SOF created) to `Pending`.
    /// Idempotent when already pending.
    pub fn promote_to_pending(&self, idx: Index) -> Result<(), StateError> {
        let mut state = self.state.write();
        let slot = usize::from(idx.get());
        let Some(sub) = state.indexes[slot].as_mut() else {
            return Err(StateError::IndexNonExistent { idx });
        };
        if sub.state == State::Pending {
            return Ok(());
        }
        if sub.state != State::Temp {
            return Err(StateError::InvalidState { idx, state: sub.state });
        }
        if !sub.sof_created {
            return Err(StateError::SofNotCreated { idx });
        }
        sub.state = State::Pending;
        Ok(())
    }

    /// Advance an index from `Pending` to `Active`.
    ///
    /// Resizes the ephemeral ledger to the confirmed class, evicts every
    /// index on the ring from the previous active index up to (but not
    /// including) the new one, and repoints `active_index`. Idempotent
    /// when the index is already active and the info matches.
    pub fn promote_to_active(&self, idx: Index, info: &Info, now_ms: u64) -> Result<(), StateError> {
        let now_s = now_ms / 1_000;
        let mut state = self.state.write();
        let slot = usize::from(idx.get());
        let Some(sub) = state.indexes[slot].as_ref() else {
            return Err(StateError::IndexNonExistent { idx });
        };
        if !infos_match(&sub.info, info) {
            return Err(StateError::InfoNotMatching);
        }
        if sub.state == State::Active {
            return Ok(());
        }
        if sub.state != State::Pending {
            return Err(StateError::InvalidState { idx, state: sub.state });
        }
        let granted = sub.info.bw_cls.bps();
        self.ephemeral_bw.set_total(granted, Tick::from_unix(now_s))?;

        let mut cursor = state.active_index;
        while cursor != idx {
            state.indexes[usize::from(cursor.get())] = None;
            cursor = cursor.next();
        }
        state.active_index = idx;
        if let Some(sub) = state.indexes[slot].as_mut() {
            sub.state = State::Active;
        }
        state.refresh_caches(now_s);
        Ok(())
    }

    /// Collect a timed-out temporary index. Collecting a non-temporary
    /// index is an error.
    pub fn collect_temp_idx(&self, idx: Index, now_s: u64) -> Result<(), StateError> {
        let mut state = self.state.write();
        let slot = usize::from(idx.get());
        let Some(sub) = state.indexes[slot].as_ref() else {
            return Err(StateError::IndexNonExistent { idx });
        };
        if sub.state != State::Temp {
            return Err(StateError::InvalidState { idx, state: sub.state });
        }
        state.indexes[slot] = None;
        state.refresh_caches(now_s);
        Ok(())
    }

    /// Maximum requested bandwidth over all live indexes.
    pub fn max_bw(&self, now_s: u64) -> Bps {
        self.state.read().max_bw(now_s)
    }

    /// Maximum granted bandwidth over all live indexes.
    pub fn alloc_bw(&self, now_s: u64) -> Bps {
        self.state.read().alloc_bw(now_s)
    }

    /// Cached granted bandwidth, refreshed on every transition.
    pub fn cached_alloc(&self) -> Bps {
        self.state.read().allocated
    }

    /// Cached maximum bandwidth, refreshed on every transition.
    pub fn cached_max(&self) -> Bps {
        self.state.read().last_max
    }

    /// Whether the entry's active index is gone or expired.
    pub fn expired(&self, now_s: u64) -> bool {
        self.state.read().expired(now_s)
    }

    /// The currently active index slot.
    pub fn active_index(&self) -> Index {
        self.state.read().active_index
    }

    /// Snapshot of one index slot.
    pub fn index_state(&self, idx: Index) -> Option<SteadyIdx> {
        self.state.read().indexes[usize::from(idx.get())]
    }

    /// Number of live indexes.
    pub fn live_indexes(&self, now_s: u64) -> usize {
        self.state.read().indexes.iter().flatten().filter(|idx| idx.live(now_s)).count()
    }
}

#[cfg(test)]
mod tests {
    use sibra_proto::{As, PathType, RttCls};

    use super::*;

    const NOW_MS: u64 = 4_000_000;
    const NOW_S: u64 = NOW_MS / 1_000;

    fn info(index: u8, bw: u8) -> Info {
        Info {
            exp_tick: Tick::from_unix(NOW_S + 320),
            bw_cls: BwCls(bw),
            rtt_cls: RttCls(10),
            index: Index::new(index).unwrap(),
            forward: true,
            path_type: PathType::Up,
            fail_hop: 0,
        }
    }

    fn entry() -> SteadyEntry {
        SteadyEntry::new(
            IsdAs { isd: 1, asn: As(0xFF00_0000_0110) },
            ResvId::steady(As(0xFF00_0000_0110), 1),
            IfTuple { ingress: 0, egress: 81 },
            Tick::from_unix(NOW_S),
        )
    }

    fn add_and_confirm(e: &SteadyEntry, index: u8, bw: u8) {
        let inf = info(index, bw);
        e.add_idx(SteadyIdx::temp(inf, BwCls(1), BwCls(bw)), NOW_S).unwrap();
        e.promote_to_sof_created(&inf, NOW_S).unwrap();
        e.promote_to_pending(inf.index).unwrap();
    }

    #[test]
    fn full_lifecycle() {
        let e = entry();
        add_and_confirm(&e, 0, 10);
        e.promote_to_active(Index::ZERO, &info(0, 10), NOW_MS).unwrap();
        let idx = e.index_state(Index::ZERO).unwrap();
        assert_eq!(idx.state, State::Active);
        assert_eq!(e.active_index(), Index::ZERO);
        assert_eq!(e.ephemeral_bw().total(), BwCls(10).bps());
        assert_eq!(e.cached_alloc(), BwCls(10).bps());
    }

    #[test]
    fn promote_out_of_order_is_rejected() {
        let e = entry();
        let inf = info(0, 10);
        e.add_idx(SteadyIdx::temp(inf, BwCls(1), BwCls(10)), NOW_S).unwrap();
        // Not yet pending: straight to active fails.
        assert!(matches!(
            e.promote_to_active(Index::ZERO, &inf, NOW_MS),
            Err(StateError::InvalidState { .. })
        ));
        // SOF not created: pending fails.
        assert!(matches!(
            e.promote_to_pending(Index::ZERO),
            Err(StateError::SofNotCreated { .. })
        ));
    }

    #[test]
    fn sof_created_shrinks_but_never_grows() {
        let e = entry();
        let inf = info(0, 10);
        e.add_idx(SteadyIdx::temp(inf, BwCls(1), BwCls(10)), NOW_S).unwrap();
        let mut bigger = inf;
        bigger.bw_cls = BwCls(11);
        assert!(matches!(
            e.promote_to_sof_created(&bigger, NOW_S),
            Err(StateError::BwExceedsAdmitted { .. })
        ));
        let mut smaller = inf;
        smaller.bw_cls = BwCls(8);
        e.promote_to_sof_created(&smaller, NOW_S).unwrap();
        assert_eq!(e.index_state(Index::ZERO).unwrap().info.bw_cls, BwCls(8));
    }

    #[test]
    fn promote_to_active_is_idempotent() {
        let e = entry();
        add_and_confirm(&e, 0, 10);
        e.promote_to_active(Index::ZERO, &info(0, 10), NOW_MS).unwrap();
        assert_eq!(e.promote_to_active(Index::ZERO, &info(0, 10), NOW_MS), Ok(()));
        // Mismatched info is not a silent no-op.
        assert_eq!(
            e.promote_to_active(Index::ZERO, &info(0, 9), NOW_MS),
            Err(StateError::InfoNotMatching)
        );
    }

    #[test]
    fn promotion_evicts_superseded_indexes() {
        let e = entry();
        add_and_confirm(&e, 0, 10);
        e.promote_to_active(Index::ZERO, &info(0, 10), NOW_MS).unwrap();
        add_and_confirm(&e, 1, 12);
        add_and_confirm(&e, 2, 14);
        e.promote_to_active(Index::new(2).unwrap(), &info(2, 14), NOW_MS).unwrap();
        assert!(e.index_state(Index::ZERO).is_none());
        assert!(e.index_state(Index::new(1).unwrap()).is_none());
        assert_eq!(e.index_state(Index::new(2).unwrap()).unwrap().state, State::Active);
        // Exactly one live index remains.
        assert_eq!(e.live_indexes(NOW_S), 1);
        assert_eq!(e.cached_alloc(), BwCls(14).bps());
    }

    #[test]
    fn index_ring_wraps_modulo_16() {
        let e = entry();
        add_and_confirm(&e, 15, 10);
        e.promote_to_active(Index::new(15).unwrap(), &info(15, 10), NOW_MS).unwrap();
        add_and_confirm(&e, 0, 12);
        e.promote_to_active(Index::ZERO, &info(0, 12), NOW_MS).unwrap();
        assert!(e.index_state(Index::new(15).unwrap()).is_none());
        assert_eq!(e.active_index(), Index::ZERO);
    }

    #[test]
    fn collect_only_temp() {
        let e = entry();
        add_and_confirm(&e, 0, 10);
        assert!(matches!(
            e.collect_temp_idx(Index::ZERO, NOW_S),
            Err(StateError::InvalidState { .. })
        ));
        let inf = info(1, 5);
        e.add_idx(SteadyIdx::temp(inf, BwCls(1), BwCls(5)), NOW_S).unwrap();
        e.collect_temp_idx(inf.index, NOW_S).unwrap();
        assert!(e.index_state(inf.index).is_none());
        assert!(matches!(
            e.collect_temp_idx(inf.index, NOW_S),
            Err(StateError::IndexNonExistent { .. })
        ));
    }

    #[test]
    fn shrinking_active_bandwidth_is_guarded_by_ledger() {
        let e = entry();
        add_and_confirm(&e, 0, 10);
        e.promote_to_active(Index::ZERO, &info(0, 10), NOW_MS).unwrap();
        let now = Tick::from_unix(NOW_S);
        e.ephemeral_bw()
            .alloc_expiring(BwCls(10).bps(), now.add(2), now)
            .unwrap();
        // A successor active index with a smaller class cannot fit the
        // live ephemeral allocations.
        add_and_confirm(&e, 1, 2);
        assert!(matches!(
            e.promote_to_active(Index::new(1).unwrap(), &info(1, 2), NOW_MS),
            Err(StateError::Ledger(_))
        ));
    }

    #[test]
    fn cached_alloc_tracks_live_maximum() {
        let e = entry();
        add_and_confirm(&e, 0, 10);
        e.promote_to_active(Index::ZERO, &info(0, 10), NOW_MS).unwrap();
        add_and_confirm(&e, 1, 20);
        // Pending index already counts toward the live maximum.
        assert_eq!(e.cached_alloc(), BwCls(20).bps());
        assert_eq!(e.alloc_bw(NOW_S), e.cached_alloc());
    }
}
