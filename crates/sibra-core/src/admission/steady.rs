//! Steady admission: the bandwidth fair-sharing computation.
//!
//! For a request over `(ingress, egress)` the algorithm computes the
//! *ideal* bandwidth (the egress capacity scaled by the tube and link
//! ratios over the per-source demand sums) and the *available* bandwidth
//! (capacity headroom minus what other reservations hold), grants the
//! minimum, and commits a temporary index. The whole computation and the
//! commit run under the algorithm lock.

use std::sync::Arc;

use sibra_proto::{Bps, BwCls, Index, IsdAs, ResvId, Tick};
use tracing::debug;

use crate::{
    admission::{AdmParams, Aggregates, SibraAlgo, SteadyDecision},
    config::{IfTuple, valid_if_pair},
    error::AdmissionError,
    state::{SteadyEntry, SteadyIdx, TEMP_RESV_EXPIRY_MS},
};

impl SibraAlgo {
    /// Admit a steady setup or renewal. The provided interfaces must be
    /// in reservation direction.
    pub fn admit_steady(
        &self,
        p: &AdmParams<'_>,
        now_ms: u64,
    ) -> Result<SteadyDecision, AdmissionError> {
        self.validate_steady(p)?;
        let mut agg = self.adm.lock();

        let avail = self.available(&agg, p.ifids, p.req_id);
        let ideal = self.ideal(&agg, p)?;
        let grant = avail.min(ideal);
        let mut decision = SteadyDecision {
            alloc_bw: BwCls(0),
            max_bw: grant.to_cls(true),
            min_bw: p.req.min_bw,
            accepted: false,
        };
        debug!(
            id = %p.req_id, ingress = p.ifids.ingress, egress = p.ifids.egress,
            avail = %avail, ideal = %ideal, "steady admission computed"
        );
        if decision.max_bw < p.req.min_bw || !p.req.base.accepted {
            return Ok(decision);
        }
        decision.alloc_bw = decision.max_bw.min(p.req.info.bw_cls);
        self.add_steady_resv(&mut agg, p, decision.alloc_bw, now_ms)?;
        decision.accepted = true;
        Ok(decision)
    }

    fn validate_steady(&self, p: &AdmParams<'_>) -> Result<(), AdmissionError> {
        let in_link = self
            .topo
            .link_type(p.ifids.ingress)
            .ok_or(AdmissionError::UnknownInterface { ifid: p.ifids.ingress })?;
        let eg_link = self
            .topo
            .link_type(p.ifids.egress)
            .ok_or(AdmissionError::UnknownInterface { ifid: p.ifids.egress })?;
        let path_type = p.req.info.path_type;
        if !valid_if_pair(path_type, in_link, eg_link) {
            return Err(AdmissionError::InvalidLinkPair { path_type });
        }
        if p.setup && p.req.info.index != Index::ZERO {
            return Err(AdmissionError::InvalidInitialIndex { idx: p.req.info.index });
        }
        if !p.setup
            && let Some(active) = p.active_path_type
            && active != path_type
        {
            return Err(AdmissionError::PathTypeChanged { expected: active, actual: path_type });
        }
        if p.req.max_bw == BwCls(0) {
            return Err(AdmissionError::ZeroBandwidth);
        }
        Ok(())
    }

    /// `delta * weight * min(free ingress, free egress)`, where the free
    /// sides exclude the requesting reservation itself.
    pub(crate) fn available(&self, agg: &Aggregates, ifids: IfTuple, id: ResvId) -> Bps {
        let in_free = self
            .topo
            .ingress_cap(ifids.ingress)
            .saturating_sub(self.reserved_in(agg, ifids.ingress, id));
        let eg_free = self
            .topo
            .egress_cap(ifids.egress)
            .saturating_sub(self.reserved_eg(agg, ifids.egress, id));
        let weight = f64::from(self.matrix.weight(ifids));
        Bps((self.delta * weight * in_free.min(eg_free).0 as f64) as u64)
    }

    fn reserved_in(&self, agg: &Aggregates, ingress: u16, id: ResvId) -> Bps {
        let mut sum = Bps(0);
        for ids in agg.src_to_ids.values() {
            for &other in ids {
                if other == id {
                    continue;
                }
                if let Some(entry) = self.store.get(other)
                    && entry.ifids.ingress == ingress
                {
                    sum = sum.saturating_add(entry.cached_alloc());
                }
            }
        }
        sum
    }

    fn reserved_eg(&self, agg: &Aggregates, egress: u16, id: ResvId) -> Bps {
        let mut sum = Bps(0);
        for ids in agg.src_to_ids.values() {
            for &other in ids {
                if other == id {
                    continue;
                }
                if let Some(entry) = self.store.get(other)
                    && entry.ifids.egress == egress
                {
                    sum = sum.saturating_add(entry.cached_alloc());
                }
            }
        }
        sum
    }

    /// `egress capacity * tube ratio * link ratio`.
    pub(crate) fn ideal(&self, agg: &Aggregates, p: &AdmParams<'_>) -> Result<Bps, AdmissionError> {
        let out_cap = self.topo.egress_cap(p.ifids.egress).0 as f64;
        let tube = self.tube_ratio(agg, p)?;
        let link = self.link_ratio(agg, p);
        Ok(Bps((out_cap * tube * link) as u64))
    }

    fn tube_ratio(&self, agg: &Aggregates, p: &AdmParams<'_>) -> Result<f64, AdmissionError> {
        let own = self.trans_dem(agg, p.ifids, p);
        let mut sum = own;
        for ingress in self.topo.ifids_with_local() {
            let tup = IfTuple { ingress, egress: p.ifids.egress };
            if tup == p.ifids {
                continue;
            }
            let cap_in = self.topo.ingress_cap(ingress).0 as f64;
            sum += cap_in.min(self.trans_dem(agg, tup, p));
        }
        if sum <= 0.0 {
            return Err(AdmissionError::ZeroTransitDemand {
                ingress: p.ifids.ingress,
                egress: p.ifids.egress,
            });
        }
        Ok(own / sum)
    }

    fn trans_dem(&self, agg: &Aggregates, ifids: IfTuple, p: &AdmParams<'_>) -> f64 {
        let mut sum = 0.0;
        for &src in agg.src_to_ids.keys() {
            sum += self.adj_src_dem(agg, src, ifids, p);
        }
        // The requesting source may not be aggregated yet.
        if !agg.src_to_ids.contains_key(&p.src) && ifids == p.ifids {
            sum += self.adj_src_dem(agg, p.src, ifids, p);
        }
        sum
    }

    fn adj_src_dem(&self, agg: &Aggregates, src: IsdAs, ifids: IfTuple, p: &AdmParams<'_>) -> f64 {
        self.scaling_factor(agg, src, ifids, p) * self.src_dem(agg, src, ifids, p).0 as f64
    }

    fn scaling_factor(
        &self,
        agg: &Aggregates,
        src: IsdAs,
        ifids: IfTuple,
        p: &AdmParams<'_>,
    ) -> f64 {
        self.in_scal_factor(agg, src, ifids.ingress, p)
            .min(self.eg_scal_factor(agg, src, ifids.egress, p))
            .clamp(0.0, 1.0)
    }

    fn in_scal_factor(&self, agg: &Aggregates, src: IsdAs, ingress: u16, p: &AdmParams<'_>) -> f64 {
        let cap = self.topo.ingress_cap(ingress).0 as f64;
        let dem = self.in_dem(agg, src, ingress, p).0 as f64;
        if dem <= 0.0 {
            return 0.0;
        }
        cap.min(dem) / dem
    }

    fn eg_scal_factor(&self, agg: &Aggregates, src: IsdAs, egress: u16, p: &AdmParams<'_>) -> f64 {
        let cap = self.topo.egress_cap(egress).0 as f64;
        let dem = self.eg_dem(agg, src, egress, p).0 as f64;
        if dem <= 0.0 {
            return 0.0;
        }
        cap.min(dem) / dem
    }

    fn in_dem(&self, agg: &Aggregates, src: IsdAs, ingress: u16, p: &AdmParams<'_>) -> Bps {
        let mut sum = Bps(0);
        for egress in self.topo.ifids_with_local() {
            sum = sum.saturating_add(self.src_dem(agg, src, IfTuple { ingress, egress }, p));
        }
        sum
    }

    fn eg_dem(&self, agg: &Aggregates, src: IsdAs, egress: u16, p: &AdmParams<'_>) -> Bps {
        let mut sum = Bps(0);
        for ingress in self.topo.ifids_with_local() {
            sum = sum.saturating_add(self.src_dem(agg, src, IfTuple { ingress, egress }, p));
        }
        sum
    }

    fn src_dem(&self, agg: &Aggregates, src: IsdAs, ifids: IfTuple, p: &AdmParams<'_>) -> Bps {
        let mut sum = Bps(0);
        let ids = agg.src_to_ids.get(&src);
        if let Some(ids) = ids {
            for &id in ids {
                sum = sum.saturating_add(self.req_dem(agg, id, ifids, p));
            }
        }
        // Count the reservation under admission exactly once.
        if ifids == p.ifids
            && src == p.src
            && !ids.is_some_and(|ids| ids.contains(&p.req_id))
        {
            sum = sum.saturating_add(self.req_dem(agg, p.req_id, ifids, p));
        }
        sum
    }

    fn req_dem(&self, _agg: &Aggregates, id: ResvId, ifids: IfTuple, p: &AdmParams<'_>) -> Bps {
        let caps = self.topo.ingress_cap(ifids.ingress).min(self.topo.egress_cap(ifids.egress));
        // The requested reservation substitutes its own request's maximum
        // and never double-counts its existing slot.
        if id == p.req_id {
            if ifids == p.ifids {
                return caps.min(p.req.max_bw.bps());
            }
            return Bps(0);
        }
        match self.store.get(id) {
            Some(entry) if entry.ifids == ifids => caps.min(entry.cached_max()),
            _ => Bps(0),
        }
    }

    fn link_ratio(&self, agg: &Aggregates, p: &AdmParams<'_>) -> f64 {
        let prev = p.prev_bw.bps();
        if prev == Bps(0) {
            return 0.0;
        }
        let nom = self.eg_scal_factor(agg, p.src, p.ifids.egress, p) * prev.0 as f64;
        let mut sum = nom;
        for (&src, ids) in &agg.src_to_ids {
            let mut src_alloc = Bps(0);
            for &id in ids {
                if id == p.req_id {
                    continue;
                }
                if let Some(entry) = self.store.get(id)
                    && entry.ifids == p.ifids
                {
                    src_alloc = src_alloc.saturating_add(entry.cached_alloc());
                }
            }
            sum += self.eg_scal_factor(agg, src, p.ifids.egress, p) * src_alloc.0 as f64;
        }
        if sum <= 0.0 {
            return 0.0;
        }
        nom / sum
    }

    /// Commit the grant: insert or extend the entry, add a `Temp` index,
    /// update the source aggregates, and schedule the temp eviction.
    fn add_steady_resv(
        &self,
        agg: &mut Aggregates,
        p: &AdmParams<'_>,
        alloc: BwCls,
        now_ms: u64,
    ) -> Result<(), AdmissionError> {
        let now_s = now_ms / 1_000;
        let mut info = p.req.info;
        info.bw_cls = alloc;
        let idx = SteadyIdx::temp(info, p.req.min_bw, p.req.max_bw);

        let (entry, fresh) = match self.store.get(p.req_id) {
            Some(entry) => (entry, false),
            None => {
                if p.req.info.index != Index::ZERO {
                    return Err(AdmissionError::InvalidInitialIndex { idx: p.req.info.index });
                }
                let entry = Arc::new(SteadyEntry::new(
                    p.src,
                    p.req_id,
                    p.ifids,
                    Tick::from_unix(now_s),
                ));
                self.store.insert(Arc::clone(&entry))?;
                (entry, true)
            },
        };
        if let Err(err) = entry.add_idx(idx, now_s) {
            if fresh {
                self.store.remove(p.req_id);
            }
            return Err(err.into());
        }
        agg.src_to_ids.entry(p.src).or_default().insert(p.req_id);

        let ttl_ms =
            (p.req.info.rtt_cls.duration().as_millis() as u64).max(TEMP_RESV_EXPIRY_MS);
        self.temp.set(p.req_id, p.req.info.index, ttl_ms, now_ms);
        Ok(())
    }
}
