//! Ephemeral admission against the expiring-bandwidth ledgers.
//!
//! Ephemeral setups travel inside a steady extension over the established
//! steady blocks; renewals travel inside the ephemeral extension itself.
//! A steady-to-steady transfer hop draws from both adjacent steady
//! ledgers and rolls the survivor back when the other side falls short.
//! Requests on an already-failed chain only tighten the offer.

use std::sync::Arc;

use sibra_proto::{
    BwCls, FailCode, Index, Info, MAX_EPHEM_TICKS, PathType, Request, ResvId, SibraExtn, Tick,
};
use tracing::debug;

use crate::{
    admission::{EphemDecision, SibraAlgo},
    error::AdmissionError,
    state::{EphemIdx, SteadyEntry},
};

/// The steady entries an ephemeral operation touches: one in the middle
/// of a segment, two at a transfer hop.
struct Touched {
    entries: Vec<Arc<SteadyEntry>>,
}

impl SibraAlgo {
    fn touched(&self, extn: &SibraExtn) -> Result<Touched, FailCode> {
        let steady_ids = extn.steady_ids();
        let segs: Vec<usize> = match extn.transfer_segments() {
            Some((a, b)) => vec![a, b],
            None => vec![extn.curr_steady()],
        };
        let mut entries = Vec::with_capacity(segs.len());
        for seg in segs {
            let id = steady_ids.get(seg).copied().ok_or(FailCode::SteadyNotExists)?;
            entries.push(self.store.get(id).ok_or(FailCode::SteadyNotExists)?);
        }
        Ok(Touched { entries })
    }

    fn validate_ephem_info(&self, info: &Info, setup: bool, now: Tick) -> bool {
        let ahead = info.exp_tick.sub(now);
        info.path_type == PathType::Ephemeral
            && info.bw_cls != BwCls(0)
            && ahead > 0
            && ahead <= i64::from(MAX_EPHEM_TICKS)
            && (!setup || info.index == Index::ZERO)
    }

    /// Tighten the offer of a request that an upstream hop already
    /// failed: the local contribution is what the ledgers could still
    /// grant.
    fn failed_chain_offer(&self, extn: &SibraExtn, requested: BwCls, now: Tick) -> EphemDecision {
        let touched = match self.touched(extn) {
            Ok(touched) => touched,
            Err(code) => return EphemDecision::fail(code),
        };
        let mut max_bw = requested;
        for entry in &touched.entries {
            let free = entry.ephemeral_bw().free(now).to_cls(true);
            max_bw = max_bw.min(free);
        }
        EphemDecision { alloc_bw: BwCls(0), max_bw, fail_code: FailCode::BwExceeded }
    }

    /// Admit an ephemeral setup carried by a steady extension.
    pub fn admit_ephem_setup(
        &self,
        extn: &SibraExtn,
        now_ms: u64,
    ) -> Result<EphemDecision, AdmissionError> {
        let now = Self::tick_of(now_ms);
        let req = match &extn.request {
            Some(Request::Ephem(req)) => req,
            Some(Request::EphemFailed(failed)) => {
                return Ok(self.failed_chain_offer(extn, failed.info.bw_cls, now));
            },
            _ => return Err(AdmissionError::BadRequest("ephemeral setup trailer expected")),
        };
        let Some(ephem_id) = req.req_id else {
            return Err(AdmissionError::BadRequest("ephemeral setup without id"));
        };
        if !self.validate_ephem_info(&req.block.info, true, now) {
            return Ok(EphemDecision::fail(FailCode::InvalidInfo));
        }
        let touched = match self.touched(extn) {
            Ok(touched) => touched,
            Err(code) => return Ok(EphemDecision::fail(code)),
        };
        for entry in &touched.entries {
            if entry.ephem_map.contains(ephem_id) {
                return Ok(EphemDecision::fail(FailCode::EphemExists));
            }
        }
        let info = req.block.info;
        let bw = info.bw_cls.bps();

        // Draw from every touched ledger, rolling back on the first
        // shortage and offering the smallest residual.
        let mut granted: Vec<&Arc<SteadyEntry>> = Vec::with_capacity(touched.entries.len());
        let mut max_bw = info.bw_cls;
        for entry in &touched.entries {
            let res = entry.ephemeral_bw().alloc_expiring(bw, info.exp_tick, now)?;
            if !res.granted() {
                max_bw = max_bw.min(res.offered(bw).to_cls(true));
                for other in &granted {
                    other.ephemeral_bw().dealloc_expiring(bw, info.exp_tick, now)?;
                }
                // The shortfall on the remaining entries still bounds the
                // achievable offer.
                for rest in touched.entries.iter().skip(granted.len() + 1) {
                    let free = rest.ephemeral_bw().free(now).to_cls(true);
                    max_bw = max_bw.min(free);
                }
                return Ok(EphemDecision {
                    alloc_bw: BwCls(0),
                    max_bw,
                    fail_code: FailCode::BwExceeded,
                });
            }
            granted.push(entry);
        }
        // Register the reservation on every touched entry.
        for (pos, entry) in touched.entries.iter().enumerate() {
            if let Err(err) = entry.ephem_map.add(ephem_id, EphemIdx { info, allocated: bw }) {
                debug!(id = %ephem_id, %err, "ephemeral registration raced, rolling back");
                for registered in touched.entries.iter().take(pos) {
                    registered.ephem_map.delete(ephem_id);
                }
                for entry in &touched.entries {
                    entry.ephemeral_bw().dealloc_expiring(bw, info.exp_tick, now)?;
                }
                return Ok(EphemDecision::fail(FailCode::EphemExists));
            }
        }
        Ok(EphemDecision { alloc_bw: info.bw_cls, max_bw: info.bw_cls, fail_code: FailCode::None })
    }

    /// Admit an ephemeral renewal carried by the ephemeral extension.
    pub fn admit_ephem_renew(
        &self,
        extn: &SibraExtn,
        now_ms: u64,
    ) -> Result<EphemDecision, AdmissionError> {
        let now = Self::tick_of(now_ms);
        let req = match &extn.request {
            Some(Request::Ephem(req)) => req,
            Some(Request::EphemFailed(failed)) => {
                return Ok(self.failed_chain_offer(extn, failed.info.bw_cls, now));
            },
            _ => return Err(AdmissionError::BadRequest("ephemeral renewal trailer expected")),
        };
        let ephem_id = extn.req_resv_id();
        if !self.validate_ephem_info(&req.block.info, false, now) {
            return Ok(EphemDecision::fail(FailCode::InvalidInfo));
        }
        let touched = match self.touched(extn) {
            Ok(touched) => touched,
            Err(code) => return Ok(EphemDecision::fail(code)),
        };
        let mut registered = Vec::with_capacity(touched.entries.len());
        for entry in &touched.entries {
            match entry.ephem_map.get(ephem_id) {
                Some(ephem) => registered.push(ephem),
                None => return Ok(EphemDecision::fail(FailCode::EphemNotExists)),
            }
        }
        let info = req.block.info;
        let new_bw = info.bw_cls.bps();

        // Exchange on every touched ledger, undoing committed exchanges
        // on the first shortage.
        let mut max_bw = info.bw_cls;
        for (pos, entry) in touched.entries.iter().enumerate() {
            let old = registered[pos].active;
            let res = entry.ephemeral_bw().exchange_expiring(
                new_bw,
                old.allocated,
                info.exp_tick,
                old.info.exp_tick,
                now,
            )?;
            if !res.granted() {
                max_bw = max_bw.min(res.offered(new_bw).to_cls(true));
                for undo in 0..pos {
                    let old = registered[undo].active;
                    touched.entries[undo].ephemeral_bw().undo_exchange_expiring(
                        new_bw,
                        old.allocated,
                        info.exp_tick,
                        old.info.exp_tick,
                        now,
                    )?;
                }
                for rest in touched.entries.iter().skip(pos + 1) {
                    let free = rest.ephemeral_bw().free(now).to_cls(true);
                    max_bw = max_bw.min(free);
                }
                return Ok(EphemDecision {
                    alloc_bw: BwCls(0),
                    max_bw,
                    fail_code: FailCode::BwExceeded,
                });
            }
        }
        // Advance the registered index on every entry; a failure undoes
        // the ledgers and any already-renewed sibling.
        for (pos, entry) in touched.entries.iter().enumerate() {
            if let Err(err) = entry.ephem_map.renew(ephem_id, info, new_bw) {
                debug!(id = %ephem_id, %err, "ephemeral renewal index mismatch, rolling back");
                for undo in 0..touched.entries.len() {
                    let old = registered[undo].active;
                    touched.entries[undo].ephemeral_bw().undo_exchange_expiring(
                        new_bw,
                        old.allocated,
                        info.exp_tick,
                        old.info.exp_tick,
                        now,
                    )?;
                }
                for renewed in touched.entries.iter().take(pos) {
                    let _ = renewed.ephem_map.clean_up(ephem_id, &info);
                }
                return Ok(EphemDecision::fail(FailCode::InvalidInfo));
            }
        }
        Ok(EphemDecision { alloc_bw: info.bw_cls, max_bw: info.bw_cls, fail_code: FailCode::None })
    }

    /// Release the state of a failed ephemeral setup at this hop.
    pub fn clean_ephem_setup(&self, extn: &SibraExtn, now_ms: u64) -> Result<(), AdmissionError> {
        let now = Self::tick_of(now_ms);
        let (ephem_id, info) = clean_target(extn)?;
        let touched = self
            .touched(extn)
            .map_err(|_| AdmissionError::BadRequest("steady entry missing for clean-up"))?;
        for entry in &touched.entries {
            if let Some(cleaned) = entry.ephem_map.clean_up(ephem_id, &info)? {
                entry.ephemeral_bw().dealloc_expiring(
                    cleaned.allocated,
                    cleaned.info.exp_tick,
                    now,
                )?;
            }
        }
        Ok(())
    }

    /// Roll back the state of a failed ephemeral renewal at this hop,
    /// restoring the superseded index.
    pub fn clean_ephem_renew(&self, extn: &SibraExtn, now_ms: u64) -> Result<(), AdmissionError> {
        let now = Self::tick_of(now_ms);
        let (ephem_id, info) = clean_target(extn)?;
        let touched = self
            .touched(extn)
            .map_err(|_| AdmissionError::BadRequest("steady entry missing for clean-up"))?;
        for entry in &touched.entries {
            let Some(snapshot) = entry.ephem_map.get(ephem_id) else {
                continue;
            };
            let Some(last) = snapshot.last else {
                // No renewal was applied here; nothing to roll back.
                continue;
            };
            let Some(cleaned) = entry.ephem_map.clean_up(ephem_id, &info)? else {
                continue;
            };
            entry.ephemeral_bw().undo_exchange_expiring(
                cleaned.allocated,
                last.allocated,
                cleaned.info.exp_tick,
                last.info.exp_tick,
                now,
            )?;
        }
        Ok(())
    }
}

/// The ephemeral id and failed info a clean-up refers to.
fn clean_target(extn: &SibraExtn) -> Result<(ResvId, Info), AdmissionError> {
    match &extn.request {
        Some(Request::EphemClean(clean)) => {
            let id = clean.req_id.unwrap_or_else(|| extn.req_resv_id());
            Ok((id, clean.info))
        },
        Some(Request::EphemFailed(failed)) => {
            let id = failed.req_id.unwrap_or_else(|| extn.req_resv_id());
            Ok((id, failed.info))
        },
        _ => Err(AdmissionError::BadRequest("clean-up trailer expected")),
    }
}
