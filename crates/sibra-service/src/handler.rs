//! The per-AS packet pipeline.
//!
//! Every incoming SIBRA packet is validated (topology, opaque fields,
//! path types), classified along four axes (direction, kind, phase, role
//! at this AS) and dispatched to exactly one action: admit and forward,
//! admit and reverse, promote, clean, forward only, or deliver to the
//! local client.
//!
//! Admission denials are not errors; the offer is attached and the packet
//! reversed. Only malformed, unauthenticated or misrouted packets drop.

use std::sync::Arc;

use sibra_core::{AdmParams, EphemDecision, Environment, SibraAlgo};
use sibra_crypto::SofMac;
use sibra_proto::{
    BwCls, FailCode, IfId, Index, Info, IsdAs, OpField, Request, SibraExtn, State,
    request::SteadyReq,
};
use tracing::{debug, warn};

use crate::{
    error::HandlerError,
    packet::{PacketAction, SibraPacket},
};

/// Position of this AS relative to the packet's travel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The packet's journey starts here.
    FirstHop,
    /// A middle hop.
    Hop,
    /// A steady-to-steady transfer hop.
    Transfer,
    /// The packet's journey ends here.
    LastHop,
}

/// Steady or ephemeral extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Steady extension.
    Steady,
    /// Ephemeral extension.
    Ephemeral,
}

/// What the packet is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Plain data traffic on an established reservation.
    BestEffort,
    /// A reservation request travelling towards the path end.
    Request,
    /// A response travelling back to the initiator.
    Response,
    /// A clean-up or teardown.
    CleanUp,
    /// An index confirmation.
    IndexConfirm,
}

/// Role of this AS in reservation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The reservation initiator's AS.
    StartAs,
    /// An intermediate AS.
    HopAs,
    /// An AS joining two steady reservations.
    TransAs,
    /// The far end of the reservation.
    EndAs,
}

/// Full classification of a packet at this AS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Travel-direction position.
    pub direction: Direction,
    /// Extension kind.
    pub kind: Kind,
    /// Packet phase.
    pub phase: Phase,
    /// Reservation-direction role.
    pub role: Role,
}

/// Classify a parsed extension at this AS.
pub fn classify(extn: &SibraExtn) -> Classification {
    let at_origin = if extn.forward { extn.first_hop() } else { extn.last_hop() };
    let at_end = if extn.forward { extn.last_hop() } else { extn.first_hop() };
    let direction = if extn.is_transfer() {
        Direction::Transfer
    } else if at_origin {
        Direction::FirstHop
    } else if at_end {
        Direction::LastHop
    } else {
        Direction::Hop
    };
    let kind = if extn.steady { Kind::Steady } else { Kind::Ephemeral };
    let phase = match &extn.request {
        None => Phase::BestEffort,
        Some(Request::ConfirmIndex(_)) => Phase::IndexConfirm,
        Some(Request::SteadyClean(_) | Request::SteadyTearDown(_) | Request::EphemClean(_)) => {
            Phase::CleanUp
        },
        Some(req) if req.base().response => Phase::Response,
        Some(_) => Phase::Request,
    };
    let role = if extn.is_transfer() {
        Role::TransAs
    } else if extn.first_hop() {
        Role::StartAs
    } else if extn.last_hop() {
        Role::EndAs
    } else {
        Role::HopAs
    };
    Classification { direction, kind, phase, role }
}

/// The per-AS SIBRA packet handler.
pub struct SibraHandler<E: Environment> {
    algo: Arc<SibraAlgo>,
    sof_mac: Arc<SofMac>,
    env: E,
}

/// CMAC instances pre-initialised per handler.
const SOF_MAC_POOL_SIZE: usize = 32;

impl<E: Environment> SibraHandler<E> {
    /// Build a handler over the shared algorithm state and authenticator.
    pub fn new(algo: Arc<SibraAlgo>, sof_mac: Arc<SofMac>, env: E) -> Self {
        Self { algo, sof_mac, env }
    }

    /// Build a handler from the service configuration, deriving the MAC
    /// key from the configured seed.
    pub fn from_config(config: &sibra_core::SibraConfig, env: E) -> Self {
        let algo = Arc::new(SibraAlgo::new(
            config.topo.clone(),
            config.matrix.clone(),
            config.delta,
        ));
        let key = sibra_crypto::derive_mac_key(&config.sof_mac_seed);
        let sof_mac = Arc::new(SofMac::new(key, SOF_MAC_POOL_SIZE));
        Self::new(algo, sof_mac, env)
    }

    /// The shared algorithm state.
    pub fn algo(&self) -> &Arc<SibraAlgo> {
        &self.algo
    }

    /// Handle a packet, logging and swallowing drops.
    pub fn handle(&self, pkt: SibraPacket) -> Option<PacketAction> {
        let id = pkt.extn.ids.first().map(|id| id.to_string()).unwrap_or_default();
        let class = classify(&pkt.extn);
        match self.try_handle(pkt) {
            Ok(action) => Some(action),
            Err(err) => {
                warn!(%id, role = ?class.role, %err, "dropping packet");
                None
            },
        }
    }

    /// Handle a packet, returning the action or the drop reason.
    pub fn try_handle(&self, mut pkt: SibraPacket) -> Result<PacketAction, HandlerError> {
        self.validate(&pkt)?;
        let class = classify(&pkt.extn);
        debug!(?class, sof_index = pkt.extn.sof_index, "handling packet");

        let Some(request) = pkt.extn.request.clone() else {
            // Best-effort traffic rides the reservation untouched.
            return self.advance_and_forward(pkt);
        };
        match request {
            Request::Steady(req) => {
                if req.base.response {
                    self.handle_steady_failed_response(pkt)
                } else {
                    self.handle_steady_request(pkt, &req)
                }
            },
            Request::SteadySucc(_) => self.handle_steady_success(pkt),
            Request::ConfirmIndex(conf) => {
                if conf.base.response {
                    self.respond_or_forward(pkt)
                } else {
                    self.handle_idx_confirm(pkt, conf.idx, conf.state)
                }
            },
            Request::SteadyClean(clean) => {
                if clean.base.response {
                    self.respond_or_forward(pkt)
                } else {
                    if let Err(err) =
                        self.algo.clean_steady_index(pkt.extn.req_resv_id(), clean.idx, self.now_ms())
                    {
                        debug!(%err, "steady clean-up found nothing to remove");
                    }
                    self.finish_request(pkt)
                }
            },
            Request::SteadyTearDown(td) => {
                if td.base.response {
                    self.respond_or_forward(pkt)
                } else {
                    if let Err(err) = self.algo.teardown_steady(pkt.extn.req_resv_id()) {
                        debug!(%err, "teardown found no reservation");
                    }
                    self.finish_request(pkt)
                }
            },
            Request::Ephem(req) => {
                if req.base.response {
                    self.respond_or_forward(pkt)
                } else {
                    self.handle_ephem_request(pkt)
                }
            },
            Request::EphemFailed(_) => self.handle_ephem_failed(pkt),
            Request::EphemClean(clean) => {
                if clean.base.response {
                    self.respond_or_forward(pkt)
                } else {
                    if pkt.extn.steady {
                        self.algo.clean_ephem_setup(&pkt.extn, self.now_ms())?;
                    } else {
                        self.algo.clean_ephem_renew(&pkt.extn, self.now_ms())?;
                    }
                    self.finish_request(pkt)
                }
            },
        }
    }

    fn now_ms(&self) -> u64 {
        self.env.now_unix_ms()
    }

    fn validate(&self, pkt: &SibraPacket) -> Result<(), HandlerError> {
        let topo = self.algo.topo();
        if !topo.contains(pkt.ingress) {
            return Err(HandlerError::TopologyMismatch { ifid: pkt.ingress });
        }
        if !topo.contains(pkt.egress) {
            return Err(HandlerError::TopologyMismatch { ifid: pkt.egress });
        }
        if !pkt.extn.setup && pkt.has_scion_path {
            return Err(HandlerError::BadPacket("non-setup packet carries an explicit path"));
        }
        pkt.extn.validate_path_types()?;
        if !pkt.extn.setup {
            let block = pkt
                .extn
                .curr_active_block()
                .ok_or(HandlerError::BadPacket("non-setup packet without active block"))?;
            self.sof_mac.verify_sof(
                block,
                pkt.extn.curr_block_pos(),
                &pkt.extn.ids,
                self.env.now_unix(),
            )?;
        }
        Ok(())
    }

    /// Whether the packet's journey ends at this AS.
    fn at_travel_end(extn: &SibraExtn) -> bool {
        if extn.forward { extn.last_hop() } else { extn.first_hop() }
    }

    /// Advance the cursor onto the next AS and forward.
    fn advance_and_forward(&self, mut pkt: SibraPacket) -> Result<PacketAction, HandlerError> {
        if !Self::at_travel_end(&pkt.extn) {
            pkt.extn.next_sof_index()?;
        }
        Ok(PacketAction::Forward(pkt))
    }

    /// Turn a finished request around and send it back.
    fn reverse_and_forward(&self, mut pkt: SibraPacket) -> Result<PacketAction, HandlerError> {
        pkt.extn.reverse()?;
        self.advance_and_forward(pkt)
    }

    /// Request at a middle hop forwards; at the travel end it reverses.
    fn finish_request(&self, pkt: SibraPacket) -> Result<PacketAction, HandlerError> {
        if Self::at_travel_end(&pkt.extn) {
            self.reverse_and_forward(pkt)
        } else {
            self.advance_and_forward(pkt)
        }
    }

    /// Response at a middle hop forwards; at the travel end it reaches
    /// the local client.
    fn respond_or_forward(&self, pkt: SibraPacket) -> Result<PacketAction, HandlerError> {
        if Self::at_travel_end(&pkt.extn) {
            Ok(PacketAction::DeliverLocal(pkt))
        } else {
            self.advance_and_forward(pkt)
        }
    }

    fn src_of(extn: &SibraExtn) -> IsdAs {
        IsdAs { isd: 0, asn: extn.req_resv_id().owner_as() }
    }

    /// The smallest maximum the upstream hops offered.
    fn prev_bw(req: &SteadyReq, curr_hop: usize) -> BwCls {
        req.offers
            .iter()
            .take(curr_hop)
            .map(|offer| offer.max)
            .filter(|max| max.0 > 0)
            .min()
            .unwrap_or(req.max_bw)
            .min(req.max_bw)
    }

    fn handle_steady_request(
        &self,
        mut pkt: SibraPacket,
        req: &SteadyReq,
    ) -> Result<PacketAction, HandlerError> {
        let curr_hop = pkt.extn.curr_hop();
        let params = AdmParams {
            ifids: pkt.resv_ifids(),
            src: Self::src_of(&pkt.extn),
            req_id: pkt.extn.req_resv_id(),
            setup: pkt.extn.setup,
            req,
            active_path_type: pkt.extn.curr_active_block().map(|b| b.info.path_type),
            prev_bw: Self::prev_bw(req, curr_hop),
        };
        let decision = self.algo.admit_steady(&params, self.now_ms())?;
        debug!(id = %params.req_id, ?decision, "steady admission");

        let accepted = decision.accepted;
        if let Some(Request::Steady(req)) = pkt.extn.request.as_mut() {
            req.offers[curr_hop] = sibra_proto::request::Offer {
                alloc: decision.alloc_bw,
                min: decision.min_bw,
                max: decision.max_bw,
            };
            if accepted {
                // Downstream hops and the final grant see the shrunk
                // class; every hop stores its own grant as the ceiling.
                req.info.bw_cls = decision.alloc_bw;
            }
            if !accepted {
                if req.base.accepted {
                    req.info.fail_hop = curr_hop as u8;
                }
                req.base.accepted = false;
                req.fail_code = req.fail_code.max(FailCode::BwExceeded);
            }
        }
        if !accepted {
            pkt.extn.accepted = false;
        }
        if Self::at_travel_end(&pkt.extn) {
            // Capture the reservation-direction pair before the reversal
            // flips the travel direction.
            let ifids = pkt.resv_ifids();
            pkt.extn.reverse()?;
            // The end AS is a hop too: its opaque field goes out with the
            // accepted response, before the cursor moves off this AS.
            if accepted {
                self.promote_and_stamp_steady_at(&mut pkt, ifids)?;
            }
            return self.advance_and_forward(pkt);
        }
        self.advance_and_forward(pkt)
    }

    /// On the accepted response path every hop confirms SOF creation and
    /// stamps its opaque field into the response block.
    fn handle_steady_success(&self, mut pkt: SibraPacket) -> Result<PacketAction, HandlerError> {
        if Self::at_travel_end(&pkt.extn) {
            return Ok(PacketAction::DeliverLocal(pkt));
        }
        self.promote_and_stamp_steady(&mut pkt)?;
        self.advance_and_forward(pkt)
    }

    /// Confirm SOF creation and stamp this AS's opaque field into an
    /// accepted steady response. The reservation initiator calls this
    /// when the response reaches it; intermediate hops do it in-line.
    pub fn finalize_steady_response(&self, pkt: &mut SibraPacket) -> Result<(), HandlerError> {
        self.promote_and_stamp_steady(pkt)
    }

    fn promote_and_stamp_steady(&self, pkt: &mut SibraPacket) -> Result<(), HandlerError> {
        let ifids = pkt.resv_ifids();
        self.promote_and_stamp_steady_at(pkt, ifids)
    }

    fn promote_and_stamp_steady_at(
        &self,
        pkt: &mut SibraPacket,
        ifids: sibra_core::IfTuple,
    ) -> Result<(), HandlerError> {
        let info = {
            let Some(Request::SteadySucc(succ)) = pkt.extn.request.as_ref() else {
                return Err(HandlerError::BadPacket("steady success trailer expected"));
            };
            succ.block.info
        };
        self.algo.promote_to_sof_created(ifids, pkt.extn.req_resv_id(), &info, self.now_ms())?;
        self.stamp_sof_at(pkt, ifids, None)?;
        Ok(())
    }

    /// A failed steady response releases the temporary index as it
    /// travels back.
    fn handle_steady_failed_response(
        &self,
        pkt: SibraPacket,
    ) -> Result<PacketAction, HandlerError> {
        if let Some(Request::Steady(req)) = pkt.extn.request.as_ref()
            && let Err(err) =
                self.algo.collect_temp(pkt.extn.req_resv_id(), req.info.index, self.now_ms())
        {
            debug!(%err, "no temporary index to release for failed response");
        }
        self.respond_or_forward(pkt)
    }

    fn handle_idx_confirm(
        &self,
        pkt: SibraPacket,
        idx: Index,
        state: State,
    ) -> Result<PacketAction, HandlerError> {
        let ifids = pkt.resv_ifids();
        let id = pkt.extn.req_resv_id();
        match state {
            State::Pending => self.algo.promote_to_pending(ifids, id, idx)?,
            State::Active => {
                let info = pkt
                    .extn
                    .curr_active_block()
                    .map(|b| b.info)
                    .ok_or(HandlerError::BadPacket("activation without active block"))?;
                if info.index != idx {
                    return Err(HandlerError::BadPacket("confirmed index does not match block"));
                }
                self.algo.promote_to_active(ifids, id, idx, &info, self.now_ms())?;
            },
            _ => return Err(HandlerError::BadPacket("confirmation to invalid state")),
        }
        self.finish_request(pkt)
    }

    fn handle_ephem_request(&self, mut pkt: SibraPacket) -> Result<PacketAction, HandlerError> {
        let decision = if pkt.extn.steady {
            self.algo.admit_ephem_setup(&pkt.extn, self.now_ms())?
        } else {
            self.algo.admit_ephem_renew(&pkt.extn, self.now_ms())?
        };
        debug!(id = %pkt.extn.req_resv_id(), ?decision, "ephemeral admission");

        if decision.fail_code == FailCode::None {
            let egress_override = self.transfer_egress(&pkt.extn);
            self.stamp_sof(&mut pkt, egress_override)?;
            if Self::at_travel_end(&pkt.extn) {
                // The destination client has the final say.
                return Ok(PacketAction::DeliverLocal(pkt));
            }
            return self.advance_and_forward(pkt);
        }
        Self::fail_ephem(&mut pkt.extn, decision);
        self.finish_request(pkt)
    }

    /// A request some upstream hop already failed: tighten the offer and
    /// keep it moving; the travel end turns it around.
    fn handle_ephem_failed(&self, mut pkt: SibraPacket) -> Result<PacketAction, HandlerError> {
        let response = pkt
            .extn
            .request
            .as_ref()
            .is_some_and(|req| req.base().response);
        if response {
            // Release whatever this hop granted on the request leg.
            if pkt.extn.steady {
                self.algo.clean_ephem_setup(&pkt.extn, self.now_ms())?;
            } else {
                self.algo.clean_ephem_renew(&pkt.extn, self.now_ms())?;
            }
            return self.respond_or_forward(pkt);
        }
        let decision = if pkt.extn.steady {
            self.algo.admit_ephem_setup(&pkt.extn, self.now_ms())?
        } else {
            self.algo.admit_ephem_renew(&pkt.extn, self.now_ms())?
        };
        Self::fail_ephem(&mut pkt.extn, decision);
        self.finish_request(pkt)
    }

    /// Record a denial in the trailer: an accepted request becomes a
    /// failure carrier; an existing failure accumulates the strongest
    /// code and this hop's offer.
    fn fail_ephem(extn: &mut SibraExtn, decision: EphemDecision) {
        let curr_hop = extn.curr_hop();
        match extn.request.take() {
            Some(Request::Ephem(req)) => {
                let failed = req.fail(decision.fail_code, decision.max_bw, curr_hop);
                extn.request = Some(Request::EphemFailed(failed));
            },
            Some(Request::EphemFailed(mut failed)) => {
                failed.fail_code = failed.fail_code.max(decision.fail_code);
                if let Some(offer) = failed.offers.get_mut(curr_hop) {
                    *offer = decision.max_bw;
                }
                failed.info.bw_cls = failed.info.bw_cls.min(decision.max_bw);
                extn.request = Some(Request::EphemFailed(failed));
            },
            other => extn.request = other,
        }
        extn.accepted = false;
    }

    /// At a steady transfer the outgoing interface belongs to the next
    /// block; its first opaque field carries it.
    fn transfer_egress(&self, extn: &SibraExtn) -> Option<IfId> {
        if !extn.steady {
            return None;
        }
        let (_, after) = extn.transfer_segments()?;
        extn.active_blocks.get(after).and_then(|block| block.sofs.first()).map(|sof| sof.egress)
    }

    /// Compute and stamp this AS's opaque field into the request block.
    fn stamp_sof(
        &self,
        pkt: &mut SibraPacket,
        egress_override: Option<IfId>,
    ) -> Result<(), HandlerError> {
        let ifids = pkt.resv_ifids();
        self.stamp_sof_at(pkt, ifids, egress_override)
    }

    fn stamp_sof_at(
        &self,
        pkt: &mut SibraPacket,
        ifids: sibra_core::IfTuple,
        egress_override: Option<IfId>,
    ) -> Result<(), HandlerError> {
        let egress = egress_override.unwrap_or(ifids.egress);
        let hop = pkt.extn.curr_hop();
        let (info, chained): (Info, [u8; 4]) = {
            let block = pkt
                .extn
                .request_block()
                .ok_or(HandlerError::BadPacket("no request block to stamp"))?;
            (block.info, SibraExtn::chained_mac(block, hop))
        };
        let mac = self.sof_mac.issue(ifids.ingress, egress, &info, &pkt.extn.ids, chained);
        pkt.extn.stamp_sof(OpField { ingress: ifids.ingress, egress, mac })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sibra_proto::{
        As, Block, ResvId, RttCls, Tick,
        request::{ConfirmIndex, SteadyReq},
    };

    use super::*;

    fn info() -> Info {
        Info {
            exp_tick: Tick(1_000),
            bw_cls: BwCls(10),
            rtt_cls: RttCls(10),
            index: Index::ZERO,
            forward: true,
            path_type: sibra_proto::PathType::Up,
            fail_hop: 0,
        }
    }

    fn steady_id() -> ResvId {
        ResvId::steady(As(1), 1)
    }

    #[test]
    fn classify_setup_request_at_first_hop() {
        let req = SteadyReq::new(
            sibra_proto::RequestType::SteadySetup,
            info(),
            BwCls(1),
            BwCls(10),
            3,
        )
        .unwrap();
        let extn = SibraExtn::steady_setup(steady_id(), req).unwrap();
        let class = classify(&extn);
        assert_eq!(class.direction, Direction::FirstHop);
        assert_eq!(class.kind, Kind::Steady);
        assert_eq!(class.phase, Phase::Request);
        assert_eq!(class.role, Role::StartAs);
    }

    #[test]
    fn classify_response_at_travel_end() {
        let req = SteadyReq::new(
            sibra_proto::RequestType::SteadySetup,
            info(),
            BwCls(1),
            BwCls(10),
            3,
        )
        .unwrap();
        let mut extn = SibraExtn::steady_setup(steady_id(), req).unwrap();
        extn.reverse().unwrap();
        // Travelling backwards from hop 0: the journey ends here.
        let class = classify(&extn);
        assert_eq!(class.direction, Direction::LastHop);
        assert_eq!(class.phase, Phase::Response);
        assert_eq!(class.role, Role::StartAs);
    }

    #[test]
    fn classify_confirm_at_middle_hop() {
        let mut extn = SibraExtn::steady_use(steady_id(), Block::new(info(), 3), true).unwrap();
        extn.to_request(Request::ConfirmIndex(
            ConfirmIndex::new(3, Index::ZERO, State::Pending).unwrap(),
        ))
        .unwrap();
        extn.next_sof_index().unwrap();
        let class = classify(&extn);
        assert_eq!(class.direction, Direction::Hop);
        assert_eq!(class.phase, Phase::IndexConfirm);
        assert_eq!(class.role, Role::HopAs);
    }

    #[test]
    fn classify_best_effort_data() {
        let extn = SibraExtn::steady_use(steady_id(), Block::new(info(), 2), true).unwrap();
        assert_eq!(classify(&extn).phase, Phase::BestEffort);
    }
}
