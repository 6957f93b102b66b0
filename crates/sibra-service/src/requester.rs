//! Steady reservation supervisors.
//!
//! The AS that owns a steady reservation drives its lifecycle: send the
//! setup or renewal, wait for the reply keyed by `(id, index, request
//! type)`, then chain the pending and active confirmations. Supervisors
//! never share state; they communicate only through the reply router and
//! the local reservation records. Cancellation is cooperative: aborting
//! the supervisor task stops it within one round trip.

use std::sync::Arc;

use sibra_core::{
    Environment, LocalResvEntry, LocalResvs, NotifyError, NotifyKey, ReplyRouter,
};
use sibra_proto::{
    Block, BwCls, FailCode, IfId, Index, Info, MAX_STEADY_TICKS, PathType, Request, RequestType,
    ResvId, RttCls, SibraExtn, State,
    request::{ConfirmIndex, SteadyClean, SteadyReq},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    error::HandlerError,
    handler::SibraHandler,
    packet::{PacketAction, SibraPacket},
};

/// Errors a reservation supervisor can end with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequesterError {
    /// No reply arrived within the round-trip budget.
    #[error("request timed out")]
    Timeout,

    /// The path rejected the request.
    #[error("request denied: {code}, offered max {max_bw}")]
    Denied {
        /// Strongest fail code along the path.
        code: FailCode,
        /// Largest class the path offered.
        max_bw: BwCls,
    },

    /// Local pipeline processing failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// A listener for the same request already exists.
    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// The transport could not carry the request.
    #[error("unable to send request: {0}")]
    Send(String),

    /// The reply did not match the outstanding request.
    #[error("invalid reply: {0}")]
    InvalidReply(&'static str),
}

/// Transport the supervisors send packets through.
pub trait RequestSender: Send + Sync {
    /// Send a packet towards its next hop.
    fn send(
        &self,
        pkt: SibraPacket,
    ) -> impl Future<Output = Result<(), String>> + Send;
}

/// Parameters of a steady reservation this AS maintains.
#[derive(Debug, Clone, Copy)]
pub struct SteadyResvSpec {
    /// Reservation id, owned by this AS.
    pub id: ResvId,
    /// Smallest acceptable bandwidth class.
    pub min_bw: BwCls,
    /// Requested bandwidth class.
    pub max_bw: BwCls,
    /// Path type of the reservation.
    pub path_type: PathType,
    /// Round-trip class bounding the supervisor timeouts.
    pub rtt_cls: RttCls,
    /// Number of hops on the path.
    pub num_hops: usize,
    /// Interface the setup leaves through.
    pub egress: IfId,
}

/// Drives steady setups, renewals and confirmations for this AS.
pub struct SteadyRequester<E: Environment, S: RequestSender> {
    handler: Arc<SibraHandler<E>>,
    router: Arc<ReplyRouter<SibraPacket>>,
    local_resvs: Arc<LocalResvs>,
    sender: S,
    env: E,
}

impl<E: Environment, S: RequestSender> SteadyRequester<E, S> {
    /// Build a requester over the shared pipeline and reply router.
    pub fn new(
        handler: Arc<SibraHandler<E>>,
        router: Arc<ReplyRouter<SibraPacket>>,
        local_resvs: Arc<LocalResvs>,
        sender: S,
        env: E,
    ) -> Self {
        Self { handler, router, local_resvs, sender, env }
    }

    /// Set up a fresh steady reservation and confirm it to `Active`.
    /// Returns the granted block.
    pub async fn setup(&self, spec: &SteadyResvSpec) -> Result<Block, RequesterError> {
        let info = Info {
            exp_tick: self.env.current_tick().add(MAX_STEADY_TICKS),
            bw_cls: spec.max_bw,
            rtt_cls: spec.rtt_cls,
            index: Index::ZERO,
            forward: true,
            path_type: spec.path_type,
            fail_hop: 0,
        };
        let req = SteadyReq::new(
            RequestType::SteadySetup,
            info,
            spec.min_bw,
            spec.max_bw,
            spec.num_hops,
        )
        .map_err(HandlerError::from)?;
        let extn = SibraExtn::steady_setup(spec.id, req).map_err(HandlerError::from)?;
        let pkt =
            SibraPacket { extn, ingress: 0, egress: spec.egress, has_scion_path: true };
        self.drive_reservation(spec, pkt, RequestType::SteadySetup, Index::ZERO).await
    }

    /// Renew an established reservation on the next index.
    pub async fn renew(
        &self,
        spec: &SteadyResvSpec,
        active: &Block,
    ) -> Result<Block, RequesterError> {
        let idx = active.info.index.next();
        let info = Info {
            exp_tick: self.env.current_tick().add(MAX_STEADY_TICKS),
            bw_cls: spec.max_bw,
            rtt_cls: active.info.rtt_cls,
            index: idx,
            forward: active.info.forward,
            path_type: active.info.path_type,
            fail_hop: 0,
        };
        let req = SteadyReq::new(
            RequestType::SteadyRenewal,
            info,
            spec.min_bw,
            spec.max_bw,
            spec.num_hops,
        )
        .map_err(HandlerError::from)?;
        let mut extn = SibraExtn::steady_use(spec.id, active.clone(), active.info.forward)
            .map_err(HandlerError::from)?;
        extn.to_request(Request::Steady(req)).map_err(HandlerError::from)?;
        let pkt =
            SibraPacket { extn, ingress: 0, egress: spec.egress, has_scion_path: false };
        self.drive_reservation(spec, pkt, RequestType::SteadyRenewal, idx).await
    }

    /// Submit a reservation request and walk the reply through the
    /// confirmation sequence.
    async fn drive_reservation(
        &self,
        spec: &SteadyResvSpec,
        pkt: SibraPacket,
        req_type: RequestType,
        idx: Index,
    ) -> Result<Block, RequesterError> {
        let key = NotifyKey { id: spec.id, idx, req_type };
        let timeout = spec.rtt_cls.duration();
        let mut reply = self.request_reply(pkt, key, timeout).await?;

        let block = match reply.extn.request.clone() {
            Some(Request::SteadySucc(succ)) => {
                if succ.block.info.index != idx {
                    return Err(RequesterError::InvalidReply("index mismatch"));
                }
                // This AS is the first hop of the granted block: confirm
                // the opaque field and stamp it before using the block.
                self.handler.finalize_steady_response(&mut reply)?;
                let Some(Request::SteadySucc(succ)) = reply.extn.request.clone() else {
                    return Err(RequesterError::InvalidReply("success trailer vanished"));
                };
                succ.block
            },
            Some(Request::Steady(failed)) => {
                let offered = failed
                    .offers
                    .iter()
                    .map(|offer| offer.max)
                    .filter(|max| max.0 > 0)
                    .min()
                    .unwrap_or(BwCls(0));
                info!(id = %spec.id, code = %failed.fail_code, "steady request denied");
                return Err(RequesterError::Denied { code: failed.fail_code, max_bw: offered });
            },
            _ => return Err(RequesterError::InvalidReply("unexpected trailer")),
        };

        self.local_resvs.set(
            spec.id,
            idx,
            LocalResvEntry {
                id: spec.id,
                state: State::Temp,
                block: block.clone(),
                creation_ms: self.env.now_unix_ms(),
            },
            self.env.now_unix_ms(),
        );

        for state in [State::Pending, State::Active] {
            if let Err(err) = self.confirm(spec, &block, state).await {
                warn!(id = %spec.id, %idx, %err, "confirmation failed, cleaning up index");
                self.clean_up(spec, &block).await;
                return Err(err);
            }
        }
        Ok(block)
    }

    /// Send one index confirmation and wait for the echo.
    async fn confirm(
        &self,
        spec: &SteadyResvSpec,
        block: &Block,
        state: State,
    ) -> Result<(), RequesterError> {
        let idx = block.info.index;
        let conf =
            ConfirmIndex::new(spec.num_hops, idx, state).map_err(HandlerError::from)?;
        let mut extn = SibraExtn::steady_use(spec.id, block.clone(), block.info.forward)
            .map_err(HandlerError::from)?;
        extn.to_request(Request::ConfirmIndex(conf)).map_err(HandlerError::from)?;
        let pkt =
            SibraPacket { extn, ingress: 0, egress: spec.egress, has_scion_path: false };

        let key = NotifyKey { id: spec.id, idx, req_type: RequestType::SteadyConfIndex };
        let reply = self.request_reply(pkt, key, spec.rtt_cls.duration()).await?;
        match reply.extn.request {
            Some(Request::ConfirmIndex(conf)) if conf.base.accepted => {
                self.local_resvs.set_state(spec.id, idx, state);
                debug!(id = %spec.id, %idx, %state, "index confirmed");
                Ok(())
            },
            Some(Request::ConfirmIndex(_)) => {
                Err(RequesterError::Denied { code: FailCode::InvalidInfo, max_bw: BwCls(0) })
            },
            _ => Err(RequesterError::InvalidReply("unexpected trailer")),
        }
    }

    /// Remove a granted-but-unconfirmed index along the path. Timed-out
    /// clean-ups retry once on the error-refire delay.
    async fn clean_up(&self, spec: &SteadyResvSpec, block: &Block) {
        let idx = block.info.index;
        for attempt in 0..2 {
            let clean = SteadyClean::new(idx, block.info, spec.num_hops);
            let Ok(mut extn) =
                SibraExtn::steady_use(spec.id, block.clone(), block.info.forward)
            else {
                return;
            };
            if extn.to_request(Request::SteadyClean(clean)).is_err() {
                return;
            }
            let pkt =
                SibraPacket { extn, ingress: 0, egress: spec.egress, has_scion_path: false };
            let key = NotifyKey { id: spec.id, idx, req_type: RequestType::SteadyCleanUp };
            match self.request_reply(pkt, key, spec.rtt_cls.duration()).await {
                Ok(_) => {
                    self.local_resvs.delete(spec.id, idx);
                    return;
                },
                Err(err) => {
                    warn!(id = %spec.id, %idx, attempt, %err, "steady clean-up attempt failed");
                    tokio::time::sleep(spec.rtt_cls.duration()).await;
                },
            }
        }
    }

    /// Run a packet through the local pipeline, send it, and wait for
    /// the routed reply or the round-trip timeout.
    async fn request_reply(
        &self,
        pkt: SibraPacket,
        key: NotifyKey,
        timeout: std::time::Duration,
    ) -> Result<SibraPacket, RequesterError> {
        let mut rx = self.router.register(key)?;
        let result = async {
            let outgoing = match self.handler.try_handle(pkt)? {
                PacketAction::Forward(pkt) => pkt,
                PacketAction::DeliverLocal(_) => {
                    return Err(RequesterError::InvalidReply("request terminated locally"));
                },
            };
            self.sender.send(outgoing).await.map_err(RequesterError::Send)?;
            tokio::select! {
                reply = rx.recv() => reply.ok_or(RequesterError::Timeout),
                () = tokio::time::sleep(timeout) => Err(RequesterError::Timeout),
            }
        }
        .await;
        self.router.deregister(&key);
        result
    }
}

/// Derive the notify key a response packet belongs to.
pub fn reply_key(pkt: &SibraPacket) -> Option<NotifyKey> {
    let req = pkt.extn.request.as_ref()?;
    if !req.base().response {
        return None;
    }
    let idx = match req {
        Request::Steady(r) => r.info.index,
        Request::SteadySucc(r) => r.block.info.index,
        Request::ConfirmIndex(r) => r.idx,
        Request::SteadyClean(r) => r.idx,
        Request::SteadyTearDown(_) => Index::ZERO,
        Request::Ephem(r) => r.block.info.index,
        Request::EphemFailed(r) => r.info.index,
        Request::EphemClean(r) => r.info.index,
    };
    Some(NotifyKey { id: pkt.extn.req_resv_id(), idx, req_type: req.req_type() })
}
