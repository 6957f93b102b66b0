//! Ephemeral reservation supervisors.
//!
//! Each supervisor drives one request: build the extension, register the
//! notify key, send, and select over the reply and the round-trip
//! timeout. A timed-out setup or renewal transitions into a clean-up
//! that removes whatever the path granted before the failure.
//! Supervisors never share state; coordination happens only through the
//! reply router.

use std::sync::Arc;

use sibra_core::{Environment, NotifyKey, ReplyRouter};
use sibra_proto::{
    As, BwCls, FailCode, Index, Info, MAX_EPHEM_TICKS, PathType, Request, RequestType, ResvId,
    RttCls, SibraExtn,
    request::{EphemClean, EphemReq},
};
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Transport the supervisors send extensions through.
pub trait ExtnSender: Send + Sync {
    /// Send an extension towards the local SIBRA service.
    fn send(&self, extn: SibraExtn) -> impl Future<Output = Result<(), String>> + Send;
}

/// An established ephemeral reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemGrant {
    /// The ephemeral reservation id.
    pub id: ResvId,
    /// The stitched extension data packets ride on.
    pub extn: SibraExtn,
}

/// Drives ephemeral setups, renewals and clean-ups for one end host.
pub struct EphemRequester<E: Environment, S: ExtnSender> {
    router: Arc<ReplyRouter<SibraExtn>>,
    sender: S,
    env: E,
    asn: As,
}

impl<E: Environment, S: ExtnSender> EphemRequester<E, S> {
    /// Build a requester for the host AS `asn`.
    pub fn new(router: Arc<ReplyRouter<SibraExtn>>, sender: S, env: E, asn: As) -> Self {
        Self { router, sender, env, asn }
    }

    /// The reply router responses must be routed into.
    pub fn router(&self) -> &Arc<ReplyRouter<SibraExtn>> {
        &self.router
    }

    fn fresh_info(&self, bw_cls: BwCls, rtt_cls: RttCls, index: Index) -> Info {
        Info {
            exp_tick: self.env.current_tick().add(MAX_EPHEM_TICKS),
            bw_cls,
            rtt_cls,
            index,
            forward: true,
            path_type: PathType::Ephemeral,
            fail_hop: 0,
        }
    }

    fn rtt_of(extn: &SibraExtn) -> RttCls {
        extn.active_blocks.first().map_or(RttCls(0), |block| block.info.rtt_cls)
    }

    /// Set up a fresh ephemeral reservation over the stitched steady
    /// extension. On timeout a clean-up is launched before returning.
    pub async fn setup(
        &self,
        steady: &SibraExtn,
        bw_cls: BwCls,
    ) -> Result<EphemGrant, ClientError> {
        let mut suffix = [0u8; 10];
        self.env.random_bytes(&mut suffix);
        let id = ResvId::ephemeral(self.asn, suffix);
        let info = self.fresh_info(bw_cls, Self::rtt_of(steady), Index::ZERO);
        let req = EphemReq::new(RequestType::EphemSetup, Some(id), info, steady.total_hops())?;

        let mut extn = steady.clone();
        extn.to_request(Request::Ephem(req))?;

        let key = NotifyKey { id, idx: Index::ZERO, req_type: RequestType::EphemSetup };
        let reply = match self.request_reply(extn, key, Self::rtt_of(steady)).await {
            Ok(reply) => reply,
            Err(ClientError::Timeout) => {
                info!(%id, "ephemeral setup timed out, cleaning up");
                self.clean_setup(steady, id, &info).await;
                return Err(ClientError::Timeout);
            },
            Err(err) => return Err(err),
        };
        match reply.request.clone() {
            Some(Request::Ephem(granted)) => {
                let mut ids = vec![id];
                ids.extend_from_slice(reply.steady_ids());
                let extn =
                    SibraExtn::ephem_use(ids, reply.path_lens, granted.block, true)?;
                Ok(EphemGrant { id, extn })
            },
            Some(Request::EphemFailed(failed)) => Err(Self::failure(&failed.fail_code, &failed)),
            _ => Err(ClientError::InvalidReply("unexpected trailer")),
        }
    }

    /// Renew an established reservation on the next index.
    pub async fn renew(
        &self,
        grant: &EphemGrant,
        bw_cls: BwCls,
    ) -> Result<EphemGrant, ClientError> {
        let active = grant.extn.active_blocks.first().ok_or(ClientError::MissingEphemeral)?;
        let idx = active.info.index.next();
        let info = self.fresh_info(bw_cls, active.info.rtt_cls, idx);
        let req = EphemReq::new(RequestType::EphemRenewal, None, info, grant.extn.total_hops())?;

        let mut extn = grant.extn.clone();
        extn.to_request(Request::Ephem(req))?;

        let key = NotifyKey { id: grant.id, idx, req_type: RequestType::EphemRenewal };
        let reply = match self.request_reply(extn, key, Self::rtt_of(&grant.extn)).await {
            Ok(reply) => reply,
            Err(ClientError::Timeout) => {
                info!(id = %grant.id, "ephemeral renewal timed out, cleaning up");
                self.clean_renew(&grant.extn, &info).await;
                return Err(ClientError::Timeout);
            },
            Err(err) => return Err(err),
        };
        match reply.request.clone() {
            Some(Request::Ephem(granted)) => {
                let extn = SibraExtn::ephem_use(
                    reply.ids.clone(),
                    reply.path_lens,
                    granted.block,
                    true,
                )?;
                Ok(EphemGrant { id: grant.id, extn })
            },
            Some(Request::EphemFailed(failed)) => Err(Self::failure(&failed.fail_code, &failed)),
            _ => Err(ClientError::InvalidReply("unexpected trailer")),
        }
    }

    fn failure(
        code: &FailCode,
        failed: &sibra_proto::request::EphemFailed,
    ) -> ClientError {
        match code {
            FailCode::ClientDenied => ClientError::Denied,
            FailCode::SteadyOutdated | FailCode::SteadyNotExists => {
                ClientError::SteadyInvalid { code: *code }
            },
            _ => ClientError::Failed { code: *code, max_bw: failed.info.bw_cls },
        }
    }

    /// Remove the state of a failed setup along the steady path. A
    /// timed-out clean-up retries once on the error-refire delay.
    pub async fn clean_setup(&self, steady: &SibraExtn, id: ResvId, failed: &Info) {
        let rtt = Self::rtt_of(steady);
        for attempt in 0..2u32 {
            let clean = EphemClean::new(Some(id), *failed, steady.total_hops());
            let mut extn = steady.clone();
            if let Err(err) = extn.to_request(Request::EphemClean(clean)) {
                warn!(%id, %err, "unable to build clean-up request");
                return;
            }
            let key =
                NotifyKey { id, idx: failed.index, req_type: RequestType::EphemCleanUp };
            match self.request_reply(extn, key, rtt).await {
                Ok(reply) => {
                    debug!(%id, accepted = ?reply.request.map(|r| r.base().accepted),
                        "clean-up acknowledged");
                    return;
                },
                Err(err) => {
                    warn!(%id, attempt, %err, "clean-up attempt failed");
                    tokio::time::sleep(rtt.duration()).await;
                },
            }
        }
    }

    /// Roll back a failed renewal along the ephemeral path.
    pub async fn clean_renew(&self, ephem: &SibraExtn, failed: &Info) {
        let rtt = Self::rtt_of(ephem);
        let id = ephem.req_resv_id();
        for attempt in 0..2u32 {
            let clean = EphemClean::new(None, *failed, ephem.total_hops());
            let mut extn = ephem.clone();
            if let Err(err) = extn.to_request(Request::EphemClean(clean)) {
                warn!(%id, %err, "unable to build clean-up request");
                return;
            }
            let key =
                NotifyKey { id, idx: failed.index, req_type: RequestType::EphemCleanUp };
            match self.request_reply(extn, key, rtt).await {
                Ok(_) => return,
                Err(err) => {
                    warn!(%id, attempt, %err, "renewal clean-up attempt failed");
                    tokio::time::sleep(rtt.duration()).await;
                },
            }
        }
    }

    /// Register, send, and select over the reply and the timeout.
    async fn request_reply(
        &self,
        extn: SibraExtn,
        key: NotifyKey,
        rtt: RttCls,
    ) -> Result<SibraExtn, ClientError> {
        let mut rx = self.router.register(key)?;
        let result = async {
            self.sender.send(extn).await.map_err(ClientError::Send)?;
            tokio::select! {
                reply = rx.recv() => reply.ok_or(ClientError::Timeout),
                () = tokio::time::sleep(rtt.duration()) => Err(ClientError::Timeout),
            }
        }
        .await;
        self.router.deregister(&key);
        result
    }
}
