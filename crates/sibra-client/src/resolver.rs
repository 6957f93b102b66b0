//! Keeps one ephemeral reservation alive.
//!
//! The resolver owns the retry policy around the supervisors: set up
//! when nothing exists, renew before expiry, clean up after failures,
//! and back off on the error-refire delay. A denial by the destination
//! client terminates the resolver; an outdated steady reservation
//! invalidates the cached steady extension so the embedding host fetches
//! a fresh one.

use std::time::Duration;

use parking_lot::Mutex;
use sibra_core::Environment;
use sibra_proto::{BwCls, FailCode, SibraExtn};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    requester::{EphemGrant, EphemRequester, ExtnSender},
};

/// Remaining lifetime below which a renewal is started, in ticks.
const RENEW_THRESHOLD_TICKS: u64 = 2;

/// Refire delays of the resolver loop.
#[derive(Debug, Clone, Copy)]
pub struct Timers {
    /// Delay between passes while everything is healthy.
    pub normal_refire: Duration,
    /// Delay before retrying after an error or timeout.
    pub error_refire: Duration,
}

impl Default for Timers {
    fn default() -> Self {
        Self {
            normal_refire: Duration::from_secs(1),
            error_refire: Duration::from_millis(500),
        }
    }
}

/// Lifecycle of the managed reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EphemState {
    /// Nothing reserved yet.
    Start,
    /// A reservation exists and is kept renewed.
    Exists,
    /// The destination denied the reservation; terminal.
    Denied,
}

/// Retry bookkeeping for the managed reservation.
#[derive(Debug, Clone, Copy)]
pub struct EphemMeta {
    /// Smallest class worth reserving.
    pub min_bw: BwCls,
    /// Class the host actually wants.
    pub max_bw: BwCls,
    /// Lifecycle state.
    pub state: EphemState,
    /// Fail code of the last attempt.
    pub last_fail: FailCode,
    /// Largest class the path offered on the last failure.
    pub last_offered: BwCls,
}

impl EphemMeta {
    /// Fresh bookkeeping for a `[min, max]` bandwidth corridor.
    pub fn new(min_bw: BwCls, max_bw: BwCls) -> Self {
        Self {
            min_bw,
            max_bw,
            state: EphemState::Start,
            last_fail: FailCode::None,
            last_offered: BwCls(0),
        }
    }

    /// Class to request next: the full ask, or the last offer clamped
    /// into the configured corridor after a bandwidth rejection.
    pub fn next_bw(&self) -> BwCls {
        if self.last_fail == FailCode::None {
            return self.max_bw;
        }
        self.last_offered.max(self.min_bw).min(self.max_bw)
    }

    fn record_failure(&mut self, code: FailCode, offered: BwCls) {
        self.last_fail = code;
        self.last_offered = offered;
    }

    fn record_success(&mut self) {
        self.last_fail = FailCode::None;
        self.last_offered = BwCls(0);
        self.state = EphemState::Exists;
    }
}

/// Source of the stitched steady extension the reservation rides on.
/// Path lookup lives outside the core; this is its seam.
pub trait SteadySource: Send + Sync {
    /// The current stitched steady extension, if one is known.
    fn current(&self) -> Option<SibraExtn>;

    /// Drop the cached extension after the path rejected it as outdated.
    fn invalidate(&self);
}

/// Drives one ephemeral reservation to existence and keeps it there.
pub struct Resolver<E: Environment, S: ExtnSender, P: SteadySource> {
    requester: EphemRequester<E, S>,
    steady: P,
    meta: Mutex<EphemMeta>,
    grant: Mutex<Option<EphemGrant>>,
    timers: Timers,
    env: E,
}

impl<E: Environment, S: ExtnSender, P: SteadySource> Resolver<E, S, P> {
    /// Build a resolver for the given bandwidth corridor.
    pub fn new(
        requester: EphemRequester<E, S>,
        steady: P,
        min_bw: BwCls,
        max_bw: BwCls,
        timers: Timers,
        env: E,
    ) -> Self {
        Self {
            requester,
            steady,
            meta: Mutex::new(EphemMeta::new(min_bw, max_bw)),
            grant: Mutex::new(None),
            timers,
            env,
        }
    }

    /// The currently usable reservation, if any.
    pub fn grant(&self) -> Option<EphemGrant> {
        self.grant.lock().clone()
    }

    /// The steady-extension source this resolver rides on.
    pub fn steady_source(&self) -> &P {
        &self.steady
    }

    /// Snapshot of the retry bookkeeping.
    pub fn meta(&self) -> EphemMeta {
        *self.meta.lock()
    }

    fn remaining_ticks(&self, grant: &EphemGrant) -> i64 {
        grant
            .extn
            .expiry()
            .map_or(0, |exp| exp.sub(self.env.current_tick()))
    }

    /// One resolver pass. Returns the delay until the next pass, or
    /// `None` once the resolver is terminal.
    pub async fn poll(&self) -> Option<Duration> {
        if self.meta.lock().state == EphemState::Denied {
            return None;
        }
        // Expired grants are useless; fall back to setup.
        let existing = self.grant.lock().clone();
        let existing = existing.filter(|grant| self.remaining_ticks(grant) > 0);
        if existing.is_none() {
            *self.grant.lock() = None;
        }

        let outcome = match existing {
            None => {
                let Some(steady) = self.steady.current() else {
                    debug!("no steady extension available yet");
                    return Some(self.timers.error_refire);
                };
                let bw = self.meta.lock().next_bw();
                self.requester.setup(&steady, bw).await
            },
            Some(grant) => {
                if self.remaining_ticks(&grant) > RENEW_THRESHOLD_TICKS as i64 {
                    return Some(self.timers.normal_refire);
                }
                let bw = self.meta.lock().next_bw();
                self.requester.renew(&grant, bw).await
            },
        };

        match outcome {
            Ok(grant) => {
                info!(id = %grant.id, "ephemeral reservation established");
                *self.grant.lock() = Some(grant);
                self.meta.lock().record_success();
                Some(self.timers.normal_refire)
            },
            Err(ClientError::Denied) => {
                info!("destination denied the reservation, giving up");
                self.meta.lock().state = EphemState::Denied;
                None
            },
            Err(ClientError::SteadyInvalid { code }) => {
                warn!(%code, "steady extension invalid, refreshing");
                self.steady.invalidate();
                *self.grant.lock() = None;
                Some(self.timers.error_refire)
            },
            Err(ClientError::Failed { code, max_bw }) => {
                debug!(%code, %max_bw, "reservation attempt failed");
                self.meta.lock().record_failure(code, max_bw);
                Some(self.timers.error_refire)
            },
            Err(err) => {
                warn!(%err, "reservation attempt errored");
                Some(self.timers.error_refire)
            },
        }
    }

    /// Run resolver passes until terminal or stopped. Cancellation is
    /// cooperative through the watch channel.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        loop {
            let Some(delay) = self.poll().await else {
                return;
            };
            tokio::select! {
                () = tokio::time::sleep(delay) => {},
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                },
            }
        }
    }
}
