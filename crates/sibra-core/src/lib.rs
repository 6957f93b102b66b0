//! Per-AS reservation engine for SIBRA.
//!
//! The engine decides how much bandwidth a reservation request may claim
//! on each interface pair, drives reservation indexes through
//! `Temp -> Pending -> Active -> Void`, and accounts ephemeral bandwidth
//! in tick-granular expiring ledgers. It holds all state in memory,
//! never suspends, and never reads the clock on its own: callers pass
//! the current time, normally drawn from an [`Environment`].

mod admission;
mod config;
mod env;
mod error;
mod ledger;
mod notify;
mod state;

pub use admission::{AdmParams, EphemDecision, SibraAlgo, SteadyDecision};
pub use config::{IfInfo, IfTuple, LinkType, Matrix, SibraConfig, Topology, valid_if_pair};
pub use env::{Environment, ManualEnv, SystemEnv};
pub use error::{AdmissionError, LedgerError, StateError};
pub use ledger::{AllocResult, BwProvider};
pub use notify::{NotifyError, NotifyKey, ReplyRouter};
pub use state::{
    EphemEntry, EphemIdx, EphemMap, LOCAL_GC_INTERVAL_MS, LOCAL_RESV_EXPIRY_MS, LocalResvEntry,
    LocalResvs, SteadyEntry, SteadyIdx, SteadyMap, TEMP_GC_INTERVAL_MS, TEMP_RESV_EXPIRY_MS,
    TempTable,
};
