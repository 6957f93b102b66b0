//! Error types for the reservation engine.

use sibra_proto::{Bps, IfId, Index, PathType, ResvId, State, Tick};
use thiserror::Error;

/// Errors from the expiring-bandwidth ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Expiration tick outside the ring horizon.
    #[error("invalid expiration tick {exp}, now {now}, horizon {horizon}")]
    InvalidExpiry {
        /// Requested expiration tick.
        exp: Tick,
        /// Current tick.
        now: Tick,
        /// Number of future ticks the ring covers.
        horizon: u32,
    },

    /// A deallocation would underflow its ring slot.
    #[error("ledger underflow at tick {tick}: slot holds {held}, freeing {freeing}")]
    Underflow {
        /// Tick of the offending slot.
        tick: Tick,
        /// Bandwidth recorded in the slot.
        held: Bps,
        /// Bandwidth the caller tried to free.
        freeing: Bps,
    },

    /// A capacity change would cut below live allocations.
    #[error("new capacity {total} below in-use bandwidth {in_use}")]
    CapacityBelowUse {
        /// Requested new capacity.
        total: Bps,
        /// Currently allocated bandwidth.
        in_use: Bps,
    },
}

/// Errors from reservation entries and their index state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// An index slot is already occupied by a live index.
    #[error("index {idx} already exists on {id}")]
    IndexExists {
        /// Reservation id.
        id: ResvId,
        /// Occupied index.
        idx: Index,
    },

    /// The referenced index slot is empty.
    #[error("index {idx} does not exist")]
    IndexNonExistent {
        /// Missing index.
        idx: Index,
    },

    /// The index is not in the state the transition requires.
    #[error("invalid state {state} for index {idx}")]
    InvalidState {
        /// Referenced index.
        idx: Index,
        /// State the index is actually in.
        state: State,
    },

    /// The opaque field for this index was already created.
    #[error("SOF already created for index {idx}")]
    SofAlreadyCreated {
        /// Referenced index.
        idx: Index,
    },

    /// The opaque field for this index has not been created yet.
    #[error("SOF not created yet for index {idx}")]
    SofNotCreated {
        /// Referenced index.
        idx: Index,
    },

    /// The confirmed bandwidth class exceeds what was admitted.
    #[error("bandwidth class {actual} exceeds admitted {max} on index {idx}")]
    BwExceedsAdmitted {
        /// Referenced index.
        idx: Index,
        /// Admitted class.
        max: u8,
        /// Confirmed class.
        actual: u8,
    },

    /// The presented info does not match the stored one.
    #[error("info does not match stored index state")]
    InfoNotMatching,

    /// A reservation with this id already exists.
    #[error("reservation {id} already exists")]
    ResvExists {
        /// Conflicting id.
        id: ResvId,
    },

    /// No reservation with this id exists.
    #[error("reservation {id} does not exist")]
    ResvNonExistent {
        /// Missing id.
        id: ResvId,
    },

    /// Ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Errors from the admission algorithm.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// An interface referenced by the packet is not in the topology.
    #[error("interface {ifid} not found in topology")]
    UnknownInterface {
        /// Offending interface id.
        ifid: IfId,
    },

    /// Path type is incompatible with the ingress/egress link types.
    #[error("path type {path_type} invalid for this link pair")]
    InvalidLinkPair {
        /// Path type of the request.
        path_type: PathType,
    },

    /// A setup request must use index zero.
    #[error("invalid initial index {idx}")]
    InvalidInitialIndex {
        /// Index carried by the setup request.
        idx: Index,
    },

    /// A renewal must keep the path type of the active block.
    #[error("path type must not change: expected {expected}, got {actual}")]
    PathTypeChanged {
        /// Path type of the active block.
        expected: PathType,
        /// Path type of the request.
        actual: PathType,
    },

    /// The requested maximum bandwidth class is zero.
    #[error("maximum bandwidth class must not be zero")]
    ZeroBandwidth,

    /// The transit demand for the interface pair is zero; the tube ratio
    /// is undefined.
    #[error("zero transit demand between ({ingress},{egress})")]
    ZeroTransitDemand {
        /// Ingress interface.
        ingress: IfId,
        /// Egress interface.
        egress: IfId,
    },

    /// The extension carries no request trailer, or the wrong variant.
    #[error("missing or mismatched request trailer: {0}")]
    BadRequest(&'static str),

    /// Underlying state transition failed.
    #[error(transparent)]
    State(#[from] StateError),
}

impl From<LedgerError> for AdmissionError {
    fn from(err: LedgerError) -> Self {
        Self::State(StateError::Ledger(err))
    }
}
