//! Handler error taxonomy.
//!
//! Only hard failures surface as errors; an admission denial is not one
//! of them (it travels back to the initiator as a response extension).
//! `InvalidWire`, `AuthFailure` and `TopologyMismatch` drop silently;
//! `StateInvalid` is logged and dropped.

use sibra_crypto::AuthError;
use sibra_proto::{IfId, WireError};
use thiserror::Error;

/// Reasons the pipeline drops a packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Header or trailer is malformed.
    #[error("invalid wire format: {0}")]
    InvalidWire(#[from] WireError),

    /// Opaque-field verification failed or the reservation expired.
    #[error("authentication failure: {0}")]
    AuthFailure(#[from] AuthError),

    /// The packet references an interface this AS does not have.
    #[error("unknown interface {ifid}")]
    TopologyMismatch {
        /// The offending interface id.
        ifid: IfId,
    },

    /// A non-setup packet carries an explicit path, or the trailer does
    /// not fit the extension.
    #[error("malformed packet: {0}")]
    BadPacket(&'static str),

    /// A promotion or clean-up hit an index in the wrong state.
    #[error("invalid reservation state: {0}")]
    StateInvalid(String),
}

impl From<sibra_core::AdmissionError> for HandlerError {
    fn from(err: sibra_core::AdmissionError) -> Self {
        Self::StateInvalid(err.to_string())
    }
}

impl From<sibra_core::StateError> for HandlerError {
    fn from(err: sibra_core::StateError) -> Self {
        Self::StateInvalid(err.to_string())
    }
}
