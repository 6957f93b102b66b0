//! Client-side errors.

use sibra_core::NotifyError;
use sibra_proto::{BwCls, FailCode, WireError};
use thiserror::Error;

/// Errors an ephemeral supervisor can end with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// No reply arrived within the round-trip budget.
    #[error("request timed out")]
    Timeout,

    /// The destination client refused the reservation; do not retry.
    #[error("denied by the destination client")]
    Denied,

    /// A hop rejected the reservation; the offer bounds a retry.
    #[error("reservation failed: {code}, offered max {max_bw}")]
    Failed {
        /// Strongest fail code along the path.
        code: FailCode,
        /// Largest class the path offered.
        max_bw: BwCls,
    },

    /// The steady reservation under the request is gone or outdated;
    /// the cached steady extension must be refreshed.
    #[error("steady reservation outdated: {code}")]
    SteadyInvalid {
        /// The specific steady fail code.
        code: FailCode,
    },

    /// No steady extension is available to ride on.
    #[error("steady extension not available")]
    MissingSteady,

    /// The cached ephemeral extension is gone or expired.
    #[error("ephemeral extension not available")]
    MissingEphemeral,

    /// Building or attaching a request failed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

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
