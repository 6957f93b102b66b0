//! Typed wire-codec failures.
//!
//! Every parse or write reports a structured error carrying the offending
//! lengths or values. Malformed input never panics; the handler layer maps
//! these errors to a silent drop.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors produced while parsing or writing SIBRA wire structures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Input buffer shorter than the structure requires.
    #[error("truncated input: need {min} bytes, got {actual}")]
    Truncated {
        /// Minimum number of bytes required.
        min: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Output buffer shorter than the encoded structure.
    #[error("output buffer too short: need {min} bytes, got {actual}")]
    BufferTooShort {
        /// Minimum number of bytes required.
        min: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// SIBRA version field does not match the supported version.
    #[error("unsupported SIBRA version {0}")]
    UnsupportedVersion(u8),

    /// The setup flag is set without the request flag.
    #[error("setup flag set without request flag")]
    SetupWithoutRequest,

    /// Path length bytes are inconsistent (gap or all-zero).
    #[error("invalid path lengths ({p0},{p1},{p2})")]
    InvalidPathLens {
        /// First block hop count.
        p0: u8,
        /// Second block hop count.
        p1: u8,
        /// Third block hop count.
        p2: u8,
    },

    /// SOF index points outside the SOF sequence.
    #[error("invalid SOF index {actual}, expected < {max}")]
    InvalidSofIndex {
        /// Number of SOF positions in the extension.
        max: u8,
        /// Index found on the wire.
        actual: u8,
    },

    /// Reservation id has a length other than 10 (steady) or 16 (ephemeral).
    #[error("invalid reservation id length {0}")]
    InvalidIdLen(usize),

    /// Block length does not match `8 + 8 * num_hops`.
    #[error("invalid block length for {num_hops} hops: need {min} bytes, got {actual}")]
    InvalidBlockLen {
        /// Hop count the block was parsed against.
        num_hops: usize,
        /// Expected byte length.
        min: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Reservation index outside `0..16`.
    #[error("invalid reservation index {0}")]
    InvalidIndex(u8),

    /// Unknown path type discriminant.
    #[error("invalid path type {0}")]
    InvalidPathType(u8),

    /// Unknown reservation state discriminant.
    #[error("invalid reservation state {0}")]
    InvalidState(u8),

    /// Incompatible path types at a transfer between blocks.
    #[error("incompatible path types at block {block}: {curr} after {prev}")]
    IncompatiblePathTypes {
        /// Index of the offending block.
        block: usize,
        /// Path type of the preceding block (empty string for none).
        prev: &'static str,
        /// Path type of the offending block.
        curr: &'static str,
    },

    /// Request trailer carries a type the context does not allow.
    #[error("invalid request type {actual} in {context}")]
    InvalidRequestType {
        /// Where the request was encountered.
        context: &'static str,
        /// Type tag found on the wire.
        actual: u8,
    },

    /// Response/accepted flag combination is not valid for the variant.
    #[error("invalid request flags: {0}")]
    InvalidRequestFlags(&'static str),

    /// Declared line length disagrees with the actual buffer size.
    #[error("line length mismatch: header claims {expected} bytes, got {actual}")]
    LineLenMismatch {
        /// Byte length the header claims.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Hop count of an attached request disagrees with the extension.
    #[error("hop count mismatch: request {request}, extension {extension}")]
    HopCountMismatch {
        /// Hop count of the request trailer.
        request: usize,
        /// Hop count derived from the extension.
        extension: usize,
    },

    /// Confirm-index state is neither pending nor active.
    #[error("invalid confirm state {0}")]
    InvalidConfirmState(u8),

    /// Bytes left over after the structure was fully parsed.
    #[error("{0} trailing bytes after extension")]
    TrailingBytes(usize),

    /// Operation not supported for this extension or request shape.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

pub(crate) fn need(raw: &[u8], min: usize) -> Result<()> {
    if raw.len() < min {
        return Err(WireError::Truncated { min, actual: raw.len() });
    }
    Ok(())
}

pub(crate) fn need_out(buf: &[u8], min: usize) -> Result<()> {
    if buf.len() < min {
        return Err(WireError::BufferTooShort { min, actual: buf.len() });
    }
    Ok(())
}
