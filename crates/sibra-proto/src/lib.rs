//! Wire codec for the SIBRA bandwidth-reservation extension.
//!
//! SIBRA reserves bandwidth along multi-hop inter-domain paths. Long-lived
//! *steady* reservations are owned by ASes; short-lived *ephemeral*
//! reservations are owned by end hosts and stitched onto up to three
//! steady reservations. Every data packet carries a hop-by-hop extension
//! with authenticated opaque fields that on-path ASes admit, stamp and
//! forward.
//!
//! This crate owns the bit-exact wire format: value types, reservation
//! ids, info fields, opaque fields, blocks, the extension header and every
//! request/response trailer. All structures are fixed-width big-endian and
//! round-trip through `parse`/`write` exactly.

mod block;
mod errors;
mod extn;
mod id;
mod info;
mod sof;
mod types;

pub mod request;

pub use block::Block;
pub use errors::{Result, WireError};
pub use extn::SibraExtn;
pub use id::ResvId;
pub use info::Info;
pub use request::{FailCode, LINE_LEN, Request, RequestType};
pub use sof::{MAC_LEN, OpField};
pub use types::{
    As, Bps, BwCls, EPHEM_ID_LEN, IfId, Index, IsdAs, MAX_EPHEM_TICKS, MAX_STEADY_TICKS,
    NUM_INDEXES, PathType, RttCls, STEADY_ID_LEN, State, TICK_DURATION, TICK_INTERVAL_SECS, Tick,
    VERSION,
};
