//! SIBRA service pipeline.
//!
//! Classifies incoming reservation packets by direction, kind, phase and
//! role, validates topology and opaque fields, dispatches to the
//! admission engine, stamps opaque fields, and tells the embedding
//! forwarder what to do with each packet. The SCION parser, forwarder
//! and dispatcher socket live outside; this crate consumes parsed
//! extensions and emits [`PacketAction`]s.

mod error;
mod gc;
mod handler;
mod packet;
mod requester;

pub use error::HandlerError;
pub use gc::spawn_sweeps;
pub use handler::{Classification, Direction, Kind, Phase, Role, SibraHandler, classify};
pub use packet::{PacketAction, SibraPacket};
pub use requester::{
    RequestSender, RequesterError, SteadyRequester, SteadyResvSpec, reply_key,
};
