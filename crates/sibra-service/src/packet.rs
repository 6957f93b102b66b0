//! Packet view the pipeline operates on.
//!
//! The SCION parser and forwarder live outside this crate; the pipeline
//! consumes an already-parsed extension together with the interfaces the
//! packet traversed and emits an action for the embedding forwarder.

use sibra_core::IfTuple;
use sibra_proto::{IfId, SibraExtn};

/// A SIBRA packet as seen by the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SibraPacket {
    /// Parsed hop-by-hop extension.
    pub extn: SibraExtn,
    /// Interface the packet arrived on (zero at the path origin).
    pub ingress: IfId,
    /// Interface the packet leaves on (zero at the path end).
    pub egress: IfId,
    /// Whether the packet still carries an explicit SCION path. Only
    /// setup packets may.
    pub has_scion_path: bool,
}

impl SibraPacket {
    /// The interface pair in reservation direction: reversed packets
    /// traverse the pair backwards.
    pub fn resv_ifids(&self) -> IfTuple {
        if self.extn.forward {
            IfTuple { ingress: self.ingress, egress: self.egress }
        } else {
            IfTuple { ingress: self.egress, egress: self.ingress }
        }
    }
}

/// What the embedding forwarder should do with a handled packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketAction {
    /// Send the packet out of its egress interface.
    Forward(SibraPacket),
    /// Hand the packet to the local client (reservation endpoint).
    DeliverLocal(SibraPacket),
}

impl PacketAction {
    /// The packet inside the action.
    pub fn packet(&self) -> &SibraPacket {
        match self {
            Self::Forward(pkt) | Self::DeliverLocal(pkt) => pkt,
        }
    }
}
