//! Configuration the reservation engine consumes.
//!
//! The engine never loads files itself; the embedding service builds a
//! `Topology` and `Matrix` from its own configuration sources and hands
//! them over. Interface id zero denotes the local end of a path and is
//! always valid.

use std::collections::HashMap;

use sibra_proto::{Bps, IfId, PathType};

/// Type of the link behind an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// Link to another core AS.
    Core,
    /// Link to a parent AS.
    Parent,
    /// Link to a child AS.
    Child,
    /// Peering link.
    Peer,
    /// No link; the local end of a path.
    Unset,
}

/// Static per-interface information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfInfo {
    /// Link type of the interface.
    pub link_type: LinkType,
    /// Ingress capacity in bits per second.
    pub ingress_cap: Bps,
    /// Egress capacity in bits per second.
    pub egress_cap: Bps,
}

/// Interface pair in reservation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IfTuple {
    /// Ingress interface, zero at the first hop.
    pub ingress: IfId,
    /// Egress interface, zero at the last hop.
    pub egress: IfId,
}

impl IfTuple {
    /// The tuple seen by packets travelling the opposite direction.
    pub fn reverse(self) -> Self {
        Self { ingress: self.egress, egress: self.ingress }
    }
}

/// Map from interface id to capacity and link type.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    ifs: HashMap<IfId, IfInfo>,
}

impl Topology {
    /// Build a topology from explicit interface entries.
    pub fn new(ifs: impl IntoIterator<Item = (IfId, IfInfo)>) -> Self {
        Self { ifs: ifs.into_iter().collect() }
    }

    /// Interface information, if the interface exists.
    pub fn get(&self, ifid: IfId) -> Option<&IfInfo> {
        self.ifs.get(&ifid)
    }

    /// Whether the interface is known (zero is always valid).
    pub fn contains(&self, ifid: IfId) -> bool {
        ifid == 0 || self.ifs.contains_key(&ifid)
    }

    /// Link type of an interface; zero maps to `Unset`.
    pub fn link_type(&self, ifid: IfId) -> Option<LinkType> {
        if ifid == 0 {
            return Some(LinkType::Unset);
        }
        self.ifs.get(&ifid).map(|info| info.link_type)
    }

    /// Ingress capacity; zero interfaces have unbounded local capacity.
    pub fn ingress_cap(&self, ifid: IfId) -> Bps {
        if ifid == 0 {
            return Bps(u64::MAX);
        }
        self.ifs.get(&ifid).map_or(Bps(0), |info| info.ingress_cap)
    }

    /// Egress capacity; zero interfaces have unbounded local capacity.
    pub fn egress_cap(&self, ifid: IfId) -> Bps {
        if ifid == 0 {
            return Bps(u64::MAX);
        }
        self.ifs.get(&ifid).map_or(Bps(0), |info| info.egress_cap)
    }

    /// All known interface ids plus the local id zero.
    pub fn ifids_with_local(&self) -> impl Iterator<Item = IfId> + '_ {
        std::iter::once(0).chain(self.ifs.keys().copied())
    }
}

/// Per interface-pair admission scalars. Pairs default to weight 1; a
/// zero weight forbids reservations over the pair.
#[derive(Debug, Clone, Default)]
pub struct Matrix {
    weights: HashMap<(IfId, IfId), u32>,
}

impl Matrix {
    /// Build a matrix from explicit pair weights.
    pub fn new(weights: impl IntoIterator<Item = ((IfId, IfId), u32)>) -> Self {
        Self { weights: weights.into_iter().collect() }
    }

    /// Weight of an interface pair (1 when unconfigured).
    pub fn weight(&self, ifids: IfTuple) -> u32 {
        self.weights.get(&(ifids.ingress, ifids.egress)).copied().unwrap_or(1)
    }
}

/// Whether a path type is admissible over the given link pair, both in
/// reservation direction.
pub fn valid_if_pair(path_type: PathType, ingress: LinkType, egress: LinkType) -> bool {
    use LinkType::{Child, Core, Parent, Peer, Unset};
    match path_type {
        PathType::Up => {
            matches!(ingress, Child | Unset) && matches!(egress, Parent | Unset)
        },
        PathType::Down => {
            matches!(ingress, Parent | Unset) && matches!(egress, Child | Unset)
        },
        PathType::Core => matches!(ingress, Core | Unset) && matches!(egress, Core | Unset),
        PathType::PeerUp => {
            matches!(ingress, Child | Unset) && matches!(egress, Peer | Unset)
        },
        PathType::PeerDown => {
            matches!(ingress, Peer | Unset) && matches!(egress, Child | Unset)
        },
        PathType::Ephemeral => true,
    }
}

/// Static configuration of a SIBRA service instance.
#[derive(Debug, Clone)]
pub struct SibraConfig {
    /// Seed the opaque-field MAC key is derived from.
    pub sof_mac_seed: [u8; 16],
    /// Headroom factor applied to available bandwidth, in `(0, 1]`.
    pub delta: f64,
    /// Interface map.
    pub topo: Topology,
    /// Pair admission weights.
    pub matrix: Matrix,
}

impl SibraConfig {
    /// Configuration with the conventional 80% headroom.
    pub fn new(sof_mac_seed: [u8; 16], topo: Topology, matrix: Matrix) -> Self {
        Self { sof_mac_seed, delta: 0.8, topo, matrix }
    }
}
