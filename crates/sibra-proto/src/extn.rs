//! SIBRA hop-by-hop extension header.
//!
//! ```text
//! 0B       1        2        3        4        5        6        7
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | Flags  |SOF idx |P0 hops |P1 hops |P2 hops |        reserved          |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | Path IDs (1-4), zero-padded to the next line                          |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | Active reservation blocks (0-3)                                       |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | Request / response trailer (optional)                                 |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! ```
//!
//! Flag bits, MSB first: Setup (a new SIBRA path is being created, packet
//! travels a plain SCION path), Request (a reservation trailer is
//! attached), Accepted (the request has been accepted so far), Error,
//! Steady (steady vs ephemeral), Forward (travelling src->dst), and a
//! 2-bit version.
//!
//! A steady extension carries 1-3 steady path ids; an ephemeral extension
//! carries its own 16-byte id first, then the steady ids it is stitched
//! onto. Ephemeral setup requests ride a *steady* extension (routing still
//! happens over the steady blocks); the ephemeral extension exists only
//! once the reservation does, so it always carries exactly one active
//! block spanning the whole stitched path.

use std::fmt;

use bytes::BufMut;

use crate::{
    block::Block,
    errors::{Result, WireError, need},
    id::ResvId,
    info::Info,
    request::{LINE_LEN, Request, pad_to_line},
    sof::{MAC_LEN, OpField},
    types::{EPHEM_ID_LEN, PathType, STEADY_ID_LEN, Tick, VERSION},
};

const FLAG_SETUP: u8 = 0x80;
const FLAG_REQUEST: u8 = 0x40;
const FLAG_ACCEPTED: u8 = 0x20;
const FLAG_ERROR: u8 = 0x10;
const FLAG_STEADY: u8 = 0x08;
const FLAG_FORWARD: u8 = 0x04;
const FLAG_VERSION: u8 = 0x03;

const HDR_LEN: usize = LINE_LEN;

/// Parsed SIBRA extension header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SibraExtn {
    /// A new SIBRA path is being set up; no active blocks present.
    pub setup: bool,
    /// The reservation request has been accepted by every hop so far.
    pub accepted: bool,
    /// An error occurred along the path.
    pub error: bool,
    /// Steady (true) or ephemeral (false) extension.
    pub steady: bool,
    /// Packet travels in the src->dst direction.
    pub forward: bool,
    /// SIBRA version, must be zero.
    pub version: u8,
    /// Index of the current opaque field.
    pub sof_index: u8,
    /// Hop count of each reservation block.
    pub path_lens: [u8; 3],
    /// Path ids: steady ids, preceded by the ephemeral id for ephemeral
    /// extensions.
    pub ids: Vec<ResvId>,
    /// Active reservation blocks used for routing.
    pub active_blocks: Vec<Block>,
    /// Attached reservation trailer.
    pub request: Option<Request>,
}

impl SibraExtn {
    /// Build a steady setup extension around a setup request. The packet
    /// has no active blocks yet; it travels a plain SCION path.
    pub fn steady_setup(id: ResvId, req: crate::request::SteadyReq) -> Result<Self> {
        if !id.is_steady() {
            return Err(WireError::InvalidIdLen(id.len()));
        }
        let num_hops = req.num_hops();
        if num_hops == 0 || num_hops > u8::MAX as usize {
            return Err(WireError::InvalidPathLens { p0: num_hops as u8, p1: 0, p2: 0 });
        }
        let forward = req.info.forward;
        let extn = Self {
            setup: true,
            accepted: true,
            error: false,
            steady: true,
            forward,
            version: VERSION,
            sof_index: 0,
            path_lens: [num_hops as u8, 0, 0],
            ids: vec![id],
            active_blocks: Vec::new(),
            request: Some(Request::Steady(req)),
        };
        extn.validate()?;
        Ok(extn)
    }

    /// Build a steady extension over an established reservation block, for
    /// sending requests or best-effort traffic on it.
    pub fn steady_use(id: ResvId, block: Block, forward: bool) -> Result<Self> {
        if !id.is_steady() {
            return Err(WireError::InvalidIdLen(id.len()));
        }
        let num_hops = block.num_hops();
        if num_hops == 0 || num_hops > u8::MAX as usize {
            return Err(WireError::InvalidPathLens { p0: num_hops as u8, p1: 0, p2: 0 });
        }
        let extn = Self {
            setup: false,
            accepted: true,
            error: false,
            steady: true,
            forward,
            version: VERSION,
            sof_index: if forward { 0 } else { (num_hops - 1) as u8 },
            path_lens: [num_hops as u8, 0, 0],
            ids: vec![id],
            active_blocks: vec![block],
            request: None,
        };
        extn.validate()?;
        Ok(extn)
    }

    /// Build a steady extension stitching several established blocks, as
    /// used by ephemeral setup requests travelling over them.
    pub fn steady_stitched(
        ids: Vec<ResvId>,
        blocks: Vec<Block>,
        forward: bool,
    ) -> Result<Self> {
        if ids.is_empty() || ids.len() > 3 || ids.len() != blocks.len() {
            return Err(WireError::InvalidPathLens {
                p0: blocks.first().map_or(0, |b| b.num_hops() as u8),
                p1: blocks.get(1).map_or(0, |b| b.num_hops() as u8),
                p2: blocks.get(2).map_or(0, |b| b.num_hops() as u8),
            });
        }
        let mut path_lens = [0u8; 3];
        for (i, block) in blocks.iter().enumerate() {
            path_lens[i] = block.num_hops() as u8;
        }
        let extn = Self {
            setup: false,
            accepted: true,
            error: false,
            steady: true,
            forward,
            version: VERSION,
            sof_index: 0,
            path_lens,
            ids,
            active_blocks: blocks,
            request: None,
        };
        extn.validate()?;
        Ok(extn)
    }

    /// Build an ephemeral extension over an established stitched path.
    /// `ids` is the ephemeral id followed by the steady ids; `path_lens`
    /// are the steady segment lengths; `block` spans the collapsed path.
    pub fn ephem_use(
        ids: Vec<ResvId>,
        path_lens: [u8; 3],
        block: Block,
        forward: bool,
    ) -> Result<Self> {
        let extn = Self {
            setup: false,
            accepted: true,
            error: false,
            steady: false,
            forward,
            version: VERSION,
            sof_index: 0,
            path_lens,
            ids,
            active_blocks: vec![block],
            request: None,
        };
        extn.validate()?;
        if extn.active_blocks[0].num_hops() != extn.total_hops() {
            return Err(WireError::HopCountMismatch {
                request: extn.active_blocks[0].num_hops(),
                extension: extn.total_hops(),
            });
        }
        Ok(extn)
    }

    /// Parse an extension occupying exactly `raw`.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        need(raw, HDR_LEN)?;
        let flags = raw[0];
        let version = flags & FLAG_VERSION;
        if version != VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let setup = flags & FLAG_SETUP != 0;
        let has_request = flags & FLAG_REQUEST != 0;
        if setup && !has_request {
            return Err(WireError::SetupWithoutRequest);
        }
        let steady = flags & FLAG_STEADY != 0;
        if setup && !steady {
            return Err(WireError::InvalidRequestFlags("ephemeral extension with setup flag"));
        }
        let mut extn = Self {
            setup,
            accepted: flags & FLAG_ACCEPTED != 0,
            error: flags & FLAG_ERROR != 0,
            steady,
            forward: flags & FLAG_FORWARD != 0,
            version,
            sof_index: raw[1],
            path_lens: [raw[2], raw[3], raw[4]],
            ids: Vec::new(),
            active_blocks: Vec::new(),
            request: None,
        };
        let num_steady = extn.checked_num_steady()?;

        let mut off = HDR_LEN;
        if !steady {
            need(raw, off + EPHEM_ID_LEN)?;
            extn.ids.push(ResvId::parse(&raw[off..off + EPHEM_ID_LEN])?);
            off += EPHEM_ID_LEN;
        }
        for _ in 0..num_steady {
            need(raw, off + STEADY_ID_LEN)?;
            extn.ids.push(ResvId::parse(&raw[off..off + STEADY_ID_LEN])?);
            off += STEADY_ID_LEN;
        }
        off = pad_to_line(off);
        need(raw, off)?;

        if !setup {
            if steady {
                for i in 0..num_steady {
                    let num_hops = usize::from(extn.path_lens[i]);
                    let block = Block::parse(&raw[off..], num_hops)?;
                    off += block.len();
                    extn.active_blocks.push(block);
                }
            } else {
                let block = Block::parse(&raw[off..], extn.total_hops())?;
                off += block.len();
                extn.active_blocks.push(block);
            }
        }

        if has_request {
            need(raw, off + 1)?;
            // Steady-typed trailers span the first block, ephemeral ones
            // the collapsed path.
            let req_hops = if (raw[off] & 0x07) <= 4 {
                usize::from(extn.path_lens[0])
            } else {
                extn.total_hops()
            };
            let request = Request::parse(&raw[off..], req_hops)?;
            off += request.len();
            extn.request = Some(request);
        }
        if off != raw.len() {
            return Err(WireError::TrailingBytes(raw.len() - off));
        }
        extn.validate()?;
        Ok(extn)
    }

    fn checked_num_steady(&self) -> Result<usize> {
        let [p0, p1, p2] = self.path_lens;
        // Non-zero lengths must form a prefix and the first must be set.
        let bad = p0 == 0 || (p1 == 0 && p2 != 0);
        if bad {
            return Err(WireError::InvalidPathLens { p0, p1, p2 });
        }
        Ok(self.path_lens.iter().filter(|&&p| p != 0).count())
    }

    fn validate(&self) -> Result<()> {
        let num_steady = self.checked_num_steady()?;
        let expected_ids = if self.steady { num_steady } else { num_steady + 1 };
        if self.ids.len() != expected_ids {
            return Err(WireError::InvalidIdLen(self.ids.len()));
        }
        if !self.steady && self.ids[0].is_steady() {
            return Err(WireError::InvalidIdLen(self.ids[0].len()));
        }
        for id in self.steady_ids() {
            if !id.is_steady() {
                return Err(WireError::InvalidIdLen(id.len()));
            }
        }
        let max = self.sof_positions();
        if usize::from(self.sof_index) >= max {
            return Err(WireError::InvalidSofIndex { max: max as u8, actual: self.sof_index });
        }
        self.validate_path_types()?;
        if let Some(req) = &self.request {
            let expected = if req.steady() {
                usize::from(self.path_lens[0])
            } else {
                self.total_hops()
            };
            if req.num_hops() != expected {
                return Err(WireError::HopCountMismatch {
                    request: req.num_hops(),
                    extension: expected,
                });
            }
            if req.steady() && !self.steady {
                return Err(WireError::InvalidRequestFlags(
                    "steady request on ephemeral extension",
                ));
            }
            if req.req_type() == crate::request::RequestType::EphemRenewal && self.steady {
                return Err(WireError::InvalidRequestFlags(
                    "ephemeral renewal on steady extension",
                ));
            }
        }
        Ok(())
    }

    /// Path-type compatibility over the active block chain.
    pub fn validate_path_types(&self) -> Result<()> {
        let mut prev: Option<PathType> = None;
        for (i, block) in self.active_blocks.iter().enumerate() {
            let curr = block.info.path_type;
            // The single ephemeral block rides the steady chain; only
            // steady chains are constrained.
            if !self.steady {
                break;
            }
            if !curr.valid_after(prev) {
                return Err(WireError::IncompatiblePathTypes {
                    block: i,
                    prev: prev.map_or("", PathType::name),
                    curr: curr.name(),
                });
            }
            prev = Some(curr);
        }
        Ok(())
    }

    /// Number of steady path ids.
    pub fn num_steady(&self) -> usize {
        self.path_lens.iter().filter(|&&p| p != 0).count()
    }

    /// Steady path ids in reservation direction.
    pub fn steady_ids(&self) -> &[ResvId] {
        if self.steady { &self.ids } else { &self.ids[1..] }
    }

    /// The reservation id the attached request targets: the ephemeral id
    /// for ephemeral trailers, the first steady id otherwise.
    pub fn req_resv_id(&self) -> ResvId {
        self.request.as_ref().and_then(Request::ephem_id).unwrap_or(self.ids[0])
    }

    /// Total number of ASes on the path. Adjacent steady blocks share
    /// their transfer AS, so `total = P0 + P1 + P2 - (num_steady - 1)`.
    pub fn total_hops(&self) -> usize {
        let sum: usize = self.path_lens.iter().map(|&p| usize::from(p)).sum();
        sum - (self.num_steady() - 1)
    }

    /// Number of opaque-field positions the SOF index ranges over.
    /// Steady extensions keep one SOF per hop per block; the ephemeral
    /// block has one SOF per AS.
    pub fn sof_positions(&self) -> usize {
        if self.steady {
            self.path_lens.iter().map(|&p| usize::from(p)).sum()
        } else {
            self.total_hops()
        }
    }

    /// Current block index and SOF position within it (steady), or the
    /// current steady segment and hop within it (ephemeral).
    fn seg_and_rel(&self) -> (usize, usize) {
        if self.steady {
            let mut rel = usize::from(self.sof_index);
            for (i, &p) in self.path_lens.iter().enumerate() {
                let p = usize::from(p);
                if rel < p {
                    return (i, rel);
                }
                rel -= p;
            }
            // Unreachable: validate() bounds sof_index by sof_positions().
            (0, 0)
        } else {
            let hop = usize::from(self.sof_index);
            let mut start = 0usize;
            for (i, &p) in self.path_lens.iter().enumerate() {
                let p = usize::from(p);
                if p == 0 {
                    break;
                }
                if hop < start + p {
                    return (i, hop - start);
                }
                start += p - 1;
            }
            (0, 0)
        }
    }

    /// Index of the block the current SOF belongs to.
    pub fn curr_block_idx(&self) -> usize {
        self.seg_and_rel().0
    }

    /// Index of the current steady segment.
    pub fn curr_steady(&self) -> usize {
        self.seg_and_rel().0
    }

    /// Position of the current SOF inside its block: the relative index
    /// for steady extensions, the collapsed hop for the single ephemeral
    /// block.
    pub fn curr_block_pos(&self) -> usize {
        if self.steady { self.seg_and_rel().1 } else { usize::from(self.sof_index) }
    }

    /// AS position on the collapsed path.
    pub fn curr_hop(&self) -> usize {
        if self.steady {
            usize::from(self.sof_index) - self.curr_block_idx()
        } else {
            usize::from(self.sof_index)
        }
    }

    /// Whether this AS is the first on the path.
    pub fn first_hop(&self) -> bool {
        self.curr_hop() == 0
    }

    /// Whether this AS is the last on the path.
    pub fn last_hop(&self) -> bool {
        self.curr_hop() == self.total_hops() - 1
    }

    /// Whether this AS joins two consecutive steady reservations.
    pub fn is_transfer(&self) -> bool {
        self.transfer_segments().is_some()
    }

    /// The steady segments adjacent to the current transfer hop, in
    /// reservation direction. `None` when this hop is not a transfer.
    pub fn transfer_segments(&self) -> Option<(usize, usize)> {
        let (seg, rel) = self.seg_and_rel();
        if seg < self.num_steady() - 1 && rel + 1 == usize::from(self.path_lens[seg]) {
            return Some((seg, seg + 1));
        }
        if seg != 0 && rel == 0 {
            return Some((seg - 1, seg));
        }
        None
    }

    /// The active block the current SOF belongs to, if any.
    pub fn curr_active_block(&self) -> Option<&Block> {
        if self.setup {
            return None;
        }
        if self.steady {
            self.active_blocks.get(self.curr_block_idx())
        } else {
            self.active_blocks.first()
        }
    }

    /// Earliest expiration tick over the active blocks (or the request
    /// info for setup packets).
    pub fn expiry(&self) -> Option<Tick> {
        let from_blocks = self.active_blocks.iter().map(|b| b.info.exp_tick).min();
        from_blocks.or_else(|| match &self.request {
            Some(Request::Steady(r)) => Some(r.info.exp_tick),
            _ => None,
        })
    }

    /// Advance the SOF cursor one AS in the travel direction. A steady
    /// transfer AS owns two adjacent SOF positions and skips both.
    pub fn next_sof_index(&mut self) -> Result<()> {
        let delta = if self.steady && self.is_transfer() { 2 } else { 1 };
        let max = self.sof_positions();
        if self.forward {
            let next = usize::from(self.sof_index) + delta;
            if next >= max {
                return Err(WireError::InvalidSofIndex { max: max as u8, actual: next as u8 });
            }
            self.sof_index = next as u8;
        } else {
            let curr = usize::from(self.sof_index);
            if curr < delta {
                return Err(WireError::InvalidSofIndex { max: max as u8, actual: 0 });
            }
            self.sof_index = (curr - delta) as u8;
        }
        Ok(())
    }

    /// Attach a request trailer to an established extension.
    pub fn to_request(&mut self, req: Request) -> Result<()> {
        if self.steady && self.setup {
            return Err(WireError::Unsupported("re-targeting a steady setup extension"));
        }
        self.request = Some(req);
        let checked = self.validate();
        if checked.is_err() {
            self.request = None;
        }
        checked
    }

    /// Reverse the extension for the response path: flip the forward flag
    /// and the attached request. Opaque fields are not altered.
    pub fn reverse(&mut self) -> Result<()> {
        if let Some(req) = self.request.take() {
            self.request = Some(req.reverse()?);
        }
        self.forward = !self.forward;
        Ok(())
    }

    /// The block an on-path AS stamps SOFs into: the trailer block of a
    /// success response or an accepted ephemeral request.
    pub fn request_block(&self) -> Option<&Block> {
        match &self.request {
            Some(Request::SteadySucc(r)) => Some(&r.block),
            Some(Request::Ephem(r)) => Some(&r.block),
            _ => None,
        }
    }

    /// Mutable access to the request block.
    pub fn request_block_mut(&mut self) -> Option<&mut Block> {
        match &mut self.request {
            Some(Request::SteadySucc(r)) => Some(&mut r.block),
            Some(Request::Ephem(r)) => Some(&mut r.block),
            _ => None,
        }
    }

    /// The chained MAC input for `hop` of `block`: the previous SOF's MAC
    /// for forward-generated path types, the next SOF's otherwise, zero at
    /// the chain head.
    pub fn chained_mac(block: &Block, hop: usize) -> [u8; MAC_LEN] {
        let neighbor = if block.info.path_type.gen_fwd() {
            hop.checked_sub(1).and_then(|prev| block.sofs.get(prev))
        } else {
            block.sofs.get(hop + 1)
        };
        neighbor.map_or([0u8; MAC_LEN], |sof: &OpField| sof.mac)
    }

    /// Stamp the current AS's opaque field into the request block.
    pub fn stamp_sof(&mut self, sof: OpField) -> Result<()> {
        let hop = self.curr_hop();
        let block = self
            .request_block_mut()
            .ok_or(WireError::Unsupported("no request block to stamp"))?;
        let num_hops = block.num_hops();
        let slot = block
            .sofs
            .get_mut(hop)
            .ok_or(WireError::InvalidSofIndex { max: num_hops as u8, actual: hop as u8 })?;
        *slot = sof;
        Ok(())
    }

    fn flags(&self) -> u8 {
        let mut flags = FLAG_VERSION & self.version;
        if self.setup {
            flags |= FLAG_SETUP;
        }
        if self.request.is_some() {
            flags |= FLAG_REQUEST;
        }
        if self.accepted {
            flags |= FLAG_ACCEPTED;
        }
        if self.error {
            flags |= FLAG_ERROR;
        }
        if self.steady {
            flags |= FLAG_STEADY;
        }
        if self.forward {
            flags |= FLAG_FORWARD;
        }
        flags
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        let ids: usize = self.ids.iter().map(ResvId::len).sum();
        let blocks: usize = self.active_blocks.iter().map(Block::len).sum();
        let req = self.request.as_ref().map_or(0, Request::len);
        pad_to_line(HDR_LEN + ids) + blocks + req
    }

    /// Extensions always contain the fixed first line.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Serialise the extension.
    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.len()];
        buf[0] = self.flags();
        buf[1] = self.sof_index;
        buf[2..5].copy_from_slice(&self.path_lens);
        let mut off = HDR_LEN;
        for id in &self.ids {
            id.write_to(&mut buf[off..])?;
            off += id.len();
        }
        off = pad_to_line(off);
        for block in &self.active_blocks {
            block.write_to(&mut buf[off..])?;
            off += block.len();
        }
        if let Some(req) = &self.request {
            req.write_to(&mut buf[off..])?;
        }
        Ok(buf)
    }

    /// Serialise into a growable buffer.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        dst.put_slice(&self.pack()?);
        Ok(())
    }
}

impl fmt::Display for SibraExtn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.steady { "steady" } else { "ephemeral" };
        write!(f, "SibraExtn {kind} ({}B) ids: [", self.len())?;
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{id}")?;
        }
        f.write_str("]")
    }
}
