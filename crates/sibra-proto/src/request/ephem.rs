//! Ephemeral reservation requests: setup/renewal, failure and clean-up.

use std::fmt;

use crate::{
    block::Block,
    errors::{Result, WireError, need, need_out},
    id::ResvId,
    info::Info,
    request::{Base, FailCode, LINE_LEN, RequestType, pad_to_line},
    types::{BwCls, EPHEM_ID_LEN},
};

const OFF_FAIL_CODE: usize = LINE_LEN - 2;
const OFF_LINE_LEN: usize = LINE_LEN - 1;
const OFF_CLEAN_FLAGS: usize = LINE_LEN - 1;
const FLAG_CLEAN_SETUP: u8 = 0x01;

fn id_len(req_id: Option<&ResvId>) -> usize {
    req_id.map_or(0, |_| EPHEM_ID_LEN)
}

/// Accepted ephemeral setup or renewal, request or response.
///
/// Setup requests carry the requested ephemeral id; renewals identify the
/// reservation through the extension's first path id.
///
/// ```text
/// 0B       1        2        3        4        5        6        7
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | base   |          padding                                             |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | Ephemeral ID (16B, setup only)                                        |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | Reservation block                                                     |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemReq {
    /// Shared trailer header.
    pub base: Base,
    /// Requested ephemeral id, present in setup requests only.
    pub req_id: Option<ResvId>,
    /// The reservation block the hops stamp.
    pub block: Block,
}

impl EphemReq {
    /// Build a fresh ephemeral request. `req_id` must be set for setups and
    /// absent for renewals.
    pub fn new(
        req_type: RequestType,
        req_id: Option<ResvId>,
        info: Info,
        num_hops: usize,
    ) -> Result<Self> {
        match req_type {
            RequestType::EphemSetup if req_id.is_none() => {
                return Err(WireError::InvalidRequestFlags("ephemeral setup without id"));
            },
            RequestType::EphemRenewal if req_id.is_some() => {
                return Err(WireError::InvalidRequestFlags("ephemeral renewal with id"));
            },
            RequestType::EphemSetup | RequestType::EphemRenewal => {},
            other => {
                return Err(WireError::InvalidRequestType {
                    context: "ephemeral request",
                    actual: other.to_u8(),
                });
            },
        }
        Ok(Self {
            base: Base { req_type, response: false, accepted: true },
            req_id,
            block: Block::new(info, num_hops),
        })
    }

    /// Parse an accepted ephemeral request of `num_hops` hops.
    pub fn parse(base: Base, raw: &[u8], num_hops: usize) -> Result<Self> {
        if base.req_type != RequestType::EphemSetup && base.req_type != RequestType::EphemRenewal {
            return Err(WireError::InvalidRequestType {
                context: "ephemeral request",
                actual: base.req_type.to_u8(),
            });
        }
        if !base.accepted {
            return Err(WireError::InvalidRequestFlags("failed ephemeral request is EphemFailed"));
        }
        let mut off = LINE_LEN;
        let req_id = if base.req_type == RequestType::EphemSetup {
            need(raw, off + EPHEM_ID_LEN)?;
            let id = ResvId::parse(&raw[off..off + EPHEM_ID_LEN])?;
            off += EPHEM_ID_LEN;
            Some(id)
        } else {
            None
        };
        let block = Block::parse(&raw[off..], num_hops)?;
        Ok(Self { base, req_id, block })
    }

    /// Hop count of the request.
    pub fn num_hops(&self) -> usize {
        self.block.num_hops()
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        LINE_LEN + id_len(self.req_id.as_ref()) + self.block.len()
    }

    /// Write the request into `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        need_out(buf, self.len())?;
        buf[..LINE_LEN].fill(0);
        buf[0] = self.base.to_u8();
        let mut off = LINE_LEN;
        if let Some(id) = &self.req_id {
            id.write_to(&mut buf[off..off + EPHEM_ID_LEN])?;
            off += EPHEM_ID_LEN;
        }
        self.block.write_to(&mut buf[off..])
    }

    /// Replace this request with the failure trailer a rejecting hop sends
    /// back. Hops before `fail_hop` keep the bandwidth they granted; the
    /// offered maximum lands in the info of the failure.
    pub fn fail(&self, code: FailCode, max_bw: BwCls, fail_hop: usize) -> EphemFailed {
        let mut info = self.block.info;
        info.fail_hop = fail_hop as u8;
        info.bw_cls = max_bw;
        let mut offers = vec![BwCls(0); self.num_hops()];
        for offer in offers.iter_mut().take(fail_hop) {
            *offer = self.block.info.bw_cls;
        }
        EphemFailed {
            base: Base { req_type: self.base.req_type, response: false, accepted: false },
            req_id: self.req_id,
            info,
            offers,
            fail_code: code,
            line_len: (self.len() / LINE_LEN) as u8,
        }
    }

    /// Flip into a response.
    pub fn reverse(mut self) -> Result<Self> {
        if self.base.response {
            return Err(WireError::Unsupported("reversing ephemeral response"));
        }
        self.base.response = true;
        Ok(self)
    }
}

impl fmt::Display for EphemReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.req_id {
            Some(id) => write!(f, "base: [{}] id: {} block: [{}]", self.base, id, self.block),
            None => write!(f, "base: [{}] block: [{}]", self.base, self.block),
        }
    }
}

/// Failed ephemeral setup or renewal.
///
/// Keeps the size of the request it replaces (`line_len`) so the packet
/// never grows on the return path.
///
/// ```text
/// 0B       1        2        3        4        5        6        7
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | base   |          padding                           |  code  |  len   |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | Ephemeral ID (16B, setup only)                                        |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | Info                                                                  |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | max 1  | max 2  | ...                                 padding         |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemFailed {
    /// Shared trailer header.
    pub base: Base,
    /// Requested ephemeral id, present for failed setups.
    pub req_id: Option<ResvId>,
    /// Info of the failed request; `fail_hop` and `bw_cls` carry the
    /// rejecting hop and its offer.
    pub info: Info,
    /// Offered maximum bandwidth class per hop.
    pub offers: Vec<BwCls>,
    /// Why the reservation failed.
    pub fail_code: FailCode,
    /// Total trailer length in lines, mirroring the replaced request.
    pub line_len: u8,
}

impl EphemFailed {
    /// Parse a failed ephemeral trailer of `num_hops` hops.
    pub fn parse(base: Base, raw: &[u8], num_hops: usize) -> Result<Self> {
        if base.req_type != RequestType::EphemSetup && base.req_type != RequestType::EphemRenewal {
            return Err(WireError::InvalidRequestType {
                context: "ephemeral failure",
                actual: base.req_type.to_u8(),
            });
        }
        if base.accepted {
            return Err(WireError::InvalidRequestFlags("accepted ephemeral failure"));
        }
        need(raw, LINE_LEN)?;
        let line_len = raw[OFF_LINE_LEN];
        let claimed = usize::from(line_len) * LINE_LEN;
        if raw.len() < claimed {
            return Err(WireError::LineLenMismatch { expected: claimed, actual: raw.len() });
        }
        let mut off = LINE_LEN;
        let req_id = if base.req_type == RequestType::EphemSetup {
            need(raw, off + EPHEM_ID_LEN)?;
            let id = ResvId::parse(&raw[off..off + EPHEM_ID_LEN])?;
            off += EPHEM_ID_LEN;
            Some(id)
        } else {
            None
        };
        need(raw, off + Info::LEN + num_hops)?;
        let info = Info::parse(&raw[off..off + Info::LEN])?;
        off += Info::LEN;
        let offers = raw[off..off + num_hops].iter().map(|&b| BwCls(b)).collect();
        Ok(Self { base, req_id, info, offers, fail_code: FailCode::from_u8(raw[OFF_FAIL_CODE]), line_len })
    }

    /// Hop count of the trailer.
    pub fn num_hops(&self) -> usize {
        self.offers.len()
    }

    /// Smallest length this trailer needs, before request-size padding.
    fn min_len(&self) -> usize {
        pad_to_line(LINE_LEN + id_len(self.req_id.as_ref()) + Info::LEN + self.num_hops())
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        (usize::from(self.line_len) * LINE_LEN).max(self.min_len())
    }

    /// Write the trailer into `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        need_out(buf, self.len())?;
        buf[..self.len()].fill(0);
        buf[0] = self.base.to_u8();
        buf[OFF_FAIL_CODE] = self.fail_code.to_u8();
        buf[OFF_LINE_LEN] = (self.len() / LINE_LEN) as u8;
        let mut off = LINE_LEN;
        if let Some(id) = &self.req_id {
            id.write_to(&mut buf[off..off + EPHEM_ID_LEN])?;
            off += EPHEM_ID_LEN;
        }
        self.info.write_to(&mut buf[off..off + Info::LEN], false)?;
        off += Info::LEN;
        for (hop, offer) in self.offers.iter().enumerate() {
            buf[off + hop] = offer.0;
        }
        Ok(())
    }

    /// Flip into a response.
    pub fn reverse(mut self) -> Result<Self> {
        if self.base.response {
            return Err(WireError::Unsupported("reversing ephemeral failure response"));
        }
        self.base.response = true;
        Ok(self)
    }
}

impl fmt::Display for EphemFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "base: [{}] code: {} lines: {} info: [{}]",
            self.base, self.fail_code, self.line_len, self.info
        )
    }
}

/// Clean up an unsuccessful ephemeral reservation.
///
/// Cleaning a failed setup carries the reservation id; cleaning a failed
/// renewal identifies the reservation through the extension.
///
/// ```text
/// 0B       1        2        3        4        5        6        7
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | base   |          padding                                    | flags  |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | Ephemeral ID (16B, setup only)                                        |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | Info                                                                  |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EphemClean {
    /// Shared trailer header.
    pub base: Base,
    /// Id of the failed setup; `None` when cleaning a renewal.
    pub req_id: Option<ResvId>,
    /// Info of the failed request.
    pub info: Info,
    num_hops: usize,
}

impl EphemClean {
    /// Build a clean-up request. Pass the reservation id to clean a failed
    /// setup, `None` to clean a failed renewal.
    pub fn new(req_id: Option<ResvId>, info: Info, num_hops: usize) -> Self {
        Self {
            base: Base { req_type: RequestType::EphemCleanUp, response: false, accepted: true },
            req_id,
            info,
            num_hops,
        }
    }

    /// Parse a clean-up trailer.
    pub fn parse(base: Base, raw: &[u8], num_hops: usize) -> Result<Self> {
        if base.req_type != RequestType::EphemCleanUp {
            return Err(WireError::InvalidRequestType {
                context: "ephemeral clean-up",
                actual: base.req_type.to_u8(),
            });
        }
        need(raw, 2 * LINE_LEN)?;
        let setup = raw[OFF_CLEAN_FLAGS] & FLAG_CLEAN_SETUP != 0;
        let mut off = LINE_LEN;
        let req_id = if setup {
            need(raw, off + EPHEM_ID_LEN + Info::LEN)?;
            let id = ResvId::parse(&raw[off..off + EPHEM_ID_LEN])?;
            off += EPHEM_ID_LEN;
            Some(id)
        } else {
            None
        };
        let info = Info::parse(&raw[off..off + Info::LEN])?;
        Ok(Self { base, req_id, info, num_hops })
    }

    /// Whether this cleans a failed setup.
    pub fn setup(&self) -> bool {
        self.req_id.is_some()
    }

    /// Hop count from the carrying extension.
    pub fn num_hops(&self) -> usize {
        self.num_hops
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        LINE_LEN + id_len(self.req_id.as_ref()) + Info::LEN
    }

    /// Write the trailer into `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        need_out(buf, self.len())?;
        buf[..LINE_LEN].fill(0);
        buf[0] = self.base.to_u8();
        if self.setup() {
            buf[OFF_CLEAN_FLAGS] = FLAG_CLEAN_SETUP;
        }
        let mut off = LINE_LEN;
        if let Some(id) = &self.req_id {
            id.write_to(&mut buf[off..off + EPHEM_ID_LEN])?;
            off += EPHEM_ID_LEN;
        }
        self.info.write_to(&mut buf[off..off + Info::LEN], false)
    }

    /// Toggle the response flag; clean-ups reverse freely.
    pub fn reverse(mut self) -> Self {
        self.base.response = !self.base.response;
        self
    }
}

impl fmt::Display for EphemClean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "base: [{}] setup: {} info: [{}]", self.base, self.setup(), self.info)
    }
}
