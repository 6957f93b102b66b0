//! Steady reservation request and its accepted response.
//!
//! A steady request travels the path collecting one offer field per hop;
//! if every hop accepts, the end AS reverses it into a `SteadySucc`
//! carrying the stamped reservation block. A failed request travels back
//! unchanged (response flag set) so the initiator can read the offers.

use std::fmt;

use crate::{
    block::Block,
    errors::{Result, WireError, need, need_out},
    info::Info,
    request::{Base, FailCode, LINE_LEN, Request, RequestType, pad_to_line},
    types::BwCls,
};

const OFF_FAIL_CODE: usize = 5;
const OFF_MIN_BW: usize = 6;
const OFF_MAX_BW: usize = 7;
const OFF_INFO: usize = LINE_LEN;
const HOP_FIELD_LEN: usize = 4;

/// Per-hop offer inside a steady request.
///
/// `alloc` is the bandwidth class the AS has allocated for this request,
/// `min` the smallest class it is willing to grant when shrinking, `max`
/// the largest it could grant. In failure responses only `max` matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offer {
    /// Allocated bandwidth class.
    pub alloc: BwCls,
    /// Minimum bandwidth class the AS would grant.
    pub min: BwCls,
    /// Maximum bandwidth class the AS could grant.
    pub max: BwCls,
}

/// Steady setup or renewal request (or its failed response).
///
/// ```text
/// 0B       1        2        3        4        5        6        7
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | base   |          padding                  |  code  | min BW | max BW |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | Info                                                                  |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// |alloc 1 | min 1  | max 1  |lines 1 | ...                               |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteadyReq {
    /// Shared trailer header.
    pub base: Base,
    /// Requested reservation info.
    pub info: Info,
    /// Highest fail code seen along the path.
    pub fail_code: FailCode,
    /// Minimum bandwidth class acceptable to the initiator.
    pub min_bw: BwCls,
    /// Maximum bandwidth class requested by the initiator.
    pub max_bw: BwCls,
    /// One offer per hop.
    pub offers: Vec<Offer>,
    /// Per-hop SOF line counts.
    pub lines: Vec<u8>,
}

impl SteadyReq {
    /// Build a fresh request. The initiator's own offer field is seeded
    /// with the requested maximum on the generation-side end of the path.
    pub fn new(
        req_type: RequestType,
        info: Info,
        min_bw: BwCls,
        max_bw: BwCls,
        num_hops: usize,
    ) -> Result<Self> {
        if req_type != RequestType::SteadySetup && req_type != RequestType::SteadyRenewal {
            return Err(WireError::InvalidRequestType {
                context: "steady request",
                actual: req_type.to_u8(),
            });
        }
        let mut req = Self {
            base: Base { req_type, response: false, accepted: true },
            info,
            fail_code: FailCode::None,
            min_bw,
            max_bw,
            offers: vec![Offer::default(); num_hops],
            lines: vec![1; num_hops],
        };
        if num_hops > 0 {
            let own = if info.path_type.reversed() { num_hops - 1 } else { 0 };
            req.offers[own].alloc = max_bw;
        }
        Ok(req)
    }

    /// Parse a steady request of `num_hops` hops.
    pub fn parse(base: Base, raw: &[u8], num_hops: usize) -> Result<Self> {
        if base.req_type != RequestType::SteadySetup && base.req_type != RequestType::SteadyRenewal
        {
            return Err(WireError::InvalidRequestType {
                context: "steady request",
                actual: base.req_type.to_u8(),
            });
        }
        if base.response && base.accepted {
            return Err(WireError::InvalidRequestFlags("accepted steady response is SteadySucc"));
        }
        need(raw, Self::len_for(num_hops))?;
        let info = Info::parse(&raw[OFF_INFO..OFF_INFO + Info::LEN])?;
        let mut offers = Vec::with_capacity(num_hops);
        let mut lines = Vec::with_capacity(num_hops);
        for hop in 0..num_hops {
            let off = OFF_INFO + Info::LEN + hop * HOP_FIELD_LEN;
            offers.push(Offer {
                alloc: BwCls(raw[off]),
                min: BwCls(raw[off + 1]),
                max: BwCls(raw[off + 2]),
            });
            lines.push(raw[off + 3]);
        }
        Ok(Self {
            base,
            info,
            fail_code: FailCode::from_u8(raw[OFF_FAIL_CODE]),
            min_bw: BwCls(raw[OFF_MIN_BW]),
            max_bw: BwCls(raw[OFF_MAX_BW]),
            offers,
            lines,
        })
    }

    /// Hop count of the request.
    pub fn num_hops(&self) -> usize {
        self.offers.len()
    }

    fn len_for(num_hops: usize) -> usize {
        pad_to_line(OFF_INFO + Info::LEN + num_hops * HOP_FIELD_LEN)
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        Self::len_for(self.num_hops())
    }

    /// Write the request into `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        need_out(buf, self.len())?;
        buf[..self.len()].fill(0);
        buf[0] = self.base.to_u8();
        buf[OFF_FAIL_CODE] = self.fail_code.to_u8();
        buf[OFF_MIN_BW] = self.min_bw.0;
        buf[OFF_MAX_BW] = self.max_bw.0;
        self.info.write_to(&mut buf[OFF_INFO..OFF_INFO + Info::LEN], false)?;
        for hop in 0..self.num_hops() {
            let off = OFF_INFO + Info::LEN + hop * HOP_FIELD_LEN;
            buf[off] = self.offers[hop].alloc.0;
            buf[off + 1] = self.offers[hop].min.0;
            buf[off + 2] = self.offers[hop].max.0;
            buf[off + 3] = self.lines[hop];
        }
        Ok(())
    }

    /// Reverse into the trailer the response carries: a `SteadySucc` when
    /// accepted, otherwise this request with the response flag set.
    pub fn reverse(mut self) -> Result<Request> {
        if self.base.response {
            return Err(WireError::Unsupported("reversing steady response"));
        }
        if self.base.accepted {
            return Ok(Request::SteadySucc(SteadySucc::from_req(&self)?));
        }
        self.base.response = true;
        Ok(Request::Steady(self))
    }
}

impl fmt::Display for SteadyReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "base: [{}] info: [{}] code: {} min: {} max: {}",
            self.base, self.info, self.fail_code, self.min_bw, self.max_bw
        )
    }
}

/// Accepted response for a steady request, carrying the stamped block.
///
/// ```text
/// 0B       1        2        3        4        5        6        7
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | base   |          padding                                             |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | Reservation block                                                     |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteadySucc {
    /// Shared trailer header.
    pub base: Base,
    /// The granted reservation block.
    pub block: Block,
}

impl SteadySucc {
    /// Build the accepted response for `req`.
    pub fn from_req(req: &SteadyReq) -> Result<Self> {
        if !req.base.accepted {
            return Err(WireError::InvalidRequestFlags("success response from failed request"));
        }
        Ok(Self {
            base: Base { req_type: req.base.req_type, response: true, accepted: true },
            block: Block::new(req.info, req.num_hops()),
        })
    }

    /// Parse an accepted steady response.
    pub fn parse(base: Base, raw: &[u8], num_hops: usize) -> Result<Self> {
        if base.req_type != RequestType::SteadySetup && base.req_type != RequestType::SteadyRenewal
        {
            return Err(WireError::InvalidRequestType {
                context: "steady success",
                actual: base.req_type.to_u8(),
            });
        }
        if !base.response || !base.accepted {
            return Err(WireError::InvalidRequestFlags(
                "steady success must be an accepted response",
            ));
        }
        need(raw, LINE_LEN + Block::len_for(num_hops))?;
        let block = Block::parse(&raw[LINE_LEN..], num_hops)?;
        Ok(Self { base, block })
    }

    /// Hop count of the response.
    pub fn num_hops(&self) -> usize {
        self.block.num_hops()
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        LINE_LEN + self.block.len()
    }

    /// Write the response into `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        need_out(buf, self.len())?;
        buf[..LINE_LEN].fill(0);
        buf[0] = self.base.to_u8();
        self.block.write_to(&mut buf[LINE_LEN..])
    }
}

impl fmt::Display for SteadySucc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "base: [{}] block: [{}]", self.base, self.block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Index, PathType, RttCls, Tick};

    fn sample_info() -> Info {
        Info {
            exp_tick: Tick(500),
            bw_cls: BwCls(10),
            rtt_cls: RttCls(10),
            index: Index::ZERO,
            forward: true,
            path_type: PathType::Up,
            fail_hop: 0,
        }
    }

    #[test]
    fn new_seeds_own_offer() {
        let req =
            SteadyReq::new(RequestType::SteadySetup, sample_info(), BwCls(1), BwCls(10), 3)
                .unwrap();
        assert_eq!(req.offers[0].alloc, BwCls(10));
        assert_eq!(req.offers[2].alloc, BwCls(0));
    }

    #[test]
    fn reversed_path_seeds_last_offer() {
        let mut info = sample_info();
        info.path_type = PathType::Core;
        let req = SteadyReq::new(RequestType::SteadySetup, info, BwCls(1), BwCls(10), 3).unwrap();
        assert_eq!(req.offers[2].alloc, BwCls(10));
        assert_eq!(req.offers[0].alloc, BwCls(0));
    }

    #[test]
    fn roundtrip() {
        let mut req =
            SteadyReq::new(RequestType::SteadyRenewal, sample_info(), BwCls(2), BwCls(20), 4)
                .unwrap();
        req.offers[1] = Offer { alloc: BwCls(5), min: BwCls(1), max: BwCls(30) };
        let mut buf = vec![0u8; req.len()];
        req.write_to(&mut buf).unwrap();
        let parsed = SteadyReq::parse(Base::parse(&buf).unwrap(), &buf, 4).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn accepted_reverse_is_success() {
        let req =
            SteadyReq::new(RequestType::SteadySetup, sample_info(), BwCls(1), BwCls(10), 2)
                .unwrap();
        match req.reverse().unwrap() {
            Request::SteadySucc(succ) => {
                assert!(succ.base.response && succ.base.accepted);
                assert_eq!(succ.num_hops(), 2);
            },
            other => unreachable!("expected success response, got {other:?}"),
        }
    }

    #[test]
    fn failed_reverse_keeps_offers() {
        let mut req =
            SteadyReq::new(RequestType::SteadySetup, sample_info(), BwCls(1), BwCls(10), 2)
                .unwrap();
        req.base.accepted = false;
        req.fail_code = FailCode::BwExceeded;
        match req.reverse().unwrap() {
            Request::Steady(rev) => {
                assert!(rev.base.response && !rev.base.accepted);
                assert_eq!(rev.fail_code, FailCode::BwExceeded);
            },
            other => unreachable!("expected steady response, got {other:?}"),
        }
    }

    #[test]
    fn success_roundtrip() {
        let req =
            SteadyReq::new(RequestType::SteadySetup, sample_info(), BwCls(1), BwCls(10), 3)
                .unwrap();
        let succ = SteadySucc::from_req(&req).unwrap();
        let mut buf = vec![0u8; succ.len()];
        succ.write_to(&mut buf).unwrap();
        let parsed = SteadySucc::parse(Base::parse(&buf).unwrap(), &buf, 3).unwrap();
        assert_eq!(parsed, succ);
    }
}
