//! Steady index clean-up and whole-reservation teardown.

use std::fmt;

use crate::{
    errors::{Result, WireError, need, need_out},
    info::Info,
    request::{Base, LINE_LEN, RequestType},
    types::Index,
};

/// Remove a single failed or unwanted steady index at every hop.
///
/// ```text
/// 0B       1        2        3        4        5        6        7
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | base   |          padding                           |  idx   | flags  |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | Info                                                                  |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteadyClean {
    /// Shared trailer header.
    pub base: Base,
    /// Index to remove.
    pub idx: Index,
    /// Info of the index being cleaned, for validation at each hop.
    pub info: Info,
    num_hops: usize,
}

impl SteadyClean {
    /// Build a clean-up request for the given index.
    pub fn new(idx: Index, info: Info, num_hops: usize) -> Self {
        Self {
            base: Base { req_type: RequestType::SteadyCleanUp, response: false, accepted: true },
            idx,
            info,
            num_hops,
        }
    }

    /// Parse a steady clean-up request.
    pub fn parse(base: Base, raw: &[u8], num_hops: usize) -> Result<Self> {
        if base.req_type != RequestType::SteadyCleanUp {
            return Err(WireError::InvalidRequestType {
                context: "steady clean-up",
                actual: base.req_type.to_u8(),
            });
        }
        need(raw, 2 * LINE_LEN)?;
        Ok(Self {
            base,
            idx: Index::new(raw[6])?,
            info: Info::parse(&raw[LINE_LEN..2 * LINE_LEN])?,
            num_hops,
        })
    }

    /// Hop count from the carrying extension.
    pub fn num_hops(&self) -> usize {
        self.num_hops
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        2 * LINE_LEN
    }

    /// Write the request into `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        need_out(buf, self.len())?;
        buf[..self.len()].fill(0);
        buf[0] = self.base.to_u8();
        buf[6] = self.idx.get();
        self.info.write_to(&mut buf[LINE_LEN..2 * LINE_LEN], false)
    }

    /// Toggle the response flag; clean-ups reverse freely.
    pub fn reverse(mut self) -> Self {
        self.base.response = !self.base.response;
        self
    }
}

impl fmt::Display for SteadyClean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "base: [{}] idx: {} info: [{}]", self.base, self.idx, self.info)
    }
}

/// Remove the whole steady reservation at every hop.
///
/// A bare tagged line; only honored when arriving from the reservation
/// source direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteadyTearDown {
    /// Shared trailer header.
    pub base: Base,
    num_hops: usize,
}

impl SteadyTearDown {
    /// Build a teardown request.
    pub fn new(num_hops: usize) -> Self {
        Self {
            base: Base { req_type: RequestType::SteadyTearDown, response: false, accepted: true },
            num_hops,
        }
    }

    /// Parse a teardown request.
    pub fn parse(base: Base, raw: &[u8], num_hops: usize) -> Result<Self> {
        if base.req_type != RequestType::SteadyTearDown {
            return Err(WireError::InvalidRequestType {
                context: "steady teardown",
                actual: base.req_type.to_u8(),
            });
        }
        need(raw, LINE_LEN)?;
        Ok(Self { base, num_hops })
    }

    /// Hop count from the carrying extension.
    pub fn num_hops(&self) -> usize {
        self.num_hops
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        LINE_LEN
    }

    /// Write the request into `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        need_out(buf, self.len())?;
        buf[..self.len()].fill(0);
        buf[0] = self.base.to_u8();
        Ok(())
    }

    /// Flip into a response.
    pub fn reverse(mut self) -> Result<Self> {
        if self.base.response {
            return Err(WireError::Unsupported("reversing teardown response"));
        }
        self.base.response = true;
        Ok(self)
    }
}

impl fmt::Display for SteadyTearDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "base: [{}]", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BwCls, PathType, RttCls, Tick};

    fn sample_info() -> Info {
        Info {
            exp_tick: Tick(77),
            bw_cls: BwCls(4),
            rtt_cls: RttCls(12),
            index: Index::new(2).unwrap(),
            forward: false,
            path_type: PathType::Down,
            fail_hop: 0,
        }
    }

    #[test]
    fn clean_roundtrip() {
        let clean = SteadyClean::new(Index::new(2).unwrap(), sample_info(), 4);
        let mut buf = vec![0u8; clean.len()];
        clean.write_to(&mut buf).unwrap();
        let parsed = SteadyClean::parse(Base::parse(&buf).unwrap(), &buf, 4).unwrap();
        assert_eq!(parsed, clean);
    }

    #[test]
    fn teardown_roundtrip() {
        let td = SteadyTearDown::new(2);
        let mut buf = vec![0u8; td.len()];
        td.write_to(&mut buf).unwrap();
        let parsed = SteadyTearDown::parse(Base::parse(&buf).unwrap(), &buf, 2).unwrap();
        assert_eq!(parsed, td);
    }
}
