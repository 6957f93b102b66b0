//! Index confirmation request.
//!
//! Advances a reservation index to `Pending` or `Active` at every hop. The
//! hop count is not serialised; it comes from the carrying extension.

use std::fmt;

use crate::{
    errors::{Result, WireError, need, need_out},
    request::{Base, LINE_LEN, RequestType},
    types::{Index, State},
};

/// Confirm a reservation index to `Pending` or `Active`.
///
/// ```text
/// 0B       1        2        3        4        5        6        7
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// | base   |  idx   | state  |          padding                           |
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmIndex {
    /// Shared trailer header.
    pub base: Base,
    /// Index to confirm.
    pub idx: Index,
    /// Target state, `Pending` or `Active`.
    pub state: State,
    num_hops: usize,
}

impl ConfirmIndex {
    /// Build a confirmation request.
    pub fn new(num_hops: usize, idx: Index, state: State) -> Result<Self> {
        if state != State::Pending && state != State::Active {
            return Err(WireError::InvalidConfirmState(state.to_u8()));
        }
        Ok(Self {
            base: Base { req_type: RequestType::SteadyConfIndex, response: false, accepted: true },
            idx,
            state,
            num_hops,
        })
    }

    /// Parse a confirmation request.
    pub fn parse(base: Base, raw: &[u8], num_hops: usize) -> Result<Self> {
        if base.req_type != RequestType::SteadyConfIndex {
            return Err(WireError::InvalidRequestType {
                context: "confirm index",
                actual: base.req_type.to_u8(),
            });
        }
        need(raw, LINE_LEN)?;
        let state = State::from_u8(raw[2])?;
        if state != State::Pending && state != State::Active {
            return Err(WireError::InvalidConfirmState(raw[2]));
        }
        Ok(Self { base, idx: Index::new(raw[1])?, state, num_hops })
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
        buf[1] = self.idx.get();
        buf[2] = self.state.to_u8();
        Ok(())
    }

    /// Flip into a response.
    pub fn reverse(mut self) -> Result<Self> {
        if self.base.response {
            return Err(WireError::Unsupported("reversing confirm response"));
        }
        self.base.response = true;
        Ok(self)
    }
}

impl fmt::Display for ConfirmIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "base: [{}] idx: {} state: {}", self.base, self.idx, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let conf = ConfirmIndex::new(3, Index::new(7).unwrap(), State::Pending).unwrap();
        let mut buf = vec![0u8; conf.len()];
        conf.write_to(&mut buf).unwrap();
        let parsed = ConfirmIndex::parse(Base::parse(&buf).unwrap(), &buf, 3).unwrap();
        assert_eq!(parsed, conf);
    }

    #[test]
    fn rejects_temp_and_void() {
        assert!(ConfirmIndex::new(3, Index::ZERO, State::Temp).is_err());
        assert!(ConfirmIndex::new(3, Index::ZERO, State::Void).is_err());
    }
}
