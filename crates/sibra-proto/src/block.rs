//! Reservation block: an info field followed by one opaque field per hop.
//!
//! Active blocks route packets; request blocks are evaluated and filled in
//! by each hop on the path. A block's length is `8 + 8 * num_hops`.

use std::fmt;

use crate::{
    errors::{Result, WireError, need_out},
    info::Info,
    sof::OpField,
};

/// Reservation block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Reservation info field heading the block.
    pub info: Info,
    /// One opaque field per hop.
    pub sofs: Vec<OpField>,
}

impl Block {
    /// A fresh block with `num_hops` zeroed opaque fields.
    pub fn new(info: Info, num_hops: usize) -> Self {
        Self { info, sofs: vec![OpField::default(); num_hops] }
    }

    /// Encoded length for a block of `num_hops` hops.
    pub fn len_for(num_hops: usize) -> usize {
        Info::LEN + num_hops * OpField::LEN
    }

    /// Parse a block of exactly `num_hops` hops from the start of `raw`.
    pub fn parse(raw: &[u8], num_hops: usize) -> Result<Self> {
        let min = Self::len_for(num_hops);
        if raw.len() < min {
            return Err(WireError::InvalidBlockLen { num_hops, min, actual: raw.len() });
        }
        let info = Info::parse(&raw[..Info::LEN])?;
        let mut sofs = Vec::with_capacity(num_hops);
        for hop in 0..num_hops {
            let off = Info::LEN + hop * OpField::LEN;
            sofs.push(OpField::parse(&raw[off..off + OpField::LEN])?);
        }
        Ok(Self { info, sofs })
    }

    /// Number of hops covered by this block.
    pub fn num_hops(&self) -> usize {
        self.sofs.len()
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        Self::len_for(self.num_hops())
    }

    /// Blocks always contain at least the info field.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Write the block into `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        need_out(buf, self.len())?;
        self.info.write_to(&mut buf[..Info::LEN], false)?;
        for (hop, sof) in self.sofs.iter().enumerate() {
            let off = Info::LEN + hop * OpField::LEN;
            sof.write_to(&mut buf[off..off + OpField::LEN])?;
        }
        Ok(())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "info: [{}] hops: {}", self.info, self.num_hops())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BwCls, Index, PathType, RttCls, Tick};

    fn sample_info() -> Info {
        Info {
            exp_tick: Tick(100),
            bw_cls: BwCls(10),
            rtt_cls: RttCls(10),
            index: Index::ZERO,
            forward: true,
            path_type: PathType::Up,
            fail_hop: 0,
        }
    }

    #[test]
    fn roundtrip() {
        let mut block = Block::new(sample_info(), 3);
        block.sofs[1] = OpField { ingress: 1, egress: 2, mac: [9, 9, 9, 9] };
        let mut buf = vec![0u8; block.len()];
        block.write_to(&mut buf).unwrap();
        assert_eq!(Block::parse(&buf, 3).unwrap(), block);
    }

    #[test]
    fn length_relation() {
        assert_eq!(Block::len_for(0), 8);
        assert_eq!(Block::len_for(5), 48);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let block = Block::new(sample_info(), 2);
        let mut buf = vec![0u8; block.len()];
        block.write_to(&mut buf).unwrap();
        assert!(matches!(
            Block::parse(&buf[..buf.len() - 1], 2),
            Err(WireError::InvalidBlockLen { num_hops: 2, .. })
        ));
    }
}
