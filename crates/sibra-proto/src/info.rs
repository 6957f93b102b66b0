//! Reservation info field.
//!
//! Eight-byte record describing a requested or active reservation:
//!
//! ```text
//! 0B       1        2        3        4        5        6        7
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | Expiration tick (4B)              | BW cls | RTT cls|IdxFPPP|Fail hop|
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! ```
//!
//! Byte 6 packs the reservation index (high 4 bits), the forward flag
//! (bit 3) and the path type (low 3 bits). The forward flag is masked out
//! when the info feeds an opaque-field MAC, so reversal does not invalidate
//! issued SOFs. The fail hop is zero in normal traffic and carries the first
//! rejecting hop in failure offers.

use std::fmt;

use crate::{
    errors::{Result, need, need_out},
    types::{BwCls, Index, PathType, RttCls, Tick},
};

/// Reservation info field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
    /// Tick at which the reservation expires.
    pub exp_tick: Tick,
    /// Granted or requested bandwidth class.
    pub bw_cls: BwCls,
    /// Round-trip class of the path.
    pub rtt_cls: RttCls,
    /// Reservation index.
    pub index: Index,
    /// Direction the path is traversed relative to creation.
    pub forward: bool,
    /// Path type of the block this info heads.
    pub path_type: PathType,
    /// First hop that rejected the request; zero otherwise.
    pub fail_hop: u8,
}

impl Info {
    /// Encoded length in bytes.
    pub const LEN: usize = 8;

    /// Parse an info field.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        need(raw, Self::LEN)?;
        let packed = raw[6];
        Ok(Self {
            exp_tick: Tick(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
            bw_cls: BwCls(raw[4]),
            rtt_cls: RttCls(raw[5]),
            index: Index::new(packed >> 4)?,
            forward: packed & 0x08 != 0,
            path_type: PathType::from_u8(packed & 0x07)?,
            fail_hop: raw[7],
        })
    }

    /// Write the info field. With `mac` set the forward flag is masked to
    /// zero, producing the canonical MAC input form.
    pub fn write_to(&self, buf: &mut [u8], mac: bool) -> Result<()> {
        need_out(buf, Self::LEN)?;
        buf[..4].copy_from_slice(&self.exp_tick.0.to_be_bytes());
        buf[4] = self.bw_cls.0;
        buf[5] = self.rtt_cls.0;
        let mut packed = (self.index.get() << 4) | self.path_type.to_u8();
        if self.forward && !mac {
            packed |= 0x08;
        }
        buf[6] = packed;
        buf[7] = self.fail_hop;
        Ok(())
    }

    /// Encoded bytes, optionally in MAC-canonical form.
    pub fn to_bytes(&self, mac: bool) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        // Cannot fail: the buffer is exactly Self::LEN bytes.
        let _ = self.write_to(&mut buf, mac);
        buf
    }
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exp: {} bw: {} rtt: {} idx: {} fwd: {} type: {} fail: {}",
            self.exp_tick,
            self.bw_cls,
            self.rtt_cls.0,
            self.index,
            self.forward,
            self.path_type,
            self.fail_hop
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WireError;

    fn sample() -> Info {
        Info {
            exp_tick: Tick(0x0102_0304),
            bw_cls: BwCls(13),
            rtt_cls: RttCls(10),
            index: Index::new(5).unwrap(),
            forward: true,
            path_type: PathType::Up,
            fail_hop: 0,
        }
    }

    #[test]
    fn roundtrip() {
        let info = sample();
        let parsed = Info::parse(&info.to_bytes(false)).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn mac_form_masks_forward_flag() {
        let mut info = sample();
        let masked = info.to_bytes(true);
        info.forward = false;
        assert_eq!(masked, info.to_bytes(false));
    }

    #[test]
    fn truncated_is_rejected() {
        assert_eq!(Info::parse(&[0u8; 7]), Err(WireError::Truncated { min: 8, actual: 7 }));
    }

    #[test]
    fn bad_path_type_is_rejected() {
        let mut raw = sample().to_bytes(false);
        raw[6] = (raw[6] & 0xF8) | 0x07;
        assert_eq!(Info::parse(&raw), Err(WireError::InvalidPathType(7)));
    }
}
