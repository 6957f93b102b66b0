//! SIBRA opaque field.
//!
//! The routing token stamped by each on-path AS:
//!
//! ```text
//! 0B       1        2        3        4        5        6        7
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | Ingress IF      | Egress IF       | MAC(IFs, info, path IDs, prev)    |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! ```
//!
//! Whether the previous or the next opaque field feeds the MAC chain
//! depends on the path type (`PathType::gen_fwd`).

use std::fmt;

use crate::{
    errors::{Result, need, need_out},
    types::IfId,
};

/// Length of the opaque-field MAC in bytes.
pub const MAC_LEN: usize = 4;

/// SIBRA opaque field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpField {
    /// Ingress interface in the reservation direction.
    pub ingress: IfId,
    /// Egress interface in the reservation direction.
    pub egress: IfId,
    /// Truncated CMAC over interfaces, masked info, path ids and the
    /// previous field's MAC.
    pub mac: [u8; MAC_LEN],
}

impl OpField {
    /// Encoded length in bytes.
    pub const LEN: usize = 8;

    /// Parse an opaque field.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        need(raw, Self::LEN)?;
        Ok(Self {
            ingress: u16::from_be_bytes([raw[0], raw[1]]),
            egress: u16::from_be_bytes([raw[2], raw[3]]),
            mac: [raw[4], raw[5], raw[6], raw[7]],
        })
    }

    /// Write the opaque field into `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        need_out(buf, Self::LEN)?;
        buf[..2].copy_from_slice(&self.ingress.to_be_bytes());
        buf[2..4].copy_from_slice(&self.egress.to_be_bytes());
        buf[4..8].copy_from_slice(&self.mac);
        Ok(())
    }

    /// Encoded bytes.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        let _ = self.write_to(&mut buf);
        buf
    }
}

impl fmt::Display for OpField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in: {} eg: {} mac: {:02x}{:02x}{:02x}{:02x}",
            self.ingress, self.egress, self.mac[0], self.mac[1], self.mac[2], self.mac[3]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WireError;

    #[test]
    fn roundtrip() {
        let sof = OpField { ingress: 81, egress: 21, mac: [1, 2, 3, 4] };
        assert_eq!(OpField::parse(&sof.to_bytes()), Ok(sof));
    }

    #[test]
    fn truncated_is_rejected() {
        assert_eq!(OpField::parse(&[0u8; 1]), Err(WireError::Truncated { min: 8, actual: 1 }));
    }
}
