//! Reservation identifiers.
//!
//! A steady id is 10 bytes (6-byte AS + 4-byte suffix), an ephemeral id is
//! 16 bytes (6-byte AS + 10-byte random suffix). Ids compare as opaque byte
//! strings but the owning AS prefix stays recoverable.

use std::fmt;

use crate::{
    errors::{Result, WireError, need_out},
    types::{As, EPHEM_ID_LEN, STEADY_ID_LEN},
};

/// SIBRA reservation id, steady or ephemeral.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResvId {
    len: u8,
    buf: [u8; EPHEM_ID_LEN],
}

impl ResvId {
    /// Build a steady id from the owning AS and a 32-bit suffix.
    pub fn steady(asn: As, suffix: u32) -> Self {
        let mut buf = [0u8; EPHEM_ID_LEN];
        buf[..6].copy_from_slice(&asn.0.to_be_bytes()[2..8]);
        buf[6..10].copy_from_slice(&suffix.to_be_bytes());
        Self { len: STEADY_ID_LEN as u8, buf }
    }

    /// Build an ephemeral id from the owning AS and a 10-byte suffix.
    ///
    /// The suffix is random in practice; the caller draws it from its
    /// environment so ids stay reproducible under test.
    pub fn ephemeral(asn: As, suffix: [u8; 10]) -> Self {
        let mut buf = [0u8; EPHEM_ID_LEN];
        buf[..6].copy_from_slice(&asn.0.to_be_bytes()[2..8]);
        buf[6..16].copy_from_slice(&suffix);
        Self { len: EPHEM_ID_LEN as u8, buf }
    }

    /// Parse an id; the length decides steady vs ephemeral.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() != STEADY_ID_LEN && raw.len() != EPHEM_ID_LEN {
            return Err(WireError::InvalidIdLen(raw.len()));
        }
        let mut buf = [0u8; EPHEM_ID_LEN];
        buf[..raw.len()].copy_from_slice(raw);
        Ok(Self { len: raw.len() as u8, buf })
    }

    /// Encoded length in bytes (10 or 16).
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    /// Ids are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether this is a steady id.
    pub fn is_steady(&self) -> bool {
        usize::from(self.len) == STEADY_ID_LEN
    }

    /// Raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..usize::from(self.len)]
    }

    /// The AS that owns this reservation.
    pub fn owner_as(&self) -> As {
        let mut be = [0u8; 8];
        be[2..8].copy_from_slice(&self.buf[..6]);
        As(u64::from_be_bytes(be))
    }

    /// Write the id into `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        need_out(buf, self.len())?;
        buf[..self.len()].copy_from_slice(self.as_bytes());
        Ok(())
    }
}

impl fmt::Display for ResvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_steady() {
            let suffix = u32::from_be_bytes([self.buf[6], self.buf[7], self.buf[8], self.buf[9]]);
            write!(f, "{}-{}", self.owner_as(), suffix)
        } else {
            write!(f, "{}-", self.owner_as())?;
            for b in &self.buf[6..16] {
                write!(f, "{b:02x}")?;
            }
            Ok(())
        }
    }
}

impl fmt::Debug for ResvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResvId({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_roundtrip() {
        let id = ResvId::steady(As(0xFF00_0000_0110), 42);
        assert_eq!(id.len(), STEADY_ID_LEN);
        assert!(id.is_steady());
        assert_eq!(id.owner_as(), As(0xFF00_0000_0110));

        let parsed = ResvId::parse(id.as_bytes()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.to_string(), "ff00:0:110-42");
    }

    #[test]
    fn ephemeral_roundtrip() {
        let id = ResvId::ephemeral(As(1), [7u8; 10]);
        assert_eq!(id.len(), EPHEM_ID_LEN);
        assert!(!id.is_steady());
        let parsed = ResvId::parse(id.as_bytes()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_bad_length() {
        assert_eq!(ResvId::parse(&[0u8; 11]), Err(WireError::InvalidIdLen(11)));
        assert_eq!(ResvId::parse(&[]), Err(WireError::InvalidIdLen(0)));
    }
}
