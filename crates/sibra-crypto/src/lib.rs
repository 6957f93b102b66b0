//! Opaque-field authentication for SIBRA.
//!
//! Each on-path AS stamps a 4-byte MAC into the opaque fields it issues
//! and verifies the whole chain on every non-setup packet. The MAC key is
//! derived once per process from a configured seed, so state survives a
//! restart without persisting anything.

mod keys;
mod mac;

pub use keys::{MAC_KEY_LEN, MacKey, derive_mac_key};
pub use mac::{AuthError, SofMac};
