//! MAC key derivation.
//!
//! The per-service opaque-field key is derived once at startup from a
//! configured 16-byte seed. Losing the process only loses in-memory state;
//! re-deriving from the same seed re-validates previously issued fields.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed salt binding derived keys to their purpose.
const SOF_KEY_SALT: &[u8] = b"Derive SIBRA SOF Key";

/// PBKDF2 iteration count.
const SOF_KEY_ROUNDS: u32 = 1_000;

/// Length of the derived MAC key in bytes.
pub const MAC_KEY_LEN: usize = 16;

/// Derived opaque-field MAC key. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MacKey([u8; MAC_KEY_LEN]);

impl MacKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; MAC_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MacKey(..)")
    }
}

/// Derive the opaque-field MAC key from the configured seed.
///
/// PBKDF2-HMAC-SHA256 with a fixed salt and 1 000 iterations, truncated to
/// 16 bytes. Deterministic: the same seed always yields the same key.
pub fn derive_mac_key(seed: &[u8; 16]) -> MacKey {
    let mut key = [0u8; MAC_KEY_LEN];
    pbkdf2_hmac::<Sha256>(seed, SOF_KEY_SALT, SOF_KEY_ROUNDS, &mut key);
    MacKey(key)
}
