//! Opaque-field MAC issue and verification.
//!
//! The 4-byte MAC covers the ingress/egress pair, the reservation info
//! with the forward flag masked, the concatenated path ids padded to the
//! maximum, and the MAC of the chained opaque field (previous or next,
//! depending on path type). The canonical input record is 64 bytes:
//!
//! ```text
//!  0: ingress (u16)      2: egress (u16)
//!  4: info, forward flag masked (8B)
//! 12: path ids, zero-padded to 46B (3 steady + 1 ephemeral)
//! 58: chained SOF MAC (4B, zero at the chain head)
//! 62: zero padding
//! ```
//!
//! A pool of pre-initialised AES-CMAC instances amortises cipher setup on
//! the hot path; instances follow a get/put discipline and are never held
//! across suspension points.

use std::sync::Mutex;

use aes::Aes128;
use cmac::{Cmac, Mac};
use sibra_proto::{
    Block, IfId, Info, MAC_LEN, ResvId, SibraExtn, TICK_INTERVAL_SECS,
};
use thiserror::Error;

use crate::keys::MacKey;

/// Byte length of the canonical MAC input record.
const MAC_INPUT_LEN: usize = 64;

/// Maximum space the concatenated path ids may occupy.
const MAX_PATH_IDS_LEN: usize = 3 * sibra_proto::STEADY_ID_LEN + sibra_proto::EPHEM_ID_LEN;

const OFF_INFO: usize = 4;
const OFF_IDS: usize = OFF_INFO + Info::LEN;
const OFF_CHAIN: usize = OFF_IDS + MAX_PATH_IDS_LEN;

/// Result of verifying an extension's opaque fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// A recomputed MAC did not match the field on the wire.
    #[error("forged opaque field at hop {hop} of block {block}")]
    Forged {
        /// Block the mismatch occurred in.
        block: usize,
        /// Hop within that block.
        hop: usize,
    },

    /// The reservation info has expired.
    #[error("stale reservation: expired at tick {exp_tick}")]
    Stale {
        /// Expiration tick of the stale block.
        exp_tick: u32,
    },

    /// The extension carries no active block to verify.
    #[error("no active block to verify")]
    MissingBlock,
}

/// Build the canonical 64-byte MAC input record.
fn mac_input(
    ingress: IfId,
    egress: IfId,
    info: &Info,
    ids: &[ResvId],
    chained: [u8; MAC_LEN],
) -> [u8; MAC_INPUT_LEN] {
    let mut input = [0u8; MAC_INPUT_LEN];
    input[0..2].copy_from_slice(&ingress.to_be_bytes());
    input[2..4].copy_from_slice(&egress.to_be_bytes());
    input[OFF_INFO..OFF_IDS].copy_from_slice(&info.to_bytes(true));
    let mut off = OFF_IDS;
    for id in ids {
        let end = (off + id.len()).min(OFF_CHAIN);
        input[off..end].copy_from_slice(&id.as_bytes()[..end - off]);
        off = end;
    }
    input[OFF_CHAIN..OFF_CHAIN + MAC_LEN].copy_from_slice(&chained);
    input
}

/// Pooled opaque-field authenticator.
pub struct SofMac {
    key: MacKey,
    pool: Mutex<Vec<Cmac<Aes128>>>,
}

impl SofMac {
    /// Build an authenticator holding `pool_size` pre-initialised CMAC
    /// instances.
    pub fn new(key: MacKey, pool_size: usize) -> Self {
        let pool = (0..pool_size).map(|_| Cmac::<Aes128>::new(key.as_bytes().into())).collect();
        Self { key, pool: Mutex::new(pool) }
    }

    fn get(&self) -> Cmac<Aes128> {
        let cached = match self.pool.lock() {
            Ok(mut pool) => pool.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        };
        cached.unwrap_or_else(|| Cmac::<Aes128>::new(self.key.as_bytes().into()))
    }

    fn put(&self, mac: Cmac<Aes128>) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.push(mac);
        }
    }

    /// Compute the 4-byte MAC for one opaque field.
    ///
    /// `chained` is the MAC of the neighbouring field feeding the chain
    /// (see [`SibraExtn::chained_mac`]), zero at the chain head.
    pub fn issue(
        &self,
        ingress: IfId,
        egress: IfId,
        info: &Info,
        ids: &[ResvId],
        chained: [u8; MAC_LEN],
    ) -> [u8; MAC_LEN] {
        let input = mac_input(ingress, egress, info, ids, chained);
        let mut mac = self.get();
        mac.update(&input);
        let tag = mac.finalize_reset().into_bytes();
        self.put(mac);
        let mut out = [0u8; MAC_LEN];
        out.copy_from_slice(&tag[..MAC_LEN]);
        out
    }

    /// Constant-time check of a truncated tag against the canonical
    /// record. `issue` keeps the leftmost 4 bytes of the CMAC output, so
    /// the comparison goes through `verify_truncated_left`.
    fn verify_tag(&self, input: &[u8; MAC_INPUT_LEN], tag: &[u8; MAC_LEN]) -> bool {
        let mut mac = self.get();
        mac.update(input);
        // verify_truncated_left consumes its instance; verify a clone of
        // the updated state and reset the pooled one.
        let ok = mac.clone().verify_truncated_left(tag).is_ok();
        mac.reset();
        self.put(mac);
        ok
    }

    /// Verify the opaque field at `hop` of `block`.
    ///
    /// Each AS can only check fields it issued itself; the chained MAC
    /// binds the neighbours, so a single verified field anchors the
    /// whole chain hop by hop. The tag comparison is constant time.
    pub fn verify_sof(
        &self,
        block: &Block,
        hop: usize,
        ids: &[ResvId],
        now_unix: u64,
    ) -> Result<(), AuthError> {
        if now_unix >= u64::from(block.info.exp_tick.0) * TICK_INTERVAL_SECS {
            return Err(AuthError::Stale { exp_tick: block.info.exp_tick.0 });
        }
        let Some(sof) = block.sofs.get(hop) else {
            return Err(AuthError::MissingBlock);
        };
        let chained = SibraExtn::chained_mac(block, hop);
        let input = mac_input(sof.ingress, sof.egress, &block.info, ids, chained);
        if !self.verify_tag(&input, &sof.mac) {
            return Err(AuthError::Forged { block: 0, hop });
        }
        Ok(())
    }

    /// Verify one block's opaque-field chain.
    pub fn verify_block(
        &self,
        block: &Block,
        block_idx: usize,
        ids: &[ResvId],
        now_unix: u64,
    ) -> Result<(), AuthError> {
        if now_unix >= u64::from(block.info.exp_tick.0) * TICK_INTERVAL_SECS {
            return Err(AuthError::Stale { exp_tick: block.info.exp_tick.0 });
        }
        for (hop, sof) in block.sofs.iter().enumerate() {
            let chained = SibraExtn::chained_mac(block, hop);
            let input = mac_input(sof.ingress, sof.egress, &block.info, ids, chained);
            if !self.verify_tag(&input, &sof.mac) {
                return Err(AuthError::Forged { block: block_idx, hop });
            }
        }
        Ok(())
    }

    /// Verify every active block of an extension.
    ///
    /// Returns `Forged` on any MAC mismatch and `Stale` once a block has
    /// outlived its expiration tick.
    pub fn verify_extn(&self, extn: &SibraExtn, now_unix: u64) -> Result<(), AuthError> {
        if extn.active_blocks.is_empty() {
            return Err(AuthError::MissingBlock);
        }
        for (idx, block) in extn.active_blocks.iter().enumerate() {
            self.verify_block(block, idx, &extn.ids, now_unix)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SofMac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SofMac(..)")
    }
}
