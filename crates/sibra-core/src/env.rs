//! Environment abstraction for deterministic testing.
//!
//! Decouples the reservation engine from system resources (time,
//! randomness). The engine itself never suspends and never reads the
//! clock on its own; callers pass the current time into every operation
//! and draw it from an `Environment`.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use sibra_proto::Tick;

/// Abstract environment providing wall-clock time and randomness.
///
/// Implementations must guarantee that `now_unix_ms()` never goes
/// backwards and that `random_bytes()` uses cryptographically secure
/// entropy in production.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current unix time in milliseconds.
    fn now_unix_ms(&self) -> u64;

    /// Fill `buf` with random bytes.
    fn random_bytes(&self, buf: &mut [u8]);

    /// Current unix time in seconds.
    fn now_unix(&self) -> u64 {
        self.now_unix_ms() / 1_000
    }

    /// The SIBRA tick containing the current time.
    fn current_tick(&self) -> Tick {
        Tick::from_unix(self.now_unix())
    }
}

/// Production environment backed by the system clock and OS entropy.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now_unix_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }

    fn random_bytes(&self, buf: &mut [u8]) {
        // The OS entropy source only fails in pathological setups; a zeroed
        // suffix is still a valid (if predictable) id in that case.
        let _ = getrandom::fill(buf);
    }
}

/// Test environment with a manually advanced clock and a seeded RNG.
#[derive(Clone, Debug)]
pub struct ManualEnv {
    inner: Arc<ManualInner>,
}

#[derive(Debug)]
struct ManualInner {
    now_ms: AtomicU64,
    rng: Mutex<u64>,
}

impl ManualEnv {
    /// New environment starting at `now_ms` with the given RNG seed.
    pub fn new(now_ms: u64, seed: u64) -> Self {
        Self {
            inner: Arc::new(ManualInner {
                now_ms: AtomicU64::new(now_ms),
                rng: Mutex::new(seed | 1),
            }),
        }
    }

    /// Advance the clock by `ms` milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.inner.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Advance the clock by whole SIBRA ticks.
    pub fn advance_ticks(&self, ticks: u64) {
        self.advance_ms(ticks * sibra_proto::TICK_INTERVAL_SECS * 1_000);
    }
}

impl Environment for ManualEnv {
    fn now_unix_ms(&self) -> u64 {
        self.inner.now_ms.load(Ordering::SeqCst)
    }

    fn random_bytes(&self, buf: &mut [u8]) {
        let mut state = self.inner.rng.lock();
        for b in buf {
            // splitmix64, good enough for deterministic test ids.
            *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = *state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            *b = (z ^ (z >> 31)) as u8;
        }
    }
}
