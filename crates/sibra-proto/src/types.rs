//! SIBRA value types: ticks, bandwidth classes, indexes, states, path types.
//!
//! Time is discretised in 4-second ticks. Bandwidth is discretised in
//! exponential classes so a single byte spans the whole useful range.

use std::{fmt, time::Duration};

use crate::errors::{Result, WireError};

/// Supported SIBRA version (2-bit field in the extension flags).
pub const VERSION: u8 = 0;

/// Steady reservation id length in bytes (6-byte AS + 4-byte suffix).
pub const STEADY_ID_LEN: usize = 10;

/// Ephemeral reservation id length in bytes (6-byte AS + 10-byte suffix).
pub const EPHEM_ID_LEN: usize = 16;

/// Number of reservation index slots per steady reservation.
pub const NUM_INDEXES: u8 = 16;

/// Seconds per SIBRA tick.
pub const TICK_INTERVAL_SECS: u64 = 4;

/// Duration of one SIBRA tick.
pub const TICK_DURATION: Duration = Duration::from_secs(TICK_INTERVAL_SECS);

/// Maximum lifetime of an ephemeral reservation in ticks (~16 s).
pub const MAX_EPHEM_TICKS: u32 = 4;

/// Maximum lifetime of a steady reservation in ticks (~320 s).
pub const MAX_STEADY_TICKS: u32 = 20 * MAX_EPHEM_TICKS;

/// Bandwidth factor: class 1 corresponds to this many bits per second.
pub const BW_FACTOR: u64 = 16_000;

/// Interface identifier. Zero denotes the local end of a path.
pub type IfId = u16;

/// SIBRA time quantum. `Tick::from_unix(t) = t / 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tick(pub u32);

impl Tick {
    /// Tick containing the given unix timestamp.
    pub fn from_unix(secs: u64) -> Self {
        Self((secs / TICK_INTERVAL_SECS) as u32)
    }

    /// Unix timestamp at which this tick starts.
    pub fn as_unix(self) -> u64 {
        u64::from(self.0) * TICK_INTERVAL_SECS
    }

    /// Tick `diff` ticks later.
    pub fn add(self, diff: u32) -> Self {
        Self(self.0.wrapping_add(diff))
    }

    /// Difference `self - other` in ticks (negative if `other` is later).
    pub fn sub(self, other: Self) -> i64 {
        i64::from(self.0) - i64::from(other.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bandwidth in bits per second.
///
/// Classes above ~124 exceed `u64`; conversions saturate instead of wrapping
/// so admission accumulators never overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Bps(pub u64);

impl Bps {
    /// Convert to a bandwidth class. `floor` picks the class not exceeding
    /// the bandwidth; otherwise the smallest class covering it.
    pub fn to_cls(self, floor: bool) -> BwCls {
        if self.0 == 0 || (floor && self.0 < BW_FACTOR) {
            return BwCls(0);
        }
        let base = (self.0 as f64 / BW_FACTOR as f64).max(1.0);
        let cls = base.powi(2).log2() + 1.0;
        let cls = if floor { cls.floor() } else { cls.ceil() };
        BwCls(cls.clamp(0.0, 255.0) as u8)
    }

    /// Saturating addition.
    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction.
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Bps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bps = self.0 as f64;
        let mut mag = 0;
        while bps > 1000.0 && mag < 4 {
            bps /= 1000.0;
            mag += 1;
        }
        let prefix = ["", "K", "M", "G", "T"][mag];
        write!(f, "{bps:.3} {prefix}bps")
    }
}

/// Discrete bandwidth class: `bps = 16_000 * sqrt(2^(cls - 1))`, class 0 is
/// zero bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BwCls(pub u8);

impl BwCls {
    /// Bandwidth of this class in bits per second (saturating at `u64::MAX`).
    pub fn bps(self) -> Bps {
        if self.0 == 0 {
            return Bps(0);
        }
        let base = 2f64.powi(i32::from(self.0) - 1).sqrt();
        Bps((BW_FACTOR as f64 * base).floor() as u64)
    }
}

impl fmt::Display for BwCls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round-trip class. Bounds how long a reservation request takes to travel
/// to the end of the path and back; supervisors derive timeouts from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RttCls(pub u8);

impl RttCls {
    /// Estimated round-trip duration for this class.
    ///
    /// Class 255 means the full ephemeral lifetime. Lower classes scale
    /// linearly at ~62 ms per class with a 1 s floor and a 16 s cap.
    pub fn duration(self) -> Duration {
        if self.0 == 255 {
            return Duration::from_secs(u64::from(MAX_EPHEM_TICKS) * TICK_INTERVAL_SECS);
        }
        let ms = (u64::from(self.0) * 62).clamp(1_000, 16_000);
        Duration::from_millis(ms)
    }
}

/// Reservation index. Allows up to 16 overlapping versions of a reservation
/// for the same id; arithmetic wraps modulo 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Index(u8);

impl Index {
    /// Index zero, the only index allowed at setup time.
    pub const ZERO: Self = Self(0);

    /// Validated constructor.
    pub fn new(v: u8) -> Result<Self> {
        if v >= NUM_INDEXES {
            return Err(WireError::InvalidIndex(v));
        }
        Ok(Self(v))
    }

    /// Raw slot number.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Index `diff` slots ahead, wrapping modulo 16.
    pub fn add(self, diff: u8) -> Self {
        Self((self.0 + diff % NUM_INDEXES) % NUM_INDEXES)
    }

    /// Successor index modulo 16.
    pub fn next(self) -> Self {
        self.add(1)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a reservation index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Admitted but not yet confirmed; evicted after the temp TTL.
    Temp,
    /// SOF chain complete, awaiting activation.
    Pending,
    /// Carrying traffic.
    Active,
    /// Expired or superseded.
    Void,
}

impl State {
    /// Wire discriminant.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Temp => 0,
            Self::Pending => 1,
            Self::Active => 2,
            Self::Void => 3,
        }
    }

    /// Parse a wire discriminant.
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Temp),
            1 => Ok(Self::Pending),
            2 => Ok(Self::Active),
            3 => Ok(Self::Void),
            other => Err(WireError::InvalidState(other)),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Temp => "Temporary",
            Self::Pending => "Pending",
            Self::Active => "Active",
            Self::Void => "Void",
        };
        f.write_str(s)
    }
}

/// Path type of a reservation block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathType {
    /// Core-to-leaf direction.
    Down,
    /// Leaf-to-core direction.
    Up,
    /// Peering link, down segment side.
    PeerDown,
    /// Peering link, up segment side.
    PeerUp,
    /// Ephemeral reservation stitched over steady blocks.
    Ephemeral,
    /// Core AS to core AS.
    Core,
}

impl PathType {
    /// Wire discriminant.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Down => 0,
            Self::Up => 1,
            Self::PeerDown => 2,
            Self::PeerUp => 3,
            Self::Ephemeral => 4,
            Self::Core => 5,
        }
    }

    /// Parse a wire discriminant.
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Down),
            1 => Ok(Self::Up),
            2 => Ok(Self::PeerDown),
            3 => Ok(Self::PeerUp),
            4 => Ok(Self::Ephemeral),
            5 => Ok(Self::Core),
            other => Err(WireError::InvalidPathType(other)),
        }
    }

    /// Whether opaque fields are generated in the forward direction.
    pub fn gen_fwd(self) -> bool {
        self.to_u8() & 0x1 == 0
    }

    /// Whether the reservation direction is reversed relative to traversal.
    pub fn reversed(self) -> bool {
        !self.gen_fwd()
    }

    /// Transfer-compatibility table: may a block of this type directly
    /// follow a block of type `prev`?
    ///
    /// A `Core` block may not follow an `Up` block; a `Down` block may.
    /// Nothing follows a `Down` or `PeerDown` block, and `Ephemeral` never
    /// participates in block chains.
    pub fn valid_after(self, prev: Option<Self>) -> bool {
        match prev {
            None => !matches!(self, Self::Ephemeral),
            Some(Self::Up) => matches!(self, Self::Down | Self::PeerDown),
            Some(Self::Core) | Some(Self::PeerUp) => matches!(self, Self::Down),
            Some(Self::Down) | Some(Self::PeerDown) | Some(Self::Ephemeral) => false,
        }
    }

    /// Short name used in errors and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Down => "Down",
            Self::Up => "Up",
            Self::PeerDown => "Peering-Down",
            Self::PeerUp => "Peering-Up",
            Self::Ephemeral => "Ephemeral",
            Self::Core => "Core",
        }
    }
}

impl fmt::Display for PathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 48-bit autonomous system number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct As(pub u64);

impl fmt::Display for As {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 <= u64::from(u32::MAX) {
            return write!(f, "{}", self.0);
        }
        write!(
            f,
            "{:x}:{:x}:{:x}",
            (self.0 >> 32) & 0xFFFF,
            (self.0 >> 16) & 0xFFFF,
            self.0 & 0xFFFF
        )
    }
}

/// ISD-AS pair identifying a reservation source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IsdAs {
    /// Isolation domain.
    pub isd: u16,
    /// Autonomous system within the domain.
    pub asn: As,
}

impl fmt::Display for IsdAs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.isd, self.asn)
    }
}
