//! Request and response trailers carried by SIBRA extensions.
//!
//! Every trailer starts with a one-byte base:
//!
//! ```text
//! 0B             1
//! +-----------------+
//! |r|r|r|A|R|ReqType|
//! +-----------------+
//! ```
//!
//! The three MSB are reserved. `A` is set while the request is accepted,
//! `R` marks a response, and the 3-bit type selects the variant. Layouts
//! are padded to 8-byte lines.

mod confirm;
mod ephem;
mod steady;
mod teardown;

use std::fmt;

pub use confirm::ConfirmIndex;
pub use ephem::{EphemClean, EphemFailed, EphemReq};
pub use steady::{Offer, SteadyReq, SteadySucc};
pub use teardown::{SteadyClean, SteadyTearDown};

use crate::{
    errors::{Result, WireError, need},
    id::ResvId,
};

/// Line granularity of the wire format in bytes.
pub const LINE_LEN: usize = 8;

const FLAG_ACCEPTED: u8 = 0x10;
const FLAG_RESPONSE: u8 = 0x08;
const FLAG_TYPE: u8 = 0x07;

pub(crate) fn pad_to_line(len: usize) -> usize {
    len.div_ceil(LINE_LEN) * LINE_LEN
}

/// Type tag of a request trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Steady path setup.
    SteadySetup,
    /// Steady path renewal.
    SteadyRenewal,
    /// Steady reservation teardown.
    SteadyTearDown,
    /// Index confirmation for a steady reservation.
    SteadyConfIndex,
    /// Clean-up of a failed steady index.
    SteadyCleanUp,
    /// Ephemeral path setup.
    EphemSetup,
    /// Ephemeral path renewal.
    EphemRenewal,
    /// Clean-up of a failed ephemeral reservation.
    EphemCleanUp,
}

impl RequestType {
    /// Wire discriminant (3 bits).
    pub fn to_u8(self) -> u8 {
        match self {
            Self::SteadySetup => 0,
            Self::SteadyRenewal => 1,
            Self::SteadyTearDown => 2,
            Self::SteadyConfIndex => 3,
            Self::SteadyCleanUp => 4,
            Self::EphemSetup => 5,
            Self::EphemRenewal => 6,
            Self::EphemCleanUp => 7,
        }
    }

    /// Parse a wire discriminant.
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::SteadySetup),
            1 => Ok(Self::SteadyRenewal),
            2 => Ok(Self::SteadyTearDown),
            3 => Ok(Self::SteadyConfIndex),
            4 => Ok(Self::SteadyCleanUp),
            5 => Ok(Self::EphemSetup),
            6 => Ok(Self::EphemRenewal),
            7 => Ok(Self::EphemCleanUp),
            other => Err(WireError::InvalidRequestType { context: "base", actual: other }),
        }
    }

    /// Whether the request concerns a steady reservation.
    pub fn steady(self) -> bool {
        self.to_u8() <= Self::SteadyCleanUp.to_u8()
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SteadySetup => "Steady Setup",
            Self::SteadyRenewal => "Steady Renewal",
            Self::SteadyTearDown => "Steady Teardown",
            Self::SteadyConfIndex => "Index Confirmation",
            Self::SteadyCleanUp => "Steady Clean-Up",
            Self::EphemSetup => "Ephemeral Setup",
            Self::EphemRenewal => "Ephemeral Renewal",
            Self::EphemCleanUp => "Ephemeral Clean-Up",
        };
        f.write_str(s)
    }
}

/// Reason a reservation request failed.
///
/// Ordered by precedence: along the path the propagated code is the maximum
/// seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FailCode {
    /// No failure.
    #[default]
    None,
    /// The destination client refused the reservation.
    ClientDenied,
    /// Not enough bandwidth; the offer carries the achievable maximum.
    BwExceeded,
    /// An ephemeral reservation with this id already exists.
    EphemExists,
    /// The ephemeral reservation to renew does not exist.
    EphemNotExists,
    /// The steady reservation the request rides on is outdated.
    SteadyOutdated,
    /// The steady reservation the request rides on does not exist.
    SteadyNotExists,
    /// The reservation info violates an invariant.
    InvalidInfo,
}

impl FailCode {
    /// Wire discriminant.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::ClientDenied => 1,
            Self::BwExceeded => 2,
            Self::EphemExists => 3,
            Self::EphemNotExists => 4,
            Self::SteadyOutdated => 5,
            Self::SteadyNotExists => 6,
            Self::InvalidInfo => 7,
        }
    }

    /// Parse a wire discriminant; unknown values map to `InvalidInfo` so a
    /// newer peer cannot smuggle an unrepresentable code.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::None,
            1 => Self::ClientDenied,
            2 => Self::BwExceeded,
            3 => Self::EphemExists,
            4 => Self::EphemNotExists,
            5 => Self::SteadyOutdated,
            6 => Self::SteadyNotExists,
            _ => Self::InvalidInfo,
        }
    }
}

impl fmt::Display for FailCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "None",
            Self::ClientDenied => "Denied by client",
            Self::BwExceeded => "Bandwidth exceeded",
            Self::EphemExists => "Ephemeral already exists",
            Self::EphemNotExists => "Ephemeral does not exist",
            Self::SteadyOutdated => "Steady is outdated",
            Self::SteadyNotExists => "Steady does not exist",
            Self::InvalidInfo => "Invalid info",
        };
        f.write_str(s)
    }
}

/// Shared header of every request trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Base {
    /// Variant tag.
    pub req_type: RequestType,
    /// Response flag.
    pub response: bool,
    /// Whether the request is still accepted.
    pub accepted: bool,
}

impl Base {
    /// Parse the base byte.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        need(raw, 1)?;
        Ok(Self {
            req_type: RequestType::from_u8(raw[0] & FLAG_TYPE)?,
            response: raw[0] & FLAG_RESPONSE != 0,
            accepted: raw[0] & FLAG_ACCEPTED != 0,
        })
    }

    /// Encoded base byte.
    pub fn to_u8(self) -> u8 {
        let mut b = self.req_type.to_u8();
        if self.response {
            b |= FLAG_RESPONSE;
        }
        if self.accepted {
            b |= FLAG_ACCEPTED;
        }
        b
    }
}

impl fmt::Display for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type: {} response: {} accepted: {}",
            self.req_type, self.response, self.accepted
        )
    }
}

/// A parsed request or response trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Steady setup/renewal request, or its failed response.
    Steady(SteadyReq),
    /// Accepted steady setup/renewal response.
    SteadySucc(SteadySucc),
    /// Index confirmation.
    ConfirmIndex(ConfirmIndex),
    /// Steady index clean-up.
    SteadyClean(SteadyClean),
    /// Steady reservation teardown.
    SteadyTearDown(SteadyTearDown),
    /// Accepted ephemeral setup/renewal request or response.
    Ephem(EphemReq),
    /// Failed ephemeral setup/renewal.
    EphemFailed(EphemFailed),
    /// Ephemeral clean-up.
    EphemClean(EphemClean),
}

impl Request {
    /// Parse a trailer; `num_hops` is derived from the carrying extension.
    pub fn parse(raw: &[u8], num_hops: usize) -> Result<Self> {
        let base = Base::parse(raw)?;
        match base.req_type {
            RequestType::SteadySetup | RequestType::SteadyRenewal => {
                if base.response && base.accepted {
                    Ok(Self::SteadySucc(SteadySucc::parse(base, raw, num_hops)?))
                } else {
                    Ok(Self::Steady(SteadyReq::parse(base, raw, num_hops)?))
                }
            },
            RequestType::SteadyConfIndex => {
                Ok(Self::ConfirmIndex(ConfirmIndex::parse(base, raw, num_hops)?))
            },
            RequestType::SteadyCleanUp => {
                Ok(Self::SteadyClean(SteadyClean::parse(base, raw, num_hops)?))
            },
            RequestType::SteadyTearDown => {
                Ok(Self::SteadyTearDown(SteadyTearDown::parse(base, raw, num_hops)?))
            },
            RequestType::EphemSetup | RequestType::EphemRenewal => {
                if base.accepted {
                    Ok(Self::Ephem(EphemReq::parse(base, raw, num_hops)?))
                } else {
                    Ok(Self::EphemFailed(EphemFailed::parse(base, raw, num_hops)?))
                }
            },
            RequestType::EphemCleanUp => {
                Ok(Self::EphemClean(EphemClean::parse(base, raw, num_hops)?))
            },
        }
    }

    /// Shared base header.
    pub fn base(&self) -> Base {
        match self {
            Self::Steady(r) => r.base,
            Self::SteadySucc(r) => r.base,
            Self::ConfirmIndex(r) => r.base,
            Self::SteadyClean(r) => r.base,
            Self::SteadyTearDown(r) => r.base,
            Self::Ephem(r) => r.base,
            Self::EphemFailed(r) => r.base,
            Self::EphemClean(r) => r.base,
        }
    }

    /// Variant tag.
    pub fn req_type(&self) -> RequestType {
        self.base().req_type
    }

    /// Whether this trailer concerns a steady reservation.
    pub fn steady(&self) -> bool {
        self.req_type().steady()
    }

    /// Ephemeral reservation id carried by the trailer, if any.
    pub fn ephem_id(&self) -> Option<ResvId> {
        match self {
            Self::Ephem(r) => r.req_id,
            Self::EphemFailed(r) => r.req_id,
            Self::EphemClean(r) => r.req_id,
            _ => None,
        }
    }

    /// Hop count the trailer spans.
    pub fn num_hops(&self) -> usize {
        match self {
            Self::Steady(r) => r.num_hops(),
            Self::SteadySucc(r) => r.num_hops(),
            Self::ConfirmIndex(r) => r.num_hops(),
            Self::SteadyClean(r) => r.num_hops(),
            Self::SteadyTearDown(r) => r.num_hops(),
            Self::Ephem(r) => r.num_hops(),
            Self::EphemFailed(r) => r.num_hops(),
            Self::EphemClean(r) => r.num_hops(),
        }
    }

    /// Encoded length in bytes (a multiple of the line length).
    pub fn len(&self) -> usize {
        match self {
            Self::Steady(r) => r.len(),
            Self::SteadySucc(r) => r.len(),
            Self::ConfirmIndex(r) => r.len(),
            Self::SteadyClean(r) => r.len(),
            Self::SteadyTearDown(r) => r.len(),
            Self::Ephem(r) => r.len(),
            Self::EphemFailed(r) => r.len(),
            Self::EphemClean(r) => r.len(),
        }
    }

    /// Trailers always occupy at least the base line.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Write the trailer into `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        match self {
            Self::Steady(r) => r.write_to(buf),
            Self::SteadySucc(r) => r.write_to(buf),
            Self::ConfirmIndex(r) => r.write_to(buf),
            Self::SteadyClean(r) => r.write_to(buf),
            Self::SteadyTearDown(r) => r.write_to(buf),
            Self::Ephem(r) => r.write_to(buf),
            Self::EphemFailed(r) => r.write_to(buf),
            Self::EphemClean(r) => r.write_to(buf),
        }
    }

    /// Turn a request into the trailer a response carries on the way back.
    ///
    /// An accepted steady request becomes a `SteadySucc`; other variants
    /// flip the response flag. Already-reversed responses (except clean-ups,
    /// which toggle freely) are rejected.
    pub fn reverse(self) -> Result<Self> {
        match self {
            Self::Steady(r) => r.reverse(),
            Self::SteadySucc(_) => Err(WireError::Unsupported("reversing accepted response")),
            Self::ConfirmIndex(r) => Ok(Self::ConfirmIndex(r.reverse()?)),
            Self::SteadyClean(r) => Ok(Self::SteadyClean(r.reverse())),
            Self::SteadyTearDown(r) => Ok(Self::SteadyTearDown(r.reverse()?)),
            Self::Ephem(r) => Ok(Self::Ephem(r.reverse()?)),
            Self::EphemFailed(r) => Ok(Self::EphemFailed(r.reverse()?)),
            Self::EphemClean(r) => Ok(Self::EphemClean(r.reverse())),
        }
    }
}
