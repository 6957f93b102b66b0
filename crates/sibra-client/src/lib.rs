//! End-host supervisors for ephemeral SIBRA reservations.
//!
//! Ephemeral reservations are short-lived and host-owned: a supervisor
//! submits the setup or renewal over the stitched steady path, waits for
//! the demultiplexed reply, and cleans up after failures. The resolver
//! wraps the supervisors with the retry policy: back off on errors,
//! clamp retries to what the path offered, refresh outdated steady
//! extensions, and stop on a client denial.

mod error;
mod requester;
mod resolver;

pub use error::ClientError;
pub use requester::{EphemGrant, EphemRequester, ExtnSender};
pub use resolver::{EphemMeta, EphemState, Resolver, SteadySource, Timers};
