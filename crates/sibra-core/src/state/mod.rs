//! Reservation state: steady entries, ephemeral entries, and the keyed
//! tables holding them.

mod ephem;
mod local;
mod steady;
mod store;
mod temp;

pub use ephem::{EphemEntry, EphemIdx, EphemMap};
pub use local::{LOCAL_GC_INTERVAL_MS, LOCAL_RESV_EXPIRY_MS, LocalResvEntry, LocalResvs};
pub use steady::{SteadyEntry, SteadyIdx};
pub use store::SteadyMap;
pub use temp::{TEMP_GC_INTERVAL_MS, TEMP_RESV_EXPIRY_MS, TempTable};
