//! Typed convenience structs for the well-known navigation PGNs, for
//! callers that want a concrete type instead of walking a [`DecodedPgn`](crate::codec::DecodedPgn).
//!
//! These mirror the generic schema-driven decode in [`crate::codec`] but
//! skip the `HashMap` indirection for the handful of PGNs the bridge and
//! the coupler/publisher layers touch directly.

mod date_time;
mod pgn126992;
mod pgn127250;
mod pgn127251;
mod pgn128259;
mod pgn129026;
mod pgn129029;
mod pgn130306;
mod pgn130313;

pub use date_time::N2kDateTime;
pub use pgn126992::NmeaSystemTime;
pub use pgn127250::{HeadingReference, VesselHeading};
pub use pgn127251::RateOfTurn;
pub use pgn128259::SpeedWaterReferenced;
pub use pgn129026::CogSogRapidUpdate;
pub use pgn129029::{GnssMethod, GnssPositionData, GnssType};
pub use pgn130306::{WindData, WindReference};
pub use pgn130313::Humidity;
