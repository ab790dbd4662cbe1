//! Domain types for the departures engine.
//!
//! Stations, schedules and routes are plain immutable records: they are
//! replaced wholesale when fresh data arrives, never patched in place.

mod eta;
mod ids;
mod route;
mod schedule;
mod station;

pub use eta::Eta;
pub use ids::{InvalidId, StationId, TrainId};
pub use route::{Route, Stop};
pub use schedule::Schedule;
pub use station::{Station, favorites_in_order};
