//! Grouped live departures per station.
//!
//! [`compute_groups`] is the pure derivation; [`DepartureAggregator`]
//! keeps one live derivation per observed station and triggers the
//! schedule and route fetches it needs; [`FavoriteBoard`] follows the
//! favorite stations.

mod aggregator;
mod derive;
mod favorites;
mod stop_count;

pub use aggregator::{Collaborators, DepartureAggregator, DepartureView};
pub use derive::{
    Departure, DerivationInput, DerivationOptions, GroupBy, ScheduleGroup, compute_groups,
    destination_ids, reference_trains,
};
pub use favorites::{DepartureGroup, FavoriteBoard};
pub use stop_count::{BranchRule, StopCounter};
