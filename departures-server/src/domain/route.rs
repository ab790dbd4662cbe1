//! Train routes: the ordered stops of one train run.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{StationId, TrainId};

/// A stop on a train's route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stop {
    pub station_id: StationId,
    pub station_name: String,

    /// Departure time from this stop. The terminus has none.
    #[serde(default)]
    pub departs_at: Option<NaiveDateTime>,
}

/// The full stopping pattern of a train.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub train_id: TrainId,
    pub stops: Vec<Stop>,
    pub arrives_at: NaiveDateTime,
}

impl Route {
    /// Stops strictly after the first occurrence of `station`.
    ///
    /// Returns an empty slice when the train does not call at `station`.
    pub fn stops_after(&self, station: &StationId) -> &[Stop] {
        match self.stops.iter().position(|s| &s.station_id == station) {
            Some(idx) => &self.stops[idx + 1..],
            None => &[],
        }
    }
}
