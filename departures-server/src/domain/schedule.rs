//! Scheduled departures from a station.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{StationId, TrainId};

/// One scheduled departure of a train from an origin station.
///
/// Schedules are immutable once fetched. A new fetch for the origin station
/// replaces the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub station_origin_id: StationId,
    pub station_destination_id: StationId,
    pub train_id: TrainId,

    /// Line name, e.g. "R2 Nord".
    pub line: String,

    /// Display color of the line, as sent by the operator.
    pub color: String,

    pub departs_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Schedule {
    /// Whether this schedule departs strictly after `now`.
    ///
    /// A train departing exactly at `now` is not upcoming.
    pub fn departs_after(&self, now: NaiveDateTime) -> bool {
        self.departs_at > now
    }
}
