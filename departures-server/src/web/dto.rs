//! Data transfer objects for web requests and responses.

use serde::{Deserialize, Serialize};

use crate::departures::{Departure, ScheduleGroup};
use crate::domain::Station;
use crate::fetch::FetchOutcome;

/// A station reference.
#[derive(Debug, Serialize)]
pub struct StationResult {
    pub id: String,
    pub name: String,
}

impl StationResult {
    pub fn from_station(station: &Station) -> Self {
        Self {
            id: station.id.to_string(),
            name: station.name.clone(),
        }
    }
}

/// One upcoming departure.
#[derive(Debug, Serialize)]
pub struct DepartureResult {
    pub schedule_id: String,
    pub train_id: String,

    /// Departure time in HH:MM format
    pub departs_at: String,

    /// e.g. "in 5 minutes"
    pub eta: String,

    /// Stops left after the station, once the route is known
    pub stop_count: Option<usize>,
}

impl DepartureResult {
    pub fn from_departure(departure: &Departure) -> Self {
        Self {
            schedule_id: departure.schedule.id.clone(),
            train_id: departure.schedule.train_id.to_string(),
            departs_at: departure.schedule.departs_at.format("%H:%M").to_string(),
            eta: departure.eta.clone(),
            stop_count: departure.stop_count,
        }
    }
}

/// Departures to one destination.
#[derive(Debug, Serialize)]
pub struct ScheduleGroupResult {
    pub destination: StationResult,
    pub line: String,
    pub color: String,
    pub departures: Vec<DepartureResult>,
}

impl ScheduleGroupResult {
    pub fn from_group(group: &ScheduleGroup) -> Self {
        Self {
            destination: StationResult::from_station(&group.destination),
            line: group.line.clone(),
            color: group.color.clone(),
            departures: group
                .departures
                .iter()
                .map(DepartureResult::from_departure)
                .collect(),
        }
    }
}

/// Convert an optional view value: `loaded` is false while nothing is known.
pub fn groups_result(groups: Option<&[ScheduleGroup]>) -> (bool, Vec<ScheduleGroupResult>) {
    match groups {
        Some(groups) => (true, groups.iter().map(ScheduleGroupResult::from_group).collect()),
        None => (false, Vec::new()),
    }
}

/// Departures of one station.
#[derive(Debug, Serialize)]
pub struct DeparturesResponse {
    pub station: String,

    /// False while the first schedules load is pending
    pub loaded: bool,

    pub groups: Vec<ScheduleGroupResult>,
}

/// A favorite station with its departures.
#[derive(Debug, Serialize)]
pub struct FavoriteResult {
    pub station: StationResult,
    pub loaded: bool,
    pub groups: Vec<ScheduleGroupResult>,
}

#[derive(Debug, Serialize)]
pub struct FavoritesResponse {
    pub favorites: Vec<FavoriteResult>,
}

/// Query of a schedule refresh.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    /// Refetch even if already fetched today
    #[serde(default)]
    pub forced: bool,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    /// One of "fresh", "in_flight", "fetched", "not_found", "failed"
    pub outcome: &'static str,
    pub error: Option<String>,
}

impl RefreshResponse {
    pub fn from_outcome(outcome: &FetchOutcome) -> Self {
        let (outcome, error) = match outcome {
            FetchOutcome::Fresh => ("fresh", None),
            FetchOutcome::InFlight => ("in_flight", None),
            FetchOutcome::Fetched => ("fetched", None),
            FetchOutcome::NotFound => ("not_found", None),
            FetchOutcome::Failed(err) => ("failed", Some(err.to_string())),
        };
        Self { outcome, error }
    }
}

#[derive(Debug, Serialize)]
pub struct FocusResponse {
    /// Whether a route fetch was enqueued
    pub enqueued: bool,
}

/// Body of the future-only filter update, also its response.
#[derive(Debug, Serialize, Deserialize)]
pub struct FutureOnlySetting {
    pub enabled: bool,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
