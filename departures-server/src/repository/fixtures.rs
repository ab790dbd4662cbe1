//! JSON fixture data for the in-memory repositories.
//!
//! A fixture directory holds `stations.json`, `schedules.json` and
//! `routes.json`, each a JSON array of the matching domain type. Stations
//! are loaded as local data; schedules and routes become what the
//! in-memory "remote" serves, so the first view of a station still goes
//! through the fetch path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use crate::domain::{Route, Schedule, Station, StationId};

use super::memory::{MemoryRouteRepository, MemoryScheduleRepository, MemoryStationRepository};

/// Errors from loading fixtures.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Json { path: PathBuf, message: String },
}

/// Stations, schedules and routes loaded from disk.
#[derive(Debug, Clone, Default)]
pub struct FixtureSet {
    pub stations: Vec<Station>,
    pub schedules: Vec<Schedule>,
    pub routes: Vec<Route>,
}

fn load_array<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<Vec<T>, FixtureError> {
    let path = dir.join(file);
    let contents = std::fs::read_to_string(&path).map_err(|source| FixtureError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|e| FixtureError::Json {
        path,
        message: e.to_string(),
    })
}

impl FixtureSet {
    /// Load the three fixture files from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let dir = dir.as_ref();
        Ok(Self {
            stations: load_array(dir, "stations.json")?,
            schedules: load_array(dir, "schedules.json")?,
            routes: load_array(dir, "routes.json")?,
        })
    }

    /// Shift every schedule and route time by whole days so that the
    /// earliest schedule falls on `day`. Times of day are unchanged.
    pub fn rebase_to(mut self, day: NaiveDate) -> Self {
        let Some(earliest) = self.schedules.iter().map(|s| s.departs_at.date()).min() else {
            return self;
        };
        let shift = day.signed_duration_since(earliest);

        for schedule in &mut self.schedules {
            schedule.departs_at += shift;
            schedule.updated_at += shift;
        }
        for route in &mut self.routes {
            route.arrives_at += shift;
            for stop in &mut route.stops {
                if let Some(at) = stop.departs_at.as_mut() {
                    *at += shift;
                }
            }
        }
        self
    }

    /// Build in-memory repositories serving this data.
    pub fn into_repositories(
        self,
    ) -> (
        MemoryStationRepository,
        MemoryScheduleRepository,
        MemoryRouteRepository,
    ) {
        let stations = MemoryStationRepository::new(self.stations);

        let schedules = MemoryScheduleRepository::new();
        let mut by_origin: HashMap<StationId, Vec<Schedule>> = HashMap::new();
        for schedule in self.schedules {
            by_origin
                .entry(schedule.station_origin_id.clone())
                .or_default()
                .push(schedule);
        }
        for (origin, list) in by_origin {
            schedules.set_remote(origin, list);
        }

        let routes = MemoryRouteRepository::new();
        for route in self.routes {
            routes.set_remote(route);
        }

        (stations, schedules, routes)
    }
}
