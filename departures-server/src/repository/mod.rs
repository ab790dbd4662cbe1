//! Collaborator contracts: persistence-backed repositories and settings.
//!
//! Repositories expose their local data as push streams that re-emit on
//! every change and never end; they emit `None` (or an empty list) rather
//! than failing. Remote fetches go through `fetch` and are written back
//! with `store`, which in turn makes the streams re-emit.

mod fixtures;
mod memory;
mod sync;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::domain::{Route, Schedule, Station, StationId, TrainId};
use crate::fetch::FetchError;

pub use fixtures::{FixtureError, FixtureSet};
pub use memory::{
    MemoryRouteRepository, MemoryScheduleRepository, MemorySettings, MemoryStationRepository,
};
pub use sync::{RouteSync, ScheduleSync};

/// Schedules per origin station.
pub trait ScheduleRepository: Send + Sync {
    /// Local schedules departing `station`; `None` until first stored.
    fn subscribe(&self, station: &StationId) -> BoxStream<'static, Option<Vec<Schedule>>>;

    /// Fetch the current schedules of `station` from the remote.
    fn fetch<'a>(&'a self, station: &'a StationId) -> BoxFuture<'a, Result<Vec<Schedule>, FetchError>>;

    /// Replace the local schedules of `station`.
    fn store<'a>(
        &'a self,
        station: &'a StationId,
        schedules: Vec<Schedule>,
    ) -> BoxFuture<'a, Result<(), FetchError>>;
}

/// Routes per train.
pub trait RouteRepository: Send + Sync {
    /// Local route of `train`; `None` until stored.
    fn subscribe(&self, train: &TrainId) -> BoxStream<'static, Option<Route>>;

    /// Fetch the route of `train` from the remote.
    fn fetch<'a>(&'a self, train: &'a TrainId) -> BoxFuture<'a, Result<Route, FetchError>>;

    /// Fetch several routes. Trains the remote does not know are left out.
    fn fetch_many<'a>(&'a self, trains: &'a [TrainId]) -> BoxFuture<'a, Result<Vec<Route>, FetchError>> {
        Box::pin(async move {
            let mut routes = Vec::with_capacity(trains.len());
            for train in trains {
                match self.fetch(train).await {
                    Ok(route) => routes.push(route),
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => return Err(err),
                }
            }
            Ok(routes)
        })
    }

    fn store<'a>(&'a self, route: Route) -> BoxFuture<'a, Result<(), FetchError>>;
}

/// Station records.
pub trait StationRepository: Send + Sync {
    /// Favorite stations in favorite order.
    fn subscribe_favorites(&self) -> BoxStream<'static, Vec<Station>>;

    fn subscribe(&self, station: &StationId) -> BoxStream<'static, Option<Station>>;
}

/// Application-wide toggles.
pub trait SettingsStore: Send + Sync {
    /// Current value of `key` and every later change. Emits `default` while unset.
    fn get_bool(&self, key: &str, default: bool) -> BoxStream<'static, bool>;

    fn set_bool(&self, key: &str, value: bool);
}
