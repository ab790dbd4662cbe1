//! Remote-to-local sync: the fetchers driven by the fetch coordinators.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::domain::{StationId, TrainId};
use crate::fetch::{FetchError, Fetcher};

use super::{RouteRepository, ScheduleRepository};

/// Fetches a station's schedules and replaces the local copy.
pub struct ScheduleSync {
    repo: Arc<dyn ScheduleRepository>,
}

impl ScheduleSync {
    pub fn new(repo: Arc<dyn ScheduleRepository>) -> Self {
        Self { repo }
    }
}

impl Fetcher<StationId> for ScheduleSync {
    fn fetch<'a>(&'a self, station: &'a StationId) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            match self.repo.fetch(station).await {
                Ok(schedules) => {
                    debug!(station = %station, count = schedules.len(), "storing schedules");
                    self.repo.store(station, schedules).await
                }
                Err(err) if err.is_not_found() => {
                    // An unknown station has no departures; resolve its views to empty.
                    self.repo.store(station, Vec::new()).await?;
                    Err(err)
                }
                Err(err) => Err(err),
            }
        })
    }
}

/// Fetches train routes and stores them locally.
pub struct RouteSync {
    repo: Arc<dyn RouteRepository>,
}

impl RouteSync {
    pub fn new(repo: Arc<dyn RouteRepository>) -> Self {
        Self { repo }
    }
}

impl Fetcher<TrainId> for RouteSync {
    fn fetch<'a>(&'a self, train: &'a TrainId) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            let route = self.repo.fetch(train).await?;
            debug!(train = %train, stops = route.stops.len(), "storing route");
            self.repo.store(route).await
        })
    }

    fn fetch_many<'a>(&'a self, trains: &'a [TrainId]) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            let routes = self.repo.fetch_many(trains).await?;
            debug!(requested = trains.len(), found = routes.len(), "storing routes");
            for route in routes {
                self.repo.store(route).await?;
            }
            Ok(())
        })
    }
}
