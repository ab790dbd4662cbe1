//! In-memory collaborators.
//!
//! Local data lives in `watch` channels so subscribers see every change.
//! The "remote" side is a plain map that tests and the demo binary fill in;
//! fetches for keys missing from it fail with [`FetchError::NotFound`].

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use dashmap::DashMap;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::domain::{Route, Schedule, Station, StationId, TrainId, favorites_in_order};
use crate::fetch::FetchError;

use super::{RouteRepository, ScheduleRepository, SettingsStore, StationRepository};

/// One watch channel per key, created on first touch.
struct WatchMap<K, V> {
    channels: DashMap<K, watch::Sender<Option<V>>>,
}

impl<K, V> WatchMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    fn subscribe(&self, key: &K) -> BoxStream<'static, Option<V>> {
        let rx = self
            .channels
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        WatchStream::new(rx).boxed()
    }

    fn set(&self, key: K, value: V) {
        self.channels
            .entry(key)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(value));
    }

    fn get(&self, key: &K) -> Option<V> {
        self.channels.get(key).and_then(|tx| tx.borrow().clone())
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Schedules held in memory.
pub struct MemoryScheduleRepository {
    local: WatchMap<StationId, Vec<Schedule>>,
    remote: RwLock<HashMap<StationId, Vec<Schedule>>>,
    fetches: AtomicUsize,
}

impl MemoryScheduleRepository {
    pub fn new() -> Self {
        Self {
            local: WatchMap::new(),
            remote: RwLock::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Make `schedules` what the remote returns for `station`.
    pub fn set_remote(&self, station: StationId, schedules: Vec<Schedule>) {
        write(&self.remote).insert(station, schedules);
    }

    /// Locally stored schedules of `station`.
    pub fn local(&self, station: &StationId) -> Option<Vec<Schedule>> {
        self.local.get(station)
    }

    /// Number of remote fetches performed.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Default for MemoryScheduleRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleRepository for MemoryScheduleRepository {
    fn subscribe(&self, station: &StationId) -> BoxStream<'static, Option<Vec<Schedule>>> {
        self.local.subscribe(station)
    }

    fn fetch<'a>(&'a self, station: &'a StationId) -> BoxFuture<'a, Result<Vec<Schedule>, FetchError>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            read(&self.remote)
                .get(station)
                .cloned()
                .ok_or_else(|| FetchError::not_found("station", station))
        })
    }

    fn store<'a>(
        &'a self,
        station: &'a StationId,
        schedules: Vec<Schedule>,
    ) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            self.local.set(station.clone(), schedules);
            Ok(())
        })
    }
}

/// Routes held in memory.
pub struct MemoryRouteRepository {
    local: WatchMap<TrainId, Route>,
    remote: RwLock<HashMap<TrainId, Route>>,
    fetched: Mutex<Vec<TrainId>>,
    batches: AtomicUsize,
}

impl MemoryRouteRepository {
    pub fn new() -> Self {
        Self {
            local: WatchMap::new(),
            remote: RwLock::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
            batches: AtomicUsize::new(0),
        }
    }

    /// Make `route` what the remote returns for its train.
    pub fn set_remote(&self, route: Route) {
        write(&self.remote).insert(route.train_id.clone(), route);
    }

    /// Locally stored route of `train`.
    pub fn local(&self, train: &TrainId) -> Option<Route> {
        self.local.get(train)
    }

    /// Every train requested from the remote, in request order.
    pub fn fetched_trains(&self) -> Vec<TrainId> {
        self.fetched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of batched remote calls performed.
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    fn lookup(&self, train: &TrainId) -> Result<Route, FetchError> {
        self.fetched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(train.clone());
        read(&self.remote)
            .get(train)
            .cloned()
            .ok_or_else(|| FetchError::not_found("route", train))
    }
}

impl Default for MemoryRouteRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteRepository for MemoryRouteRepository {
    fn subscribe(&self, train: &TrainId) -> BoxStream<'static, Option<Route>> {
        self.local.subscribe(train)
    }

    fn fetch<'a>(&'a self, train: &'a TrainId) -> BoxFuture<'a, Result<Route, FetchError>> {
        Box::pin(async move { self.lookup(train) })
    }

    fn fetch_many<'a>(&'a self, trains: &'a [TrainId]) -> BoxFuture<'a, Result<Vec<Route>, FetchError>> {
        Box::pin(async move {
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(trains
                .iter()
                .filter_map(|train| self.lookup(train).ok())
                .collect())
        })
    }

    fn store<'a>(&'a self, route: Route) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            self.local.set(route.train_id.clone(), route);
            Ok(())
        })
    }
}

/// Stations held in memory.
pub struct MemoryStationRepository {
    stations: watch::Sender<Vec<Station>>,
}

impl MemoryStationRepository {
    pub fn new(stations: Vec<Station>) -> Self {
        let (tx, _rx) = watch::channel(stations);
        Self { stations: tx }
    }

    /// Insert or replace a station by id.
    pub fn upsert(&self, station: Station) {
        self.stations.send_modify(|all| {
            match all.iter_mut().find(|s| s.id == station.id) {
                Some(existing) => *existing = station,
                None => all.push(station),
            }
        });
    }

    /// Every station, favorite or not.
    pub fn all(&self) -> Vec<Station> {
        self.stations.borrow().clone()
    }
}

impl Default for MemoryStationRepository {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl StationRepository for MemoryStationRepository {
    fn subscribe_favorites(&self) -> BoxStream<'static, Vec<Station>> {
        WatchStream::new(self.stations.subscribe())
            .map(|all| favorites_in_order(&all))
            .boxed()
    }

    fn subscribe(&self, station: &StationId) -> BoxStream<'static, Option<Station>> {
        let id = station.clone();
        WatchStream::new(self.stations.subscribe())
            .map(move |all| all.into_iter().find(|s| s.id == id))
            .boxed()
    }
}

/// Settings held in memory.
#[derive(Default)]
pub struct MemorySettings {
    values: DashMap<String, watch::Sender<Option<bool>>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, key: &str) -> watch::Receiver<Option<bool>> {
        self.values
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }
}

impl SettingsStore for MemorySettings {
    fn get_bool(&self, key: &str, default: bool) -> BoxStream<'static, bool> {
        WatchStream::new(self.channel(key))
            .map(move |value| value.unwrap_or(default))
            .boxed()
    }

    fn set_bool(&self, key: &str, value: bool) {
        self.values
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(value));
    }
}
