//! The live departures aggregator.
//!
//! Each station view is a [`Derivation`]: a stream that holds handles on
//! the station's schedules, on the routes of its reference trains and on
//! its destination stations, plus the ticker and the filter flag. Whenever
//! any of them changes it recomputes the grouped departures with
//! [`compute_groups`]. Views live in a keyed cache that drops a derivation
//! (and every handle it holds) once nobody observes it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::clock::Ticker;
use crate::config::EngineConfig;
use crate::domain::{Route, Schedule, Station, StationId, TrainId};
use crate::fetch::{FetchCoordinator, FetchOutcome};
use crate::jobs::SyncJobRunner;
use crate::live::{HandleSet, KeyedLiveCache, LiveHandle, LiveSource, Retention};
use crate::repository::{
    RouteRepository, RouteSync, ScheduleRepository, ScheduleSync, SettingsStore, StationRepository,
};

use super::derive::{
    DerivationInput, DerivationOptions, ScheduleGroup, compute_groups, destination_ids,
    reference_trains,
};
use super::stop_count::StopCounter;

/// A live view of one station's grouped departures.
///
/// Holds `None` until the station's schedules first load.
pub type DepartureView = LiveHandle<StationId, Arc<Vec<ScheduleGroup>>>;

/// The external services the aggregator depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub schedules: Arc<dyn ScheduleRepository>,
    pub routes: Arc<dyn RouteRepository>,
    pub stations: Arc<dyn StationRepository>,
    pub settings: Arc<dyn SettingsStore>,
    pub runner: Arc<dyn SyncJobRunner>,
}

struct ScheduleSource(Arc<dyn ScheduleRepository>);

impl LiveSource<StationId, Arc<Vec<Schedule>>> for ScheduleSource {
    fn subscribe(&self, station: &StationId) -> BoxStream<'static, Option<Arc<Vec<Schedule>>>> {
        self.0.subscribe(station).map(|v| v.map(Arc::new)).boxed()
    }
}

struct RouteSource(Arc<dyn RouteRepository>);

impl LiveSource<TrainId, Arc<Route>> for RouteSource {
    fn subscribe(&self, train: &TrainId) -> BoxStream<'static, Option<Arc<Route>>> {
        self.0.subscribe(train).map(|v| v.map(Arc::new)).boxed()
    }
}

struct StationSource(Arc<dyn StationRepository>);

impl LiveSource<StationId, Arc<Station>> for StationSource {
    fn subscribe(&self, station: &StationId) -> BoxStream<'static, Option<Arc<Station>>> {
        self.0.subscribe(station).map(|v| v.map(Arc::new)).boxed()
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// State shared by the aggregator and every derivation.
struct Context {
    schedules: KeyedLiveCache<StationId, Arc<Vec<Schedule>>>,
    routes: KeyedLiveCache<TrainId, Arc<Route>>,
    stations: KeyedLiveCache<StationId, Arc<Station>>,
    schedule_fetches: FetchCoordinator<StationId>,
    route_fetches: FetchCoordinator<TrainId>,
    runner: Arc<dyn SyncJobRunner>,
    settings: Arc<dyn SettingsStore>,
    ticker: Ticker,
    future_only: watch::Receiver<bool>,
    future_only_key: String,
    /// Options minus the filter flag, which is read per recomputation.
    options: DerivationOptions,
    _filter_pump: AbortOnDrop,
}

impl Context {
    fn options(&self, future_only: bool) -> DerivationOptions {
        DerivationOptions {
            future_only,
            ..self.options.clone()
        }
    }

    fn now(&self) -> NaiveDateTime {
        self.ticker.clock().now()
    }

    fn enqueue_schedule_fetch(&self, station: &StationId) -> bool {
        let fetches = self.schedule_fetches.clone();
        let station = station.clone();
        self.runner.enqueue(
            format!("schedules:{station}"),
            Box::pin(async move {
                fetches.fetch_if_needed(&station, false).await;
            }),
        )
    }

    fn enqueue_route_fetch(&self, train: &TrainId) -> bool {
        let fetches = self.route_fetches.clone();
        let train = train.clone();
        self.runner.enqueue(
            format!("route:{train}"),
            Box::pin(async move {
                fetches.fetch_if_needed(&train, false).await;
            }),
        )
    }

    /// Reference trains of `station` that have no route cached.
    fn trains_missing_routes(&self, station: &StationId) -> Vec<TrainId> {
        let Some(schedules) = self.schedules.current_value(station) else {
            return Vec::new();
        };
        let options = self.options(*self.future_only.borrow());
        reference_trains(&schedules, self.now(), &options)
            .into_iter()
            .filter(|train| self.routes.current_value(train).is_none())
            .collect()
    }
}

/// Derives grouped departures for a station and exposes the fetch triggers.
///
/// Cheap to clone; clones share caches and views.
#[derive(Clone)]
pub struct DepartureAggregator {
    ctx: Arc<Context>,
    views: KeyedLiveCache<StationId, Arc<Vec<ScheduleGroup>>>,
}

impl DepartureAggregator {
    /// Create an aggregator over `collaborators`, ticking with `ticker`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(collaborators: Collaborators, ticker: Ticker, config: &EngineConfig) -> Self {
        let Collaborators {
            schedules,
            routes,
            stations,
            settings,
            runner,
        } = collaborators;
        let clock = ticker.clock().clone();

        let (filter_tx, future_only) = watch::channel(config.future_only_default);
        let mut flags = settings.get_bool(&config.future_only_key, config.future_only_default);
        let filter_pump = tokio::spawn(async move {
            while let Some(flag) = flags.next().await {
                filter_tx.send_if_modified(|current| {
                    let changed = *current != flag;
                    *current = flag;
                    changed
                });
            }
        });

        let ctx = Arc::new(Context {
            schedules: KeyedLiveCache::new(
                "schedules",
                Arc::new(ScheduleSource(schedules.clone())),
                config.retention,
            ),
            routes: KeyedLiveCache::new("routes", Arc::new(RouteSource(routes.clone())), config.retention),
            stations: KeyedLiveCache::new("stations", Arc::new(StationSource(stations)), config.retention),
            schedule_fetches: FetchCoordinator::new(
                "schedules",
                Arc::new(ScheduleSync::new(schedules)),
                clock.clone(),
                config.bookkeeping_capacity,
            ),
            route_fetches: FetchCoordinator::new(
                "routes",
                Arc::new(RouteSync::new(routes)),
                clock,
                config.bookkeeping_capacity,
            ),
            runner,
            settings,
            ticker,
            future_only,
            future_only_key: config.future_only_key.clone(),
            options: DerivationOptions {
                future_only: config.future_only_default,
                group_by: config.group_by,
                stop_counter: StopCounter::new(config.branch_rules.clone()),
            },
            _filter_pump: AbortOnDrop(filter_pump),
        });

        let views = KeyedLiveCache::new(
            "departures",
            Arc::new(DepartureSource { ctx: ctx.clone() }),
            Retention::WhileObserved,
        );
        Self { ctx, views }
    }

    /// Live grouped departures of `station`.
    ///
    /// The first view of a station starts its derivation and enqueues a
    /// schedule fetch if none happened today.
    pub fn departure_groups(&self, station: &StationId) -> DepartureView {
        self.views.get(station)
    }

    /// Persist the future-only filter. Every live view recomputes.
    pub fn set_future_only_filter(&self, enabled: bool) {
        debug!(enabled, "setting future-only filter");
        self.ctx.settings.set_bool(&self.ctx.future_only_key, enabled);
    }

    /// The filter value views currently use.
    pub fn future_only(&self) -> bool {
        *self.ctx.future_only.borrow()
    }

    /// Enqueue one batched route fetch for the reference trains of
    /// `station` that lack a route.
    ///
    /// Returns whether a job was enqueued.
    pub fn on_station_focused(&self, station: &StationId) -> bool {
        let missing = self.ctx.trains_missing_routes(station);
        if missing.is_empty() {
            trace!(station = %station, "focused, no routes missing");
            return false;
        }

        debug!(station = %station, trains = missing.len(), "focused, fetching routes");
        let fetches = self.ctx.route_fetches.clone();
        self.ctx.runner.enqueue(
            format!("routes:{station}"),
            Box::pin(async move {
                fetches.fetch_many_if_needed(&missing, false).await;
            }),
        )
    }

    /// Fetch the schedules of `station` now.
    ///
    /// `forced` ignores today's earlier fetch but never starts a second
    /// concurrent fetch for the station.
    pub async fn refresh(&self, station: &StationId, forced: bool) -> FetchOutcome {
        self.ctx.schedule_fetches.fetch_if_needed(station, forced).await
    }

    /// Number of stations with a live view.
    pub fn active_views(&self) -> usize {
        self.views.len()
    }

    /// Whether a fetch of `station`'s schedules is running.
    pub fn is_refreshing(&self, station: &StationId) -> bool {
        self.ctx.schedule_fetches.is_in_flight(station)
    }
}

struct DepartureSource {
    ctx: Arc<Context>,
}

impl LiveSource<StationId, Arc<Vec<ScheduleGroup>>> for DepartureSource {
    fn subscribe(&self, station: &StationId) -> BoxStream<'static, Option<Arc<Vec<ScheduleGroup>>>> {
        debug!(station = %station, "starting departures view");
        Derivation::new(self.ctx.clone(), station.clone()).into_stream()
    }
}

/// The recomputation loop of one station view.
struct Derivation {
    ctx: Arc<Context>,
    station: StationId,
    schedules: LiveHandle<StationId, Arc<Vec<Schedule>>>,
    ticks: watch::Receiver<NaiveDateTime>,
    future_only: watch::Receiver<bool>,
    routes: HandleSet<TrainId, Arc<Route>>,
    destinations: HandleSet<StationId, Arc<Station>>,
    /// Calendar day of the last schedule fetch trigger.
    day: Option<NaiveDate>,
    last: Option<Arc<Vec<ScheduleGroup>>>,
}

impl Derivation {
    fn new(ctx: Arc<Context>, station: StationId) -> Self {
        Self {
            schedules: ctx.schedules.get(&station),
            ticks: ctx.ticker.subscribe(),
            future_only: ctx.future_only.clone(),
            routes: HandleSet::new(ctx.routes.clone()),
            destinations: HandleSet::new(ctx.stations.clone()),
            day: None,
            last: None,
            ctx,
            station,
        }
    }

    fn into_stream(self) -> BoxStream<'static, Option<Arc<Vec<ScheduleGroup>>>> {
        futures::stream::unfold(self, |mut derivation| async move {
            let view = derivation.next_view().await;
            Some((Some(view), derivation))
        })
        .boxed()
    }

    /// Wait for the next view that differs from the last one published.
    async fn next_view(&mut self) -> Arc<Vec<ScheduleGroup>> {
        let mut dirty = self.last.is_none();
        loop {
            if dirty {
                if let Some(view) = self.recompute() {
                    if self.last.as_ref() != Some(&view) {
                        self.last = Some(view.clone());
                        return view;
                    }
                }
            }
            self.wait().await;
            dirty = true;
        }
    }

    async fn wait(&mut self) {
        tokio::select! {
            _ = self.schedules.changed() => {}
            Ok(()) = self.ticks.changed() => {}
            Ok(()) = self.future_only.changed() => {}
            _ = self.routes.changed() => {}
            _ = self.destinations.changed() => {}
        }
    }

    /// Recompute the view; `None` while schedules or destination lookups have not loaded.
    fn recompute(&mut self) -> Option<Arc<Vec<ScheduleGroup>>> {
        let now = *self.ticks.borrow_and_update();
        let future_only = *self.future_only.borrow_and_update();

        if self.day != Some(now.date()) {
            self.day = Some(now.date());
            self.ctx.enqueue_schedule_fetch(&self.station);
        }

        let schedules = self.schedules.latest()?;
        let options = self.ctx.options(future_only);

        let trains = reference_trains(&schedules, now, &options);
        self.routes.retarget(trains.iter().cloned());
        self.destinations.retarget(destination_ids(&schedules));

        let routes: HashMap<TrainId, Arc<Route>> = self.routes.snapshot();
        // Held back until every destination lookup has answered, even if
        // only with "unknown".
        let stations: HashMap<StationId, Arc<Station>> = self.destinations.settled_snapshot()?;

        for train in trains.iter().filter(|train| !routes.contains_key(*train)) {
            self.ctx.enqueue_route_fetch(train);
        }

        let input = DerivationInput {
            station: &self.station,
            schedules: &schedules,
            routes: &routes,
            stations: &stations,
            now,
        };
        let groups = compute_groups(&input, &options);
        trace!(station = %self.station, groups = groups.len(), "recomputed departures");
        Some(Arc::new(groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    use chrono::NaiveDate;
    use futures::future::BoxFuture;

    use crate::clock::ManualClock;
    use crate::domain::Stop;
    use crate::jobs::LocalJobRunner;
    use crate::repository::{
        MemoryRouteRepository, MemoryScheduleRepository, MemorySettings, MemoryStationRepository,
    };

    /// Job runner that only runs jobs when told to.
    #[derive(Default)]
    struct ManualRunner {
        queued: Mutex<Vec<(String, BoxFuture<'static, ()>)>>,
        accepted: Mutex<Vec<String>>,
    }

    impl ManualRunner {
        fn accepted(&self) -> Vec<String> {
            self.accepted.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        fn times_accepted(&self, key: &str) -> usize {
            self.accepted().iter().filter(|k| *k == key).count()
        }

        async fn run_all(&self) {
            let jobs = std::mem::take(&mut *self.queued.lock().unwrap());
            for (_, job) in jobs {
                job.await;
            }
        }

        async fn run(&self, key: &str) {
            let job = {
                let mut queued = self.queued.lock().unwrap();
                let index = queued.iter().position(|(k, _)| k == key).expect("job not queued");
                queued.remove(index).1
            };
            job.await;
        }
    }

    impl SyncJobRunner for ManualRunner {
        fn enqueue(&self, key: String, job: BoxFuture<'static, ()>) -> bool {
            let mut queued = self.queued.lock().unwrap();
            if queued.iter().any(|(k, _)| *k == key) {
                return false;
            }
            self.accepted.lock().unwrap().push(key.clone());
            queued.push((key, job));
            true
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn sid(s: &str) -> StationId {
        StationId::parse(s).unwrap()
    }

    fn tid(s: &str) -> TrainId {
        TrainId::parse(s).unwrap()
    }

    fn schedule(id: &str, dest: &str, train: &str, departs_at: NaiveDateTime) -> Schedule {
        Schedule {
            id: id.to_string(),
            station_origin_id: sid("S"),
            station_destination_id: sid(dest),
            train_id: tid(train),
            line: "R1".to_string(),
            color: "#aa0000".to_string(),
            departs_at,
            updated_at: at(6, 0),
        }
    }

    fn route(train: &str, stations: &[&str]) -> Route {
        Route {
            train_id: tid(train),
            stops: stations
                .iter()
                .map(|s| Stop {
                    station_id: sid(s),
                    station_name: s.to_string(),
                    departs_at: None,
                })
                .collect(),
            arrives_at: at(9, 0),
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        ticker: Ticker,
        schedules: Arc<MemoryScheduleRepository>,
        routes: Arc<MemoryRouteRepository>,
        aggregator: DepartureAggregator,
    }

    /// Station S with 08:00 (T1) and 08:15 (T2) departures to D, at 07:55.
    fn harness(runner: Arc<dyn SyncJobRunner>) -> Harness {
        let clock = Arc::new(ManualClock::new(at(7, 55)));
        let ticker = Ticker::manual(clock.clone());

        let schedules = Arc::new(MemoryScheduleRepository::new());
        schedules.set_remote(
            sid("S"),
            vec![
                schedule("1", "D", "T1", at(8, 0)),
                schedule("2", "D", "T2", at(8, 15)),
            ],
        );
        let routes = Arc::new(MemoryRouteRepository::new());
        let stations = Arc::new(MemoryStationRepository::new(vec![
            Station::new(sid("S"), "Source", at(0, 0)),
            Station::new(sid("D"), "Dest", at(0, 0)),
            Station::new(sid("E"), "East", at(0, 0)),
        ]));

        let collaborators = Collaborators {
            schedules: schedules.clone(),
            routes: routes.clone(),
            stations,
            settings: Arc::new(MemorySettings::new()),
            runner,
        };
        let aggregator = DepartureAggregator::new(collaborators, ticker.clone(), &EngineConfig::default());

        Harness {
            clock,
            ticker,
            schedules,
            routes,
            aggregator,
        }
    }

    async fn within<F: Future>(f: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(5), f)
            .await
            .expect("timed out")
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        within(async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
    }

    async fn wait_for(
        view: &mut DepartureView,
        pred: impl Fn(&[ScheduleGroup]) -> bool,
    ) -> Arc<Vec<ScheduleGroup>> {
        within(async {
            loop {
                if let Some(groups) = view.latest() {
                    if pred(groups.as_slice()) {
                        return groups;
                    }
                }
                view.changed().await;
            }
        })
        .await
    }

    fn departure_ids(groups: &[ScheduleGroup]) -> Vec<&str> {
        groups
            .iter()
            .flat_map(|g| g.departures.iter().map(|d| d.schedule.id.as_str()))
            .collect()
    }

    /// Open the view of S, run its schedule fetch and wait for both departures.
    async fn loaded_view(h: &Harness, runner: &ManualRunner) -> DepartureView {
        let mut view = h.aggregator.departure_groups(&sid("S"));
        wait_until(|| runner.times_accepted("schedules:S") == 1).await;
        runner.run_all().await;
        wait_for(&mut view, |groups| departure_ids(groups).len() == 2).await;
        view
    }

    #[tokio::test]
    async fn first_view_groups_and_fetches_reference_route_once() {
        let runner = Arc::new(ManualRunner::default());
        let h = harness(runner.clone());

        let mut view = loaded_view(&h, &runner).await;
        let groups = view.latest().unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].destination.id, sid("D"));
        assert_eq!(departure_ids(&groups), vec!["1", "2"]);
        assert!(groups[0].departures.iter().all(|d| d.stop_count.is_none()));
        assert_eq!(groups[0].departures[0].eta, "in 5 minutes");

        // Only the earliest train of the group needs its route.
        assert_eq!(runner.times_accepted("route:T1"), 1);
        assert_eq!(runner.times_accepted("route:T2"), 0);
        runner.run_all().await;
        assert_eq!(h.routes.fetched_trains(), vec![tid("T1")]);

        // Recomputing asks again, but the route is not refetched today.
        h.clock.advance(chrono::Duration::minutes(1));
        h.ticker.tick();
        wait_for(&mut view, |groups| {
            groups.first().is_some_and(|g| g.departures[0].eta == "in 4 minutes")
        })
        .await;
        runner.run_all().await;
        assert_eq!(h.routes.fetched_trains(), vec![tid("T1")]);
    }

    #[tokio::test]
    async fn stored_route_fills_stop_counts() {
        let runner = Arc::new(ManualRunner::default());
        let h = harness(runner.clone());
        let mut view = loaded_view(&h, &runner).await;

        h.routes.store(route("T1", &["S", "A", "B", "D"])).await.unwrap();

        let groups = wait_for(&mut view, |groups| {
            groups[0].departures.iter().all(|d| d.stop_count.is_some())
        })
        .await;
        assert!(groups[0].departures.iter().all(|d| d.stop_count == Some(3)));
    }

    #[tokio::test]
    async fn departure_leaves_view_when_its_minute_arrives() {
        let runner = Arc::new(ManualRunner::default());
        let h = harness(runner.clone());
        let mut view = loaded_view(&h, &runner).await;

        h.clock.set(at(8, 0));
        h.ticker.tick();

        let groups = wait_for(&mut view, |groups| departure_ids(groups).len() == 1).await;
        assert_eq!(departure_ids(&groups), vec!["2"]);
        assert_eq!(groups[0].departures[0].eta, "in 15 minutes");
    }

    #[tokio::test]
    async fn disabling_filter_shows_past_departures() {
        let runner = Arc::new(ManualRunner::default());
        let h = harness(runner.clone());
        let mut view = loaded_view(&h, &runner).await;
        assert!(h.aggregator.future_only());

        h.clock.set(at(8, 5));
        h.ticker.tick();
        wait_for(&mut view, |groups| departure_ids(groups) == vec!["2"]).await;

        h.aggregator.set_future_only_filter(false);
        let groups = wait_for(&mut view, |groups| departure_ids(groups).len() == 2).await;
        assert_eq!(groups[0].departures[0].eta, "now");
        assert!(!h.aggregator.future_only());
    }

    #[tokio::test]
    async fn unknown_station_resolves_to_empty() {
        let runner = Arc::new(ManualRunner::default());
        let h = harness(runner.clone());

        let mut view = h.aggregator.departure_groups(&sid("Z"));
        assert_eq!(view.peek(), None);

        wait_until(|| runner.times_accepted("schedules:Z") == 1).await;
        runner.run_all().await;

        let groups = within(view.loaded()).await;
        assert!(groups.is_empty());
    }

    #[tokio::test]
    async fn first_view_waits_for_destination_lookups() {
        let runner = Arc::new(ManualRunner::default());
        let h = harness(runner.clone());
        h.schedules
            .store(&sid("S"), vec![schedule("1", "D", "T1", at(8, 0))])
            .await
            .unwrap();

        let mut view = h.aggregator.departure_groups(&sid("S"));
        let groups = within(view.loaded()).await;

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].destination.name, "Dest");
        assert_eq!(departure_ids(&groups), vec!["1"]);
    }

    #[tokio::test]
    async fn unknown_destination_is_dropped_once_looked_up() {
        let runner = Arc::new(ManualRunner::default());
        let h = harness(runner.clone());
        h.schedules
            .store(
                &sid("S"),
                vec![
                    schedule("1", "D", "T1", at(8, 0)),
                    schedule("2", "Q", "T2", at(8, 5)),
                ],
            )
            .await
            .unwrap();

        let mut view = h.aggregator.departure_groups(&sid("S"));
        let groups = within(view.loaded()).await;

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].destination.id, sid("D"));
    }

    #[tokio::test]
    async fn views_are_shared_and_dropped_when_unobserved() {
        let runner = Arc::new(ManualRunner::default());
        let h = harness(runner.clone());

        let a = h.aggregator.departure_groups(&sid("S"));
        let b = h.aggregator.departure_groups(&sid("S"));
        assert_eq!(h.aggregator.active_views(), 1);

        drop(a);
        assert_eq!(h.aggregator.active_views(), 1);
        drop(b);
        assert_eq!(h.aggregator.active_views(), 0);
    }

    #[tokio::test]
    async fn new_day_triggers_schedule_fetch() {
        let runner = Arc::new(ManualRunner::default());
        let h = harness(runner.clone());
        let mut view = loaded_view(&h, &runner).await;
        assert_eq!(h.schedules.fetch_count(), 1);

        // Same day: no new schedule fetch.
        h.clock.set(at(8, 10));
        h.ticker.tick();
        wait_for(&mut view, |groups| departure_ids(groups) == vec!["2"]).await;
        assert_eq!(runner.times_accepted("schedules:S"), 1);

        let tomorrow = day().succ_opt().unwrap().and_hms_opt(0, 1, 0).unwrap();
        h.clock.set(tomorrow);
        h.ticker.tick();
        wait_until(|| runner.times_accepted("schedules:S") == 2).await;
        runner.run_all().await;
        assert_eq!(h.schedules.fetch_count(), 2);
    }

    #[tokio::test]
    async fn refresh_is_daily_unless_forced() {
        let runner = Arc::new(ManualRunner::default());
        let h = harness(runner.clone());
        let _view = loaded_view(&h, &runner).await;

        assert_eq!(h.aggregator.refresh(&sid("S"), false).await, FetchOutcome::Fresh);
        assert_eq!(h.aggregator.refresh(&sid("S"), true).await, FetchOutcome::Fetched);
        assert_eq!(h.schedules.fetch_count(), 2);
        assert!(!h.aggregator.is_refreshing(&sid("S")));
    }

    #[tokio::test]
    async fn focus_fetches_missing_routes_in_one_batch() {
        let runner = Arc::new(ManualRunner::default());
        let h = harness(runner.clone());
        h.schedules.set_remote(
            sid("S"),
            vec![
                schedule("1", "D", "T1", at(8, 0)),
                schedule("2", "E", "T3", at(8, 20)),
            ],
        );
        h.routes.set_remote(route("T1", &["S", "D"]));
        h.routes.set_remote(route("T3", &["S", "A", "E"]));

        let mut view = loaded_view(&h, &runner).await;

        assert!(h.aggregator.on_station_focused(&sid("S")));
        runner.run("routes:S").await;
        assert_eq!(h.routes.batch_count(), 1);

        let groups = wait_for(&mut view, |groups| {
            groups.iter().all(|g| g.departures[0].stop_count.is_some())
        })
        .await;
        let counts: Vec<_> = groups.iter().map(|g| g.departures[0].stop_count).collect();
        assert_eq!(counts, vec![Some(1), Some(2)]);

        // The per-train jobs find both routes already fetched today.
        runner.run_all().await;
        let mut fetched = h.routes.fetched_trains();
        fetched.sort();
        assert_eq!(fetched, vec![tid("T1"), tid("T3")]);
        assert!(!h.aggregator.on_station_focused(&sid("S")));
    }

    #[tokio::test]
    async fn background_runner_completes_the_view() {
        let h = harness(Arc::new(LocalJobRunner::new()));
        h.routes.set_remote(route("T1", &["S", "A", "B", "D"]));

        let mut view = h.aggregator.departure_groups(&sid("S"));
        let groups = wait_for(&mut view, |groups| {
            groups.first().is_some_and(|g| {
                g.departures.len() == 2 && g.departures.iter().all(|d| d.stop_count == Some(3))
            })
        })
        .await;

        assert_eq!(groups[0].destination.name, "Dest");
        assert_eq!(h.routes.fetched_trains(), vec![tid("T1")]);
        assert_eq!(h.schedules.fetch_count(), 1);
    }
}
