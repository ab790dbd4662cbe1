//! The favorites board: one live departures view per favorite station.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::{Station, StationId};
use crate::repository::StationRepository;

use super::aggregator::{DepartureAggregator, DepartureView};
use super::derive::ScheduleGroup;

/// A favorite station and its live departures.
#[derive(Debug, Clone)]
pub struct DepartureGroup {
    pub station: Station,
    pub schedule_groups: DepartureView,
}

/// Keeps a [`DepartureGroup`] for every favorite station, in favorite order.
///
/// Views of stations that stop being favorites are released; views of
/// stations that stay are kept across favorite list changes.
pub struct FavoriteBoard {
    groups: watch::Receiver<Arc<Vec<DepartureGroup>>>,
    task: JoinHandle<()>,
}

impl FavoriteBoard {
    /// Start following the favorites of `stations`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(aggregator: DepartureAggregator, stations: Arc<dyn StationRepository>) -> Self {
        let (tx, groups) = watch::channel(Arc::new(Vec::<DepartureGroup>::new()));
        let mut favorites = stations.subscribe_favorites();

        let task = tokio::spawn(async move {
            while let Some(favorites) = favorites.next().await {
                let previous: HashMap<StationId, DepartureView> = tx
                    .borrow()
                    .iter()
                    .map(|g| (g.station.id.clone(), g.schedule_groups.clone()))
                    .collect();

                let next: Vec<DepartureGroup> = favorites
                    .into_iter()
                    .map(|station| {
                        let schedule_groups = previous
                            .get(&station.id)
                            .cloned()
                            .unwrap_or_else(|| aggregator.departure_groups(&station.id));
                        DepartureGroup {
                            station,
                            schedule_groups,
                        }
                    })
                    .collect();

                debug!(favorites = next.len(), "favorites changed");
                tx.send_replace(Arc::new(next));
            }
        });

        Self { groups, task }
    }

    /// Current favorite groups.
    pub fn groups(&self) -> Arc<Vec<DepartureGroup>> {
        self.groups.borrow().clone()
    }

    /// Receiver that sees every change of the favorite list.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<DepartureGroup>>> {
        self.groups.clone()
    }

    /// Each favorite with its latest departures (`None` while loading).
    pub fn snapshot(&self) -> Vec<(Station, Option<Arc<Vec<ScheduleGroup>>>)> {
        self.groups()
            .iter()
            .map(|g| (g.station.clone(), g.schedule_groups.peek()))
            .collect()
    }
}

impl Drop for FavoriteBoard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{NaiveDate, NaiveDateTime};

    use crate::clock::{ManualClock, Ticker};
    use crate::config::EngineConfig;
    use crate::departures::Collaborators;
    use crate::jobs::LocalJobRunner;
    use crate::repository::{
        MemoryRouteRepository, MemoryScheduleRepository, MemorySettings, MemoryStationRepository,
    };

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn sid(s: &str) -> StationId {
        StationId::parse(s).unwrap()
    }

    fn setup(stations: Vec<Station>) -> (Arc<MemoryStationRepository>, DepartureAggregator) {
        let clock = Arc::new(ManualClock::new(at(7, 0)));
        let stations = Arc::new(MemoryStationRepository::new(stations));
        let collaborators = Collaborators {
            schedules: Arc::new(MemoryScheduleRepository::new()),
            routes: Arc::new(MemoryRouteRepository::new()),
            stations: stations.clone(),
            settings: Arc::new(MemorySettings::new()),
            runner: Arc::new(LocalJobRunner::new()),
        };
        let aggregator =
            DepartureAggregator::new(collaborators, Ticker::manual(clock), &EngineConfig::default());
        (stations, aggregator)
    }

    async fn wait_for_board(
        board: &FavoriteBoard,
        pred: impl Fn(&[DepartureGroup]) -> bool,
    ) -> Arc<Vec<DepartureGroup>> {
        let mut rx = board.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let groups = rx.borrow_and_update().clone();
                if pred(groups.as_slice()) {
                    return groups;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("timed out")
    }

    fn names(groups: &[DepartureGroup]) -> Vec<&str> {
        groups.iter().map(|g| g.station.name.as_str()).collect()
    }

    #[tokio::test]
    async fn board_follows_favorites_in_order() {
        let (stations, aggregator) = setup(vec![
            Station::new(sid("A"), "Alpha", at(0, 0)).with_favorite(1),
            Station::new(sid("B"), "Bravo", at(0, 0)).with_favorite(0),
            Station::new(sid("C"), "Charlie", at(0, 0)),
        ]);
        let board = FavoriteBoard::new(aggregator.clone(), stations.clone());

        wait_for_board(&board, |g| names(g) == vec!["Bravo", "Alpha"]).await;
        assert_eq!(aggregator.active_views(), 2);

        stations.upsert(Station::new(sid("C"), "Charlie", at(0, 0)).with_favorite(2));
        wait_for_board(&board, |g| names(g) == vec!["Bravo", "Alpha", "Charlie"]).await;
        assert_eq!(aggregator.active_views(), 3);
    }

    #[tokio::test]
    async fn removed_favorite_releases_its_view() {
        let (stations, aggregator) = setup(vec![
            Station::new(sid("A"), "Alpha", at(0, 0)).with_favorite(0),
            Station::new(sid("B"), "Bravo", at(0, 0)).with_favorite(1),
        ]);
        let board = FavoriteBoard::new(aggregator.clone(), stations.clone());
        let before = wait_for_board(&board, |g| g.len() == 2).await;
        drop(before);

        stations.upsert(Station::new(sid("B"), "Bravo", at(0, 0)));
        let after = wait_for_board(&board, |g| names(g) == vec!["Alpha"]).await;
        drop(after);

        assert_eq!(aggregator.active_views(), 1);
        assert_eq!(board.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn dropping_board_releases_views() {
        let (stations, aggregator) = setup(vec![
            Station::new(sid("A"), "Alpha", at(0, 0)).with_favorite(0),
        ]);
        let board = FavoriteBoard::new(aggregator.clone(), stations);
        let groups = wait_for_board(&board, |g| g.len() == 1).await;
        drop(groups);
        assert_eq!(aggregator.active_views(), 1);

        drop(board);
        // The aborted task drops its channel, and with it the views.
        tokio::time::timeout(Duration::from_secs(5), async {
            while aggregator.active_views() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("timed out");
    }
}
