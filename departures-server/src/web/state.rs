//! Application state for the web layer.

use std::sync::Arc;
use std::time::Duration;

use crate::departures::{DepartureAggregator, FavoriteBoard};

/// How long a departures request waits for a station's first load.
pub const DEFAULT_FIRST_LOAD_WAIT: Duration = Duration::from_secs(2);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: DepartureAggregator,

    /// Views of the favorite stations
    pub board: Arc<FavoriteBoard>,

    /// Wait for the first load of a station before answering with `loaded: false`
    pub first_load_wait: Duration,
}

impl AppState {
    pub fn new(aggregator: DepartureAggregator, board: FavoriteBoard) -> Self {
        Self {
            aggregator,
            board: Arc::new(board),
            first_load_wait: DEFAULT_FIRST_LOAD_WAIT,
        }
    }

    pub fn with_first_load_wait(mut self, wait: Duration) -> Self {
        self.first_load_wait = wait;
        self
    }
}
