use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use departures_server::clock::{Clock, SystemClock, Ticker};
use departures_server::config::{EngineConfig, ServerConfig};
use departures_server::departures::{Collaborators, DepartureAggregator, FavoriteBoard};
use departures_server::jobs::LocalJobRunner;
use departures_server::repository::{FixtureSet, MemorySettings};
use departures_server::web::{AppState, create_router};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("departures_server=info")),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let today = clock.now().date();

    // Load demo data, shifted so its first day is today
    let fixtures = match FixtureSet::load(&config.data_dir) {
        Ok(fixtures) => fixtures.rebase_to(today),
        Err(e) => {
            error!(error = %e, "failed to load fixtures");
            std::process::exit(1);
        }
    };
    info!(
        stations = fixtures.stations.len(),
        schedules = fixtures.schedules.len(),
        routes = fixtures.routes.len(),
        "loaded fixtures"
    );
    let (stations, schedules, routes) = fixtures.into_repositories();
    let stations = Arc::new(stations);

    let engine_config = EngineConfig::default().with_tick_interval(config.tick_interval);
    let ticker = Ticker::new(clock, engine_config.tick_interval);

    let collaborators = Collaborators {
        schedules: Arc::new(schedules),
        routes: Arc::new(routes),
        stations: stations.clone(),
        settings: Arc::new(MemorySettings::new()),
        runner: Arc::new(LocalJobRunner::new()),
    };
    let aggregator = DepartureAggregator::new(collaborators, ticker, &engine_config);
    let board = FavoriteBoard::new(aggregator.clone(), stations);

    let app = create_router(AppState::new(aggregator, board));

    let listener = match tokio::net::TcpListener::bind(config.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %config.addr, "departures server listening");
    info!("  GET  /health");
    info!("  GET  /api/favorites");
    info!("  GET  /api/departures/:station");
    info!("  POST /api/departures/:station/refresh?forced=true");
    info!("  POST /api/departures/:station/focus");
    info!("  PUT  /api/settings/future-only");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
    }
}
