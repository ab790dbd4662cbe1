//! HTTP route handlers.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::warn;

use crate::domain::StationId;

use super::dto::*;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/favorites", get(favorites))
        .route("/api/departures/:station", get(departures))
        .route("/api/departures/:station/refresh", post(refresh))
        .route("/api/departures/:station/focus", post(focus))
        .route(
            "/api/settings/future-only",
            get(get_future_only).put(set_future_only),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

fn parse_station(raw: &str) -> Result<StationId, AppError> {
    StationId::parse(raw).map_err(|e| AppError::BadRequest {
        message: e.to_string(),
    })
}

/// Every favorite station with its current departures.
async fn favorites(State(state): State<AppState>) -> Json<FavoritesResponse> {
    let favorites = state
        .board
        .snapshot()
        .into_iter()
        .map(|(station, groups)| {
            let (loaded, groups) = groups_result(groups.as_deref().map(Vec::as_slice));
            FavoriteResult {
                station: StationResult::from_station(&station),
                loaded,
                groups,
            }
        })
        .collect();

    Json(FavoritesResponse { favorites })
}

/// Departures of one station, waiting briefly for its first load.
async fn departures(
    State(state): State<AppState>,
    Path(station): Path<String>,
) -> Result<Json<DeparturesResponse>, AppError> {
    let station = parse_station(&station)?;
    let mut view = state.aggregator.departure_groups(&station);

    let groups = match tokio::time::timeout(state.first_load_wait, view.loaded()).await {
        Ok(groups) => Some(groups),
        Err(_) => view.peek(),
    };
    let (loaded, groups) = groups_result(groups.as_deref().map(Vec::as_slice));

    Ok(Json(DeparturesResponse {
        station: station.to_string(),
        loaded,
        groups,
    }))
}

/// Fetch a station's schedules now.
async fn refresh(
    State(state): State<AppState>,
    Path(station): Path<String>,
    Query(req): Query<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let station = parse_station(&station)?;
    let outcome = state.aggregator.refresh(&station, req.forced).await;
    Ok(Json(RefreshResponse::from_outcome(&outcome)))
}

/// Note that a station got the user's attention: fetch its missing routes.
async fn focus(
    State(state): State<AppState>,
    Path(station): Path<String>,
) -> Result<Json<FocusResponse>, AppError> {
    let station = parse_station(&station)?;
    let enqueued = state.aggregator.on_station_focused(&station);
    Ok(Json(FocusResponse { enqueued }))
}

async fn get_future_only(State(state): State<AppState>) -> Json<FutureOnlySetting> {
    Json(FutureOnlySetting {
        enabled: state.aggregator.future_only(),
    })
}

async fn set_future_only(
    State(state): State<AppState>,
    Json(setting): Json<FutureOnlySetting>,
) -> Json<FutureOnlySetting> {
    state.aggregator.set_future_only_filter(setting.enabled);
    Json(setting)
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest { message: String },
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest { message } => (StatusCode::BAD_REQUEST, message),
        };

        warn!(%status, %message, "request failed");

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}
