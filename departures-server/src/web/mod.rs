//! JSON HTTP surface over the departures engine.

mod dto;
mod routes;
mod state;

pub use dto::*;
pub use routes::{AppError, create_router};
pub use state::{AppState, DEFAULT_FIRST_LOAD_WAIT};
