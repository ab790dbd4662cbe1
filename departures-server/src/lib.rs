//! Live departures server.
//!
//! Keeps a live, incrementally updated view of the next departures from
//! each favorite station. Schedules and train routes arrive
//! asynchronously; the views are re-derived whenever either changes, the
//! minute ticks over, or the future-only filter is toggled.

pub mod clock;
pub mod config;
pub mod departures;
pub mod domain;
pub mod fetch;
pub mod jobs;
pub mod live;
pub mod repository;
pub mod web;
