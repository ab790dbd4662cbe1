//! Engine and server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::clock::DEFAULT_TICK_INTERVAL;
use crate::departures::{BranchRule, GroupBy};
use crate::fetch::DEFAULT_BOOKKEEPING_CAPACITY;
use crate::live::Retention;

/// Settings key of the future-only departures filter.
pub const FUTURE_ONLY_KEY: &str = "future_only";

/// Configuration for the departures engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the shared ticker.
    pub tick_interval: Duration,

    /// Retention of the schedule, route and station caches.
    pub retention: Retention,

    /// Maximum number of keys whose last fetch time is remembered, per coordinator.
    pub bookkeeping_capacity: u64,

    pub group_by: GroupBy,

    /// Stop-count restrictions for branch lines.
    ///
    /// Empty by default: the deployed network's line marker and branch
    /// station list are not known here, so every stop after the origin is
    /// counted until a rule is added with
    /// [`with_branch_rule`](EngineConfig::with_branch_rule).
    pub branch_rules: Vec<BranchRule>,

    /// Settings key holding the future-only filter.
    pub future_only_key: String,

    /// Filter value while the setting is unset.
    pub future_only_default: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            retention: Retention::Eager,
            bookkeeping_capacity: DEFAULT_BOOKKEEPING_CAPACITY,
            group_by: GroupBy::Destination,
            branch_rules: Vec::new(),
            future_only_key: FUTURE_ONLY_KEY.to_string(),
            future_only_default: true,
        }
    }
}

impl EngineConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_bookkeeping_capacity(mut self, capacity: u64) -> Self {
        self.bookkeeping_capacity = capacity;
        self
    }

    pub fn with_group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn with_branch_rule(mut self, rule: BranchRule) -> Self {
        self.branch_rules.push(rule);
        self
    }

    pub fn with_future_only_default(mut self, enabled: bool) -> Self {
        self.future_only_default = enabled;
        self
    }
}

/// Errors from reading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Configuration of the demo server binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,

    /// Directory holding the JSON fixtures.
    pub data_dir: PathBuf,

    pub tick_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            data_dir: PathBuf::from("data/demo"),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl ServerConfig {
    /// Read `DEPARTURES_ADDR`, `DEPARTURES_DATA_DIR` and `DEPARTURES_TICK_SECS`,
    /// falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("DEPARTURES_ADDR") {
            config.addr = value.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: "DEPARTURES_ADDR",
                reason: e.to_string(),
                value,
            })?;
        }

        if let Some(value) = lookup("DEPARTURES_DATA_DIR") {
            config.data_dir = PathBuf::from(value);
        }

        if let Some(value) = lookup("DEPARTURES_TICK_SECS") {
            let secs: u64 = value.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                var: "DEPARTURES_TICK_SECS",
                reason: e.to_string(),
                value: value.clone(),
            })?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: "DEPARTURES_TICK_SECS",
                    value,
                    reason: "must be positive".to_string(),
                });
            }
            config.tick_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}
