//! Wall-clock access and the shared minute ticker.
//!
//! All "now" readings go through a [`Clock`] so that tests can pin time.
//! The [`Ticker`] republishes the clock at a fixed period to any number of
//! subscribers through a single timer task.

use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default tick period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Source of the current local time.
pub trait Clock: Send + Sync {
    /// Current local wall-clock time.
    fn now(&self) -> NaiveDateTime;
}

/// Clock backed by the system's local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Set the current time.
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Move the current time forward by `by`.
    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct TickerInner {
    clock: Arc<dyn Clock>,
    /// `None` for a manual ticker.
    period: Option<Duration>,
    tx: watch::Sender<NaiveDateTime>,
    timer: OnceLock<JoinHandle<()>>,
}

impl Drop for TickerInner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get() {
            timer.abort();
        }
    }
}

/// Process-wide periodic time source.
///
/// Cloning a ticker shares the same timer. The timer starts on the first
/// [`subscribe`](Ticker::subscribe) and runs until the last clone is
/// dropped; it emits immediately and then once per period. Periods are not
/// aligned to minute boundaries.
#[derive(Clone)]
pub struct Ticker {
    inner: Arc<TickerInner>,
}

impl Ticker {
    /// Create a ticker that publishes `clock.now()` every `period`.
    pub fn new(clock: Arc<dyn Clock>, period: Duration) -> Self {
        Self::build(clock, Some(period))
    }

    /// Create a ticker without a timer. Time only advances on [`tick`](Ticker::tick).
    pub fn manual(clock: Arc<dyn Clock>) -> Self {
        Self::build(clock, None)
    }

    fn build(clock: Arc<dyn Clock>, period: Option<Duration>) -> Self {
        let (tx, _rx) = watch::channel(clock.now());
        Self {
            inner: Arc::new(TickerInner {
                clock,
                period,
                tx,
                timer: OnceLock::new(),
            }),
        }
    }

    /// Subscribe to ticks. The receiver holds the latest tick immediately.
    ///
    /// Must be called from within a Tokio runtime when the ticker has a period.
    pub fn subscribe(&self) -> watch::Receiver<NaiveDateTime> {
        if let Some(period) = self.inner.period {
            self.inner.timer.get_or_init(|| self.spawn_timer(period));
        }
        self.inner.tx.subscribe()
    }

    fn spawn_timer(&self, period: Duration) -> JoinHandle<()> {
        debug!(period_secs = period.as_secs(), "starting ticker");
        let inner: Weak<TickerInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.tx.send_replace(inner.clock.now());
            }
        })
    }

    /// Publish the clock's current time now, outside the regular period.
    pub fn tick(&self) {
        self.inner.tx.send_replace(self.inner.clock.now());
    }

    /// The most recently published tick.
    pub fn latest(&self) -> NaiveDateTime {
        *self.inner.tx.borrow()
    }

    /// The clock this ticker reads.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }
}
