//! Per-key fetch deduplication and staleness bookkeeping.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDateTime;
use futures::future::BoxFuture;
use moka::future::Cache as MokaCache;
use tracing::{debug, warn};

use crate::clock::Clock;

use super::error::FetchError;
use super::staleness::is_stale;

/// Default number of keys whose last fetch time is remembered.
pub const DEFAULT_BOOKKEEPING_CAPACITY: u64 = 10_000;

/// Performs the actual remote fetch for a key and stores the result.
pub trait Fetcher<K>: Send + Sync {
    fn fetch<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<(), FetchError>>;

    /// Fetch several keys in one call. Defaults to fetching them one by one.
    fn fetch_many<'a>(&'a self, keys: &'a [K]) -> BoxFuture<'a, Result<(), FetchError>>
    where
        K: Sync,
    {
        Box::pin(async move {
            for key in keys {
                self.fetch(key).await?;
            }
            Ok(())
        })
    }
}

/// What a fetch request ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Already fetched today; nothing done.
    Fresh,
    /// Another fetch for the key was running; nothing done.
    InFlight,
    Fetched,
    /// Remote has no such key. Recorded like a success.
    NotFound,
    Failed(FetchError),
}

impl FetchOutcome {
    /// Whether this request performed a fetch that completed.
    pub fn completed(&self) -> bool {
        matches!(self, FetchOutcome::Fetched | FetchOutcome::NotFound)
    }
}

/// Result of a batched fetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome<K> {
    /// Keys included in the batched call.
    pub keys: Vec<K>,
    pub outcome: FetchOutcome,
}

struct Inner<K> {
    name: &'static str,
    fetcher: Arc<dyn Fetcher<K>>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashSet<K>>,
    last_fetched: MokaCache<K, NaiveDateTime>,
}

/// Releases claimed keys from the in-flight set when dropped, including
/// when the fetching future is cancelled or panics.
struct InFlightGuard<K: Eq + Hash> {
    inner: Arc<Inner<K>>,
    keys: Vec<K>,
}

impl<K: Eq + Hash> InFlightGuard<K> {
    /// Release the claimed keys for which `keep` is false.
    fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        let (kept, released): (Vec<K>, Vec<K>) = self.keys.drain(..).partition(|k| keep(k));
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for key in &released {
            in_flight.remove(key);
        }
        self.keys = kept;
    }
}

impl<K: Eq + Hash> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            in_flight.remove(key);
        }
    }
}

/// Decides whether keys need fetching and keeps at most one fetch in
/// flight per key.
///
/// Cheap to clone; clones share state.
pub struct FetchCoordinator<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for FetchCoordinator<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> FetchCoordinator<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
{
    /// Create a coordinator. `name` only labels log lines.
    pub fn new(
        name: &'static str,
        fetcher: Arc<dyn Fetcher<K>>,
        clock: Arc<dyn Clock>,
        bookkeeping_capacity: u64,
    ) -> Self {
        let last_fetched = MokaCache::builder()
            .max_capacity(bookkeeping_capacity)
            .build();
        Self {
            inner: Arc::new(Inner {
                name,
                fetcher,
                clock,
                in_flight: Mutex::new(HashSet::new()),
                last_fetched,
            }),
        }
    }

    /// Whether `key` has no fetch recorded today.
    pub async fn should_fetch(&self, key: &K) -> bool {
        is_stale(self.last_fetched_at(key).await, self.inner.clock.now())
    }

    /// When `key` was last fetched (successfully or as not-found).
    pub async fn last_fetched_at(&self, key: &K) -> Option<NaiveDateTime> {
        self.inner.last_fetched.get(key).await
    }

    /// Record a completed fetch of `key` at `at`.
    pub async fn mark_fetched(&self, key: &K, at: NaiveDateTime) {
        self.inner.last_fetched.insert(key.clone(), at).await;
    }

    /// Whether a fetch for `key` is currently running.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.lock_in_flight().contains(key)
    }

    /// Number of keys currently being fetched.
    pub fn in_flight_count(&self) -> usize {
        self.lock_in_flight().len()
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<K>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically claim every key of `keys` not already in flight.
    fn claim(&self, keys: impl IntoIterator<Item = K>) -> InFlightGuard<K> {
        let mut in_flight = self.lock_in_flight();
        let claimed = keys
            .into_iter()
            .filter(|key| in_flight.insert(key.clone()))
            .collect();
        InFlightGuard {
            inner: self.inner.clone(),
            keys: claimed,
        }
    }

    /// Fetch `key` unless it is fresh (ignored when `forced`) or already in flight.
    pub async fn fetch_if_needed(&self, key: &K, forced: bool) -> FetchOutcome {
        if !forced && !self.should_fetch(key).await {
            debug!(kind = self.inner.name, key = %key, "fetch skipped, already fetched today");
            return FetchOutcome::Fresh;
        }

        let guard = self.claim([key.clone()]);
        if guard.keys.is_empty() {
            debug!(kind = self.inner.name, key = %key, "fetch skipped, already in flight");
            return FetchOutcome::InFlight;
        }
        // A fetch that finished between the check and the claim has already
        // recorded today's data.
        if !forced && !self.should_fetch(key).await {
            debug!(kind = self.inner.name, key = %key, "fetch skipped, fetched while claiming");
            return FetchOutcome::Fresh;
        }

        debug!(kind = self.inner.name, key = %key, forced, "fetching");
        let result = self.inner.fetcher.fetch(key).await;
        // Recorded before the guard releases the key.
        self.settle(&guard.keys, result).await
    }

    /// Fetch every stale key of `keys` not already in flight with one batched call.
    pub async fn fetch_many_if_needed(&self, keys: &[K], forced: bool) -> BatchOutcome<K> {
        let mut candidates = Vec::with_capacity(keys.len());
        for key in keys {
            if forced || self.should_fetch(key).await {
                candidates.push(key.clone());
            }
        }
        if candidates.is_empty() {
            return BatchOutcome {
                keys: Vec::new(),
                outcome: FetchOutcome::Fresh,
            };
        }

        let mut guard = self.claim(candidates);
        if guard.keys.is_empty() {
            return BatchOutcome {
                keys: Vec::new(),
                outcome: FetchOutcome::InFlight,
            };
        }
        if !forced {
            let mut stale = HashSet::with_capacity(guard.keys.len());
            for key in &guard.keys {
                if self.should_fetch(key).await {
                    stale.insert(key.clone());
                }
            }
            guard.retain(|key| stale.contains(key));
            if guard.keys.is_empty() {
                return BatchOutcome {
                    keys: Vec::new(),
                    outcome: FetchOutcome::Fresh,
                };
            }
        }

        debug!(kind = self.inner.name, count = guard.keys.len(), forced, "fetching batch");
        let result = self.inner.fetcher.fetch_many(&guard.keys).await;
        let outcome = self.settle(&guard.keys, result).await;
        BatchOutcome {
            keys: guard.keys.clone(),
            outcome,
        }
    }

    async fn settle(&self, keys: &[K], result: Result<(), FetchError>) -> FetchOutcome {
        let outcome = match result {
            Ok(()) => FetchOutcome::Fetched,
            Err(err) if err.is_not_found() => {
                debug!(kind = self.inner.name, error = %err, "not found, not retrying today");
                FetchOutcome::NotFound
            }
            Err(err) => {
                warn!(kind = self.inner.name, error = %err, "fetch failed");
                return FetchOutcome::Failed(err);
            }
        };

        let now = self.inner.clock.now();
        for key in keys {
            self.mark_fetched(key, now).await;
        }
        outcome
    }
}
