//! Keyed, shared, lazily-started live values.
//!
//! A [`KeyedLiveCache`] multiplexes one upstream subscription per key to
//! any number of [`LiveHandle`]s. The first `get` for a key subscribes to
//! the [`LiveSource`] and spawns a pump task that copies every emission
//! into a `watch` channel; later `get`s for the same key share that
//! channel. Entries are created with an insert-if-absent on a sharded map,
//! so concurrent first lookups never subscribe twice.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

/// Upstream of a [`KeyedLiveCache`]: a push stream of values per key.
///
/// Sources emit `None` while nothing is known and are expected to keep
/// their streams open; a stream that ends freezes the entry at its last
/// value.
pub trait LiveSource<K, V>: Send + Sync + 'static {
    fn subscribe(&self, key: &K) -> BoxStream<'static, Option<V>>;
}

/// When an entry is dropped from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// Keep every entry (and its upstream subscription) for the life of the cache.
    #[default]
    Eager,
    /// Drop the entry and cancel its subscription when its last handle goes away.
    WhileObserved,
}

/// Outer `None` until the source first emits.
type Slot<V> = Option<Option<V>>;

struct Entry<V> {
    rx: watch::Receiver<Slot<V>>,
    observers: AtomicUsize,
    pump: JoinHandle<()>,
}

impl<V> Drop for Entry<V> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

struct CacheInner<K, V> {
    name: &'static str,
    entries: DashMap<K, Arc<Entry<V>>>,
    source: Arc<dyn LiveSource<K, V>>,
    retention: Retention,
}

/// Shared live values keyed by `K`.
///
/// Cheap to clone; clones share entries.
pub struct KeyedLiveCache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for KeyedLiveCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> KeyedLiveCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache over `source`. `name` only labels log lines.
    pub fn new(name: &'static str, source: Arc<dyn LiveSource<K, V>>, retention: Retention) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                name,
                entries: DashMap::new(),
                source,
                retention,
            }),
        }
    }

    /// Get the shared handle for `key`, subscribing upstream if needed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get(&self, key: &K) -> LiveHandle<K, V> {
        let entry = {
            let slot = self
                .inner
                .entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(self.start(key)));
            // Counted while the shard lock is held so eviction cannot race us.
            slot.observers.fetch_add(1, Ordering::AcqRel);
            slot.value().clone()
        };
        LiveHandle {
            key: key.clone(),
            rx: entry.rx.clone(),
            entry,
            cache: self.inner.clone(),
        }
    }

    fn start(&self, key: &K) -> Entry<V> {
        trace!(cache = self.inner.name, key = %key, "subscribing upstream");
        let (tx, rx) = watch::channel(None);
        let mut stream = self.inner.source.subscribe(key);
        let name = self.inner.name;
        let label = key.to_string();
        let pump = tokio::spawn(async move {
            while let Some(value) = stream.next().await {
                tx.send_replace(Some(value));
            }
            trace!(cache = name, key = %label, "upstream ended");
        });
        Entry {
            rx,
            observers: AtomicUsize::new(0),
            pump,
        }
    }

    /// Last known value for `key`, without subscribing.
    pub fn current_value(&self, key: &K) -> Option<V> {
        self.inner
            .entries
            .get(key)
            .and_then(|entry| entry.rx.borrow().clone().flatten())
    }

    /// Number of live handles for `key`.
    pub fn observer_count(&self, key: &K) -> usize {
        self.inner
            .entries
            .get(key)
            .map(|entry| entry.observers.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Whether an entry exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

/// A subscription to one key of a [`KeyedLiveCache`].
///
/// Dropping the last handle of a key evicts it when the cache retains
/// entries only while observed.
pub struct LiveHandle<K, V>
where
    K: Eq + Hash,
{
    key: K,
    rx: watch::Receiver<Slot<V>>,
    entry: Arc<Entry<V>>,
    cache: Arc<CacheInner<K, V>>,
}

impl<K, V> LiveHandle<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Current value, marking it as seen.
    pub fn latest(&mut self) -> Option<V> {
        self.rx.borrow_and_update().clone().flatten()
    }

    /// Current value, marking it as seen; outer `None` until the source has
    /// emitted at all, so an upstream `None` can be told apart from silence.
    pub fn latest_emitted(&mut self) -> Option<Option<V>> {
        self.rx.borrow_and_update().clone()
    }

    /// Current value, without marking it as seen.
    pub fn peek(&self) -> Option<V> {
        self.rx.borrow().clone().flatten()
    }

    /// Whether the source has emitted anything for this key yet.
    pub fn has_emitted(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Wait until the value changes from the last one seen.
    ///
    /// Never resolves once the upstream stream has ended.
    pub async fn changed(&mut self) {
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Wait until a value (anything other than `None`) is available.
    pub async fn loaded(&mut self) -> V {
        loop {
            if let Some(value) = self.latest() {
                return value;
            }
            self.changed().await;
        }
    }
}

impl<K, V> Clone for LiveHandle<K, V>
where
    K: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        self.entry.observers.fetch_add(1, Ordering::AcqRel);
        Self {
            key: self.key.clone(),
            rx: self.rx.clone(),
            entry: self.entry.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<K, V> Drop for LiveHandle<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let was = self.entry.observers.fetch_sub(1, Ordering::AcqRel);
        if was == 1 && self.cache.retention == Retention::WhileObserved {
            let removed = self.cache.entries.remove_if(&self.key, |_, entry| {
                Arc::ptr_eq(entry, &self.entry) && entry.observers.load(Ordering::Acquire) == 0
            });
            if removed.is_some() {
                trace!(cache = self.cache.name, "evicted idle entry");
            }
        }
    }
}

impl<K, V> fmt::Debug for LiveHandle<K, V>
where
    K: Eq + Hash + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveHandle").field("key", &self.key).finish_non_exhaustive()
    }
}

/// A set of handles that follows a changing key set.
///
/// [`retarget`](HandleSet::retarget) cancels subscriptions for keys that
/// left the set and starts them for keys that joined, leaving the rest
/// untouched.
pub struct HandleSet<K, V>
where
    K: Eq + Hash,
{
    cache: KeyedLiveCache<K, V>,
    handles: HashMap<K, LiveHandle<K, V>>,
}

impl<K, V> HandleSet<K, V>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cache: KeyedLiveCache<K, V>) -> Self {
        Self {
            cache,
            handles: HashMap::new(),
        }
    }

    /// Hold handles for exactly `keys`.
    pub fn retarget(&mut self, keys: impl IntoIterator<Item = K>) {
        let wanted: HashSet<K> = keys.into_iter().collect();
        self.handles.retain(|key, _| wanted.contains(key));
        for key in wanted {
            if !self.handles.contains_key(&key) {
                let handle = self.cache.get(&key);
                self.handles.insert(key, handle);
            }
        }
    }

    /// Latest value for a held key, marking it as seen.
    pub fn latest(&mut self, key: &K) -> Option<V> {
        self.handles.get_mut(key).and_then(|h| h.latest())
    }

    /// Latest values of every held key that has one, marking them as seen.
    pub fn snapshot(&mut self) -> HashMap<K, V> {
        self.handles
            .iter_mut()
            .filter_map(|(key, handle)| handle.latest().map(|v| (key.clone(), v)))
            .collect()
    }

    /// Like [`snapshot`](HandleSet::snapshot), but `None` while any held
    /// key has not emitted yet. Keys whose source emitted `None` are left
    /// out of the map.
    pub fn settled_snapshot(&mut self) -> Option<HashMap<K, V>> {
        let mut values = HashMap::with_capacity(self.handles.len());
        let mut settled = true;
        for (key, handle) in &mut self.handles {
            match handle.latest_emitted() {
                None => settled = false,
                Some(Some(value)) => {
                    values.insert(key.clone(), value);
                }
                Some(None) => {}
            }
        }
        settled.then_some(values)
    }

    /// Keys currently held.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.handles.keys()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait until any held handle changes. Pending forever when empty.
    pub async fn changed(&mut self) {
        if self.handles.is_empty() {
            std::future::pending::<()>().await;
        }
        let waits = self.handles.values_mut().map(|h| Box::pin(h.changed()));
        futures::future::select_all(waits).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio_stream::wrappers::WatchStream;

    /// Source backed by one watch channel per key, counting subscriptions.
    /// Stays silent until a value is emitted.
    #[derive(Default)]
    struct TestSource {
        channels: DashMap<u32, watch::Sender<Option<String>>>,
        subscriptions: AtomicUsize,
    }

    impl TestSource {
        fn emit(&self, key: u32, value: &str) {
            self.channels
                .entry(key)
                .or_insert_with(|| watch::channel(None).0)
                .send_replace(Some(value.to_string()));
        }

        fn subscriptions(&self) -> usize {
            self.subscriptions.load(Ordering::SeqCst)
        }
    }

    impl LiveSource<u32, String> for TestSource {
        fn subscribe(&self, key: &u32) -> BoxStream<'static, Option<String>> {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            let rx = self
                .channels
                .entry(*key)
                .or_insert_with(|| watch::channel(None).0)
                .subscribe();
            WatchStream::from_changes(rx).boxed()
        }
    }

    fn cache(retention: Retention) -> (Arc<TestSource>, KeyedLiveCache<u32, String>) {
        let source = Arc::new(TestSource::default());
        let cache = KeyedLiveCache::new("test", source.clone(), retention);
        (source, cache)
    }

    async fn within<F: std::future::Future>(f: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(5), f)
            .await
            .expect("timed out")
    }

    #[tokio::test]
    async fn first_get_creates_entry_with_none() {
        let (source, cache) = cache(Retention::Eager);

        let handle = cache.get(&1);
        assert_eq!(handle.peek(), None);
        assert_eq!(cache.current_value(&1), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(source.subscriptions(), 1);
    }

    #[tokio::test]
    async fn same_key_shares_one_subscription() {
        let (source, cache) = cache(Retention::Eager);

        let _a = cache.get(&1);
        let _b = cache.get(&1);
        let _c = cache.get(&2);

        assert_eq!(source.subscriptions(), 2);
        assert_eq!(cache.observer_count(&1), 2);
        assert_eq!(cache.observer_count(&2), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_gets_subscribe_once() {
        let (source, cache) = cache(Retention::Eager);

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let handle = cache.get(&7);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    drop(handle);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(source.subscriptions(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn emissions_reach_every_handle() {
        let (source, cache) = cache(Retention::Eager);

        let mut a = cache.get(&1);
        let mut b = cache.get(&1);

        source.emit(1, "first");
        assert_eq!(within(a.loaded()).await, "first");
        assert_eq!(within(b.loaded()).await, "first");
        assert_eq!(cache.current_value(&1).as_deref(), Some("first"));

        source.emit(1, "second");
        within(a.changed()).await;
        assert_eq!(a.latest().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn eager_entries_survive_without_observers() {
        let (source, cache) = cache(Retention::Eager);

        let mut handle = cache.get(&1);
        source.emit(1, "kept");
        within(handle.loaded()).await;
        drop(handle);

        assert!(cache.contains(&1));
        assert_eq!(cache.observer_count(&1), 0);
        assert_eq!(cache.current_value(&1).as_deref(), Some("kept"));

        let _again = cache.get(&1);
        assert_eq!(source.subscriptions(), 1);
    }

    #[tokio::test]
    async fn observed_entries_are_evicted_when_idle() {
        let (source, cache) = cache(Retention::WhileObserved);

        let a = cache.get(&1);
        let b = a.clone();
        assert_eq!(cache.observer_count(&1), 2);

        drop(a);
        assert!(cache.contains(&1));

        drop(b);
        assert!(!cache.contains(&1));

        // A fresh lookup subscribes again.
        let _c = cache.get(&1);
        assert_eq!(source.subscriptions(), 2);
    }

    /// Source that answers `None` for unknown keys right away.
    #[derive(Default)]
    struct LookupSource {
        known: DashMap<u32, watch::Sender<Option<String>>>,
    }

    impl LiveSource<u32, String> for LookupSource {
        fn subscribe(&self, key: &u32) -> BoxStream<'static, Option<String>> {
            let rx = self
                .known
                .entry(*key)
                .or_insert_with(|| watch::channel(None).0)
                .subscribe();
            WatchStream::new(rx).boxed()
        }
    }

    #[tokio::test]
    async fn upstream_none_counts_as_emitted() {
        let (source, cache) = cache(Retention::Eager);
        let mut silent = cache.get(&1);
        tokio::task::yield_now().await;
        assert!(!silent.has_emitted());

        let lookups = KeyedLiveCache::new(
            "lookup",
            Arc::new(LookupSource::default()),
            Retention::Eager,
        );
        let mut unknown = lookups.get(&9);
        let seen = within(async {
            loop {
                if let Some(value) = unknown.latest_emitted() {
                    break value;
                }
                unknown.changed().await;
            }
        })
        .await;
        assert_eq!(seen, None);
        assert!(unknown.has_emitted());
        assert_eq!(unknown.peek(), None);

        source.emit(1, "now");
        assert_eq!(within(silent.loaded()).await, "now");
        assert!(silent.has_emitted());
    }

    #[tokio::test]
    async fn settled_snapshot_waits_for_every_key() {
        let (source, cache) = cache(Retention::Eager);
        let mut set = HandleSet::new(cache);
        set.retarget([1, 2]);
        assert_eq!(set.settled_snapshot(), None);

        source.emit(1, "one");
        within(async {
            while !set.handles[&1].has_emitted() {
                set.changed().await;
            }
        })
        .await;
        assert_eq!(set.settled_snapshot(), None);

        source.emit(2, "two");
        let values = within(async {
            loop {
                if let Some(values) = set.settled_snapshot() {
                    break values;
                }
                set.changed().await;
            }
        })
        .await;
        assert_eq!(values.len(), 2);
        assert_eq!(values[&2], "two");
    }

    #[tokio::test]
    async fn handle_set_follows_keys() {
        let (source, cache) = cache(Retention::WhileObserved);
        let mut set = HandleSet::new(cache.clone());

        set.retarget([1, 2]);
        assert_eq!(set.len(), 2);
        assert!(cache.contains(&1) && cache.contains(&2));

        set.retarget([2, 3]);
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2) && cache.contains(&3));
        // Key 2 was kept, not re-subscribed.
        assert_eq!(source.subscriptions(), 3);

        source.emit(3, "three");
        let seen = within(async {
            loop {
                if let Some(v) = set.latest(&3) {
                    break v;
                }
                set.changed().await;
            }
        })
        .await;
        assert_eq!(seen, "three");
        assert_eq!(set.snapshot().len(), 1);
    }
}
