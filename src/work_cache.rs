//! A memoizing map from keys to shared asynchronous computations.
//!
//! [`WorkCache`] guarantees that at most one computation runs per key: the first caller of
//! [`WorkCache::get_or_compute`] registers the computation while holding the entry lock, and every
//! later caller receives a clone of the very same [`Computation`]. Entries are
//! [`futures::future::Shared`] futures, so in-flight and settled work can be handed to any number
//! of observers, and forking a cache copies the entry set without duplicating or dropping work.
//!
//! Failures are cached exactly like successes. A key whose computation failed keeps returning
//! that failure until it is explicitly removed with [`WorkCache::delete`] or [`WorkCache::clear`].

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::{
    borrow::Borrow,
    collections::{hash_map::Entry, HashMap},
    fmt,
    future::Future,
    hash::Hash,
};

use crate::error::AnalysisError;

/// A registered (possibly still running) computation. Cloning is cheap and every clone resolves
/// to the same outcome.
pub type Computation<V> = Shared<BoxFuture<'static, Result<V, AnalysisError>>>;

/// Wrap an already known value as a settled computation.
pub fn resolved<V>(value: V) -> Computation<V>
where
    V: Clone + Send + Sync + 'static,
{
    let computation = future::ready(Ok::<V, AnalysisError>(value)).boxed().shared();
    // A ready future settles on its first poll, which makes the value visible to `peek`.
    let _ = computation.clone().now_or_never();
    computation
}

pub struct WorkCache<K, V> {
    entries: Mutex<HashMap<K, Computation<V>>>,
}

impl<K, V> Default for WorkCache<K, V> {
    fn default() -> Self {
        WorkCache {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> fmt::Debug for WorkCache<K, V>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("WorkCache")
            .field("keys", &entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K, V> WorkCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the entry for `key`, registering `compute` as its computation if there is none.
    ///
    /// The check and the registration happen under one lock acquisition, before `compute` has a
    /// chance to run, so near-simultaneous callers can never both decide they are first. `compute`
    /// itself is invoked lazily, on the first poll of the returned computation, and never more
    /// than once per registered entry.
    pub fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> Computation<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, AnalysisError>> + Send + 'static,
    {
        let mut entries = self.entries.lock();
        match entries.entry(key) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(vacant) => {
                tracing::trace!("[WorkCache] registering computation for {:?}", vacant.key());
                let computation = async move { compute().await }.boxed().shared();
                vacant.insert(computation).clone()
            }
        }
    }

    /// The existing entry for `key`, if any. Never starts a computation.
    pub fn get<Q>(&self, key: &Q) -> Option<Computation<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().get(key).cloned()
    }

    /// The settled outcome for `key`, or `None` if there is no entry or it is still in flight.
    pub fn peek<Q>(&self, key: &Q) -> Option<Result<V, AnalysisError>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .lock()
            .get(key)
            .and_then(|computation| computation.peek().cloned())
    }

    /// Install a resolved entry for `key`, replacing whatever was there.
    pub fn set(&self, key: K, value: V) {
        self.entries.lock().insert(key, resolved(value));
    }

    /// Remove the entry for `key`. A later [`WorkCache::get_or_compute`] starts fresh; anyone
    /// already holding the old computation still observes its outcome.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Whether `computation` is the entry currently registered for `key`.
    pub fn is_current<Q>(&self, key: &Q, computation: &Computation<V>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|current| current.ptr_eq(computation))
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// A new cache holding a point-in-time copy of this cache's entries.
    ///
    /// The two caches are independent from here on: inserting, replacing, or deleting a key in
    /// one is not visible in the other. The entries themselves are shared, so in-flight work
    /// started before the fork is observed by both.
    pub fn fork(&self) -> Self {
        WorkCache {
            entries: Mutex::new(self.entries.lock().clone()),
        }
    }

    /// Fork `from` if given, otherwise start empty.
    pub fn fork_from(from: Option<&Self>) -> Self {
        from.map(WorkCache::fork).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use tokio::sync::oneshot;

    fn counting(
        counter: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, AnalysisError>> + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<u32, AnalysisError>(value) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_compute_once() {
        let cache: WorkCache<String, u32> = WorkCache::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<u32>();

        let gated_counter = counter.clone();
        let first = cache.get_or_compute("k".to_string(), move || async move {
            gated_counter.fetch_add(1, Ordering::SeqCst);
            rx.await
                .map_err(|e| AnalysisError::Custom(format!("sender dropped: {e}")))
        });
        let second = cache.get_or_compute("k".to_string(), counting(&counter, 99));
        assert!(first.ptr_eq(&second));

        tx.send(7).unwrap();
        let (a, b) = futures::join!(first, second);
        assert_eq!(a, Ok(7));
        assert_eq!(b, Ok(7));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_sticky_until_deleted() {
        let cache: WorkCache<&'static str, u32> = WorkCache::new();
        let failure = AnalysisError::Custom("boom".to_string());
        let expected = failure.clone();
        let first = cache
            .get_or_compute("k", move || async move { Err(failure) })
            .await;
        assert_eq!(first, Err(expected.clone()));

        let counter = Arc::new(AtomicUsize::new(0));
        let second = cache.get_or_compute("k", counting(&counter, 1)).await;
        assert_eq!(second, Err(expected));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert!(cache.delete(&"k"));
        let third = cache.get_or_compute("k", counting(&counter, 1)).await;
        assert_eq!(third, Ok(1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_set_replaces_entry() {
        let cache: WorkCache<&'static str, u32> = WorkCache::new();
        assert_eq!(cache.get_or_compute("k", || async { Ok(1) }).await, Ok(1));
        cache.set("k", 2);
        assert_eq!(cache.peek(&"k"), Some(Ok(2)));

        let counter = Arc::new(AtomicUsize::new(0));
        assert_eq!(cache.get_or_compute("k", counting(&counter, 3)).await, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_peek_only_sees_settled_entries() {
        let cache: WorkCache<&'static str, u32> = WorkCache::new();
        let (tx, rx) = oneshot::channel::<u32>();
        let pending = cache.get_or_compute("k", move || async move {
            rx.await.map_err(|e| AnalysisError::Custom(e.to_string()))
        });
        assert_eq!(cache.peek(&"k"), None);
        tx.send(5).unwrap();
        assert_eq!(pending.await, Ok(5));
        assert_eq!(cache.peek(&"k"), Some(Ok(5)));
        assert_eq!(cache.peek(&"missing"), None);
    }

    #[tokio::test]
    async fn test_fork_isolation() {
        let original: WorkCache<&'static str, u32> = WorkCache::new();
        original.set("shared", 1);
        original.set("deleted_in_fork", 2);

        let forked = original.fork();
        forked.delete(&"deleted_in_fork");
        forked.set("only_in_fork", 3);
        original.set("shared", 10);

        assert_eq!(original.peek(&"deleted_in_fork"), Some(Ok(2)));
        assert!(!original.contains_key(&"only_in_fork"));
        assert_eq!(forked.peek(&"shared"), Some(Ok(1)));
        assert!(!forked.contains_key(&"deleted_in_fork"));
        let mut keys = forked.keys();
        keys.sort();
        assert_eq!(keys, vec!["only_in_fork", "shared"]);

        original.clear();
        assert!(original.is_empty());
        assert_eq!(forked.len(), 2);
    }

    #[tokio::test]
    async fn test_fork_shares_in_flight_work() {
        let original: WorkCache<&'static str, u32> = WorkCache::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let in_flight = original.get_or_compute("k", counting(&counter, 4));

        let forked = WorkCache::fork_from(Some(&original));
        let from_fork = forked.get_or_compute("k", counting(&counter, 8));
        assert!(from_fork.ptr_eq(&in_flight));
        assert!(forked.is_current(&"k", &in_flight));

        assert_eq!(from_fork.await, Ok(4));
        assert_eq!(in_flight.await, Ok(4));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let empty: WorkCache<&'static str, u32> = WorkCache::fork_from(None);
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_computation_still_completes_for_holders() {
        let cache: WorkCache<&'static str, u32> = WorkCache::new();
        let held = cache.get_or_compute("k", || async { Ok(11) });
        cache.delete(&"k");
        assert!(!cache.is_current(&"k", &held));
        assert_eq!(held.await, Ok(11));
        assert!(cache.get(&"k").is_none());
    }
}
