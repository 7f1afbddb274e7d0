use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use failscope_core::ScopeId;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::time::Instant;

mod key;

pub use key::{CacheKey, normalize_params};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub ttl: Duration,
    pub compute_timeout: Duration,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: 100,
            max_bytes: 50 * 1024 * 1024,
            ttl: Duration::from_secs(15 * 60),
            compute_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Failure of a cached computation. Compute errors are shared between every caller
/// that joined the same in-flight request.
#[derive(Debug)]
pub enum CacheError<E> {
    Timeout(Duration),
    Compute(Arc<E>),
}

impl<E> Clone for CacheError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Timeout(after) => Self::Timeout(*after),
            Self::Compute(err) => Self::Compute(Arc::clone(err)),
        }
    }
}

impl<E: fmt::Display> fmt::Display for CacheError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "computation timed out after {after:?}"),
            Self::Compute(err) => err.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CacheError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Timeout(_) => None,
            Self::Compute(err) => err.source(),
        }
    }
}

type PendingResult<V, E> = Result<V, CacheError<E>>;
type Pending<V, E> = Shared<BoxFuture<'static, PendingResult<V, E>>>;

struct Entry<V> {
    value: V,
    weight: usize,
    expires_at: Instant,
    tick: u64,
}

struct State<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    recency: BTreeMap<u64, CacheKey>,
    next_tick: u64,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    epoch: u64,
    generations: HashMap<ScopeId, u64>,
}

/// Cache contents a computation was started against: the clear epoch and the
/// invalidation generation of its scope.
type Stamp = (u64, u64);

impl<V> Default for State<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            epoch: 0,
            generations: HashMap::new(),
        }
    }
}

impl<V> State<V> {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn stamp(&self, scope: ScopeId) -> Stamp {
        (
            self.epoch,
            self.generations.get(&scope).copied().unwrap_or_default(),
        )
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.bytes = self.bytes.saturating_sub(entry.weight);
        Some(entry)
    }

    fn evict_over(&mut self, limits: &CacheLimits) {
        while self.entries.len() > limits.max_entries || self.bytes > limits.max_bytes {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                self.bytes = self.bytes.saturating_sub(entry.weight);
                self.evictions += 1;
                tracing::debug!(key = %oldest, "evicted least recently used cache entry");
            }
        }
    }
}

/// Size- and count-bounded LRU with absolute TTLs and in-flight de-duplication.
///
/// Values are weighed by their serialized JSON length. Concurrent misses on one key
/// share a single computation; its pending slot is cleared whether it succeeds, fails,
/// times out or the leading caller goes away. A result is only stored if its scope was
/// not invalidated while it was being computed.
pub struct QueryCache<V, E> {
    limits: CacheLimits,
    state: Mutex<State<V>>,
    pending: Mutex<HashMap<CacheKey, Pending<V, E>>>,
}

impl<V, E> QueryCache<V, E>
where
    V: Clone + Serialize + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(State::default()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &CacheLimits {
        &self.limits
    }

    /// Returns the cached value for `key`, or runs `compute` once for every concurrent
    /// caller asking for the same key and caches a successful result for `ttl`
    /// (the configured TTL when `None`).
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: CacheKey,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(value) = self.get(&key) {
            tracing::debug!(key = %key, "cache hit");
            return Ok(value);
        }

        let lookup = {
            let mut pending = lock(&self.pending);
            if let Some(in_flight) = pending.get(&key) {
                Lookup::Join(in_flight.clone())
            } else if let Some(value) = self.peek(&key) {
                Lookup::Cached(value)
            } else {
                let stamp = lock(&self.state).stamp(key.scope());
                let timeout = self.limits.compute_timeout;
                let work = compute();
                let shared: Pending<V, E> = async move {
                    match tokio::time::timeout(timeout, work).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(err)) => Err(CacheError::Compute(Arc::new(err))),
                        Err(_) => Err(CacheError::Timeout(timeout)),
                    }
                }
                .boxed()
                .shared();
                pending.insert(key.clone(), shared.clone());
                Lookup::Lead(shared, stamp)
            }
        };

        let (shared, stamp) = match lookup {
            Lookup::Cached(value) => return Ok(value),
            Lookup::Join(in_flight) => {
                tracing::debug!(key = %key, "joining in-flight computation");
                return in_flight.await;
            }
            Lookup::Lead(shared, stamp) => (shared, stamp),
        };
        tracing::debug!(key = %key, "cache miss, computing");

        let guard = PendingGuard {
            pending: &self.pending,
            key: &key,
            shared: &shared,
        };
        let result = shared.clone().await;
        if let Ok(value) = &result {
            self.store(
                key.clone(),
                value.clone(),
                ttl.unwrap_or(self.limits.ttl),
                Some(stamp),
            );
        } else {
            tracing::debug!(key = %key, "computation failed, nothing cached");
        }
        drop(guard);

        result
    }

    /// Cached value, refreshing its recency. Expired entries are dropped.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut state = lock(&self.state);
        let now = Instant::now();
        let expired = match state.entries.get(key) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(entry) => entry.expires_at <= now,
        };
        if expired {
            state.remove(key);
            state.misses += 1;
            return None;
        }

        let tick = state.bump();
        let State {
            entries, recency, ..
        } = &mut *state;
        let entry = entries.get_mut(key)?;
        recency.remove(&entry.tick);
        recency.insert(tick, key.clone());
        entry.tick = tick;
        let value = entry.value.clone();
        state.hits += 1;
        Some(value)
    }

    /// Cached value without touching recency or statistics.
    fn peek(&self, key: &CacheKey) -> Option<V> {
        let state = lock(&self.state);
        state
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: CacheKey, value: V, ttl: Duration) -> bool {
        self.store(key, value, ttl, None)
    }

    fn store(&self, key: CacheKey, value: V, ttl: Duration, started: Option<Stamp>) -> bool {
        if self.limits.max_entries == 0 {
            return false;
        }
        let weight = match serde_json::to_vec(&value) {
            Ok(encoded) => encoded.len(),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "cache value is not serializable, skipping");
                return false;
            }
        };
        if weight > self.limits.max_bytes {
            tracing::debug!(key = %key, weight, "cache value exceeds byte budget, not stored");
            return false;
        }

        let mut state = lock(&self.state);
        if started.is_some_and(|stamp| stamp != state.stamp(key.scope())) {
            tracing::debug!(key = %key, "scope invalidated during computation, result not stored");
            return false;
        }
        state.remove(&key);
        let tick = state.bump();
        state.recency.insert(tick, key.clone());
        state.bytes += weight;
        state.entries.insert(
            key.clone(),
            Entry {
                value,
                weight,
                expires_at: Instant::now() + ttl,
                tick,
            },
        );
        state.evict_over(&self.limits);
        tracing::debug!(key = %key, weight, "cached computation result");
        true
    }

    /// Restarts the TTL of an entry.
    pub fn refresh(&self, key: &CacheKey, ttl: Option<Duration>) -> bool {
        let mut state = lock(&self.state);
        let now = Instant::now();
        match state.entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.expires_at = now + ttl.unwrap_or(self.limits.ttl);
                true
            }
            _ => false,
        }
    }

    /// Drops every entry whose key belongs to `scope`. Computations already running for
    /// the scope finish for the callers waiting on them but are neither joined by new
    /// callers nor stored.
    pub fn invalidate_scope(&self, scope: ScopeId) -> usize {
        let mut pending = lock(&self.pending);
        let in_flight = pending.len();
        pending.retain(|key, _| key.scope() != scope);
        let detached = in_flight - pending.len();

        let mut state = lock(&self.state);
        *state.generations.entry(scope).or_default() += 1;
        let doomed: Vec<CacheKey> = state
            .entries
            .keys()
            .filter(|key| key.scope() == scope)
            .cloned()
            .collect();
        for key in &doomed {
            state.remove(key);
        }
        tracing::info!(
            scope,
            removed = doomed.len(),
            detached,
            "invalidated cached results for scope"
        );
        doomed.len()
    }

    pub fn clear(&self) -> usize {
        let mut pending = lock(&self.pending);
        pending.clear();
        let mut state = lock(&self.state);
        state.epoch += 1;
        let removed = state.entries.len();
        state.entries.clear();
        state.recency.clear();
        state.bytes = 0;
        tracing::info!(removed, "cleared query cache");
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let in_flight = lock(&self.pending).len();
        let state = lock(&self.state);
        CacheStats {
            entries: state.entries.len(),
            bytes: state.bytes,
            in_flight,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

enum Lookup<V, E> {
    Cached(V),
    Join(Pending<V, E>),
    Lead(Pending<V, E>, Stamp),
}

/// Clears a pending slot when its leading caller finishes or is dropped mid-flight.
struct PendingGuard<'a, V, E> {
    pending: &'a Mutex<HashMap<CacheKey, Pending<V, E>>>,
    key: &'a CacheKey,
    shared: &'a Pending<V, E>,
}

impl<V, E> Drop for PendingGuard<'_, V, E> {
    fn drop(&mut self) {
        let mut pending = lock(self.pending);
        let ours = pending
            .get(self.key)
            .is_some_and(|current| current.ptr_eq(self.shared));
        if ours {
            pending.remove(self.key);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
