//! Memory-bounded, single-flight cache of decoded chunks.

use std::future::Future;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::buffer::DecodedChunk;
use crate::error::{Result, VolumeError};
use crate::types::{CacheStats, ChunkKey};

/// Published result of an in-flight fetch. `None` until it resolves.
type Outcome = Option<Result<Arc<DecodedChunk>>>;

enum EntryState {
    /// One spawned task owns the fetch; waiters watch the channel.
    Pending(watch::Receiver<Outcome>),
    Ready(Arc<DecodedChunk>),
}

struct CacheEntry {
    state: EntryState,
    /// Active consumers: waiters on a pending fetch plus live `ChunkRef`s.
    pins: Arc<AtomicUsize>,
    /// Resident size; zero while pending.
    bytes: usize,
}

impl CacheEntry {
    fn is_evictable(&self) -> bool {
        matches!(self.state, EntryState::Ready(_)) && self.pins.load(Ordering::Acquire) == 0
    }
}

struct CacheInner {
    /// Recency order over every entry, pending ones included.
    entries: LruCache<ChunkKey, CacheEntry>,
    resident_bytes: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    failures: AtomicU64,
}

struct Shared {
    inner: Mutex<CacheInner>,
    budget: usize,
    counters: Counters,
}

/// Cache of decoded chunks shared by every view of a dataset session.
///
/// - A `Ready` entry is served without I/O.
/// - Concurrent requests for a missing key collapse into one fetch
///   (single-flight); the fetch runs as a spawned task so that it completes
///   even if every requester goes away.
/// - Failed fetches are published to all waiters and never retained.
/// - When resident bytes exceed the budget, unpinned `Ready` entries are
///   evicted least-recently-used first. Pending and pinned entries stay, so
///   the budget can be exceeded while consumers hold chunks.
///
/// The internal lock is held only for single lookups and state transitions,
/// never across a fetch.
#[derive(Clone)]
pub struct ChunkCache {
    shared: Arc<Shared>,
}

/// Pinned, read-only handle to a cached chunk.
///
/// While any `ChunkRef` for a key is alive the entry is not evicted.
pub struct ChunkRef {
    chunk: Arc<DecodedChunk>,
    _pin: ConsumerPin,
}

impl ChunkRef {
    /// Shared handle to the chunk, detached from the pin.
    pub fn chunk(&self) -> &Arc<DecodedChunk> {
        &self.chunk
    }
}

impl Deref for ChunkRef {
    type Target = DecodedChunk;

    fn deref(&self) -> &DecodedChunk {
        &self.chunk
    }
}

impl std::fmt::Debug for ChunkRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkRef")
            .field("shape", &self.chunk.shape())
            .field("data_type", &self.chunk.data_type())
            .finish()
    }
}

/// One unit of an entry's consumer count, released on drop.
struct ConsumerPin(Arc<AtomicUsize>);

impl ConsumerPin {
    fn acquire(pins: &Arc<AtomicUsize>) -> Self {
        pins.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(pins))
    }
}

impl Drop for ConsumerPin {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

enum Lookup {
    Hit(ChunkRef),
    Wait(ConsumerPin, watch::Receiver<Outcome>),
    Fetch(ConsumerPin, watch::Receiver<Outcome>, watch::Sender<Outcome>),
}

impl ChunkCache {
    /// Create a new chunk cache with the given memory budget in bytes.
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(CacheInner {
                    entries: LruCache::unbounded(),
                    resident_bytes: 0,
                }),
                budget: budget_bytes,
                counters: Counters::default(),
            }),
        }
    }

    /// Return the chunk for `key`, fetching it with `fetch` on a miss.
    ///
    /// `fetch` is only invoked when no entry exists for `key`. The resulting
    /// future is spawned on the current Tokio runtime.
    pub async fn get_or_fetch<F, Fut>(&self, key: ChunkKey, fetch: F) -> Result<ChunkRef>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DecodedChunk>> + Send + 'static,
    {
        let (pin, mut rx) = match self.lookup(&key) {
            Lookup::Hit(chunk) => return Ok(chunk),
            Lookup::Wait(pin, rx) => {
                trace!(key = %key, "Joining in-flight chunk fetch");
                (pin, rx)
            }
            Lookup::Fetch(pin, rx, tx) => {
                let fut = fetch();
                tokio::spawn(self.clone().complete(key.clone(), fut, tx));
                (pin, rx)
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(published) => published
                .clone()
                .unwrap_or_else(|| Err(VolumeError::transient("chunk fetch published no result"))),
            Err(_) => Err(VolumeError::transient(format!(
                "chunk fetch for {} ended without a result",
                key
            ))),
        };

        outcome.map(|chunk| ChunkRef { chunk, _pin: pin })
    }

    /// Return the chunk for `key` if it is resident, without fetching.
    pub fn get(&self, key: &ChunkKey) -> Option<ChunkRef> {
        let mut inner = self.shared.inner.lock();
        let entry = inner.entries.get(key)?;
        match &entry.state {
            EntryState::Ready(chunk) => {
                self.shared.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(ChunkRef {
                    chunk: Arc::clone(chunk),
                    _pin: ConsumerPin::acquire(&entry.pins),
                })
            }
            EntryState::Pending(_) => None,
        }
    }

    fn lookup(&self, key: &ChunkKey) -> Lookup {
        let mut inner = self.shared.inner.lock();
        let counters = &self.shared.counters;

        if let Some(entry) = inner.entries.get(key) {
            let pin = ConsumerPin::acquire(&entry.pins);
            return match &entry.state {
                EntryState::Ready(chunk) => {
                    counters.hits.fetch_add(1, Ordering::Relaxed);
                    Lookup::Hit(ChunkRef {
                        chunk: Arc::clone(chunk),
                        _pin: pin,
                    })
                }
                EntryState::Pending(rx) => {
                    counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    Lookup::Wait(pin, rx.clone())
                }
            };
        }

        counters.misses.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        let pins = Arc::new(AtomicUsize::new(0));
        let pin = ConsumerPin::acquire(&pins);
        inner.entries.put(
            key.clone(),
            CacheEntry {
                state: EntryState::Pending(rx.clone()),
                pins,
                bytes: 0,
            },
        );
        Lookup::Fetch(pin, rx, tx)
    }

    /// Drive one fetch to completion and publish its result.
    async fn complete<Fut>(self, key: ChunkKey, fetch: Fut, tx: watch::Sender<Outcome>)
    where
        Fut: Future<Output = Result<DecodedChunk>> + Send + 'static,
    {
        let result = AssertUnwindSafe(fetch)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(VolumeError::fatal(format!("chunk fetch for {} panicked", key))))
            .map(Arc::new);

        {
            let mut guard = self.shared.inner.lock();
            let inner = &mut *guard;
            match &result {
                Ok(chunk) => {
                    let bytes = chunk.size_bytes();
                    if let Some(entry) = inner.entries.get_mut(&key) {
                        entry.state = EntryState::Ready(Arc::clone(chunk));
                        entry.bytes = bytes;
                        inner.resident_bytes += bytes;
                    }
                    self.evict_locked(inner);
                }
                Err(e) => {
                    inner.entries.pop(&key);
                    self.shared.counters.failures.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, error = %e, "Chunk fetch failed, entry dropped");
                }
            }
        }

        tx.send_replace(Some(result));
    }

    /// Evict unpinned ready entries, oldest first, until within budget.
    ///
    /// Returns the number of entries evicted.
    fn evict_locked(&self, inner: &mut CacheInner) -> usize {
        if inner.resident_bytes <= self.shared.budget {
            return 0;
        }

        let mut excess = inner.resident_bytes - self.shared.budget;
        let mut victims = Vec::new();
        for (key, entry) in inner.entries.iter().rev() {
            if excess == 0 {
                break;
            }
            if entry.is_evictable() {
                excess = excess.saturating_sub(entry.bytes);
                victims.push(key.clone());
            }
        }

        let evicted = victims.len();
        for key in victims {
            if let Some(entry) = inner.entries.pop(&key) {
                inner.resident_bytes -= entry.bytes;
            }
        }

        if evicted > 0 {
            self.shared
                .counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
            trace!(
                evicted,
                resident_bytes = inner.resident_bytes,
                budget = self.shared.budget,
                "Evicted chunks"
            );
        }
        evicted
    }

    /// Evict down to the budget now, e.g. after consumers released chunks.
    pub fn trim(&self) -> usize {
        let mut inner = self.shared.inner.lock();
        self.evict_locked(&mut inner)
    }

    /// Drop every unpinned ready entry.
    ///
    /// Returns (entries removed, bytes freed). Pending fetches are untouched.
    pub fn clear(&self) -> (usize, u64) {
        let mut inner = self.shared.inner.lock();
        let victims: Vec<ChunkKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_evictable())
            .map(|(key, _)| key.clone())
            .collect();

        let mut freed = 0u64;
        for key in &victims {
            if let Some(entry) = inner.entries.pop(key) {
                inner.resident_bytes -= entry.bytes;
                freed += entry.bytes as u64;
            }
        }
        (victims.len(), freed)
    }

    /// Whether `key` has a ready entry, without updating recency.
    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.shared
            .inner
            .lock()
            .entries
            .peek(key)
            .is_some_and(|entry| matches!(entry.state, EntryState::Ready(_)))
    }

    /// Whether a fetch for `key` is in flight.
    pub fn is_pending(&self, key: &ChunkKey) -> bool {
        self.shared
            .inner
            .lock()
            .entries
            .peek(key)
            .is_some_and(|entry| matches!(entry.state, EntryState::Pending(_)))
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.shared.inner.lock();
        let pending = inner
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry.state, EntryState::Pending(_)))
            .count();
        let counters = &self.shared.counters;

        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            entries: inner.entries.len() - pending,
            pending,
            memory_bytes: inner.resident_bytes as u64,
            budget_bytes: self.shared.budget as u64,
        }
    }

    /// Get the current memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.shared.inner.lock().resident_bytes
    }

    /// Get the memory budget in bytes.
    pub fn memory_limit(&self) -> usize {
        self.shared.budget
    }

    /// Number of entries, pending ones included.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
