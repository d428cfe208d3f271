//! Worker-backed provider with an exact-range cache.
//!
//! Ranges are cached under the exact clamped `(start, end)` that was asked
//! for, independently of the worker's window alignment. All entries share one
//! byte budget; inserting evicts the least recently accessed entries until the
//! new one fits. Identical requests issued while one is in flight join it
//! instead of posting another `READ_BYTE_RANGE`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use super::{ProviderConfig, VirtualDataProvider};
use crate::client::WorkerClient;
use crate::error::{ErrorKind, ProviderError, Result};
use crate::protocol::FileId;
use crate::range;
use crate::resource::FileResource;

type RangeKey = (u64, u64);

/// In-flight requests are keyed by cache generation as well, so a request
/// issued after `close` never joins one started before it.
type PendingKey = (u64, u64, u64);

struct RangeCacheEntry {
    start: u64,
    end: u64,
    data: Bytes,
    last_accessed: u64,
}

struct RangeCache {
    entries: HashMap<RangeKey, RangeCacheEntry>,
    total_bytes: u64,
    budget: u64,
    clock: u64,
}

impl RangeCache {
    fn new(budget: u64) -> Self {
        Self {
            entries: HashMap::new(),
            total_bytes: 0,
            budget,
            clock: 0,
        }
    }

    fn get(
        &mut self,
        key: RangeKey,
    ) -> Option<Bytes> {
        self.clock += 1;
        let entry = self.entries.get_mut(&key)?;
        entry.last_accessed = self.clock;
        Some(entry.data.clone())
    }

    /// Returns false when `data` alone exceeds the budget and was not cached.
    fn insert(
        &mut self,
        key: RangeKey,
        data: Bytes,
    ) -> bool {
        let incoming = data.len() as u64;
        if incoming > self.budget {
            debug!(
                "range {}-{} ({} bytes) exceeds the cache budget, not cached",
                key.0, key.1, incoming
            );
            return false;
        }
        if let Some(old) = self.entries.remove(&key) {
            self.total_bytes -= old.data.len() as u64;
        }
        while self.total_bytes + incoming > self.budget && self.evict_oldest() {}

        self.clock += 1;
        self.entries.insert(
            key,
            RangeCacheEntry {
                start: key.0,
                end: key.1,
                data,
                last_accessed: self.clock,
            },
        );
        self.total_bytes += incoming;
        true
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| *key);
        let Some(entry) = oldest.and_then(|key| self.entries.remove(&key)) else {
            return false;
        };
        self.total_bytes -= entry.data.len() as u64;
        debug!(
            "evicted range {}-{} ({} bytes)",
            entry.start,
            entry.end,
            entry.data.len()
        );
        true
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }
}

struct State {
    cache: RangeCache,
    pending: HashMap<PendingKey, Vec<oneshot::Sender<Result<Bytes>>>>,
    /// Callers waiting on a `GET_FILE_SIZE`, by generation.
    size_waiters: HashMap<u64, Vec<oneshot::Sender<Result<u64>>>>,
    size: Option<u64>,
    generation: u64,
}

struct Inner {
    client: WorkerClient,
    file_id: FileId,
    state: Mutex<State>,
}

/// A [`VirtualDataProvider`] backed by a worker channel.
#[derive(Clone)]
pub struct RangeCachingProvider {
    inner: Arc<Inner>,
}

impl RangeCachingProvider {
    /// Opens `handle` on the worker under `file_id` and applies `config`.
    pub async fn open(
        client: WorkerClient,
        file_id: FileId,
        handle: Arc<dyn FileResource>,
        config: &ProviderConfig,
    ) -> Result<Self> {
        client.open_file(&file_id, handle).await?;
        if let Some(window_size) = config.window_size {
            client.set_window_size(&file_id, window_size).await?;
        }
        Ok(Self::attach(client, file_id, config.cache_budget))
    }

    /// Wraps a file that is already open on the worker.
    pub fn attach(
        client: WorkerClient,
        file_id: FileId,
        cache_budget: u64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                file_id,
                state: Mutex::new(State {
                    cache: RangeCache::new(cache_budget),
                    pending: HashMap::new(),
                    size_waiters: HashMap::new(),
                    size: None,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn file_id(&self) -> &FileId {
        &self.inner.file_id
    }

    pub fn client(&self) -> &WorkerClient {
        &self.inner.client
    }

    pub async fn set_window_size(
        &self,
        window_size: u64,
    ) -> Result<()> {
        self.inner
            .client
            .set_window_size(&self.inner.file_id, window_size)
            .await
    }

    /// Drops every cached range and closes the file on the worker. Later
    /// reads go to the worker and fail with `NotOpen`.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            state.cache.clear();
            state.size = None;
            state.generation += 1;
        }
        self.inner.client.close_file(&self.inner.file_id).await
    }

    pub fn cached_bytes(&self) -> u64 {
        self.lock_state().cache.total_bytes
    }

    pub fn cached_ranges(&self) -> usize {
        self.lock_state().cache.entries.len()
    }

    /// In-flight range reads plus an in-flight size query, if any.
    pub fn pending_requests(&self) -> usize {
        let state = self.lock_state();
        state.pending.len() + state.size_waiters.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        lock(&self.inner.state)
    }

    /// Issues the wire request for `key` on its own task, so coalesced
    /// callers are answered even if the first caller stops waiting.
    fn spawn_fetch(
        &self,
        key: RangeKey,
        generation: u64,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let (start, end) = key;
            let result = inner
                .client
                .read_byte_range(&inner.file_id, start, end)
                .await
                .and_then(|data| check_len(&inner.file_id, key, data));

            let waiters = {
                let mut state = lock(&inner.state);
                match &result {
                    Ok(data) if state.generation == generation => {
                        state.cache.insert(key, data.clone());
                    }
                    Err(e) if e.kind() == ErrorKind::UpstreamRead => {
                        // the file may have changed size under us
                        state.size = None;
                    }
                    _ => {}
                }
                state
                    .pending
                    .remove(&(generation, start, end))
                    .unwrap_or_default()
            };
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        });
    }

    /// Like `spawn_fetch`, for the file size.
    fn spawn_size_fetch(
        &self,
        generation: u64,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner.client.file_size(&inner.file_id).await;
            let waiters = {
                let mut state = lock(&inner.state);
                if let Ok(size) = &result {
                    if state.generation == generation {
                        state.size = Some(*size);
                    }
                }
                state.size_waiters.remove(&generation).unwrap_or_default()
            };
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        });
    }
}

#[async_trait]
impl VirtualDataProvider for RangeCachingProvider {
    async fn byte_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Bytes> {
        let size = self.file_size().await?;
        let range = range::clamp(start, end, size);
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let key = (range.start, range.end);

        let rx = {
            let mut state = self.lock_state();
            if let Some(data) = state.cache.get(key) {
                debug!("range hit {}-{} for {}", key.0, key.1, self.inner.file_id);
                return Ok(data);
            }
            let generation = state.generation;
            let (tx, rx) = oneshot::channel();
            match state.pending.entry((generation, key.0, key.1)) {
                Entry::Occupied(mut waiting) => {
                    debug!("joining in-flight read {}-{}", key.0, key.1);
                    waiting.get_mut().push(tx);
                }
                Entry::Vacant(slot) => {
                    slot.insert(vec![tx]);
                    self.spawn_fetch(key, generation);
                }
            }
            rx
        };
        rx.await
            .map_err(|_| ProviderError::Transport("range fetch was abandoned".to_string()))?
    }

    async fn file_size(&self) -> Result<u64> {
        let rx = {
            let mut state = self.lock_state();
            if let Some(size) = state.size {
                return Ok(size);
            }
            let generation = state.generation;
            let (tx, rx) = oneshot::channel();
            match state.size_waiters.entry(generation) {
                Entry::Occupied(mut waiting) => waiting.get_mut().push(tx),
                Entry::Vacant(slot) => {
                    slot.insert(vec![tx]);
                    self.spawn_size_fetch(generation);
                }
            }
            rx
        };
        rx.await
            .map_err(|_| ProviderError::Transport("size query was abandoned".to_string()))?
    }

    fn is_virtual(&self) -> bool {
        true
    }
}

fn check_len(
    file_id: &FileId,
    key: RangeKey,
    data: Bytes,
) -> Result<Bytes> {
    let expected = key.1 - key.0;
    if data.len() as u64 == expected {
        return Ok(data);
    }
    Err(ProviderError::upstream(
        file_id,
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "worker returned {} bytes for {}-{}, file may have shrunk",
                data.len(),
                key.0,
                key.1
            ),
        ),
    ))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(n: usize) -> Bytes {
        Bytes::from(vec![0xAB; n])
    }

    #[test]
    fn stays_within_budget_evicting_oldest_first() {
        let mut cache = RangeCache::new(100);
        assert!(cache.insert((0, 40), bytes(40)));
        assert!(cache.insert((40, 80), bytes(40)));
        // touch the first entry so (40, 80) is the oldest
        assert!(cache.get((0, 40)).is_some());

        assert!(cache.insert((80, 120), bytes(40)));
        assert!(cache.total_bytes <= 100);
        assert!(cache.entries.contains_key(&(0, 40)));
        assert!(!cache.entries.contains_key(&(40, 80)));
        assert!(cache.entries.contains_key(&(80, 120)));
    }

    #[test]
    fn large_insert_evicts_several_entries() {
        let mut cache = RangeCache::new(100);
        for i in 0..10u64 {
            cache.insert((i * 10, i * 10 + 10), bytes(10));
        }
        assert_eq!(cache.total_bytes, 100);

        cache.insert((500, 535), bytes(35));
        assert_eq!(cache.total_bytes, 95);
        for i in 0..4u64 {
            assert!(!cache.entries.contains_key(&(i * 10, i * 10 + 10)));
        }
        assert!(cache.entries.contains_key(&(40, 50)));
    }

    #[test]
    fn entry_larger_than_budget_is_not_cached() {
        let mut cache = RangeCache::new(10);
        cache.insert((0, 5), bytes(5));
        assert!(!cache.insert((0, 11), bytes(11)));
        assert_eq!(cache.total_bytes, 5);
        assert_eq!(cache.entries.len(), 1);
    }

    #[test]
    fn reinserting_a_key_does_not_double_count() {
        let mut cache = RangeCache::new(100);
        cache.insert((0, 30), bytes(30));
        cache.insert((0, 30), bytes(30));
        assert_eq!(cache.total_bytes, 30);
        cache.clear();
        assert_eq!(cache.total_bytes, 0);
        assert!(cache.get((0, 30)).is_none());
    }

    #[test]
    fn length_mismatch_is_upstream_error() {
        let err = check_len(&FileId::from("f"), (0, 10), bytes(4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamRead);
        assert!(check_len(&FileId::from("f"), (0, 4), bytes(4)).is_ok());
    }
}
