//! Write-back cache of hot conversation state.
//!
//! All mutation happens on cached copies; persistence is deferred until a
//! dirty-update threshold, an explicit flush, eviction, or shutdown. The
//! cache is the single authority for dirtiness: an entry's dirty counter
//! only resets once its snapshot is durably saved.
//!
//! Callers snapshot a conversation out, mutate it, and hand it back via
//! [`ContextCache::update`]. Per-key mutation is serialized by the
//! sequencer above this layer, so the cache itself only guards its map.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use colloquy_types::config::CacheConfig;
use colloquy_types::conversation::{Conversation, ConversationKey};
use colloquy_types::error::RepositoryError;

use crate::chat::repository::ConversationRepository;

/// Occupancy is pushed down to this fraction of `max_entries` on overflow.
const EVICTION_WATERMARK: f64 = 0.8;

/// Cap on the exponential flush backoff (2^6 = 64 seconds).
const MAX_FLUSH_BACKOFF_EXP: u32 = 6;

struct CacheEntry {
    conversation: Conversation,
    /// Updates applied since the last successful save.
    dirty: u32,
    /// Messages to skip before summarization may be retried.
    summary_cooldown: u32,
    /// A summarization task for this conversation is outstanding.
    summary_in_flight: bool,
    /// An eviction flush is outstanding. The entry stays resident and
    /// keeps serving hits until that save lands; only then is it removed.
    evicting: bool,
    last_access: Instant,
    /// Monotonic insertion counter; breaks last-access ties during eviction.
    arrival: u64,
    flush_failures: u32,
    /// No flush is attempted before this instant after a failure.
    retry_after: Option<Instant>,
}

impl CacheEntry {
    fn fresh(conversation: Conversation, arrival: u64) -> Self {
        Self {
            conversation,
            dirty: 0,
            summary_cooldown: 0,
            summary_in_flight: false,
            evicting: false,
            last_access: Instant::now(),
            arrival,
            flush_failures: 0,
            retry_after: None,
        }
    }
}

struct CacheInner {
    entries: HashMap<ConversationKey, CacheEntry>,
    next_arrival: u64,
    last_flush_all: Instant,
}

/// Bounded write-back cache in front of a [`ConversationRepository`].
pub struct ContextCache<R> {
    repo: R,
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl<R: ConversationRepository> ContextCache<R> {
    pub fn new(repo: R, config: CacheConfig) -> Self {
        Self {
            repo,
            config,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                next_arrival: 0,
                last_flush_all: Instant::now(),
            }),
        }
    }

    /// Return a snapshot of the conversation, loading it from persistence
    /// (or creating it empty) on a miss.
    ///
    /// A cached entry whose state does not belong to the requested key is
    /// treated as corrupt: it is discarded and the key reloaded from
    /// persistence rather than served.
    pub async fn get_or_create(
        &self,
        key: ConversationKey,
    ) -> Result<Conversation, RepositoryError> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(entry) = inner.entries.get_mut(&key) {
                if entry.conversation.key == key {
                    entry.last_access = Instant::now();
                    return Ok(entry.conversation.clone());
                }
                warn!(
                    %key,
                    stored = %entry.conversation.key,
                    "cached conversation fails key invariant, discarding entry"
                );
                inner.entries.remove(&key);
            }
        }

        let loaded = match self.repo.load(key).await? {
            Some(conversation) => conversation,
            None => Conversation::new(key),
        };

        let (snapshot, evicted) = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let snapshot = if let Some(entry) = inner.entries.get_mut(&key) {
                entry.last_access = Instant::now();
                entry.conversation.clone()
            } else {
                let arrival = inner.next_arrival;
                inner.next_arrival += 1;
                inner
                    .entries
                    .insert(key, CacheEntry::fresh(loaded.clone(), arrival));
                loaded
            };
            (snapshot, Self::collect_lru_evictions(inner, &self.config))
        };
        self.flush_then_evict(evicted).await;
        Ok(snapshot)
    }

    /// Replace the cached state for a key with an updated snapshot.
    ///
    /// Bumps the dirty counter; a save is issued when `force` is set or the
    /// counter reaches the configured threshold (unless a flush backoff is
    /// in effect). The returned error is the save's; the cached state is
    /// updated either way.
    pub async fn update(
        &self,
        key: ConversationKey,
        conversation: Conversation,
        force: bool,
    ) -> Result<(), RepositoryError> {
        let now = Instant::now();
        let (should_flush, evicted) = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            match inner.entries.get_mut(&key) {
                Some(entry) => {
                    entry.conversation = conversation;
                    entry.dirty += 1;
                    entry.last_access = now;
                }
                None => {
                    let arrival = inner.next_arrival;
                    inner.next_arrival += 1;
                    let mut entry = CacheEntry::fresh(conversation, arrival);
                    entry.dirty = 1;
                    inner.entries.insert(key, entry);
                }
            }
            let should_flush = inner.entries.get(&key).is_some_and(|entry| {
                force
                    || (entry.dirty >= self.config.save_threshold
                        && entry.retry_after.is_none_or(|t| t <= now))
            });
            (should_flush, Self::collect_lru_evictions(inner, &self.config))
        };
        self.flush_then_evict(evicted).await;
        if should_flush {
            self.flush(key).await?;
        }
        Ok(())
    }

    /// Synchronously persist a key's state if it is dirty.
    ///
    /// The dirty counter only drops by the amount covered by the saved
    /// snapshot, so updates racing the save stay flagged. On failure the
    /// entry stays resident and enters exponential backoff.
    pub async fn flush(&self, key: ConversationKey) -> Result<(), RepositoryError> {
        let snapshot = {
            let inner = self.inner.lock().await;
            inner
                .entries
                .get(&key)
                .filter(|entry| entry.dirty > 0)
                .map(|entry| (entry.conversation.clone(), entry.dirty))
        };
        let Some((conversation, covered)) = snapshot else {
            return Ok(());
        };

        match self.repo.save(key, &conversation).await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                if let Some(entry) = inner.entries.get_mut(&key) {
                    entry.dirty = entry.dirty.saturating_sub(covered);
                    entry.flush_failures = 0;
                    entry.retry_after = None;
                }
                Ok(())
            }
            Err(error) => {
                let mut inner = self.inner.lock().await;
                if let Some(entry) = inner.entries.get_mut(&key) {
                    entry.flush_failures += 1;
                    let exp = entry.flush_failures.min(MAX_FLUSH_BACKOFF_EXP);
                    entry.retry_after =
                        Some(Instant::now() + Duration::from_secs(1u64 << exp));
                    warn!(
                        %key,
                        failures = entry.flush_failures,
                        %error,
                        "conversation flush failed, backing off"
                    );
                }
                Err(error)
            }
        }
    }

    /// Flush every dirty entry, returning per-key failures.
    ///
    /// Used at shutdown and by the periodic full flush; entries that fail
    /// stay resident and dirty.
    pub async fn flush_all(&self) -> Vec<(ConversationKey, RepositoryError)> {
        let dirty_keys: Vec<ConversationKey> = {
            let inner = self.inner.lock().await;
            inner
                .entries
                .iter()
                .filter(|(_, entry)| entry.dirty > 0)
                .map(|(key, _)| *key)
                .collect()
        };
        let mut failures = Vec::new();
        for key in dirty_keys {
            if let Err(error) = self.flush(key).await {
                failures.push((key, error));
            }
        }
        failures
    }

    /// One maintenance pass: periodic full flush, backoff retries, and
    /// idle-entry eviction. Driven by the maintenance supervisor.
    pub async fn maintenance(&self) {
        let now = Instant::now();
        let full_flush_due = {
            let mut inner = self.inner.lock().await;
            if now.duration_since(inner.last_flush_all) >= self.config.flush_interval() {
                inner.last_flush_all = now;
                true
            } else {
                false
            }
        };
        if full_flush_due {
            for (key, error) in self.flush_all().await {
                warn!(%key, %error, "periodic flush failed");
            }
        } else {
            let retry_keys: Vec<ConversationKey> = {
                let inner = self.inner.lock().await;
                inner
                    .entries
                    .iter()
                    .filter(|(_, entry)| {
                        entry.dirty > 0 && entry.retry_after.is_some_and(|t| t <= now)
                    })
                    .map(|(key, _)| *key)
                    .collect()
            };
            for key in retry_keys {
                if self.flush(key).await.is_ok() {
                    debug!(%key, "flush retry succeeded");
                }
            }
        }

        let idle = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let ttl = self.config.idle_ttl();
            let idle_keys: Vec<ConversationKey> = inner
                .entries
                .iter()
                .filter(|(_, entry)| {
                    !entry.summary_in_flight
                        && !entry.evicting
                        && now.duration_since(entry.last_access) > ttl
                })
                .map(|(key, _)| *key)
                .collect();
            Self::begin_evictions(inner, idle_keys)
        };
        if !idle.is_empty() {
            debug!(count = idle.len(), "flushing idle conversations for eviction");
        }
        self.flush_then_evict(idle).await;
    }

    /// Current summarization cooldown for a key (0 when uncached).
    pub async fn summary_cooldown(&self, key: ConversationKey) -> u32 {
        self.inner
            .lock()
            .await
            .entries
            .get(&key)
            .map_or(0, |entry| entry.summary_cooldown)
    }

    pub async fn set_summary_cooldown(&self, key: ConversationKey, value: u32) {
        if let Some(entry) = self.inner.lock().await.entries.get_mut(&key) {
            entry.summary_cooldown = value;
        }
    }

    /// Mark a summarization in flight. Returns false if one already is (or
    /// the key is not resident), in which case the caller must not start
    /// another.
    pub async fn try_begin_summary(&self, key: ConversationKey) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(&key) {
            Some(entry) if !entry.summary_in_flight => {
                entry.summary_in_flight = true;
                true
            }
            _ => false,
        }
    }

    pub async fn end_summary(&self, key: ConversationKey) {
        if let Some(entry) = self.inner.lock().await.entries.get_mut(&key) {
            entry.summary_in_flight = false;
        }
    }

    pub async fn contains(&self, key: ConversationKey) -> bool {
        self.inner.lock().await.entries.contains_key(&key)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Select entries past `max_entries`, oldest access first (arrival
    /// order breaks ties), down to the low watermark. Entries with a
    /// summarization or eviction flush in flight are never selected.
    fn collect_lru_evictions(
        inner: &mut CacheInner,
        config: &CacheConfig,
    ) -> Vec<(ConversationKey, Conversation, u32)> {
        if inner.entries.len() <= config.max_entries {
            return Vec::new();
        }
        let target = (config.max_entries as f64 * EVICTION_WATERMARK) as usize;
        let excess = inner.entries.len().saturating_sub(target);
        let mut candidates: Vec<(ConversationKey, Instant, u64)> = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.summary_in_flight && !entry.evicting)
            .map(|(key, entry)| (*key, entry.last_access, entry.arrival))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));
        candidates.truncate(excess);
        Self::begin_evictions(inner, candidates.into_iter().map(|(key, _, _)| key).collect())
    }

    /// Stage the selected victims. Clean entries are dropped on the spot;
    /// dirty ones are only marked and stay resident until
    /// [`Self::flush_then_evict`] persists them, so no unsaved mutation
    /// ever leaves the cache.
    fn begin_evictions(
        inner: &mut CacheInner,
        keys: Vec<ConversationKey>,
    ) -> Vec<(ConversationKey, Conversation, u32)> {
        let mut pending = Vec::new();
        for key in keys {
            let Some(entry) = inner.entries.get_mut(&key) else {
                continue;
            };
            if entry.dirty == 0 {
                inner.entries.remove(&key);
                debug!(%key, "evicted clean conversation");
            } else {
                entry.evicting = true;
                pending.push((key, entry.conversation.clone(), entry.dirty));
            }
        }
        pending
    }

    /// Persist staged evictees, then drop them. While a save is in flight
    /// the entry still serves hits, so a concurrent reader never falls
    /// through to stale persistence state. A save failure, or an update
    /// racing the save, leaves the entry resident and dirty.
    async fn flush_then_evict(&self, pending: Vec<(ConversationKey, Conversation, u32)>) {
        for (key, conversation, covered) in pending {
            match self.repo.save(key, &conversation).await {
                Ok(()) => {
                    let mut inner = self.inner.lock().await;
                    if let Some(entry) = inner.entries.get_mut(&key) {
                        entry.dirty = entry.dirty.saturating_sub(covered);
                        entry.flush_failures = 0;
                        entry.retry_after = None;
                        if entry.dirty == 0 {
                            inner.entries.remove(&key);
                            debug!(%key, "flushed and evicted conversation");
                        } else {
                            entry.evicting = false;
                            debug!(%key, "updated during eviction flush, keeping entry");
                        }
                    }
                }
                Err(error) => {
                    warn!(%key, %error, "flush on eviction failed, keeping entry resident");
                    let mut inner = self.inner.lock().await;
                    if let Some(entry) = inner.entries.get_mut(&key) {
                        entry.evicting = false;
                        entry.last_access = Instant::now();
                    }
                }
            }
        }
    }
}
