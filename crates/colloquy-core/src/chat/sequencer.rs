//! Per-conversation execution slots.
//!
//! Every conversation key owns one exclusive slot. Work that mutates a
//! conversation runs inside its slot, so concurrent messages to the same
//! conversation execute strictly one at a time in arrival order, while
//! different conversations proceed in parallel. The tokio mutex backing a
//! slot is FIFO-fair, which is what gives arrival-order dispatch.
//!
//! Slots are process-local. Running more than one gateway process against
//! the same store voids the sequencing guarantee.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use colloquy_types::conversation::ConversationKey;
use colloquy_types::error::ChatError;

struct Slot {
    lock: Arc<Mutex<()>>,
    last_used: Instant,
}

/// Hands out exclusive, FIFO-fair slots keyed by conversation.
pub struct ChatSequencer {
    slots: DashMap<ConversationKey, Slot>,
}

impl ChatSequencer {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    fn slot(&self, key: ConversationKey) -> Arc<Mutex<()>> {
        let mut entry = self.slots.entry(key).or_insert_with(|| Slot {
            lock: Arc::new(Mutex::new(())),
            last_used: Instant::now(),
        });
        entry.last_used = Instant::now();
        entry.lock.clone()
    }

    /// Run `task` inside the conversation's slot, waiting at most `wait`
    /// for acquisition.
    ///
    /// On timeout the queued acquisition is abandoned and `LockTimeout` is
    /// returned; `task` never starts, so no state has been touched.
    pub async fn run<F, T>(
        &self,
        key: ConversationKey,
        wait: Duration,
        task: F,
    ) -> Result<T, ChatError>
    where
        F: Future<Output = T>,
    {
        let slot = self.slot(key);
        let _guard = tokio::time::timeout(wait, slot.lock_owned())
            .await
            .map_err(|_| ChatError::LockTimeout)?;
        Ok(task.await)
    }

    /// Run `task` inside the conversation's slot with no acquisition bound.
    ///
    /// Used by background work (summary commits, clears driven by
    /// maintenance) that must not be dropped just because the slot is busy.
    pub async fn run_unbounded<F, T>(&self, key: ConversationKey, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let slot = self.slot(key);
        let _guard = slot.lock_owned().await;
        task.await
    }

    /// Drop slots idle for longer than `ttl`.
    ///
    /// A slot is only removed when nothing holds or waits on it; a slot
    /// with waiters keeps its queue intact.
    pub fn prune_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            now.duration_since(slot.last_used) <= ttl
                || Arc::strong_count(&slot.lock) > 1
                || slot.lock.try_lock().is_err()
        });
        let removed = before - self.slots.len();
        if removed > 0 {
            debug!(removed, "pruned idle conversation slots");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for ChatSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::conversation::UserId;
    use std::sync::Mutex as StdMutex;

    fn key(id: i64) -> ConversationKey {
        ConversationKey::private(UserId(id))
    }

    #[tokio::test]
    async fn test_same_key_runs_serially_in_order() {
        let sequencer = Arc::new(ChatSequencer::new());
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let sequencer = sequencer.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                sequencer
                    .run_unbounded(key(1), async {
                        // Yield inside the slot so interleaving would show
                        // up if exclusion were broken.
                        tokio::task::yield_now().await;
                        order.lock().unwrap().push(i);
                    })
                    .await;
            }));
            // Give each spawned task a chance to queue before the next.
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let order = order.lock().unwrap();
        assert_eq!(*order, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_concurrently() {
        let sequencer = Arc::new(ChatSequencer::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let seq = sequencer.clone();
        let blocker = tokio::spawn(async move {
            seq.run_unbounded(key(1), async {
                let _ = rx.await;
            })
            .await;
        });
        tokio::task::yield_now().await;

        // A different key must not be blocked by key 1's held slot.
        let result = sequencer
            .run(key(2), Duration::from_millis(50), async { 42 })
            .await;
        assert_eq!(result.unwrap(), 42);

        tx.send(()).unwrap();
        blocker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_wait_times_out() {
        let sequencer = Arc::new(ChatSequencer::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let seq = sequencer.clone();
        let holder = tokio::spawn(async move {
            seq.run_unbounded(key(1), async {
                let _ = rx.await;
            })
            .await;
        });
        tokio::task::yield_now().await;

        let result = sequencer
            .run(key(1), Duration::from_secs(1), async { () })
            .await;
        assert!(matches!(result, Err(ChatError::LockTimeout)));

        // The holder is unaffected by the abandoned waiter.
        tx.send(()).unwrap();
        holder.await.unwrap();
    }

    #[tokio::test]
    async fn test_prune_removes_only_idle_uncontended_slots() {
        let sequencer = Arc::new(ChatSequencer::new());
        sequencer.run_unbounded(key(1), async {}).await;
        assert_eq!(sequencer.len(), 1);

        // Zero TTL treats everything as idle.
        assert_eq!(sequencer.prune_idle(Duration::ZERO), 1);
        assert!(sequencer.is_empty());

        // A held slot survives pruning.
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let seq = sequencer.clone();
        let holder = tokio::spawn(async move {
            seq.run_unbounded(key(2), async {
                let _ = rx.await;
            })
            .await;
        });
        tokio::task::yield_now().await;
        assert_eq!(sequencer.prune_idle(Duration::ZERO), 0);
        assert_eq!(sequencer.len(), 1);

        tx.send(()).unwrap();
        holder.await.unwrap();
    }
}
