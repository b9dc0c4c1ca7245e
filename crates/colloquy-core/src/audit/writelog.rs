//! Asynchronous write-behind log for audit events.
//!
//! Producers enqueue without blocking; a single worker task drains the
//! queue to an [`EventSink`] in FIFO order. The queue is bounded: when
//! full, the oldest event is shed and counted, and the counter is reported
//! periodically rather than per drop. Persistence failures requeue the
//! unwritten tail at the front, so order is preserved across retries.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use colloquy_types::config::WriteLogConfig;
use colloquy_types::error::RepositoryError;
use colloquy_types::event::AuditEvent;

/// Events written per drain pass before the queue lock is retaken.
const DRAIN_BATCH: usize = 32;

/// Pause after a failed append before the tail is retried.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Failed appends tolerated during shutdown before remaining events are
/// abandoned (shutdown must terminate even with persistence down).
const MAX_SHUTDOWN_RETRIES: u32 = 3;

/// Destination for audit events. Implemented over SQLite in
/// colloquy-infra.
pub trait EventSink: Send + Sync {
    fn append(
        &self,
        event: &AuditEvent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

struct LogShared {
    queue: Mutex<VecDeque<AuditEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    shutting_down: AtomicBool,
}

/// Handle to the write-behind log; owns the worker task.
pub struct AsyncWriteLog {
    shared: Arc<LogShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncWriteLog {
    /// Start the worker draining into `sink`.
    pub fn spawn<E: EventSink + 'static>(sink: E, config: WriteLogConfig) -> Self {
        let shared = Arc::new(LogShared {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: config.capacity,
            dropped: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        });
        let worker = tokio::spawn(worker_loop(
            sink,
            shared.clone(),
            config.overflow_report_interval(),
        ));
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue an event. Never blocks; when the queue is full the oldest
    /// queued event is shed to make room.
    pub fn enqueue(&self, event: AuditEvent) {
        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if queue.len() >= self.shared.capacity {
            queue.pop_front();
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.shared.notify.notify_one();
    }

    /// Total events shed to overflow since startup.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Drain the remaining queue and stop the worker. Events enqueued
    /// after this returns are not persisted.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                error!(%error, "write log worker terminated abnormally");
            }
        }
    }
}

async fn worker_loop<E: EventSink>(sink: E, shared: Arc<LogShared>, report_interval: Duration) {
    let mut reported: u64 = 0;
    let mut last_report = Instant::now();
    let mut shutdown_retries: u32 = 0;

    'main: loop {
        let batch: Vec<AuditEvent> = {
            let mut queue = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let take = queue.len().min(DRAIN_BATCH);
            queue.drain(..take).collect()
        };

        if batch.is_empty() {
            if shared.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = shared.notify.notified() => {}
                _ = tokio::time::sleep(report_interval) => {}
            }
        } else {
            let mut events = batch.into_iter();
            while let Some(event) = events.next() {
                if let Err(error) = sink.append(&event).await {
                    warn!(%error, kind = event.kind(), "event append failed, requeueing tail");
                    // Put the failed event and everything after it back at
                    // the front, oldest first.
                    let mut tail: VecDeque<AuditEvent> =
                        std::iter::once(event).chain(events).collect();
                    let requeued = tail.len();
                    {
                        let mut queue =
                            shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
                        while let Some(e) = tail.pop_back() {
                            queue.push_front(e);
                        }
                    }
                    if shared.shutting_down.load(Ordering::SeqCst) {
                        shutdown_retries += 1;
                        if shutdown_retries > MAX_SHUTDOWN_RETRIES {
                            let abandoned = {
                                let mut queue = shared
                                    .queue
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner);
                                let n = queue.len();
                                queue.clear();
                                n
                            };
                            error!(abandoned, "persistence down through shutdown, abandoning queued events");
                            break 'main;
                        }
                    }
                    debug!(requeued, "waiting before retry");
                    tokio::time::sleep(RETRY_DELAY).await;
                    break;
                }
                shutdown_retries = 0;
            }
        }

        let dropped = shared.dropped.load(Ordering::Relaxed);
        if dropped > reported && last_report.elapsed() >= report_interval {
            warn!(
                dropped_since_last_report = dropped - reported,
                dropped_total = dropped,
                "write log overflowed, events were shed"
            );
            reported = dropped;
            last_report = Instant::now();
        }
    }
    debug!("write log worker stopped");
}
