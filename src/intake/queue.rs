// src/intake/queue.rs

//! Bounded in-memory work queue with a fixed worker pool.
//!
//! Semantics:
//! - `push` is non-blocking: when the queue is at capacity the item is
//!   dropped, the drop counter is bumped and `false` is returned. Callers
//!   decide whether to surface that to the producer.
//! - Each item is attempted up to `1 + max_retries` times with capped
//!   exponential backoff between attempts.
//! - Handler panics and errors never take a worker down; the pool keeps
//!   draining whatever arrives next.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Processes one queued item. Implementations are shared across the worker
/// pool, so they hold their own synchronization. `T: Sync` because the
/// workers hold a shared reference to the item across await points.
#[async_trait]
pub trait ItemHandler<T: Sync>: Send + Sync {
    async fn handle(&self, item: &T) -> anyhow::Result<()>;

    /// Called once per item after it either succeeded or exhausted its
    /// retries. Failures here are logged and otherwise ignored.
    async fn on_settled(&self, item: &T, succeeded: bool) -> anyhow::Result<()> {
        let _ = (item, succeeded);
        Ok(())
    }
}

/// Tuning knobs for [`IngestQueue`].
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub concurrency: usize,
    pub capacity: usize,
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt up to `max_delay`.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            capacity: 1000,
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Counters exposed for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub dropped: usize,
}

struct Shared<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    running: AtomicUsize,
    dropped: AtomicUsize,
    shutting_down: AtomicBool,
    options: QueueOptions,
}

/// Bounded queue fronting a pool of `concurrency` worker tasks.
pub struct IngestQueue<T> {
    shared: Arc<Shared<T>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + Sync + 'static> IngestQueue<T> {
    /// Create the queue and spawn its worker pool immediately.
    pub fn start<H>(handler: Arc<H>, options: QueueOptions) -> Self
    where
        H: ItemHandler<T> + 'static,
    {
        let shared = Arc::new(Shared {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            running: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            options: options.clone(),
        });

        let concurrency = options.concurrency.max(1);
        let mut workers = Vec::with_capacity(concurrency);
        for worker in 0..concurrency {
            let shared = Arc::clone(&shared);
            let handler = Arc::clone(&handler);
            workers.push(tokio::spawn(async move {
                worker_loop(worker, shared, handler).await;
            }));
        }

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueue an item. Returns `false` (and counts a drop) when the queue
    /// is full or shutting down.
    pub async fn push(&self, item: T) -> bool {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            self.shared.dropped.fetch_add(1, Ordering::SeqCst);
            return false;
        }
        {
            let mut items = self.shared.items.lock().await;
            if items.len() >= self.shared.options.capacity {
                drop(items);
                self.shared.dropped.fetch_add(1, Ordering::SeqCst);
                warn!("ingest queue full; dropping item");
                return false;
            }
            items.push_back(item);
        }
        self.shared.notify.notify_one();
        true
    }

    pub async fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.shared.items.lock().await.len(),
            running: self.shared.running.load(Ordering::SeqCst),
            dropped: self.shared.dropped.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting work and wait for the workers to wind down. Items
    /// still queued are abandoned.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            if let Err(err) = handle.await {
                error!(error = %err, "ingest worker did not shut down cleanly");
            }
        }
    }
}

async fn worker_loop<T, H>(worker: usize, shared: Arc<Shared<T>>, handler: Arc<H>)
where
    T: Send + Sync + 'static,
    H: ItemHandler<T> + 'static,
{
    loop {
        let item = {
            let mut items = shared.items.lock().await;
            items.pop_front()
        };

        let Some(item) = item else {
            if shared.shutting_down.load(Ordering::SeqCst) {
                debug!(worker, "ingest worker stopping");
                return;
            }
            shared.notify.notified().await;
            continue;
        };

        shared.running.fetch_add(1, Ordering::SeqCst);
        // Each item runs in its own task so a panicking handler unwinds
        // that task, not the worker loop.
        let options = shared.options.clone();
        let item_handler = Arc::clone(&handler);
        let outcome = tokio::spawn(async move {
            let succeeded = process_with_retries(&options, item_handler.as_ref(), &item).await;
            if let Err(err) = item_handler.on_settled(&item, succeeded).await {
                warn!(error = %err, "ingest settlement callback failed");
            }
        })
        .await;
        if let Err(err) = outcome {
            warn!(worker, error = %err, "ingest item processing panicked");
        }
        // An item counts as running until its settlement callback is done.
        shared.running.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn process_with_retries<T, H>(options: &QueueOptions, handler: &H, item: &T) -> bool
where
    T: Sync,
    H: ItemHandler<T> + ?Sized,
{
    let attempts = options.max_retries.saturating_add(1);
    for attempt in 1..=attempts {
        match handler.handle(item).await {
            Ok(()) => return true,
            Err(err) if attempt < attempts => {
                let delay = backoff_delay(options, attempt);
                warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "ingest item failed; retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                error!(attempt, error = %err, "ingest item failed; retries exhausted");
            }
        }
    }
    false
}

/// `min(base * 2^(attempt-1), max)`.
fn backoff_delay(options: &QueueOptions, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    options
        .base_delay
        .saturating_mul(factor)
        .min(options.max_delay)
}
