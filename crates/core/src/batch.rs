//! Write-coalescing batch queue (C6).
//!
//! Ballots arrive far faster than the ledger wants to fsync/anchor, so
//! incoming ballots are coalesced into batches before they reach the
//! `MerkleTree`: either `batch_size` ballots accumulate, or `flush_interval`
//! elapses, whichever comes first. Grounded on the teacher indexer's
//! channel-driven worker loop (`indexer::rpc`'s background polling task
//! feeding `database` writes); here the channel carries ballots in and
//! `oneshot` replies carry each ballot's own `ledger.append_batch` result
//! back out, so a caller's `enqueue().await` resolves with exactly what a
//! direct, unbatched `ledger.append` call would have returned.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub backlog_limit: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_millis(100),
            backlog_limit: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchStats {
    pub enqueued: u64,
    pub flushed_batches: u64,
    pub rejected_busy: u64,
}

#[derive(Debug)]
pub enum EnqueueError {
    /// The backlog is at `backlog_limit`; caller should retry later rather
    /// than block, since blocking here would itself become the bottleneck
    /// the queue exists to smooth over.
    Busy,
    /// The flush worker has shut down; the whole server is going away.
    Closed,
}

struct Job<T, R> {
    item: T,
    reply: oneshot::Sender<R>,
}

/// Handle to a running batch-flush worker. Cloning shares the same
/// underlying channel and stats counter.
#[derive(Clone)]
pub struct BatchQueue<T, R> {
    sender: mpsc::Sender<Job<T, R>>,
    stats: std::sync::Arc<std::sync::Mutex<BatchStats>>,
}

impl<T: Send + 'static, R: Send + 'static> BatchQueue<T, R> {
    /// Spawn the flush worker. `on_flush` is called with every accumulated
    /// (non-empty) batch and must return exactly one `R` per item, in the
    /// same order; it must not panic, since a panic would take the worker
    /// task down silently (tokio only logs a task's panic, it doesn't
    /// propagate it to callers already blocked on `enqueue`).
    pub fn spawn<F>(config: BatchConfig, on_flush: F) -> Self
    where
        F: Fn(Vec<T>) -> Vec<R> + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<Job<T, R>>(config.backlog_limit);
        let stats = std::sync::Arc::new(std::sync::Mutex::new(BatchStats::default()));
        let worker_stats = stats.clone();

        tokio::spawn(async move {
            let mut items = Vec::with_capacity(config.batch_size);
            let mut replies = Vec::with_capacity(config.batch_size);
            let mut ticker = interval(config.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    job = receiver.recv() => {
                        match job {
                            Some(Job { item, reply }) => {
                                items.push(item);
                                replies.push(reply);
                                if items.len() >= config.batch_size {
                                    flush(&mut items, &mut replies, &on_flush, &worker_stats);
                                }
                            }
                            None => {
                                flush(&mut items, &mut replies, &on_flush, &worker_stats);
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        flush(&mut items, &mut replies, &on_flush, &worker_stats);
                    }
                }
            }
        });

        Self { sender, stats }
    }

    /// Enqueue `item`, resolving with its own result once its batch has
    /// been flushed.
    pub async fn enqueue(&self, item: T) -> Result<R, EnqueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        match self.sender.try_send(Job { item, reply: reply_tx }) {
            Ok(()) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.enqueued += 1;
                }
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.rejected_busy += 1;
                }
                return Err(EnqueueError::Busy);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(EnqueueError::Closed),
        }
        reply_rx.await.map_err(|_| EnqueueError::Closed)
    }

    pub fn stats(&self) -> BatchStats {
        *self.stats.lock().expect("batch stats lock poisoned")
    }
}

fn flush<T, R, F>(
    items: &mut Vec<T>,
    replies: &mut Vec<oneshot::Sender<R>>,
    on_flush: &F,
    stats: &std::sync::Arc<std::sync::Mutex<BatchStats>>,
) where
    F: Fn(Vec<T>) -> Vec<R>,
{
    if items.is_empty() {
        return;
    }
    let batch = std::mem::take(items);
    let results = on_flush(batch);
    let senders = std::mem::take(replies);
    debug_assert_eq!(senders.len(), results.len(), "on_flush must return one result per item");
    for (reply, result) in senders.into_iter().zip(results) {
        let _ = reply.send(result);
    }
    if let Ok(mut stats) = stats.lock() {
        stats.flushed_batches += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn flushes_on_size_threshold() {
        let flushed = Arc::new(AtomicUsize::new(0));
        let flushed2 = flushed.clone();
        let queue = BatchQueue::spawn(
            BatchConfig {
                batch_size: 4,
                flush_interval: Duration::from_secs(60),
                backlog_limit: 64,
            },
            move |batch: Vec<u32>| {
                flushed2.fetch_add(batch.len(), Ordering::SeqCst);
                batch.iter().map(|n| n * 10).collect()
            },
        );

        let mut handles = Vec::new();
        for i in 0..4u32 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move { q.enqueue(i).await }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }
        results.sort();

        assert_eq!(flushed.load(Ordering::SeqCst), 4);
        assert_eq!(queue.stats().flushed_batches, 1);
        assert_eq!(results, vec![0, 10, 20, 30]);
    }

    #[tokio::test]
    async fn flushes_on_timer_with_partial_batch() {
        let flushed = Arc::new(AtomicUsize::new(0));
        let flushed2 = flushed.clone();
        let queue = BatchQueue::spawn(
            BatchConfig {
                batch_size: 100,
                flush_interval: Duration::from_millis(20),
                backlog_limit: 64,
            },
            move |batch: Vec<u32>| {
                flushed2.fetch_add(batch.len(), Ordering::SeqCst);
                vec![(); batch.len()]
            },
        );

        queue.enqueue(1).await.ok();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(flushed.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().enqueued, 1);
    }
}
