//! Process-wide bounded-concurrency priority executor
//!
//! All external-tool invocations go through one queue so that a background
//! gallery scan can never starve the user's explicit foreground read/write.
//! At most `limit` jobs run concurrently; pending jobs are dequeued in
//! descending priority order, FIFO within a priority band. Foreground
//! operations use priority 0, background prefetch uses -1.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;

/// Priority of user-initiated tool invocations.
pub const FOREGROUND: i32 = 0;
/// Priority of speculative background work (gallery prefetch).
pub const BACKGROUND: i32 = -1;

/// Returned when a submitted job was dropped before completing (runtime
/// shutdown or job panic).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("work queue dropped a job before it completed")]
pub struct QueueClosed;

struct Job {
    priority: i32,
    seq: u64,
    run: Box<dyn FnOnce() + Send>,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first; within a band, lower seq (earlier
        // submission) first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueInner {
    limit: usize,
    running: usize,
    next_seq: u64,
    pending: BinaryHeap<Job>,
}

/// Bounded-concurrency priority work queue. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl WorkQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                limit: limit.max(1),
                running: 0,
                next_seq: 0,
                pending: BinaryHeap::new(),
            })),
        }
    }

    /// Queue bounded by the machine's logical core count.
    pub fn with_cpu_limit() -> Self {
        Self::new(num_cpus::get())
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit a job at the given priority and await its output.
    ///
    /// The job starts immediately if a slot is free, otherwise it waits until
    /// running jobs complete and all higher-priority (or earlier same-priority)
    /// pending jobs have been started.
    pub fn submit<T, F>(&self, priority: i32, fut: F) -> impl Future<Output = Result<T, QueueClosed>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let queue = self.clone();
        let run: Box<dyn FnOnce() + Send> = Box::new(move || {
            tokio::spawn(async move {
                // The guard releases the slot even when the job panics and the
                // task unwinds; the dropped `tx` then surfaces as QueueClosed.
                let _slot = SlotGuard { queue };
                let out = fut.await;
                let _ = tx.send(out);
            });
        });

        let immediate = {
            let mut inner = self.lock();
            if inner.running < inner.limit {
                inner.running += 1;
                Some(run)
            } else {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.pending.push(Job { priority, seq, run });
                tracing::debug!(priority, seq, queued = inner.pending.len(), "job queued");
                None
            }
        };
        if let Some(run) = immediate {
            run();
        }

        async move { rx.await.map_err(|_| QueueClosed) }
    }

    /// Release one running slot and start the best pending job, if any.
    fn job_finished(&self) {
        let next = {
            let mut inner = self.lock();
            inner.running -= 1;
            if inner.running < inner.limit {
                inner.pending.pop().map(|job| {
                    inner.running += 1;
                    job.run
                })
            } else {
                None
            }
        };
        if let Some(run) = next {
            run();
        }
    }
}

/// Returns a running job's slot to the queue on every settle path.
struct SlotGuard {
    queue: WorkQueue,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.queue.job_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_limit() {
        let queue = WorkQueue::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let current = current.clone();
            let peak = peak.clone();
            handles.push(queue.submit(0, async move {
                let now = current.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                peak.fetch_max(now, AtomicOrdering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                current.fetch_sub(1, AtomicOrdering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(AtomicOrdering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_higher_priority_dequeued_first() {
        let queue = WorkQueue::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release, gate) = oneshot::channel::<()>();

        // Occupy the single slot so later submissions queue up
        let blocker = queue.submit(0, async move {
            gate.await.ok();
        });

        let mut handles = Vec::new();
        for i in 0..10 {
            let order = order.clone();
            handles.push(queue.submit(0, async move {
                order.lock().unwrap().push(format!("low-{}", i));
            }));
        }
        let order2 = order.clone();
        let urgent = queue.submit(1, async move {
            order2.lock().unwrap().push("urgent".to_string());
        });

        release.send(()).ok();
        blocker.await.unwrap();
        urgent.await.unwrap();
        for h in handles {
            h.await.unwrap();
        }

        let order = order.lock().unwrap();
        assert_eq!(order.first().map(String::as_str), Some("urgent"));
        // FIFO within the low-priority band
        let lows: Vec<_> = order.iter().filter(|s| s.starts_with("low")).collect();
        for (i, s) in lows.iter().enumerate() {
            assert_eq!(s.as_str(), format!("low-{}", i));
        }
    }

    #[tokio::test]
    async fn test_submit_returns_job_output() {
        let queue = WorkQueue::new(4);
        let out = queue.submit(0, async { 2 + 2 }).await.unwrap();
        assert_eq!(out, 4);
    }

    #[tokio::test]
    async fn test_panicked_job_releases_its_slot() {
        let queue = WorkQueue::new(1);

        let crashed = queue.submit::<i32, _>(0, async { panic!("job crashed") });
        assert_eq!(crashed.await, Err(QueueClosed));

        // The single slot must be free again for later submissions
        let out = queue.submit(0, async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }
}
