//! Bounded priority queue for deferred admission, per spec.md §4.7.
//!
//! When a rule's [`crate::rules::Action::Queue`] denies immediate admission,
//! the request is instead held here until either a slot frees up or its
//! deadline passes. No corpus file implements anything like this; the
//! concurrency shape (per-name `DashMap` of `Mutex`-guarded state) follows
//! `src/algorithm/concurrent.rs`'s per-key `DashMap` pattern, and the
//! waiter-resolution idiom (`oneshot` channel per entry) is the standard
//! `tokio` pattern for "one task waits, another resolves it".

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{oneshot, Mutex};

/// Why a queued request was finally resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// A slot freed up before the deadline.
    Admitted,
    /// The deadline passed first.
    TimedOut,
    /// The queue was full at enqueue time.
    QueueFull,
}

struct QueueEntry {
    priority: i64,
    deadline: Instant,
    enqueued_at: Instant,
    sender: oneshot::Sender<QueueOutcome>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.deadline == other.deadline && self.enqueued_at == other.enqueued_at
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want higher priority, then earlier
        // deadline, then earlier enqueue time to sort first, so invert the
        // deadline/enqueue comparisons.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.deadline.cmp(&self.deadline))
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct NamedQueue {
    heap: Mutex<BinaryHeap<QueueEntry>>,
    max_size: usize,
}

/// A bounded, priority-ordered holding area for requests awaiting a free
/// slot, per spec.md §4.7.
///
/// One [`PriorityQueue`] instance is shared by the limiter; queues are
/// created lazily per distinct `queue_name` (typically the rule id).
pub struct PriorityQueue {
    queues: Arc<DashMap<String, Arc<NamedQueue>>>,
    max_size: usize,
    process_interval: Duration,
}

impl std::fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("queues", &self.queues.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl PriorityQueue {
    /// Create a priority queue. `max_size` bounds each named sub-queue
    /// independently; `process_interval` is how often the background
    /// drainer re-evaluates waiting entries.
    pub fn new(max_size: usize, process_interval: Duration) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            max_size,
            process_interval,
        }
    }

    fn queue_for(&self, name: &str) -> Arc<NamedQueue> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(NamedQueue {
                    heap: Mutex::new(BinaryHeap::new()),
                    max_size: self.max_size,
                })
            })
            .clone()
    }

    /// Enqueue a request, awaiting until a caller-supplied `try_admit`
    /// predicate admits it, the deadline passes, or the queue is full.
    ///
    /// `try_admit` is re-evaluated by the background drainer at
    /// `process_interval`; it re-runs the owning rule's algorithm check
    /// (§4.5), which is itself async over the `Storage` backend, so the
    /// predicate returns a future rather than a plain bool.
    pub async fn enqueue<F, Fut>(
        &self,
        queue_name: &str,
        priority: i64,
        timeout: Duration,
        try_admit: F,
    ) -> QueueOutcome
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let queue = self.queue_for(queue_name);
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let deadline = now + timeout;

        {
            let mut heap = queue.heap.lock().await;
            if heap.len() >= queue.max_size {
                return QueueOutcome::QueueFull;
            }
            heap.push(QueueEntry {
                priority,
                deadline,
                enqueued_at: now,
                sender: tx,
            });
        }

        let drainer_queue = queue.clone();
        let interval = self.process_interval;
        let try_admit = Arc::new(try_admit);
        tokio::spawn(async move {
            drain_until_resolved(drainer_queue, interval, try_admit).await;
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => QueueOutcome::TimedOut,
            Err(_) => QueueOutcome::TimedOut,
        }
    }

    /// Current depth of a named sub-queue (for admin/metrics use).
    pub async fn depth(&self, queue_name: &str) -> usize {
        match self.queues.get(queue_name) {
            Some(q) => q.heap.lock().await.len(),
            None => 0,
        }
    }
}

async fn drain_until_resolved<F, Fut>(queue: Arc<NamedQueue>, interval: Duration, try_admit: Arc<F>)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    loop {
        tokio::time::sleep(interval).await;
        let mut heap = queue.heap.lock().await;

        let now = Instant::now();
        let mut requeue = Vec::new();
        let mut resolved_any = false;

        while let Some(entry) = heap.pop() {
            if entry.deadline <= now {
                let _ = entry.sender.send(QueueOutcome::TimedOut);
                resolved_any = true;
                continue;
            }
            if try_admit().await {
                let _ = entry.sender.send(QueueOutcome::Admitted);
                resolved_any = true;
            } else {
                requeue.push(entry);
            }
        }
        for entry in requeue {
            heap.push(entry);
        }

        if heap.is_empty() {
            return;
        }
        if !resolved_any {
            // Nothing changed this tick; avoid a tight loop when the
            // predicate is consistently false by waiting one more interval.
            continue;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    #[tokio::test]
    async fn test_queue_admits_when_predicate_true() {
        let q = PriorityQueue::new(10, Duration::from_millis(10));
        let outcome = q
            .enqueue("r1", 1, Duration::from_millis(200), || async { true })
            .await;
        assert_eq!(outcome, QueueOutcome::Admitted);
    }

    #[tokio::test]
    async fn test_queue_times_out_when_never_admitted() {
        let q = PriorityQueue::new(10, Duration::from_millis(10));
        let outcome = q
            .enqueue("r1", 1, Duration::from_millis(50), || async { false })
            .await;
        assert_eq!(outcome, QueueOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_queue_full_rejects_immediately() {
        let q = Arc::new(PriorityQueue::new(1, Duration::from_millis(10)));
        let admit_flag = Arc::new(AtomicBool::new(false));

        let q1 = q.clone();
        let f1 = admit_flag.clone();
        let first = tokio::spawn(async move {
            q1.enqueue("r1", 1, Duration::from_secs(5), move || {
                let f1 = f1.clone();
                async move { f1.load(AtomicOrdering::Relaxed) }
            })
            .await
        });
        // Give the first enqueue a moment to occupy the single slot.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let outcome = q
            .enqueue("r1", 1, Duration::from_millis(50), || async { false })
            .await;
        assert_eq!(outcome, QueueOutcome::QueueFull);

        admit_flag.store(true, AtomicOrdering::Relaxed);
        let _ = first.await;
    }
}
