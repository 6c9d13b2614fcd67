//! The pool of producer threads.
//!
//! Records that become wanted are queued in a shared priority queue, ordered by the interest
//! they had when queued (highest first, first come first served among equals). Worker threads
//! pull records off the queue and produce them. A record that lost all interest while waiting
//! is deferred by [`AsyncRecord::run`] instead of produced, and one whose interest dropped is
//! queued again at its lowered priority.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::async_ref::{AsyncRecord, Interest, Scheduler};
use crate::config::ProducerConfig;

struct QueuedRecord {
    priority: Interest,
    sequence: u64,
    record: Arc<AsyncRecord>,
}

impl PartialEq for QueuedRecord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedRecord {}

impl PartialOrd for QueuedRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        // `BinaryHeap` is a max heap, so earlier sequence numbers have to compare greater
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedRecord>,
    sequence: u64,
}

struct PoolShared {
    queue: Mutex<QueueState>,
    available: Condvar,
    shutdown: AtomicBool,
    poll_interval: Duration,
}

impl PoolShared {
    fn next_record(&self) -> Option<(Arc<AsyncRecord>, Interest)> {
        let mut queue = self.queue.lock();
        loop {
            if self.shutdown.load(AtomicOrdering::Acquire) {
                return None;
            }
            if let Some(queued) = queue.heap.pop() {
                metric!(gauge("producer.queue") = queue.heap.len() as u64);
                return Some((queued.record, queued.priority));
            }
            self.available.wait_for(&mut queue, self.poll_interval);
        }
    }

    fn work(&self) {
        while let Some((record, priority)) = self.next_record() {
            record.run(priority);
        }
    }
}

impl Scheduler for PoolShared {
    fn schedule(&self, record: Arc<AsyncRecord>, priority: Interest) {
        let mut queue = self.queue.lock();
        let sequence = queue.sequence;
        queue.sequence += 1;
        queue.heap.push(QueuedRecord {
            priority,
            sequence,
            record,
        });
        metric!(gauge("producer.queue") = queue.heap.len() as u64);
        drop(queue);
        self.available.notify_one();
    }
}

/// A pool of named threads producing queued records.
///
/// The pool shuts down when it is dropped.
pub struct ProducerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ProducerPool {
    /// Starts the configured number of worker threads.
    pub fn new(config: &ProducerConfig) -> io::Result<Self> {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            poll_interval: config.queue_poll,
        });

        let workers = (0..config.workers.max(1))
            .map(|id| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("tile-producer-{id}"))
                    .spawn(move || shared.work())
            })
            .collect::<io::Result<Vec<_>>>()?;

        tracing::debug!(workers = workers.len(), "started producer pool");

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// The scheduler that queues records on this pool.
    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.shared.clone()
    }

    /// The number of queue entries waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }

    /// The number of running worker threads.
    pub fn workers(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(AtomicOrdering::Acquire)
    }

    /// Stops all workers after their current production, and waits for them to exit.
    ///
    /// Records still in the queue stay pending.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, AtomicOrdering::Release);
        self.shared.available.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("producer thread panicked");
            }
        }

        // queued records refer back to this pool
        let abandoned = std::mem::take(&mut self.shared.queue.lock().heap);
        if !abandoned.is_empty() {
            tracing::debug!(records = abandoned.len(), "abandoned queued records");
        }
    }
}

impl Drop for ProducerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tilewright_sources::SourceId;

    use super::*;
    use crate::caching::Caches;
    use crate::present::Present;
    use crate::test::{self, Gate, TestRequest};

    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn pool(workers: usize) -> ProducerPool {
        ProducerPool::new(&ProducerConfig {
            workers,
            queue_poll: Duration::from_millis(10),
        })
        .unwrap()
    }

    #[test]
    fn test_queue_order() {
        let caches = Caches::new(Arc::new(crate::test::ManualScheduler::default()));
        let source = SourceId::new("A");
        let record = |name| {
            caches
                .get(&source, TestRequest::image(&source, name, BLUE))
                .record()
                .clone()
        };

        let mut heap = BinaryHeap::new();
        for (sequence, priority) in [(0, 5), (1, 9), (2, 5), (3, 1)] {
            heap.push(QueuedRecord {
                priority: Interest::new(priority),
                sequence,
                record: record("tile"),
            });
        }

        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|q| (q.priority.raw(), q.sequence))
            .collect();
        assert_eq!(order, vec![(9, 1), (5, 0), (5, 2), (1, 3)]);
    }

    #[test]
    fn test_produces_records() {
        test::setup();
        let pool = pool(2);
        assert_eq!(pool.workers(), 2);
        let caches = Caches::new(pool.scheduler());
        let source = SourceId::new("A");

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let mut handle =
                    caches.get(&source, TestRequest::image(&source, &i.to_string(), BLUE));
                handle.set_interest(Interest::new(1 + i));
                handle
            })
            .collect();

        assert!(test::wait_until(|| handles.iter().all(|h| h.is_terminal())));
        assert!(handles.iter().all(|h| h.present().image().is_some()));

        pool.shutdown();
        assert!(pool.is_shutting_down());
        assert_eq!(pool.workers(), 0);
    }

    #[test]
    fn test_panics_become_failures() {
        let pool = pool(1);
        let caches = Caches::new(pool.scheduler());
        let source = SourceId::new("A");

        let mut broken = caches.get(&source, TestRequest::panicking(&source, "broken"));
        broken.set_interest(Interest::new(1));
        assert!(test::wait_until(|| broken.is_terminal()));

        // the worker survived the panic
        let mut fine = caches.get(&source, TestRequest::image(&source, "fine", BLUE));
        fine.set_interest(Interest::new(1));
        assert!(test::wait_until(|| fine.is_terminal()));
        assert!(matches!(fine.present(), Present::Image(_)));
    }

    #[test]
    fn test_unwanted_records_are_deferred() {
        let pool = pool(1);
        let caches = Caches::new(pool.scheduler());
        let source = SourceId::new("A");
        let gate = Gate::new();
        let calls = Arc::new(AtomicUsize::new(0));

        // occupy the only worker
        let mut blocker = caches.get(&source, TestRequest::image(&source, "blocker", BLUE).gated(&gate));
        blocker.set_interest(Interest::new(1));
        assert!(test::wait_until(|| pool.queued() == 0));

        let mut unwanted = caches.get(
            &source,
            TestRequest::image(&source, "unwanted", BLUE).counted(&calls),
        );
        unwanted.set_interest(Interest::new(1));
        unwanted.set_interest(Interest::NONE);

        gate.open();
        assert!(test::wait_until(|| blocker.is_terminal()));
        assert!(test::wait_until(|| pool.queued() == 0));
        pool.shutdown();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(!unwanted.is_terminal());
    }
}
