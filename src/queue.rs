//! # Request Queue Module
//!
//! The prioritized crawling frontier.
//!
//! ## Overview
//!
//! `RequestQueue` is the capability the orchestrator and its ingestors share:
//! priority insert, blocking dequeue, count, clear and close. The in-memory
//! implementation is a bounded binary max-heap; a Redis-backed implementation
//! with the same contract lives behind the `redis` feature (see
//! [`crate::redis`]).
//!
//! ## Dequeue shape
//!
//! `dequeue` hands back a fresh channel receiver. A background task waits for
//! an item to become available, delivers at most one result and exits; when
//! the queue is closed the task exits without delivering and the channel
//! closes. This composes with cancellation: a worker can `select!` over the
//! receiver and a stop signal without ever polling.
//!
//! ## Ordering
//!
//! Dequeue order is non-increasing priority; items of equal priority come
//! out in insertion order. The tie-break is a monotonically increasing
//! insertion sequence, unique for the queue's lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kanal::AsyncReceiver;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::Error;
use crate::request::Request;

/// Result stream element produced by [`RequestQueue::dequeue`]. Backends that
/// can fail per item (store unavailable, undecodable entry) surface those
/// failures here instead of panicking.
pub type QueueResult = Result<Request, Error>;

/// A prioritized FIFO queue for requests.
#[async_trait]
pub trait RequestQueue: Send + Sync {
    /// Adds a request with the given priority (larger = higher). Fails with
    /// [`Error::QueueFull`] at capacity and [`Error::QueueClosed`] after
    /// close. Wakes at least one waiting dequeue.
    async fn enqueue(&self, request: Request, priority: i32) -> Result<(), Error>;

    /// Returns a receiver that yields the highest-priority request once one
    /// is available, or closes without delivery when the queue is closed.
    fn dequeue(&self) -> AsyncReceiver<QueueResult>;

    /// Number of queued requests.
    async fn count(&self) -> Result<usize, Error>;

    /// Discards all queued requests. Idempotent.
    async fn clear(&self) -> Result<(), Error>;

    /// Signals that no more items will ever arrive and unblocks all waiters.
    /// Subsequent enqueues fail.
    fn close(&self);

    /// Clears the closed latch so a resumed crawl can consume the same
    /// backend again.
    fn reopen(&self);
}

struct HeapNode {
    priority: i32,
    seq: u64,
    request: Request,
}

/// Max-heap order: higher priority wins; among equal priorities the earlier
/// insertion (smaller sequence) wins.
fn node_less(a: &HeapNode, b: &HeapNode) -> bool {
    a.priority < b.priority || (a.priority == b.priority && a.seq > b.seq)
}

struct Heap {
    data: Vec<HeapNode>,
    max_size: usize,
    seq: u64,
}

impl Heap {
    fn new(max_size: usize) -> Heap {
        Heap {
            data: Vec::with_capacity((max_size / 10).max(1)),
            max_size,
            seq: 0,
        }
    }

    fn insert(&mut self, request: Request, priority: i32) -> Result<(), Error> {
        if self.data.len() >= self.max_size {
            return Err(Error::QueueFull {
                max_size: self.max_size,
            });
        }

        if self.data.len() == self.data.capacity() {
            let grown = (self.data.capacity() * 2 + 1).min(self.max_size);
            self.data.reserve_exact(grown - self.data.len());
        }

        self.seq += 1;
        self.data.push(HeapNode {
            priority,
            seq: self.seq,
            request,
        });

        // Sift up on strict priority only: equal priorities stay put, which
        // keeps insertion order within a priority level.
        let mut i = self.data.len() - 1;
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.data[i].priority > self.data[parent].priority {
                self.data.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn extract(&mut self) -> Option<Request> {
        if self.data.is_empty() {
            return None;
        }
        let node = self.data.swap_remove(0);
        if !self.data.is_empty() {
            self.sift_down(0);
        }
        Some(node.request)
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = i * 2 + 1;
            let right = i * 2 + 2;
            let mut max = i;

            if left < self.data.len() && node_less(&self.data[max], &self.data[left]) {
                max = left;
            }
            if right < self.data.len() && node_less(&self.data[max], &self.data[right]) {
                max = right;
            }
            if max == i {
                return;
            }
            self.data.swap(i, max);
            i = max;
        }
    }
}

struct HeapShared {
    heap: Mutex<Heap>,
    available: Notify,
    closed: AtomicBool,
}

/// In-memory bounded priority queue.
///
/// Cloning is cheap and clones share the same heap.
#[derive(Clone)]
pub struct HeapQueue {
    shared: Arc<HeapShared>,
}

impl HeapQueue {
    /// Creates a queue holding at most `max_size` requests. The backing
    /// array starts at a tenth of that and grows on demand.
    pub fn new(max_size: usize) -> HeapQueue {
        HeapQueue {
            shared: Arc::new(HeapShared {
                heap: Mutex::new(Heap::new(max_size)),
                available: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl RequestQueue for HeapQueue {
    async fn enqueue(&self, request: Request, priority: i32) -> Result<(), Error> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::QueueClosed);
        }
        self.shared.heap.lock().insert(request, priority)?;
        self.shared.available.notify_one();
        Ok(())
    }

    fn dequeue(&self) -> AsyncReceiver<QueueResult> {
        let (tx, rx) = kanal::bounded_async::<QueueResult>(1);
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            loop {
                // Register for a wakeup before inspecting state so a signal
                // arriving between the check and the await is not lost.
                let notified = shared.available.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if shared.closed.load(Ordering::Acquire) {
                    trace!("queue closed, dequeue waiter exiting without delivery");
                    return;
                }

                let extracted = shared.heap.lock().extract();
                if let Some(request) = extracted {
                    let _ = tx.send(Ok(request)).await;
                    return;
                }

                notified.await;
            }
        });

        rx
    }

    async fn count(&self) -> Result<usize, Error> {
        Ok(self.shared.heap.lock().data.len())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.shared.heap.lock().data.clear();
        Ok(())
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.available.notify_waiters();
    }

    fn reopen(&self) {
        self.shared.closed.store(false, Ordering::Release);
    }
}
