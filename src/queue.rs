//! In-memory priority queue of pending jobs.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::job::{Job, JobPriority};

struct Lanes<T> {
    /// One FIFO lane per priority, indexed by `JobPriority::index`.
    lanes: [VecDeque<Job<T>>; 3],
    len: usize,
    closed: bool,
}

/// Thread-safe buffer of pending jobs.
///
/// Jobs leave in priority order (`High`, `Medium`, `Low`) and, within one
/// priority, in arrival order. Enqueue and drain share one lock, so a drain
/// is atomic with respect to concurrent submissions.
pub struct PriorityJobQueue<T> {
    inner: Mutex<Lanes<T>>,
}

impl<T> Default for PriorityJobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityJobQueue<T> {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Lanes {
                lanes: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                len: 0,
                closed: false,
            }),
        }
    }

    // Nothing panics while the lock is held, so a poisoned lock still guards
    // consistent data.
    fn lock(&self) -> MutexGuard<'_, Lanes<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a job behind every queued job of the same priority.
    ///
    /// Returns the job back if the queue has been closed.
    pub fn enqueue(&self, job: Job<T>) -> Result<(), Job<T>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(job);
        }
        inner.lanes[job.priority().index()].push_back(job);
        inner.len += 1;
        Ok(())
    }

    /// Remove and return up to `max` jobs in dispatch order.
    pub fn drain_up_to(&self, max: usize) -> Vec<Job<T>> {
        let mut inner = self.lock();
        let take = max.min(inner.len);
        let mut batch = Vec::with_capacity(take);

        for priority in JobPriority::ALL {
            let remaining = take - batch.len();
            if remaining == 0 {
                break;
            }
            let lane = &mut inner.lanes[priority.index()];
            let n = remaining.min(lane.len());
            batch.extend(lane.drain(..n));
        }

        inner.len -= batch.len();
        batch
    }

    /// Number of queued jobs.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    /// Check if no jobs are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse all further enqueues. Queued jobs remain drainable.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Check if the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl<T> std::fmt::Debug for PriorityJobQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("PriorityJobQueue")
            .field("len", &inner.len)
            .field("closed", &inner.closed)
            .finish()
    }
}
