//! # Lanes
//!
//! Per-identity FIFO job queues.
//!
//! Each source identity owns at most one lane and a lane is drained by exactly
//! one worker, so jobs for the same identity never overlap and run in the order
//! they were enqueued. Different identities drain concurrently, bounded by a
//! shared semaphore.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{Notify, Semaphore, SemaphorePermit};

use super::types::{SecretKey, SourceSecret};

/// Unit of work queued on a lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Job {
    /// Full fan-out of the given source state
    Replicate(SourceSecret),
    /// Delete the identity's mirrors from every target
    Withdraw(SecretKey),
    /// Write the identity's current state into one new namespace
    Extend { key: SecretKey, namespace: String },
}

pub(crate) struct Lanes {
    queues: Mutex<HashMap<SecretKey, VecDeque<Job>>>,
    permits: Semaphore,
    pending: AtomicUsize,
    drained: Notify,
}

impl std::fmt::Debug for Lanes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lanes")
            .field("pending", &self.pending.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Lanes {
    pub(crate) fn new(max_concurrent: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            permits: Semaphore::new(max_concurrent.max(1)),
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// Queue a job; returns true when the lane was just opened and needs a worker
    pub(crate) fn push(&self, key: SecretKey, job: Job) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        match queues.get_mut(&key) {
            Some(queue) => {
                queue.push_back(job);
                false
            }
            None => {
                queues.insert(key, VecDeque::from([job]));
                true
            }
        }
    }

    /// Next job for a lane; closes the lane when it is empty
    pub(crate) fn pop(&self, key: &SecretKey) -> Option<Job> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let job = queues.get_mut(key).and_then(VecDeque::pop_front);
        if job.is_none() {
            queues.remove(key);
        }
        job
    }

    /// Wait for a worker slot
    pub(crate) async fn permit(&self) -> Option<SemaphorePermit<'_>> {
        // The semaphore is never closed
        self.permits.acquire().await.ok()
    }

    /// Mark one popped job as done
    pub(crate) fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Resolves once no job is queued or running
    pub(crate) async fn idle(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
