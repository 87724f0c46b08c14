//! FIFO queue of optimisation job ids shared by the poller and the workers.

use std::collections::VecDeque;

use tokio::sync::{Mutex, MutexGuard, Notify};
use uuid::Uuid;

/// Unbounded multi-producer, multi-consumer FIFO of job ids.
///
/// [`pop`](Self::pop) suspends until an id is available. Producers that must
/// make a store update and a push appear atomic to consumers take the
/// [`lock`](Self::lock) guard, which excludes every dequeue until dropped.
#[derive(Default)]
pub struct JobQueue {
    items: Mutex<VecDeque<Uuid>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id to the tail of the queue.
    pub async fn push(&self, job_id: Uuid) {
        self.items.lock().await.push_back(job_id);
        self.notify.notify_one();
    }

    /// Take the producer lock.
    pub async fn lock(&self) -> QueueProducer<'_> {
        QueueProducer {
            items: self.items.lock().await,
            notify: &self.notify,
        }
    }

    /// Remove and return the head of the queue, waiting until one exists.
    ///
    /// Cancel safe: dropping the future never loses an id.
    pub async fn pop(&self) -> Uuid {
        loop {
            let notified = self.notify.notified();
            if let Some(job_id) = self.items.lock().await.pop_front() {
                return job_id;
            }
            notified.await;
        }
    }

    /// Remove the head of the queue without waiting.
    pub async fn try_pop(&self) -> Option<Uuid> {
        self.items.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

/// Exclusive producer access to a [`JobQueue`].
pub struct QueueProducer<'a> {
    items: MutexGuard<'a, VecDeque<Uuid>>,
    notify: &'a Notify,
}

impl QueueProducer<'_> {
    pub fn push(&mut self, job_id: Uuid) {
        self.items.push_back(job_id);
        self.notify.notify_one();
    }

    /// Whether `job_id` is already waiting in the queue.
    pub fn contains(&self, job_id: Uuid) -> bool {
        self.items.contains(&job_id)
    }
}
