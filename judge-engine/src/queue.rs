use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::Notify;
use uuid::Uuid;

use shared::JudgeRequest;

use crate::error::JudgeError;

/// One pending judging task. Lives only in memory; the durable state is the
/// submission row created before the job is enqueued.
#[derive(Debug, Clone)]
pub struct Job {
    pub submission_id: Uuid,
    pub request: JudgeRequest,
    pub user_id: Option<String>,
    pub enqueued_at: Instant,
}

impl Job {
    pub fn new(submission_id: Uuid, request: JudgeRequest, user_id: Option<String>) -> Self {
        Self {
            submission_id,
            request,
            user_id,
            enqueued_at: Instant::now(),
        }
    }
}

/// Bounded in-process FIFO feeding the worker pool.
///
/// Strict FIFO per producer; each operation is atomic under the lock and the
/// guarded region is just the deque manipulation. Every successful enqueue
/// fires a wakeup so an idle pool picks the job up promptly.
pub struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    capacity: usize,
    available: Notify,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            capacity,
            available: Notify::new(),
        }
    }

    pub fn enqueue(&self, job: Job) -> Result<(), JudgeError> {
        {
            let mut jobs = self.lock();
            if jobs.len() >= self.capacity {
                return Err(JudgeError::QueueFull);
            }
            jobs.push_back(job);
        }
        self.available.notify_one();
        Ok(())
    }

    pub fn dequeue(&self) -> Option<Job> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Resolves once a job has been enqueued since the last wakeup.
    pub async fn wait_available(&self) {
        self.available.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Job>> {
        // a poisoned queue lock only means a panicking thread dropped it
        // mid-operation; the deque itself is still coherent
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
