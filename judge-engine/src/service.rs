use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared::{JudgeRequest, JudgeStatus, SubmitReceipt, Submission};

use crate::config::Config;
use crate::error::JudgeError;
use crate::languages::{self, MAX_LIMITS};
use crate::queue::{Job, JobQueue};
use crate::repository::SubmissionStore;
use crate::worker::{PoolStats, WorkerPool};

/// Facade over the queue, pool and store. One instance per engine; tests
/// build as many independent instances as they like.
pub struct JudgeService {
    config: Arc<Config>,
    queue: Arc<JobQueue>,
    pool: WorkerPool,
    store: Arc<dyn SubmissionStore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub pool: PoolStats,
    pub config: ConfigSnapshot,
}

/// The knobs a caller of `stats` cares about.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub worker_count: usize,
    pub max_queue_size: usize,
    pub queue_timeout_secs: u64,
    pub output_limit_bytes: usize,
    pub compile_time_limit: f64,
    pub max_time_limit: f64,
    pub max_memory_limit: i64,
}

impl JudgeService {
    pub fn new(config: Config, store: Arc<dyn SubmissionStore>) -> Self {
        let config = Arc::new(config);
        let queue = Arc::new(JobQueue::new(config.max_queue_size));
        let pool = WorkerPool::new(config.clone(), queue.clone(), store.clone());
        Self {
            config,
            queue,
            pool,
            store,
        }
    }

    pub fn start(&self) {
        self.pool.start();
    }

    /// Stop dispatching and wait for in-flight pipelines to drain. Pending
    /// queue entries are discarded.
    pub async fn stop(&self) {
        self.pool.stop().await;
    }

    /// Validate, persist the PENDING row, enqueue. Validation and admission
    /// failures happen before the row exists; an enqueue race that fills
    /// the queue after the insert takes the row back out again.
    pub async fn submit(
        &self,
        request: JudgeRequest,
        user_id: Option<String>,
    ) -> Result<SubmitReceipt, JudgeError> {
        if request.source_code.trim().is_empty() {
            return Err(JudgeError::EmptySource);
        }
        if languages::lookup(&request.language).is_none() {
            return Err(JudgeError::UnsupportedLanguage(request.language.clone()));
        }
        if let Some(time_limit) = request.time_limit {
            if time_limit > MAX_LIMITS.time_limit {
                return Err(JudgeError::LimitExceeded {
                    field: "time_limit",
                    requested: time_limit,
                    ceiling: MAX_LIMITS.time_limit,
                });
            }
        }
        if let Some(memory_limit) = request.memory_limit {
            if memory_limit > MAX_LIMITS.memory_limit {
                return Err(JudgeError::LimitExceeded {
                    field: "memory_limit",
                    requested: memory_limit as f64,
                    ceiling: MAX_LIMITS.memory_limit as f64,
                });
            }
        }
        if self.queue.is_full() {
            return Err(JudgeError::QueueFull);
        }

        let submission = Submission::pending(user_id.clone(), &request);
        self.store
            .insert(&submission)
            .await
            .map_err(JudgeError::Storage)?;

        let job = Job::new(submission.id, request, user_id);
        if let Err(err) = self.queue.enqueue(job) {
            if let Err(delete_err) = self.store.delete(submission.id).await {
                warn!(
                    submission = %submission.id,
                    error = %format!("{delete_err:#}"),
                    "failed to roll back submission row"
                );
            }
            return Err(err);
        }

        debug!(submission = %submission.id, language = %submission.language, "submission queued");
        Ok(SubmitReceipt {
            id: submission.id,
            status: JudgeStatus::Pending,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Submission>, JudgeError> {
        self.store.get(id).await.map_err(JudgeError::Storage)
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            pool: self.pool.stats(),
            config: ConfigSnapshot {
                worker_count: self.config.worker_count,
                max_queue_size: self.config.max_queue_size,
                queue_timeout_secs: self.config.queue_timeout.as_secs(),
                output_limit_bytes: self.config.output_limit_bytes,
                compile_time_limit: self.config.compile_time_limit,
                max_time_limit: MAX_LIMITS.time_limit,
                max_memory_limit: MAX_LIMITS.memory_limit,
            },
        }
    }
}

static GLOBAL: OnceCell<Arc<JudgeService>> = OnceCell::new();

/// Opt-in process-global accessor. Nothing in the engine depends on it; the
/// binary installs its instance here for collaborators that want one.
pub fn install_global(service: Arc<JudgeService>) {
    if GLOBAL.set(service).is_err() {
        warn!("global judge service already installed");
    } else {
        info!("global judge service installed");
    }
}

pub fn global() -> Option<Arc<JudgeService>> {
    GLOBAL.get().cloned()
}
