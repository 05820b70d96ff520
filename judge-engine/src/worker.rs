//! Worker pool and judging pipeline.
//!
//! The pool owns a fixed set of worker slots; slot `i` is permanently bound
//! to isolate box `box_id_base + i`, so no two concurrent runs ever share a
//! box. Dispatch pairs idle slots with queued jobs under a small scheduling
//! lock; the pipeline itself runs lock-free on its own tokio task.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::fs;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use isolate_runner::{IsolateBox, IsolateResult, RunOptions, RunStatus};
use shared::{JudgeOutcome, JudgeStatus};

use crate::config::Config;
use crate::languages::{self, LanguageSpec, Limits};
use crate::queue::{Job, JobQueue};
use crate::repository::SubmissionStore;

const STDIN_FILE: &str = "stdin.txt";
const STDOUT_FILE: &str = "stdout.txt";
const STDERR_FILE: &str = "stderr.txt";
const COMPILE_STDERR_FILE: &str = "compile_stderr.txt";

const EXEC_PROCESSES: u32 = 64;
const EXEC_FILE_SIZE_KB: u64 = 10 * 1024;
// compilers fork and write big intermediates
const COMPILE_PROCESSES: u32 = 128;
const COMPILE_FILE_SIZE_KB: u64 = 256 * 1024;

const MIN_WALL_TIME_SECS: f64 = 5.0;
const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const TRUNCATION_MARKER: &str = "\n...[output truncated]";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub busy: usize,
    pub idle: usize,
    pub queue_size: usize,
}

/// Fixed pool of judging workers draining the job queue.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: Arc<Config>,
    queue: Arc<JobQueue>,
    store: Arc<dyn SubmissionStore>,
    /// Busy flag per slot; index doubles as the worker id.
    slots: Mutex<Vec<bool>>,
    stopped: AtomicBool,
    shutdown: tokio::sync::Notify,
}

impl WorkerPool {
    pub fn new(
        config: Arc<Config>,
        queue: Arc<JobQueue>,
        store: Arc<dyn SubmissionStore>,
    ) -> Self {
        let slots = Mutex::new(vec![false; config.worker_count]);
        Self {
            inner: Arc::new(PoolInner {
                config,
                queue,
                store,
                slots,
                stopped: AtomicBool::new(false),
                shutdown: tokio::sync::Notify::new(),
            }),
        }
    }

    /// Subscribe to the queue's job-available signal and start dispatching.
    pub fn start(&self) {
        let inner = self.inner.clone();
        info!(workers = inner.config.worker_count, "starting worker pool");
        tokio::spawn(async move {
            loop {
                if inner.stopped.load(Ordering::Acquire) {
                    break;
                }
                PoolInner::dispatch(&inner);
                tokio::select! {
                    _ = inner.queue.wait_available() => {}
                    _ = inner.shutdown.notified() => break,
                }
            }
            debug!("worker pool dispatcher exited");
        });
    }

    /// Cooperative stop: no new dispatches, queue cleared, in-flight jobs
    /// run to completion before this returns.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.shutdown.notify_waiters();
        self.inner.queue.clear();

        while self.stats().busy > 0 {
            time::sleep(Duration::from_millis(50)).await;
        }
        info!("worker pool stopped");
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.inner.lock_slots();
        let busy = slots.iter().filter(|flag| **flag).count();
        PoolStats {
            total: slots.len(),
            busy,
            idle: slots.len() - busy,
            queue_size: self.inner.queue.len(),
        }
    }
}

impl PoolInner {
    fn lock_slots(&self) -> MutexGuard<'_, Vec<bool>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pair idle workers with queued jobs, in stable slot order.
    fn dispatch(inner: &Arc<PoolInner>) {
        if inner.stopped.load(Ordering::Acquire) {
            return;
        }

        let mut assignments = Vec::new();
        {
            let mut slots = inner.lock_slots();
            for (slot, busy) in slots.iter_mut().enumerate() {
                if *busy {
                    continue;
                }
                match inner.queue.dequeue() {
                    Some(job) => {
                        *busy = true;
                        assignments.push((slot, job));
                    }
                    None => break,
                }
            }
        }

        for (slot, job) in assignments {
            let inner = inner.clone();
            tokio::spawn(async move {
                inner.run_job(slot, job).await;
                inner.lock_slots()[slot] = false;
                PoolInner::dispatch(&inner);
            });
        }
    }

    async fn run_job(&self, slot: usize, job: Job) {
        let submission_id = job.submission_id;
        let box_id = self.config.box_id_base + slot as u32;

        if job.enqueued_at.elapsed() > self.config.queue_timeout {
            warn!(submission = %submission_id, "job expired in queue");
            self.persist(submission_id, &JudgeOutcome::internal_error("queue timeout"))
                .await;
            return;
        }

        info!(submission = %submission_id, worker = slot, box_id, "judging submission");
        let outcome = match self.judge(box_id, &job).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(submission = %submission_id, error = %format!("{err:#}"), "pipeline failed");
                JudgeOutcome::internal_error(format!("{err:#}"))
            }
        };

        info!(submission = %submission_id, status = %outcome.status, "submission judged");
        self.persist(submission_id, &outcome).await;
    }

    async fn persist(&self, submission_id: Uuid, outcome: &JudgeOutcome) {
        if let Err(err) = self.store.record_result(submission_id, outcome).await {
            error!(submission = %submission_id, error = %format!("{err:#}"), "failed to persist result");
        }
    }

    /// Full compile-execute-classify trip for one job. Box teardown runs on
    /// every path once the box exists.
    async fn judge(&self, box_id: u32, job: &Job) -> Result<JudgeOutcome> {
        let Some(spec) = languages::lookup(&job.request.language) else {
            return Ok(JudgeOutcome::internal_error("unsupported language"));
        };

        let sandbox = match IsolateBox::init(&self.config.isolate_bin, box_id).await {
            Ok(sandbox) => sandbox,
            Err(err) => {
                return Ok(JudgeOutcome::internal_error(format!(
                    "sandbox init failed: {err}"
                )))
            }
        };

        let outcome = self.judge_in_box(&sandbox, spec, job).await;
        sandbox.cleanup().await;
        outcome
    }

    async fn judge_in_box(
        &self,
        sandbox: &IsolateBox,
        spec: &LanguageSpec,
        job: &Job,
    ) -> Result<JudgeOutcome> {
        let work = sandbox.work_dir();
        fs::write(work.join(spec.source_filename), &job.request.source_code)
            .await
            .context("failed to write source file")?;
        fs::write(work.join(STDIN_FILE), &job.request.stdin)
            .await
            .context("failed to write stdin file")?;
        fs::write(work.join(STDOUT_FILE), b"").await?;
        fs::write(work.join(STDERR_FILE), b"").await?;

        if let Some(compile_cmd) = spec.compile_cmd {
            fs::write(work.join(COMPILE_STDERR_FILE), b"").await?;
            self.store
                .set_status(job.submission_id, JudgeStatus::Compiling)
                .await?;
            debug!(submission = %job.submission_id, ?compile_cmd, "compiling");

            let compile_time_limit = spec
                .compile_time_limit
                .unwrap_or(self.config.compile_time_limit);
            let result = sandbox
                .run(
                    &argv_of(compile_cmd),
                    &compile_options(spec, compile_time_limit),
                )
                .await?;

            if result.status != RunStatus::Ok || result.exit_code != Some(0) {
                let mut outcome = outcome_from_run(JudgeStatus::CompilationError, &result);
                outcome.stderr = Some(
                    read_truncated(
                        &work.join(COMPILE_STDERR_FILE),
                        self.config.output_limit_bytes,
                    )
                    .await,
                );
                return Ok(outcome);
            }
        }

        self.store
            .set_status(job.submission_id, JudgeStatus::Running)
            .await?;
        let limits =
            languages::resolve_limits(spec, job.request.time_limit, job.request.memory_limit);
        debug!(
            submission = %job.submission_id,
            time_limit = limits.time_limit,
            memory_limit = limits.memory_limit,
            "executing"
        );

        let result = sandbox
            .run(&argv_of(spec.run_cmd), &exec_options(spec, &limits))
            .await?;

        let mut outcome = outcome_from_run(classify(&result, &limits), &result);
        outcome.stdout =
            Some(read_truncated(&work.join(STDOUT_FILE), self.config.output_limit_bytes).await);
        outcome.stderr =
            Some(read_truncated(&work.join(STDERR_FILE), self.config.output_limit_bytes).await);
        Ok(outcome)
    }
}

/// Map run telemetry to a verdict. Resource classification wins over the
/// generic mapping: the overrides use strict `>=` against the effective
/// limits, and at most one of them fires.
pub(crate) fn classify(result: &IsolateResult, limits: &Limits) -> JudgeStatus {
    if result.status != RunStatus::SandboxFailure {
        if result.memory_kb as i64 >= limits.memory_limit.saturating_mul(1024) {
            return JudgeStatus::MemoryLimitExceeded;
        }
        if result.time >= limits.time_limit {
            return JudgeStatus::TimeLimitExceeded;
        }
    }

    match result.status {
        RunStatus::TimedOut => JudgeStatus::TimeLimitExceeded,
        // a bare SIGKILL is a runtime error unless the meta report carries
        // OOM evidence
        RunStatus::Signaled => {
            if oom_evidence(result) {
                JudgeStatus::MemoryLimitExceeded
            } else {
                JudgeStatus::RuntimeError
            }
        }
        RunStatus::NonZeroExit => JudgeStatus::RuntimeError,
        RunStatus::SandboxFailure => JudgeStatus::InternalError,
        RunStatus::Ok => {
            if result.exit_code == Some(0) {
                JudgeStatus::Accepted
            } else {
                JudgeStatus::RuntimeError
            }
        }
    }
}

fn oom_evidence(result: &IsolateResult) -> bool {
    if result.oom_killed {
        return true;
    }
    result.message.as_deref().is_some_and(|message| {
        let message = message.to_ascii_lowercase();
        message.contains("oom") || message.contains("memory")
    })
}

fn outcome_from_run(status: JudgeStatus, result: &IsolateResult) -> JudgeOutcome {
    let mut outcome = JudgeOutcome::new(status);
    outcome.exit_code = result.exit_code;
    outcome.signal = result.signal;
    outcome.time_used = Some(round6(result.time));
    outcome.wall_time_used = Some(round6(result.wall_time));
    outcome.memory_used = Some(result.memory_kb as i64);
    outcome.message = result.message.clone();
    outcome
}

fn exec_options(spec: &LanguageSpec, limits: &Limits) -> RunOptions {
    let wall_time = (2.0 * limits.time_limit).max(MIN_WALL_TIME_SECS);
    let mut options = RunOptions::new()
        .with_time_limit(limits.time_limit)
        .with_wall_time_limit(wall_time)
        .with_memory_limit_kb(limits.memory_limit.max(0) as u64 * 1024)
        .with_max_processes(EXEC_PROCESSES)
        .with_max_file_size_kb(EXEC_FILE_SIZE_KB)
        .with_stdin(STDIN_FILE)
        .with_stdout(STDOUT_FILE)
        .with_stderr(STDERR_FILE)
        .with_env("PATH", SANDBOX_PATH)
        .with_env("HOME", "/box");
    for (key, value) in spec.env {
        options = options.with_env(*key, *value);
    }
    options
}

fn compile_options(spec: &LanguageSpec, compile_time_limit: f64) -> RunOptions {
    // compile stdout is discarded on purpose: only stderr matters for the
    // verdict, and the memory budget is the language maximum
    let wall_time = (2.0 * compile_time_limit).max(MIN_WALL_TIME_SECS);
    let mut options = RunOptions::new()
        .with_time_limit(compile_time_limit)
        .with_wall_time_limit(wall_time)
        .with_memory_limit_kb(spec.max_memory_limit.max(0) as u64 * 1024)
        .with_max_processes(COMPILE_PROCESSES)
        .with_max_file_size_kb(COMPILE_FILE_SIZE_KB)
        .with_stderr(COMPILE_STDERR_FILE)
        .with_env("PATH", SANDBOX_PATH)
        .with_env("HOME", "/box");
    for (key, value) in spec.env {
        options = options.with_env(*key, *value);
    }
    options
}

fn argv_of(cmd: &[&str]) -> Vec<String> {
    cmd.iter().map(|part| part.to_string()).collect()
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

async fn read_truncated(path: &Path, cap: usize) -> String {
    let bytes = fs::read(path).await.unwrap_or_default();
    truncate_output(&bytes, cap)
}

/// Cut captured output at `cap` bytes without splitting a UTF-8 sequence,
/// appending a marker when anything was dropped.
fn truncate_output(bytes: &[u8], cap: usize) -> String {
    if bytes.len() <= cap {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut end = cap;
    while end > 0 && (bytes[end] & 0b1100_0000) == 0b1000_0000 {
        end -= 1;
    }
    let mut text = String::from_utf8_lossy(&bytes[..end]).into_owned();
    text.push_str(TRUNCATION_MARKER);
    text
}
