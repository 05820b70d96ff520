use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::JudgeStatus;

/// Durable submission record.
///
/// Created by the service facade with `status = PENDING`; afterwards mutated
/// only by the worker the job was dispatched to. `time_used` and
/// `wall_time_used` are CPU/wall seconds rounded to six decimals,
/// `memory_used` is in KB, `time_limit` in seconds and `memory_limit` in MB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub language: String,
    pub source_code: String,
    pub stdin: String,
    pub time_limit: Option<f64>,
    pub memory_limit: Option<i64>,
    pub status: JudgeStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub time_used: Option<f64>,
    pub wall_time_used: Option<f64>,
    pub memory_used: Option<i64>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Fresh PENDING row for a validated request.
    pub fn pending(user_id: Option<String>, request: &JudgeRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            language: request.language.clone(),
            source_code: request.source_code.clone(),
            stdin: request.stdin.clone(),
            time_limit: request.time_limit,
            memory_limit: request.memory_limit,
            status: JudgeStatus::Pending,
            stdout: None,
            stderr: None,
            exit_code: None,
            signal: None,
            time_used: None,
            wall_time_used: None,
            memory_used: None,
            message: None,
            created_at: Utc::now(),
        }
    }

    /// Fold a finished pipeline outcome into the record.
    pub fn apply_outcome(&mut self, outcome: &JudgeOutcome) {
        self.status = outcome.status;
        self.stdout = outcome.stdout.clone();
        self.stderr = outcome.stderr.clone();
        self.exit_code = outcome.exit_code;
        self.signal = outcome.signal;
        self.time_used = outcome.time_used;
        self.wall_time_used = outcome.wall_time_used;
        self.memory_used = outcome.memory_used;
        self.message = outcome.message.clone();
    }
}

/// Incoming judging request, as handed to the service facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub source_code: String,
    pub language: String,
    #[serde(default)]
    pub stdin: String,
    /// Seconds; clamped to the language maximum, rejected above the global one.
    #[serde(default)]
    pub time_limit: Option<f64>,
    /// MB; clamped to the language maximum, rejected above the global one.
    #[serde(default)]
    pub memory_limit: Option<i64>,
    /// Reserved for graders; the core never reads it.
    #[serde(default)]
    pub expected_output: Option<String>,
}

/// What `submit` returns; the caller polls the submission by id afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub id: Uuid,
    pub status: JudgeStatus,
}

/// Terminal result of one trip through the judging pipeline, written to the
/// submission row in a single update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeOutcome {
    pub status: JudgeStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub time_used: Option<f64>,
    pub wall_time_used: Option<f64>,
    pub memory_used: Option<i64>,
    pub message: Option<String>,
}

impl JudgeOutcome {
    pub fn new(status: JudgeStatus) -> Self {
        Self {
            status,
            stdout: None,
            stderr: None,
            exit_code: None,
            signal: None,
            time_used: None,
            wall_time_used: None,
            memory_used: None,
            message: None,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        let mut outcome = Self::new(JudgeStatus::InternalError);
        outcome.message = Some(message.into());
        outcome
    }
}
