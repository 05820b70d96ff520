use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use shared::{JudgeOutcome, JudgeStatus, Submission};

/// Durable store for submission rows.
///
/// The service inserts the PENDING row; after that only the worker the job
/// was dispatched to writes it, so no implementation needs row-level
/// coordination beyond single-statement atomicity.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn insert(&self, submission: &Submission) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Submission>>;
    async fn set_status(&self, id: Uuid, status: JudgeStatus) -> Result<()>;
    /// Write the terminal verdict and all captured channels in one update.
    async fn record_result(&self, id: Uuid, outcome: &JudgeOutcome) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Postgres-backed store over the `judge_submissions` table.
#[derive(Clone)]
pub struct PgSubmissionStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: Uuid,
    user_id: Option<String>,
    language: String,
    source_code: String,
    stdin: String,
    status: String,
    stdout: Option<String>,
    stderr: Option<String>,
    exit_code: Option<i32>,
    signal: Option<i32>,
    time_used: Option<f64>,
    wall_time_used: Option<f64>,
    memory_used: Option<i64>,
    time_limit: Option<f64>,
    memory_limit: Option<i64>,
    message: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = anyhow::Error;

    fn try_from(row: SubmissionRow) -> Result<Self> {
        let status = JudgeStatus::parse(&row.status)
            .ok_or_else(|| anyhow!("unknown status in database: {}", row.status))?;
        Ok(Submission {
            id: row.id,
            user_id: row.user_id,
            language: row.language,
            source_code: row.source_code,
            stdin: row.stdin,
            time_limit: row.time_limit,
            memory_limit: row.memory_limit,
            status,
            stdout: row.stdout,
            stderr: row.stderr,
            exit_code: row.exit_code,
            signal: row.signal,
            time_used: row.time_used,
            wall_time_used: row.wall_time_used,
            memory_used: row.memory_used,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

impl PgSubmissionStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("failed to connect to database")?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn insert(&self, submission: &Submission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO judge_submissions
                (id, user_id, language, source_code, stdin, status,
                 time_limit, memory_limit, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(submission.id)
        .bind(&submission.user_id)
        .bind(&submission.language)
        .bind(&submission.source_code)
        .bind(&submission.stdin)
        .bind(submission.status.as_str())
        .bind(submission.time_limit)
        .bind(submission.memory_limit)
        .bind(submission.created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert submission")?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Submission>> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            "SELECT * FROM judge_submissions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch submission")?;

        row.map(Submission::try_from).transpose()
    }

    async fn set_status(&self, id: Uuid, status: JudgeStatus) -> Result<()> {
        sqlx::query("UPDATE judge_submissions SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to update submission status")?;

        Ok(())
    }

    async fn record_result(&self, id: Uuid, outcome: &JudgeOutcome) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE judge_submissions
            SET status = $1, stdout = $2, stderr = $3, exit_code = $4,
                signal = $5, time_used = $6, wall_time_used = $7,
                memory_used = $8, message = $9
            WHERE id = $10
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(&outcome.stdout)
        .bind(&outcome.stderr)
        .bind(outcome.exit_code)
        .bind(outcome.signal)
        .bind(outcome.time_used)
        .bind(outcome.wall_time_used)
        .bind(outcome.memory_used)
        .bind(&outcome.message)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("failed to record submission result")?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM judge_submissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to delete submission")?;

        Ok(())
    }
}

/// In-memory store used by tests and broker-less deployments.
#[derive(Default)]
pub struct MemorySubmissionStore {
    rows: DashMap<Uuid, Submission>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn insert(&self, submission: &Submission) -> Result<()> {
        self.rows.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Submission>> {
        Ok(self.rows.get(&id).map(|entry| entry.value().clone()))
    }

    async fn set_status(&self, id: Uuid, status: JudgeStatus) -> Result<()> {
        let mut entry = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no such submission: {id}"))?;
        entry.status = status;
        Ok(())
    }

    async fn record_result(&self, id: Uuid, outcome: &JudgeOutcome) -> Result<()> {
        let mut entry = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no such submission: {id}"))?;
        entry.apply_outcome(outcome);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.rows.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::JudgeRequest;

    fn pending() -> Submission {
        Submission::pending(
            Some("user-9".to_string()),
            &JudgeRequest {
                source_code: "int main() { return 0; }".to_string(),
                language: "c".to_string(),
                stdin: String::new(),
                time_limit: None,
                memory_limit: None,
                expected_output: None,
            },
        )
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = MemorySubmissionStore::new();
        let submission = pending();
        store.insert(&submission).await.unwrap();

        let fetched = store.get(submission.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JudgeStatus::Pending);
        assert_eq!(fetched.user_id.as_deref(), Some("user-9"));
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_updates_are_visible() {
        let store = MemorySubmissionStore::new();
        let submission = pending();
        store.insert(&submission).await.unwrap();

        store
            .set_status(submission.id, JudgeStatus::Compiling)
            .await
            .unwrap();
        let fetched = store.get(submission.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JudgeStatus::Compiling);
    }

    #[tokio::test]
    async fn record_result_writes_all_channels() {
        let store = MemorySubmissionStore::new();
        let submission = pending();
        store.insert(&submission).await.unwrap();

        let mut outcome = JudgeOutcome::new(JudgeStatus::RuntimeError);
        outcome.exit_code = Some(1);
        outcome.stderr = Some("boom".to_string());
        outcome.time_used = Some(0.004);
        outcome.memory_used = Some(1844);
        store.record_result(submission.id, &outcome).await.unwrap();

        let fetched = store.get(submission.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JudgeStatus::RuntimeError);
        assert_eq!(fetched.exit_code, Some(1));
        assert_eq!(fetched.stderr.as_deref(), Some("boom"));
        assert_eq!(fetched.memory_used, Some(1844));
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let store = MemorySubmissionStore::new();
        let submission = pending();
        store.insert(&submission).await.unwrap();
        store.delete(submission.id).await.unwrap();
        assert!(store.get(submission.id).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn updating_a_missing_row_fails() {
        let store = MemorySubmissionStore::new();
        assert!(store
            .set_status(Uuid::new_v4(), JudgeStatus::Running)
            .await
            .is_err());
    }
}
