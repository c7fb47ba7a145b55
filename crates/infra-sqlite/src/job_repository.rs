// SQLite JobRepository Implementation
//
// Every status write is a single conditional UPDATE; `rows_affected() == 0`
// means the compare-and-set lost and is reported as `false`.

use async_trait::async_trait;
use courier_core::domain::{
    DeliveryAttempt, DeliveryOutcome, DeliveryStatus, Job, JobId, JobStatus, Message, Role,
};
use courier_core::error::{AppError, Result};
use courier_core::port::{Finish, JobRepository, TimeProvider};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

// Helper to convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    // UNIQUE / PRIMARY KEY constraint failed
                    "2067" | "1555" => AppError::Conflict(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    // FOREIGN KEY constraint failed
                    "787" | "3850" => AppError::NotFound(format!(
                        "Foreign key constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    // SQLITE_BUSY - database is locked
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    // SQLITE_FULL - database or disk is full
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteJobRepository {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    async fn load_messages(&self, id: &JobId) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT role, content FROM job_messages WHERE job_id = ? ORDER BY position ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Attach messages to job rows
    async fn hydrate(&self, rows: Vec<JobRow>) -> Result<Vec<Job>> {
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let messages = self.load_messages(&row.id).await?;
            jobs.push(row.into_job(messages)?);
        }
        Ok(jobs)
    }

    async fn insert_messages(
        tx: &mut Transaction<'_, Sqlite>,
        id: &JobId,
        first_position: i64,
        messages: &[Message],
    ) -> Result<()> {
        for (offset, message) in messages.iter().enumerate() {
            sqlx::query(
                "INSERT INTO job_messages (job_id, position, role, content) VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(first_position + offset as i64)
            .bind(message.role.as_str())
            .bind(&message.content)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, user_id, agent_id, conversation_id, webhook_url,
                status, attempts, max_attempts, last_error,
                created_at, available_at, started_at, finished_at,
                lease_owner, lease_expires_at, delivery_status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.user_id)
        .bind(&job.agent_id)
        .bind(&job.conversation_id)
        .bind(&job.webhook_url)
        .bind(job.status.as_str())
        .bind(i64::from(job.attempts))
        .bind(i64::from(job.max_attempts))
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.available_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(&job.lease_owner)
        .bind(job.lease_expires_at)
        .bind(job.delivery_status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        Self::insert_messages(&mut tx, &job.id, 0, &job.messages).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => {
                let messages = self.load_messages(&row.id).await?;
                Ok(Some(row.into_job(messages)?))
            }
            None => Ok(None),
        }
    }

    async fn status_of(&self, id: &JobId) -> Result<Option<JobStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        status
            .map(|s| JobStatus::from_str(&s).map_err(AppError::from))
            .transpose()
    }

    async fn lease_next(&self, owner: &str, lease_ms: i64) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();

        // Single statement: the subquery pick and the update are atomic
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'RUNNING', started_at = ?, lease_owner = ?, lease_expires_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'QUEUED' AND available_at <= ?
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
            AND status = 'QUEUED'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(owner)
        .bind(now + lease_ms)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => {
                debug!(job_id = %row.id, owner, "Leased job");
                let messages = self.load_messages(&row.id).await?;
                Ok(Some(row.into_job(messages)?))
            }
            None => Ok(None),
        }
    }

    async fn renew_lease(&self, id: &JobId, owner: &str, lease_ms: i64) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET lease_expires_at = ?
            WHERE id = ? AND status = 'RUNNING' AND lease_owner = ?
            "#,
        )
        .bind(now + lease_ms)
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn reclaim_expired(
        &self,
        id: &JobId,
        stale_owner: &str,
        owner: &str,
        lease_ms: i64,
    ) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET lease_owner = ?, lease_expires_at = ?
            WHERE id = ? AND status = 'RUNNING' AND lease_owner = ?
              AND (lease_expires_at IS NULL OR lease_expires_at <= ?)
            "#,
        )
        .bind(owner)
        .bind(now + lease_ms)
        .bind(id)
        .bind(stale_owner)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_messages(
        &self,
        id: &JobId,
        owner: &str,
        messages: &[Message],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Write first so the transaction holds the write lock before reading positions
        let guard = sqlx::query(
            r#"
            UPDATE jobs SET lease_expires_at = lease_expires_at
            WHERE id = ? AND status = 'RUNNING' AND lease_owner = ?
            "#,
        )
        .bind(id)
        .bind(owner)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if guard.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        }

        let next_position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM job_messages WHERE job_id = ?",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        Self::insert_messages(&mut tx, id, next_position, messages).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(true)
    }

    async fn requeue(
        &self,
        id: &JobId,
        owner: &str,
        available_at: i64,
        error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'QUEUED', attempts = attempts + 1, available_at = ?, last_error = ?,
                started_at = NULL, lease_owner = NULL, lease_expires_at = NULL
            WHERE id = ? AND status = 'RUNNING' AND lease_owner = ?
            "#,
        )
        .bind(available_at)
        .bind(error)
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn finish(&self, id: &JobId, owner: &str, finish: &Finish) -> Result<bool> {
        if !matches!(finish.status, JobStatus::Succeeded | JobStatus::Failed) {
            return Err(AppError::InvalidState(format!(
                "{} is not a finishing status",
                finish.status
            )));
        }
        let now = self.time_provider.now_millis();

        // Lease is kept: the same owner delivers next
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, attempts = ?, last_error = COALESCE(?, last_error),
                finished_at = ?, delivery_status = 'PENDING'
            WHERE id = ? AND status = 'RUNNING' AND lease_owner = ?
            "#,
        )
        .bind(finish.status.as_str())
        .bind(i64::from(finish.attempts))
        .bind(&finish.error)
        .bind(now)
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, id: &JobId) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'CANCELLED', finished_at = ?, lease_owner = NULL, lease_expires_at = NULL
            WHERE id = ? AND status IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_delivery(&self, id: &JobId, owner: &str, lease_ms: i64) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET lease_owner = ?, lease_expires_at = ?
            WHERE id = ?
              AND status IN ('SUCCEEDED', 'FAILED')
              AND delivery_status = 'PENDING'
              AND (lease_owner = ? OR lease_expires_at IS NULL OR lease_expires_at <= ?)
            "#,
        )
        .bind(owner)
        .bind(now + lease_ms)
        .bind(id)
        .bind(owner)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_delivery_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_attempts (job_id, sequence, timestamp, http_status, outcome, error)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attempt.job_id)
        .bind(i64::from(attempt.sequence))
        .bind(attempt.timestamp)
        .bind(attempt.http_status.map(i64::from))
        .bind(attempt.outcome.as_str())
        .bind(&attempt.error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn delivery_attempts(&self, id: &JobId) -> Result<Vec<DeliveryAttempt>> {
        let rows: Vec<AttemptRow> = sqlx::query_as(
            r#"
            SELECT job_id, sequence, timestamp, http_status, outcome, error
            FROM delivery_attempts
            WHERE job_id = ?
            ORDER BY sequence ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(AttemptRow::into_attempt).collect()
    }

    async fn settle_delivery(
        &self,
        id: &JobId,
        owner: &str,
        status: DeliveryStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET delivery_status = ?, lease_owner = NULL, lease_expires_at = NULL
            WHERE id = ? AND delivery_status = 'PENDING' AND lease_owner = ?
            "#,
        )
        .bind(status.as_str())
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_expired_leases(&self) -> Result<Vec<Job>> {
        let now = self.time_provider.now_millis();
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE status = 'RUNNING'
              AND (lease_expires_at IS NULL OR lease_expires_at <= ?)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.hydrate(rows).await
    }

    async fn find_pending_deliveries(&self) -> Result<Vec<Job>> {
        let now = self.time_provider.now_millis();
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE status IN ('SUCCEEDED', 'FAILED')
              AND delivery_status = 'PENDING'
              AND (lease_expires_at IS NULL OR lease_expires_at <= ?)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.hydrate(rows).await
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    user_id: String,
    agent_id: String,
    conversation_id: String,
    webhook_url: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    last_error: Option<String>,
    created_at: i64,
    available_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    lease_owner: Option<String>,
    lease_expires_at: Option<i64>,
    delivery_status: String,
}

impl JobRow {
    fn into_job(self, messages: Vec<Message>) -> Result<Job> {
        Ok(Job {
            status: JobStatus::from_str(&self.status)?,
            delivery_status: DeliveryStatus::from_str(&self.delivery_status)?,
            attempts: to_u32("attempts", self.attempts)?,
            max_attempts: to_u32("max_attempts", self.max_attempts)?,
            id: self.id,
            user_id: self.user_id,
            agent_id: self.agent_id,
            conversation_id: self.conversation_id,
            webhook_url: self.webhook_url,
            messages,
            last_error: self.last_error,
            created_at: self.created_at,
            available_at: self.available_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            lease_owner: self.lease_owner,
            lease_expires_at: self.lease_expires_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    role: String,
    content: String,
}

impl MessageRow {
    fn into_message(self) -> Result<Message> {
        Ok(Message::new(Role::from_str(&self.role)?, self.content))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AttemptRow {
    job_id: String,
    sequence: i64,
    timestamp: i64,
    http_status: Option<i64>,
    outcome: String,
    error: Option<String>,
}

impl AttemptRow {
    fn into_attempt(self) -> Result<DeliveryAttempt> {
        let http_status = self
            .http_status
            .map(|s| {
                u16::try_from(s)
                    .map_err(|_| AppError::Database(format!("Invalid http_status {}", s)))
            })
            .transpose()?;

        Ok(DeliveryAttempt {
            sequence: to_u32("sequence", self.sequence)?,
            outcome: DeliveryOutcome::from_str(&self.outcome)?,
            job_id: self.job_id,
            timestamp: self.timestamp,
            http_status,
            error: self.error,
        })
    }
}

fn to_u32(column: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| AppError::Database(format!("Invalid {} {}", column, value)))
}
