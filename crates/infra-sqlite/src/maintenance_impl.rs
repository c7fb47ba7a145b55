// SQLite Maintenance Implementation
use crate::job_repository::map_sqlx_error;
use async_trait::async_trait;
use courier_core::domain::JobStatus;
use courier_core::error::{AppError, Result};
use courier_core::port::{Maintenance, MaintenanceStats, TimeProvider};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

// Finished and nothing left to deliver
const SETTLED_JOBS: &str = r#"
    SELECT id FROM jobs
    WHERE finished_at IS NOT NULL
      AND finished_at < ?
      AND (
        (status IN ('SUCCEEDED', 'FAILED') AND delivery_status IN ('DELIVERED', 'EXHAUSTED'))
        OR status = 'CANCELLED'
      )
"#;

/// SQLite maintenance implementation
pub struct SqliteMaintenance {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    /// (page_count, page_size, freelist_count)
    async fn page_stats(&self) -> Result<(i64, i64, i64)> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page count: {}", e)))?;

        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page size: {}", e)))?;

        let freelist: i64 = sqlx::query_scalar("PRAGMA freelist_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get freelist count: {}", e)))?;

        Ok((page_count, page_size, freelist))
    }

    /// Get DB file size in MB
    async fn get_db_size(&self) -> Result<f64> {
        let (page_count, page_size, _) = self.page_stats().await?;
        Ok(bytes_to_mb(page_count * page_size))
    }
}

fn bytes_to_mb(bytes: i64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        info!("Running VACUUM on job store");

        let size_before = self.get_db_size().await?;

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("VACUUM failed: {}", e)))?;

        let size_after = self.get_db_size().await?;
        let reclaimed = (size_before - size_after).max(0.0);

        info!(
            size_before_mb = size_before,
            size_after_mb = size_after,
            reclaimed_mb = reclaimed,
            "VACUUM completed"
        );

        Ok(reclaimed)
    }

    async fn gc_finished_jobs(&self, retention_days: i64) -> Result<i64> {
        let cutoff_time = self.time_provider.now_millis() - retention_days * MS_PER_DAY;

        info!(retention_days, cutoff_time, "Running finished job GC");

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Children first; does not rely on ON DELETE CASCADE being enabled
        for table in ["delivery_attempts", "job_messages"] {
            let sql = format!("DELETE FROM {} WHERE job_id IN ({})", table, SETTLED_JOBS);
            sqlx::query(&sql)
                .bind(cutoff_time)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        let sql = format!("DELETE FROM jobs WHERE id IN ({})", SETTLED_JOBS);
        let result = sqlx::query(&sql)
            .bind(cutoff_time)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        let deleted = result.rows_affected() as i64;
        info!(deleted_jobs = deleted, "Finished job GC completed");

        Ok(deleted)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        let (page_count, page_size, freelist) = self.page_stats().await?;
        let db_size_bytes = page_count * page_size;

        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let mut jobs_by_status: HashMap<JobStatus, i64> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (status, count) in rows {
            jobs_by_status.insert(JobStatus::from_str(&status)?, count);
        }
        let job_count = jobs_by_status.values().sum();

        let delivery_attempt_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM delivery_attempts")
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let pending_delivery_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE delivery_status = 'PENDING'")
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let fragmentation_percent = if page_count > 0 {
            (freelist as f64 / page_count as f64) * 100.0
        } else {
            0.0
        };

        Ok(MaintenanceStats {
            db_size_mb: bytes_to_mb(db_size_bytes),
            db_size_bytes,
            job_count,
            jobs_by_status,
            delivery_attempt_count,
            pending_delivery_count,
            fragmentation_percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, SqliteJobRepository};
    use courier_core::domain::{
        DeliveryAttempt, DeliveryOutcome, DeliveryStatus, Job, Message,
    };
    use courier_core::port::time_provider::mocks::ManualClock;
    use courier_core::port::{Finish, JobRepository};

    const START: i64 = 100 * MS_PER_DAY;

    async fn setup() -> (SqliteJobRepository, SqliteMaintenance, Arc<ManualClock>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualClock::new(START));
        (
            SqliteJobRepository::new(pool.clone(), clock.clone()),
            SqliteMaintenance::new(pool, clock.clone()),
            clock,
        )
    }

    /// Run a job to SUCCEEDED with one recorded delivery attempt
    async fn finished_job(repo: &SqliteJobRepository, settle: bool) -> Job {
        let job = Job::new_test("conv", vec![Message::user("hello")]);
        repo.insert(&job).await.unwrap();
        let leased = repo.lease_next("w1", 1_000).await.unwrap().unwrap();
        assert!(repo
            .finish(&leased.id, "w1", &Finish::succeeded(0))
            .await
            .unwrap());
        repo.record_delivery_attempt(&DeliveryAttempt {
            job_id: leased.id.clone(),
            sequence: 1,
            timestamp: START,
            http_status: Some(200),
            outcome: DeliveryOutcome::Accepted,
            error: None,
        })
        .await
        .unwrap();
        if settle {
            assert!(repo
                .settle_delivery(&leased.id, "w1", DeliveryStatus::Delivered)
                .await
                .unwrap());
        }
        leased
    }

    #[tokio::test]
    async fn test_maintenance_stats() {
        let (repo, maintenance, _clock) = setup().await;

        let stats = maintenance.get_stats().await.unwrap();
        assert!(stats.db_size_mb > 0.0);
        assert_eq!(stats.job_count, 0);
        assert_eq!(stats.jobs_by_status[&JobStatus::Queued], 0);

        repo.insert(&Job::new_test("conv", vec![Message::user("queued")]))
            .await
            .unwrap();
        finished_job(&repo, false).await;

        let stats = maintenance.get_stats().await.unwrap();
        assert_eq!(stats.job_count, 2);
        assert_eq!(stats.jobs_by_status[&JobStatus::Queued], 1);
        assert_eq!(stats.jobs_by_status[&JobStatus::Succeeded], 1);
        assert_eq!(stats.delivery_attempt_count, 1);
        assert_eq!(stats.pending_delivery_count, 1);
    }

    #[tokio::test]
    async fn test_vacuum() {
        let (_repo, maintenance, _clock) = setup().await;

        let reclaimed = maintenance.vacuum().await.unwrap();
        assert!(reclaimed >= 0.0);
    }

    #[tokio::test]
    async fn test_gc_removes_only_settled_jobs_past_retention() {
        let (repo, maintenance, clock) = setup().await;
        let settled = finished_job(&repo, true).await;
        let pending = finished_job(&repo, false).await;
        let cancelled = Job::new_test("conv", vec![Message::user("never mind")]);
        repo.insert(&cancelled).await.unwrap();
        assert!(repo.cancel(&cancelled.id).await.unwrap());
        let queued = Job::new_test("conv", vec![Message::user("waiting")]);
        repo.insert(&queued).await.unwrap();

        // Inside the retention window nothing goes
        assert_eq!(maintenance.gc_finished_jobs(7).await.unwrap(), 0);

        clock.advance(8 * MS_PER_DAY);
        assert_eq!(maintenance.gc_finished_jobs(7).await.unwrap(), 2);

        assert!(repo.find_by_id(&settled.id).await.unwrap().is_none());
        assert!(repo.delivery_attempts(&settled.id).await.unwrap().is_empty());
        assert!(repo.find_by_id(&cancelled.id).await.unwrap().is_none());
        assert!(repo.find_by_id(&pending.id).await.unwrap().is_some());
        assert_eq!(repo.delivery_attempts(&pending.id).await.unwrap().len(), 1);
        assert!(repo.find_by_id(&queued.id).await.unwrap().is_some());
    }
}
