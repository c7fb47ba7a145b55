// Job store maintenance port
//
// GC removes settled jobs only: finished with delivery DELIVERED or EXHAUSTED,
// or cancelled. Anything a worker or recovery may still touch is kept.

use crate::domain::JobStatus;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Free-page share above which a pass vacuums without being asked
pub const VACUUM_FRAGMENTATION_PERCENT: f64 = 10.0;

#[derive(Debug, Clone, Default)]
pub struct MaintenanceStats {
    pub db_size_bytes: i64,
    pub db_size_mb: f64,
    pub job_count: i64,
    pub jobs_by_status: HashMap<JobStatus, i64>,
    pub delivery_attempt_count: i64,
    pub pending_delivery_count: i64,
    /// Free pages as a percentage of all pages
    pub fragmentation_percent: f64,
}

impl MaintenanceStats {
    pub fn count(&self, status: JobStatus) -> i64 {
        self.jobs_by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Retention and size limits for the job store
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Settled jobs older than this are deleted (days)
    pub finished_job_retention_days: i64,
    /// VACUUM once the file grows past this (MB)
    pub max_db_size_mb: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            finished_job_retention_days: 7,
            max_db_size_mb: 1000.0,
        }
    }
}

/// One maintenance pass request
#[derive(Debug, Clone, Copy)]
pub struct MaintenancePlan {
    pub retention_days: i64,
    pub max_db_size_mb: f64,
    pub force_vacuum: bool,
}

impl From<&MaintenanceConfig> for MaintenancePlan {
    fn from(config: &MaintenanceConfig) -> Self {
        Self {
            retention_days: config.finished_job_retention_days,
            max_db_size_mb: config.max_db_size_mb,
            force_vacuum: false,
        }
    }
}

/// What a pass did
#[derive(Debug, Clone)]
pub struct MaintenanceReport {
    pub jobs_deleted: i64,
    pub vacuumed: bool,
    pub before: MaintenanceStats,
    pub after: MaintenanceStats,
}

#[async_trait]
pub trait Maintenance: Send + Sync {
    /// VACUUM the store; returns MB reclaimed
    async fn vacuum(&self) -> Result<f64>;

    /// Delete settled jobs (messages and attempts included) finished more
    /// than `retention_days` ago; returns jobs deleted
    async fn gc_finished_jobs(&self, retention_days: i64) -> Result<i64>;

    async fn get_stats(&self) -> Result<MaintenanceStats>;

    /// GC, then VACUUM when forced, oversized or fragmented
    async fn run_maintenance(&self, plan: &MaintenancePlan) -> Result<MaintenanceReport> {
        let before = self.get_stats().await?;
        let jobs_deleted = self.gc_finished_jobs(plan.retention_days).await?;

        let vacuumed = plan.force_vacuum
            || before.db_size_mb > plan.max_db_size_mb
            || before.fragmentation_percent > VACUUM_FRAGMENTATION_PERCENT;
        let reclaimed_mb = if vacuumed { self.vacuum().await? } else { 0.0 };

        let after = self.get_stats().await?;
        tracing::info!(
            jobs_deleted,
            vacuumed,
            reclaimed_mb,
            db_size_mb = after.db_size_mb,
            "Maintenance pass completed"
        );

        Ok(MaintenanceReport {
            jobs_deleted,
            vacuumed,
            before,
            after,
        })
    }
}
