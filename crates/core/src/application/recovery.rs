// Crash recovery: expired execution leases and stranded deliveries
use crate::application::delivery::{DeliveryReport, DeliveryService};
use crate::application::engine::constants::{DEFAULT_LEASE_MS, DEFAULT_RECOVERY_INTERVAL};
use crate::application::engine::ShutdownToken;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::Job;
use crate::error::Result;
use crate::port::{Finish, JobRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

/// What one recovery sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Expired runs sent back to the queue
    pub requeued: usize,
    /// Expired runs that had no attempts left
    pub failed: usize,
    /// Pending deliveries carried to a final state
    pub redelivered: usize,
}

/// Crash recovery service
///
/// Runs once at daemon startup and then periodically. Every takeover goes
/// through the same compare-and-set operations the workers use, so a worker
/// that is merely slow loses its lease instead of racing the sweep.
pub struct RecoveryService {
    owner: String,
    job_repo: Arc<dyn JobRepository>,
    delivery: Arc<DeliveryService>,
    retry_policy: Arc<RetryPolicy>,
    lease_ms: i64,
    interval: Duration,
}

impl RecoveryService {
    /// # Arguments
    /// * `owner` - Lease owner name used for takeovers (e.g. `recovery-<pid>`)
    pub fn new(
        owner: impl Into<String>,
        job_repo: Arc<dyn JobRepository>,
        delivery: Arc<DeliveryService>,
        retry_policy: Arc<RetryPolicy>,
    ) -> Self {
        Self {
            owner: owner.into(),
            job_repo,
            delivery,
            retry_policy,
            lease_ms: DEFAULT_LEASE_MS,
            interval: DEFAULT_RECOVERY_INTERVAL,
        }
    }

    pub fn with_lease_ms(mut self, lease_ms: i64) -> Self {
        self.lease_ms = lease_ms;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One full sweep: expired runs first, then stranded deliveries
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for job in self.job_repo.find_expired_leases().await? {
            self.recover_expired_run(&job, &mut report).await?;
        }

        for job in self.job_repo.find_pending_deliveries().await? {
            info!(job_id = %job.id, "Resuming pending delivery");
            if let DeliveryReport::Settled { .. } = self.delivery.deliver_job(&self.owner, &job).await? {
                report.redelivered += 1;
            }
        }

        if report != RecoveryReport::default() {
            info!(
                requeued = report.requeued,
                failed = report.failed,
                redelivered = report.redelivered,
                "Recovery sweep complete"
            );
        }
        Ok(report)
    }

    async fn recover_expired_run(&self, job: &Job, report: &mut RecoveryReport) -> Result<()> {
        let Some(stale_owner) = job.lease_owner.as_deref() else {
            return Ok(());
        };
        if !self
            .job_repo
            .reclaim_expired(&job.id, stale_owner, &self.owner, self.lease_ms)
            .await?
        {
            // Renewed or finished since the scan
            return Ok(());
        }

        let reason = format!("execution lease held by {} expired", stale_owner);
        warn!(job_id = %job.id, stale_owner, attempts = job.attempts, "Recovering expired lease");

        match self.retry_policy.should_retry(job) {
            RetryDecision::Retry(delay_ms) => {
                let available_at = self.retry_policy.available_at(delay_ms);
                if self
                    .job_repo
                    .requeue(&job.id, &self.owner, available_at, &reason)
                    .await?
                {
                    report.requeued += 1;
                }
            }
            RetryDecision::Failed => {
                let finish = Finish::failed(job.attempts + 1, reason);
                if self.job_repo.finish(&job.id, &self.owner, &finish).await? {
                    report.failed += 1;
                    // Still holding the lease, so the delivery claim is ours
                    if let Some(finished) = self.job_repo.find_by_id(&job.id).await? {
                        self.delivery.deliver_job(&self.owner, &finished).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Periodic sweep loop (background task)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(interval_secs = self.interval.as_secs(), "Recovery loop started");
        let mut tick = interval(self.interval);
        // The first tick completes immediately; startup recovery already ran
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.recover().await {
                        error!(error = %e, "Recovery sweep failed");
                    }
                }
                _ = shutdown.wait() => {
                    info!("Recovery loop stopped");
                    break;
                }
            }
        }
    }
}
