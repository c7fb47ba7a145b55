// Execution Engine - lease, run, finish, deliver

mod config;
pub mod constants;
mod conversation;
mod pool;
mod shutdown;


pub use config::EngineConfig;
pub use conversation::{ConversationRunner, ExecutionError, RunOutcome};
pub use pool::{WorkerPool, WorkerPoolHandle};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::delivery::DeliveryService;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{Job, JobStatus};
use crate::error::Result;
use crate::port::{Finish, JobRepository, LanguageModel, RetrievalTool};
use constants::*;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Worker leases jobs one at a time and carries each to a delivered result
pub struct Worker {
    worker_id: String,
    job_repo: Arc<dyn JobRepository>,
    runner: ConversationRunner,
    delivery: Arc<DeliveryService>,
    retry_policy: Arc<RetryPolicy>,
    config: EngineConfig,
}

impl Worker {
    pub fn new(
        worker_id: impl Into<String>,
        job_repo: Arc<dyn JobRepository>,
        model: Arc<dyn LanguageModel>,
        retrieval: Arc<dyn RetrievalTool>,
        delivery: Arc<DeliveryService>,
        retry_policy: Arc<RetryPolicy>,
        config: EngineConfig,
    ) -> Self {
        let runner =
            ConversationRunner::new(Arc::clone(&job_repo), model, retrieval, config.clone());
        Self {
            worker_id: worker_id.into(),
            job_repo,
            runner,
            delivery,
            retry_policy,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.worker_id
    }

    /// Run worker loop with graceful shutdown support
    ///
    /// A job already leased is carried to the end (including delivery
    /// unless its backoff is interrupted) before the loop exits.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(worker_id = %self.worker_id, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                info!(worker_id = %self.worker_id, "Worker shutting down");
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = sleep(self.config.idle_poll) => {},
                        _ = shutdown.wait() => {
                            info!(worker_id = %self.worker_id, "Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "Worker error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(worker_id = %self.worker_id, "Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }
        info!(worker_id = %self.worker_id, "Worker stopped");
        Ok(())
    }

    /// Lease and process the next runnable job (returns true if one was processed)
    pub async fn process_next_job(&self) -> Result<bool> {
        let job = match self
            .job_repo
            .lease_next(&self.worker_id, self.config.lease_ms)
            .await?
        {
            Some(j) => j,
            None => return Ok(false),
        };

        info!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            attempt = job.attempts + 1,
            max_attempts = job.max_attempts,
            "Processing job"
        );

        // Run in its own task so a panic fails this job instead of the worker
        let job_arc = Arc::new(job);
        let job_for_exec = Arc::clone(&job_arc);
        let runner = self.runner.clone();
        let owner = self.worker_id.clone();
        let handle = tokio::task::spawn(async move { runner.run(&owner, &job_for_exec).await });
        let execution_result = handle.await;

        let job = Arc::try_unwrap(job_arc).unwrap_or_else(|arc| (*arc).clone());

        match execution_result {
            Ok(Ok(RunOutcome::Completed)) => {
                let finish = Finish::succeeded(job.attempts);
                if self.job_repo.finish(&job.id, &self.worker_id, &finish).await? {
                    info!(job_id = %job.id, "Job succeeded");
                    self.deliver(&job).await?;
                } else {
                    self.report_lost_finish(&job).await?;
                }
            }
            Ok(Ok(RunOutcome::Cancelled)) => {
                info!(job_id = %job.id, "Job cancelled; result will not be delivered");
            }
            Ok(Ok(RunOutcome::LeaseLost)) => {
                warn!(job_id = %job.id, worker_id = %self.worker_id, "Lease lost during execution");
            }
            Ok(Err(e)) => {
                self.handle_failure(&job, &e.to_string()).await?;
            }
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    "job execution panicked"
                } else {
                    "job execution was aborted"
                };
                error!(job_id = %job.id, error = ?join_err, "{}", reason);
                let finish = Finish::failed(job.attempts + 1, reason);
                if self.job_repo.finish(&job.id, &self.worker_id, &finish).await? {
                    self.deliver(&job).await?;
                } else {
                    self.report_lost_finish(&job).await?;
                }
            }
        }
        Ok(true)
    }

    /// Count the failed attempt, then re-queue with backoff or fail for good
    async fn handle_failure(&self, job: &Job, error_msg: &str) -> Result<()> {
        match self.retry_policy.should_retry(job) {
            RetryDecision::Retry(delay_ms) => {
                let available_at = self.retry_policy.available_at(delay_ms);
                if self
                    .job_repo
                    .requeue(&job.id, &self.worker_id, available_at, error_msg)
                    .await?
                {
                    warn!(
                        job_id = %job.id,
                        attempt = job.attempts + 1,
                        delay_ms,
                        error = %error_msg,
                        "Execution attempt failed, re-queued"
                    );
                } else {
                    self.report_lost_finish(job).await?;
                }
            }
            RetryDecision::Failed => {
                let finish = Finish::failed(job.attempts + 1, error_msg);
                if self.job_repo.finish(&job.id, &self.worker_id, &finish).await? {
                    error!(
                        job_id = %job.id,
                        attempts = job.attempts + 1,
                        error = %error_msg,
                        "Job failed after max attempts"
                    );
                    self.deliver(job).await?;
                } else {
                    self.report_lost_finish(job).await?;
                }
            }
        }
        Ok(())
    }

    async fn deliver(&self, job: &Job) -> Result<()> {
        // Re-read so the payload carries every appended message and the final error
        let Some(finished) = self.job_repo.find_by_id(&job.id).await? else {
            warn!(job_id = %job.id, "Finished job disappeared before delivery");
            return Ok(());
        };
        self.delivery.deliver_job(&self.worker_id, &finished).await?;
        Ok(())
    }

    async fn report_lost_finish(&self, job: &Job) -> Result<()> {
        match self.job_repo.status_of(&job.id).await? {
            Some(JobStatus::Cancelled) => {
                info!(job_id = %job.id, "Job cancelled before its result was recorded");
            }
            status => {
                warn!(
                    job_id = %job.id,
                    status = ?status,
                    worker_id = %self.worker_id,
                    "Result discarded; job no longer leased by this worker"
                );
            }
        }
        Ok(())
    }
}
