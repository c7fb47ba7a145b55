// Task Dispatcher - accepts triggers and answers job queries

pub mod submit;


pub use submit::{MessageInput, SubmitRequest};

use crate::domain::{DeliveryAttempt, Job, JobId};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobRepository, TimeProvider};
use std::sync::Arc;
use tracing::info;

pub struct TaskDispatcher {
    job_repo: Arc<dyn JobRepository>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    max_attempts: u32,
}

impl TaskDispatcher {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        max_attempts: u32,
    ) -> Self {
        Self {
            job_repo,
            id_provider,
            time_provider,
            max_attempts,
        }
    }

    /// Validate and durably enqueue a trigger
    pub async fn submit(&self, req: SubmitRequest) -> Result<JobId> {
        submit::execute(
            self.job_repo.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            self.max_attempts,
            req,
        )
        .await
    }

    pub async fn status(&self, id: &JobId) -> Result<Job> {
        self.job_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))
    }

    /// Cancel a queued or running job
    ///
    /// A running job stops at its next round boundary and is never delivered.
    pub async fn cancel(&self, id: &JobId) -> Result<()> {
        if self.job_repo.cancel(id).await? {
            info!(job_id = %id, "Job cancelled");
            return Ok(());
        }
        match self.job_repo.status_of(id).await? {
            None => Err(AppError::NotFound(format!("Job {} not found", id))),
            Some(status) => Err(AppError::InvalidState(format!(
                "Job {} is already {}",
                id, status
            ))),
        }
    }

    pub async fn deliveries(&self, id: &JobId) -> Result<Vec<DeliveryAttempt>> {
        if self.job_repo.status_of(id).await?.is_none() {
            return Err(AppError::NotFound(format!("Job {} not found", id)));
        }
        self.job_repo.delivery_attempts(id).await
    }
}
