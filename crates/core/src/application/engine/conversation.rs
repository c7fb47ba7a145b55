// Conversation runner: one bounded model/retrieval loop per leased job
//
// Every round boundary re-reads the job status and renews the lease, so a
// cancellation or a lost lease stops the run before the next external call.

use super::config::EngineConfig;
use super::constants::MAX_RETRIEVAL_TOP_K;
use crate::domain::{Job, JobId, JobStatus, Message};
use crate::port::{
    JobRepository, LanguageModel, ModelError, ModelRequest, ModelTurn, RetrievalError,
    RetrievalTool,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Recoverable failures of one execution attempt
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("{call} call timed out after {timeout_ms}ms")]
    Timeout { call: &'static str, timeout_ms: u64 },

    #[error("Model kept requesting retrieval after {0} tool rounds")]
    ToolRoundLimit(u32),

    #[error("Job store error during execution: {0}")]
    Store(String),
}

impl From<crate::error::AppError> for ExecutionError {
    fn from(err: crate::error::AppError) -> Self {
        ExecutionError::Store(err.to_string())
    }
}

/// How a run ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Final assistant reply appended; the job may be finished
    Completed,
    /// Job was cancelled while running; nothing more to do
    Cancelled,
    /// Lease expired or was taken over; the new holder owns the job
    LeaseLost,
}

#[derive(Clone)]
pub struct ConversationRunner {
    job_repo: Arc<dyn JobRepository>,
    model: Arc<dyn LanguageModel>,
    retrieval: Arc<dyn RetrievalTool>,
    config: EngineConfig,
}

impl ConversationRunner {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        model: Arc<dyn LanguageModel>,
        retrieval: Arc<dyn RetrievalTool>,
        config: EngineConfig,
    ) -> Self {
        Self {
            job_repo,
            model,
            retrieval,
            config,
        }
    }

    /// Drive the model until it answers, retrieving at most `max_tool_rounds` times
    pub async fn run(&self, owner: &str, job: &Job) -> Result<RunOutcome, ExecutionError> {
        let mut messages = job.messages.clone();
        let mut tool_rounds = 0u32;

        loop {
            if let Some(outcome) = self.round_boundary(owner, &job.id).await? {
                return Ok(outcome);
            }

            let tools_enabled = tool_rounds < self.config.max_tool_rounds;
            let request = ModelRequest {
                job_id: &job.id,
                agent_id: &job.agent_id,
                messages: &messages,
                tools_enabled,
            };
            let turn = bounded("model", self.config.model_timeout, self.model.complete(request))
                .await??;

            if let Some(outcome) = self.round_boundary(owner, &job.id).await? {
                return Ok(outcome);
            }

            match turn {
                ModelTurn::Final(reply) => {
                    if reply.trim().is_empty() {
                        return Err(ModelError::Malformed("empty final reply".to_string()).into());
                    }
                    let reply = Message::assistant(reply);
                    if !self
                        .job_repo
                        .append_messages(&job.id, owner, std::slice::from_ref(&reply))
                        .await?
                    {
                        return self.why_rejected(&job.id).await;
                    }
                    debug!(job_id = %job.id, tool_rounds, "Final reply recorded");
                    return Ok(RunOutcome::Completed);
                }
                ModelTurn::Retrieve { query, top_k } => {
                    if !tools_enabled {
                        return Err(ExecutionError::ToolRoundLimit(tool_rounds));
                    }
                    if query.trim().is_empty() {
                        return Err(
                            ModelError::Malformed("empty retrieval query".to_string()).into()
                        );
                    }
                    tool_rounds += 1;

                    let top_k = top_k
                        .unwrap_or(self.config.retrieval_top_k)
                        .clamp(1, MAX_RETRIEVAL_TOP_K);
                    let result = bounded(
                        "retrieval",
                        self.config.retrieval_timeout,
                        self.retrieval.query(&query, top_k),
                    )
                    .await??;

                    info!(
                        job_id = %job.id,
                        round = tool_rounds,
                        top_k,
                        passages = result.len(),
                        "Retrieval round completed"
                    );

                    let tool_message = Message::tool(result.to_tool_content(&query));
                    if !self
                        .job_repo
                        .append_messages(&job.id, owner, std::slice::from_ref(&tool_message))
                        .await?
                    {
                        return self.why_rejected(&job.id).await;
                    }
                    messages.push(tool_message);
                }
            }
        }
    }

    /// `Some` when the run must stop: cancelled, or the lease is no longer ours
    async fn round_boundary(
        &self,
        owner: &str,
        id: &JobId,
    ) -> Result<Option<RunOutcome>, ExecutionError> {
        match self.job_repo.status_of(id).await? {
            Some(JobStatus::Cancelled) => {
                info!(job_id = %id, "Job cancelled while running");
                Ok(Some(RunOutcome::Cancelled))
            }
            Some(JobStatus::Running) => {
                if self
                    .job_repo
                    .renew_lease(id, owner, self.config.lease_ms)
                    .await?
                {
                    Ok(None)
                } else {
                    Ok(Some(RunOutcome::LeaseLost))
                }
            }
            _ => Ok(Some(RunOutcome::LeaseLost)),
        }
    }

    /// A compare-and-set write was refused; find out why
    async fn why_rejected(&self, id: &JobId) -> Result<RunOutcome, ExecutionError> {
        Ok(match self.job_repo.status_of(id).await? {
            Some(JobStatus::Cancelled) => RunOutcome::Cancelled,
            _ => RunOutcome::LeaseLost,
        })
    }
}

async fn bounded<T, F>(
    call: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, ExecutionError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ExecutionError::Timeout {
            call,
            timeout_ms: limit.as_millis() as u64,
        })
}
