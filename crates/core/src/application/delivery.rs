// Webhook delivery: bounded, sequential POSTs of a terminal job's result
//
// The caller must be able to claim the delivery (it still holds the job's
// lease, or the lease has expired). Attempts are recorded before the outcome
// is acted on, so a crash between POSTs resumes at the next sequence number.

use crate::application::engine::constants::MAX_RECORDED_BODY_CHARS;
use crate::application::engine::ShutdownToken;
use crate::application::retry::DeliveryPolicy;
use crate::domain::{
    DeliveryAttempt, DeliveryOutcome, DeliveryStatus, Job, WebhookPayload,
};
use crate::error::Result;
use crate::port::{DeliveryError, JobRepository, TimeProvider, WebhookRequest, WebhookSender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// What one `deliver` call achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryReport {
    /// Delivery reached a final state after `attempts` recorded POSTs in total
    Settled {
        status: DeliveryStatus,
        attempts: u32,
    },
    /// Someone else holds the delivery claim, or it was already settled
    Skipped,
    /// Shutdown arrived between attempts; delivery stays pending for recovery
    Interrupted,
}

pub struct DeliveryService {
    job_repo: Arc<dyn JobRepository>,
    sender: Arc<dyn WebhookSender>,
    time_provider: Arc<dyn TimeProvider>,
    policy: DeliveryPolicy,
    shutdown: Option<ShutdownToken>,
}

impl DeliveryService {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        sender: Arc<dyn WebhookSender>,
        time_provider: Arc<dyn TimeProvider>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            job_repo,
            sender,
            time_provider,
            policy,
            shutdown: None,
        }
    }

    /// Abandon backoff waits when shutdown is signalled
    pub fn with_shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Deliver the result of a job in `Succeeded` or `Failed`
    pub async fn deliver_job(&self, owner: &str, job: &Job) -> Result<DeliveryReport> {
        let payload = WebhookPayload::from_job(job)?;

        if !self
            .job_repo
            .claim_delivery(&job.id, owner, self.policy.claim_lease_ms)
            .await?
        {
            return Ok(DeliveryReport::Skipped);
        }

        let recorded = self.job_repo.delivery_attempts(&job.id).await?;
        let mut sequence = recorded.last().map(|a| a.sequence).unwrap_or(0);

        // Crash after an accepted POST but before settling
        if recorded
            .iter()
            .any(|a| a.outcome == DeliveryOutcome::Accepted)
        {
            return self
                .settle(owner, job, DeliveryStatus::Delivered, sequence)
                .await;
        }

        while sequence < self.policy.max_attempts {
            sequence += 1;

            let delay = self.policy.delay_before(sequence);
            if !delay.is_zero() && !self.backoff(delay).await {
                info!(job_id = %job.id, next_sequence = sequence, "Delivery interrupted by shutdown");
                return Ok(DeliveryReport::Interrupted);
            }

            // Renew before each POST; losing the claim hands delivery to its new holder
            if !self
                .job_repo
                .claim_delivery(&job.id, owner, self.policy.claim_lease_ms)
                .await?
            {
                warn!(job_id = %job.id, sequence, "Delivery claim lost");
                return Ok(DeliveryReport::Skipped);
            }

            let attempt = self.attempt(job, &payload, sequence).await;
            self.job_repo.record_delivery_attempt(&attempt).await?;

            if attempt.outcome == DeliveryOutcome::Accepted {
                info!(
                    job_id = %job.id,
                    sequence,
                    http_status = ?attempt.http_status,
                    "Webhook delivered"
                );
                return self
                    .settle(owner, job, DeliveryStatus::Delivered, sequence)
                    .await;
            }

            warn!(
                job_id = %job.id,
                sequence,
                max_attempts = self.policy.max_attempts,
                outcome = attempt.outcome.as_str(),
                error = attempt.error.as_deref().unwrap_or(""),
                "Webhook attempt failed"
            );
        }

        error!(
            job_id = %job.id,
            webhook_url = %job.webhook_url,
            attempts = sequence,
            "Webhook delivery exhausted"
        );
        self.settle(owner, job, DeliveryStatus::Exhausted, sequence)
            .await
    }

    async fn settle(
        &self,
        owner: &str,
        job: &Job,
        status: DeliveryStatus,
        attempts: u32,
    ) -> Result<DeliveryReport> {
        if self.job_repo.settle_delivery(&job.id, owner, status).await? {
            Ok(DeliveryReport::Settled { status, attempts })
        } else {
            warn!(job_id = %job.id, status = status.as_str(), "Delivery settled elsewhere");
            Ok(DeliveryReport::Skipped)
        }
    }

    async fn attempt(&self, job: &Job, payload: &WebhookPayload, sequence: u32) -> DeliveryAttempt {
        let request = WebhookRequest {
            url: &job.webhook_url,
            job_id: &job.id,
            sequence,
            payload,
        };

        let result =
            tokio::time::timeout(self.policy.request_timeout, self.sender.post(&request)).await;

        let (http_status, outcome, error) = match result {
            Ok(Ok(response)) => {
                let outcome = DeliveryOutcome::from_http_status(response.status);
                let error = (outcome == DeliveryOutcome::Rejected).then(|| {
                    let body = truncate(&response.body);
                    let rejected = DeliveryError::Rejected {
                        status: response.status,
                        body: body.clone(),
                    };
                    if body.is_empty() {
                        rejected.to_string()
                    } else {
                        format!("{}: {}", rejected, body)
                    }
                });
                (Some(response.status), outcome, error)
            }
            Ok(Err(e)) => (None, DeliveryOutcome::NetworkError, Some(e.to_string())),
            Err(_) => {
                let timeout =
                    DeliveryError::Timeout(self.policy.request_timeout.as_millis() as u64);
                (None, DeliveryOutcome::NetworkError, Some(timeout.to_string()))
            }
        };

        DeliveryAttempt {
            job_id: job.id.clone(),
            sequence,
            timestamp: self.time_provider.now_millis(),
            http_status,
            outcome,
            error,
        }
    }

    /// Sleep out a backoff delay; false when shutdown interrupted it
    async fn backoff(&self, delay: Duration) -> bool {
        match &self.shutdown {
            None => {
                tokio::time::sleep(delay).await;
                true
            }
            Some(token) => {
                if token.is_shutdown() {
                    return false;
                }
                let mut token = token.clone();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = token.wait() => false,
                }
            }
        }
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_RECORDED_BODY_CHARS).collect()
}
