// Delivery Domain Model - webhook attempts and the payload contract

use crate::domain::error::{DomainError, Result};
use crate::domain::job::{Job, JobId, JobStatus, Message};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Result of one POST to the webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryOutcome {
    /// 2xx response
    Accepted,
    /// Any other HTTP status
    Rejected,
    /// No response (connect failure, timeout, reset)
    NetworkError,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Accepted => "accepted",
            DeliveryOutcome::Rejected => "rejected",
            DeliveryOutcome::NetworkError => "network-error",
        }
    }

    /// Classify an HTTP status code
    pub fn from_http_status(status: u16) -> Self {
        if (200..300).contains(&status) {
            DeliveryOutcome::Accepted
        } else {
            DeliveryOutcome::Rejected
        }
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryOutcome {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "accepted" => Ok(DeliveryOutcome::Accepted),
            "rejected" => Ok(DeliveryOutcome::Rejected),
            "network-error" => Ok(DeliveryOutcome::NetworkError),
            other => Err(DomainError::UnknownOutcome(other.to_string())),
        }
    }
}

/// One recorded webhook POST
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub job_id: JobId,
    /// 1-based, strictly increasing per job
    pub sequence: u32,
    pub timestamp: i64, // epoch ms
    /// None when the attempt failed before a response
    pub http_status: Option<u16>,
    pub outcome: DeliveryOutcome,
    pub error: Option<String>,
}

/// Terminal status as seen by the webhook receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadStatus {
    Succeeded,
    Failed,
}

/// JSON body POSTed to the caller's webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub job_id: JobId,
    pub conversation_id: String,
    pub status: PayloadStatus,
    pub messages: Vec<Message>,
    pub error: Option<String>,
}

impl WebhookPayload {
    /// Build the payload for a job in `Succeeded` or `Failed`
    pub fn from_job(job: &Job) -> Result<Self> {
        let (status, error) = match job.status {
            JobStatus::Succeeded => (PayloadStatus::Succeeded, None),
            JobStatus::Failed => (
                PayloadStatus::Failed,
                Some(
                    job.last_error
                        .clone()
                        .unwrap_or_else(|| "execution failed".to_string()),
                ),
            ),
            _ => return Err(DomainError::NotDeliverable(job.id.clone())),
        };

        Ok(Self {
            job_id: job.id.clone(),
            conversation_id: job.conversation_id.clone(),
            status,
            messages: job.messages.clone(),
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_status_classification() {
        assert_eq!(DeliveryOutcome::from_http_status(200), DeliveryOutcome::Accepted);
        assert_eq!(DeliveryOutcome::from_http_status(204), DeliveryOutcome::Accepted);
        assert_eq!(DeliveryOutcome::from_http_status(299), DeliveryOutcome::Accepted);
        assert_eq!(DeliveryOutcome::from_http_status(301), DeliveryOutcome::Rejected);
        assert_eq!(DeliveryOutcome::from_http_status(500), DeliveryOutcome::Rejected);
    }

    #[test]
    fn test_succeeded_payload_shape() {
        let mut job = Job::new_test("c1", vec![Message::user("hello")]);
        job.start("w1", 1, 100).unwrap();
        job.messages.push(Message::assistant("hi there"));
        job.succeed(2).unwrap();

        let payload = WebhookPayload::from_job(&job).unwrap();
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(
            value,
            json!({
                "jobId": job.id,
                "conversationId": "c1",
                "status": "succeeded",
                "messages": [
                    {"role": "user", "content": "hello"},
                    {"role": "assistant", "content": "hi there"}
                ],
                "error": null
            })
        );
    }

    #[test]
    fn test_failed_payload_carries_error() {
        let mut job = Job::new_test("c2", vec![Message::user("hello")]);
        job.start("w1", 1, 100).unwrap();
        job.fail(2, 3, "retrieval unavailable").unwrap();

        let payload = WebhookPayload::from_job(&job).unwrap();
        assert_eq!(payload.status, PayloadStatus::Failed);
        assert_eq!(payload.error.as_deref(), Some("retrieval unavailable"));
    }

    #[test]
    fn test_non_terminal_job_is_not_deliverable() {
        let job = Job::new_test("c3", vec![Message::user("hello")]);
        assert!(WebhookPayload::from_job(&job).is_err());
    }

    #[test]
    fn test_outcome_wire_names() {
        assert_eq!(
            serde_json::to_value(DeliveryOutcome::NetworkError).unwrap(),
            json!("network-error")
        );
        assert_eq!(
            "network-error".parse::<DeliveryOutcome>().unwrap(),
            DeliveryOutcome::NetworkError
        );
    }
}
