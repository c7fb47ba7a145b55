// Job Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job ID (UUID v4)
pub type JobId = String;

/// Job lifecycle status
///
/// `Queued -> Running -> {Succeeded, Failed, Cancelled}`. `Running -> Queued` is the
/// re-queue edge used by execution retries and lease recovery. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine permits `self -> next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Queued)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "QUEUED" => Ok(JobStatus::Queued),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Webhook bookkeeping carried on the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Job has not reached a deliverable terminal state (or was cancelled)
    None,
    /// Terminal, result not yet acknowledged
    Pending,
    /// Webhook answered 2xx
    Delivered,
    /// Retry budget spent without acknowledgement
    Exhausted,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::None => "NONE",
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Exhausted => "EXHAUSTED",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NONE" => Ok(DeliveryStatus::None),
            "PENDING" => Ok(DeliveryStatus::Pending),
            "DELIVERED" => Ok(DeliveryStatus::Delivered),
            "EXHAUSTED" => Ok(DeliveryStatus::Exhausted),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(DomainError::UnknownRole(other.to_string())),
        }
    }
}

/// One conversation entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

/// Job Entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    // Identity (immutable)
    pub id: JobId,
    pub user_id: String,
    pub agent_id: String,
    pub conversation_id: String,
    pub webhook_url: String,

    // Conversation (append-only)
    pub messages: Vec<Message>,

    pub status: JobStatus,

    // Execution retries
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,

    pub created_at: i64, // epoch ms
    pub available_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,

    // Lease (execution, then delivery)
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<i64>,

    pub delivery_status: DeliveryStatus,
}

impl Job {
    /// Create a new queued job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        conversation_id: impl Into<String>,
        webhook_url: impl Into<String>,
        messages: Vec<Message>,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            conversation_id: conversation_id.into(),
            webhook_url: webhook_url.into(),
            messages,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts,
            last_error: None,
            created_at,
            available_at: created_at,
            started_at: None,
            finished_at: None,
            lease_owner: None,
            lease_expires_at: None,
            delivery_status: DeliveryStatus::None,
        }
    }

    /// Create a test job with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    ///
    /// **Note**: This method should only be used in tests. For production code,
    /// always inject ID and time via providers.
    pub fn new_test(conversation_id: impl Into<String>, messages: Vec<Message>) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self::new(
            format!("test-{}", counter),
            (counter * 1000) as i64,
            "user-test",
            "agent-test",
            conversation_id,
            "http://127.0.0.1:9/hook",
            messages,
            3,
        )
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Queued -> Running under a fresh lease
    pub fn start(&mut self, owner: &str, now_millis: i64, lease_ms: i64) -> Result<()> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(now_millis);
        self.lease_owner = Some(owner.to_string());
        self.lease_expires_at = Some(now_millis + lease_ms);
        Ok(())
    }

    /// Running -> Queued, counting one execution attempt
    pub fn requeue(&mut self, available_at: i64, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Queued)?;
        self.attempts += 1;
        self.available_at = available_at;
        self.last_error = Some(error.into());
        self.started_at = None;
        self.release_lease();
        Ok(())
    }

    /// Running -> Succeeded; the result now awaits delivery
    pub fn succeed(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Succeeded)?;
        self.finished_at = Some(now_millis);
        self.delivery_status = DeliveryStatus::Pending;
        Ok(())
    }

    /// Running -> Failed; the failure still awaits delivery
    pub fn fail(&mut self, now_millis: i64, attempts: u32, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.attempts = attempts;
        self.last_error = Some(error.into());
        self.finished_at = Some(now_millis);
        self.delivery_status = DeliveryStatus::Pending;
        Ok(())
    }

    /// {Queued, Running} -> Cancelled; nothing is delivered
    pub fn cancel(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Cancelled)?;
        self.finished_at = Some(now_millis);
        self.release_lease();
        Ok(())
    }

    pub fn release_lease(&mut self) {
        self.lease_owner = None;
        self.lease_expires_at = None;
    }

    /// True when `owner` holds an unexpired lease
    pub fn is_leased_by(&self, owner: &str, now_millis: i64) -> bool {
        self.lease_owner.as_deref() == Some(owner)
            && self.lease_expires_at.is_some_and(|t| t > now_millis)
    }

    /// True when nobody holds an unexpired lease
    pub fn lease_expired(&self, now_millis: i64) -> bool {
        self.lease_expires_at.map_or(true, |t| t <= now_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new_test("c1", vec![Message::user("hello")])
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = job();
        job.start("w1", 10, 100).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.is_leased_by("w1", 50));
        assert!(!job.is_leased_by("w1", 110));

        job.succeed(20).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.delivery_status, DeliveryStatus::Pending);
        assert_eq!(job.finished_at, Some(20));
    }

    #[test]
    fn test_requeue_counts_attempt_and_drops_lease() {
        let mut job = job();
        job.start("w1", 10, 100).unwrap();
        job.requeue(500, "model down").unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.available_at, 500);
        assert_eq!(job.last_error.as_deref(), Some("model down"));
        assert!(job.lease_owner.is_none());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Cancelled] {
            for next in JobStatus::ALL {
                assert!(
                    !terminal.can_transition_to(next),
                    "{} -> {} must be rejected",
                    terminal,
                    next
                );
            }
        }
    }

    #[test]
    fn test_queued_job_cannot_succeed_directly() {
        let mut job = job();
        let err = job.succeed(10).unwrap_err();
        assert!(err.to_string().contains("QUEUED -> SUCCEEDED"));
    }

    #[test]
    fn test_queued_job_can_be_cancelled() {
        let mut job = job();
        job.cancel(5).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.delivery_status, DeliveryStatus::None);
        assert!(job.start("w1", 6, 100).is_err());
    }

    #[test]
    fn test_role_round_trip_rejects_unknown() {
        assert_eq!("tool".parse::<Role>().unwrap(), Role::Tool);
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn test_status_parse() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<JobStatus>().is_err());
    }
}
