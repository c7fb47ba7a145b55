//! RPC Request/Response Types
//!
//! JSON-RPC method parameters and results. `agent.submit.v1` takes
//! `courier_core::application::SubmitRequest` directly.

use courier_core::domain::{DeliveryAttempt, DeliveryStatus, Job, JobStatus, Message};
use serde::{Deserialize, Serialize};

/// agent.submit.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// agent.status.v1 / agent.cancel.v1 / agent.deliveries.v1
#[derive(Debug, Deserialize)]
pub struct JobIdRequest {
    #[serde(alias = "jobId")]
    pub job_id: String,
}

/// agent.status.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub conversation_id: String,
    pub webhook_url: String,
    pub status: JobStatus,
    pub delivery_status: DeliveryStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub messages: Vec<Message>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            user_id: job.user_id,
            agent_id: job.agent_id,
            conversation_id: job.conversation_id,
            webhook_url: job.webhook_url,
            status: job.status,
            delivery_status: job.delivery_status,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            last_error: job.last_error,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            messages: job.messages,
        }
    }
}

/// agent.cancel.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub cancelled: bool,
}

/// agent.deliveries.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveriesResponse {
    pub job_id: String,
    pub attempts: Vec<DeliveryAttempt>,
}

/// admin.stats.v1 - Get system statistics
#[derive(Debug, Default, Deserialize)]
pub struct StatsRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_jobs: i64,
    pub queued_jobs: i64,
    pub running_jobs: i64,
    pub succeeded_jobs: i64,
    pub failed_jobs: i64,
    pub cancelled_jobs: i64,
    pub pending_deliveries: i64,
    pub delivery_attempts: i64,
    pub db_size_bytes: i64,
    pub uptime_seconds: i64,
}

/// admin.maintenance.v1 - Run manual maintenance
#[derive(Debug, Default, Deserialize)]
pub struct MaintenanceRequest {
    #[serde(default)]
    pub force_vacuum: bool,
    /// Overrides the configured retention window
    #[serde(default)]
    pub retention_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceResponse {
    pub vacuum_run: bool,
    pub jobs_deleted: i64,
    pub db_size_before: i64,
    pub db_size_after: i64,
}
