// Submit Use Case

use crate::domain::{Job, JobId, Message, Role};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobRepository, TimeProvider};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

/// Longest accepted identifier (user, agent, conversation)
pub const MAX_ID_LEN: usize = 256;

/// Most messages accepted in one trigger
pub const MAX_MESSAGES: usize = 256;

/// One incoming message before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInput {
    pub role: String,
    pub content: String,
}

impl MessageInput {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Trigger submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(alias = "agentId")]
    pub agent_id: String,
    #[serde(alias = "conversationId")]
    pub conversation_id: String,
    #[serde(alias = "webhookUrl")]
    pub webhook_url: String,
    pub messages: Vec<MessageInput>,
}

/// Validate a trigger and convert its messages
///
/// Nothing is written when this fails.
pub fn validate_request(req: &SubmitRequest) -> Result<Vec<Message>> {
    validate_id("user_id", &req.user_id)?;
    validate_id("agent_id", &req.agent_id)?;
    validate_id("conversation_id", &req.conversation_id)?;
    validate_webhook_url(&req.webhook_url)?;

    if req.messages.is_empty() {
        return Err(AppError::Validation("messages cannot be empty".to_string()));
    }
    if req.messages.len() > MAX_MESSAGES {
        return Err(AppError::Validation(format!(
            "too many messages ({} > {})",
            req.messages.len(),
            MAX_MESSAGES
        )));
    }

    req.messages
        .iter()
        .enumerate()
        .map(|(i, input)| {
            let role = Role::from_str(&input.role).map_err(|_| {
                AppError::Validation(format!(
                    "messages[{}]: unrecognized role '{}'",
                    i, input.role
                ))
            })?;
            if input.content.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "messages[{}]: content cannot be empty",
                    i
                )));
            }
            Ok(Message::new(role, input.content.clone()))
        })
        .collect()
}

fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} cannot be empty", field)));
    }
    if value.chars().count() > MAX_ID_LEN {
        return Err(AppError::Validation(format!(
            "{} too long (max {} chars)",
            field, MAX_ID_LEN
        )));
    }
    Ok(())
}

/// Absolute http(s) URL with a host
fn validate_webhook_url(raw: &str) -> Result<()> {
    let url = url::Url::parse(raw)
        .map_err(|e| AppError::Validation(format!("webhook_url is not a valid URL: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "webhook_url scheme must be http or https, got '{}'",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(AppError::Validation(
            "webhook_url must include a host".to_string(),
        ));
    }
    Ok(())
}

/// Execute submit use case
///
/// # Arguments
///
/// * `job_repo` - Job repository
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `max_attempts` - Execution budget copied onto the job
/// * `req` - Submit request
pub async fn execute(
    job_repo: &dyn JobRepository,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    max_attempts: u32,
    req: SubmitRequest,
) -> Result<JobId> {
    let messages = validate_request(&req)?;

    let job_id = id_provider.generate_id();
    let created_at = time_provider.now_millis();

    let job = Job::new(
        job_id.clone(),
        created_at,
        req.user_id,
        req.agent_id,
        req.conversation_id,
        req.webhook_url,
        messages,
        max_attempts,
    );

    job_repo.insert(&job).await?;

    info!(
        job_id = %job_id,
        agent_id = %job.agent_id,
        conversation_id = %job.conversation_id,
        messages = job.messages.len(),
        "Job submitted"
    );

    Ok(job_id)
}
