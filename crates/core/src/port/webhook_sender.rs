// Webhook Sender Port
// One HTTP POST per call; retries and bookkeeping live in the delivery service.

use crate::domain::{JobId, WebhookPayload};
use async_trait::async_trait;
use thiserror::Error;

/// One POST to a caller's webhook
#[derive(Debug, Clone, Copy)]
pub struct WebhookRequest<'a> {
    pub url: &'a str,
    pub job_id: &'a JobId,
    /// Delivery attempt sequence (sent as a header for receiver-side dedup)
    pub sequence: u32,
    pub payload: &'a WebhookPayload,
}

/// Any HTTP response, 2xx or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

/// Delivery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Webhook timed out after {0}ms")]
    Timeout(u64),

    #[error("Webhook rejected delivery with status {status}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// POST the payload as JSON
    ///
    /// Returns `Ok` for any HTTP response; `Err` only when no response arrived.
    async fn post(&self, request: &WebhookRequest<'_>) -> Result<WebhookResponse, DeliveryError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A request as the mock saw it
    #[derive(Debug, Clone)]
    pub struct RecordedPost {
        pub url: String,
        pub job_id: JobId,
        pub sequence: u32,
        pub payload: WebhookPayload,
    }

    /// Plays back scripted responses, then answers `fallback_status`
    pub struct RecordingWebhookSender {
        script: Mutex<VecDeque<Result<u16, DeliveryError>>>,
        fallback_status: u16,
        posts: Mutex<Vec<RecordedPost>>,
    }

    impl RecordingWebhookSender {
        pub fn new(script: impl IntoIterator<Item = Result<u16, DeliveryError>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                fallback_status: 200,
                posts: Mutex::new(Vec::new()),
            }
        }

        pub fn always(status: u16) -> Self {
            Self {
                fallback_status: status,
                ..Self::new(Vec::new())
            }
        }

        pub fn accepting() -> Self {
            Self::always(200)
        }

        pub fn posts(&self) -> Vec<RecordedPost> {
            self.posts.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        pub fn post_count(&self) -> usize {
            self.posts.lock().unwrap_or_else(|e| e.into_inner()).len()
        }
    }

    #[async_trait]
    impl WebhookSender for RecordingWebhookSender {
        async fn post(
            &self,
            request: &WebhookRequest<'_>,
        ) -> Result<WebhookResponse, DeliveryError> {
            self.posts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(RecordedPost {
                    url: request.url.to_string(),
                    job_id: request.job_id.clone(),
                    sequence: request.sequence,
                    payload: request.payload.clone(),
                });

            let next = self
                .script
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();

            let status = match next {
                Some(Ok(status)) => status,
                Some(Err(e)) => return Err(e),
                None => self.fallback_status,
            };
            Ok(WebhookResponse {
                status,
                body: if (200..300).contains(&status) {
                    "OK".to_string()
                } else {
                    "error".to_string()
                },
            })
        }
    }
}
