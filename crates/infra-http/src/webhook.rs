// Webhook sender over reqwest
use crate::client::{build_webhook_client, timeout_ms};
use async_trait::async_trait;
use courier_core::application::engine::constants::MAX_RECORDED_BODY_CHARS;
use courier_core::error::Result;
use courier_core::port::{DeliveryError, WebhookRequest, WebhookResponse, WebhookSender};
use std::time::Duration;
use tracing::debug;

/// Job id header, lets receivers correlate redeliveries
pub const JOB_ID_HEADER: &str = "X-Courier-Job-Id";
/// Delivery attempt sequence header
pub const DELIVERY_ATTEMPT_HEADER: &str = "X-Courier-Delivery-Attempt";

/// Response bytes read per attempt; enough for the recorded chars in any UTF-8
const MAX_READ_BODY_BYTES: usize = MAX_RECORDED_BODY_CHARS * 4;

pub struct ReqwestWebhookSender {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestWebhookSender {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_webhook_client(request_timeout)?,
            timeout: request_timeout,
        })
    }
}

#[async_trait]
impl WebhookSender for ReqwestWebhookSender {
    async fn post(
        &self,
        request: &WebhookRequest<'_>,
    ) -> std::result::Result<WebhookResponse, DeliveryError> {
        debug!(
            job_id = %request.job_id,
            sequence = request.sequence,
            url = %request.url,
            "POST webhook"
        );

        let response = self
            .client
            .post(request.url)
            .header(JOB_ID_HEADER, request.job_id.as_str())
            .header(DELIVERY_ATTEMPT_HEADER, request.sequence.to_string())
            .json(request.payload)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let body = read_capped(response, MAX_READ_BODY_BYTES).await;

        Ok(WebhookResponse { status, body })
    }
}

/// Read at most `cap` bytes of the body, dropping the rest unread.
/// Body is diagnostic only; a read error keeps what arrived so far.
async fn read_capped(mut response: reqwest::Response, cap: usize) -> String {
    let mut buf: Vec<u8> = Vec::new();
    while buf.len() < cap {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(cap - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Webhook response body unreadable");
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

impl ReqwestWebhookSender {
    fn classify(&self, err: reqwest::Error) -> DeliveryError {
        if err.is_timeout() {
            DeliveryError::Timeout(timeout_ms(self.timeout))
        } else {
            DeliveryError::Network(err.to_string())
        }
    }
}
