// Language model client
//
// POST {endpoint} {"job_id", "agent_id", "messages", "tools_enabled"}
// -> {"type": "final", "content"} | {"type": "retrieve", "query", "top_k"?}

use crate::client::{build_client, timeout_ms};
use async_trait::async_trait;
use courier_core::domain::Message;
use courier_core::error::Result;
use courier_core::port::{LanguageModel, ModelError, ModelRequest, ModelTurn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_ERROR_BODY_CHARS: usize = 256;

#[derive(Serialize)]
struct CompletionBody<'a> {
    job_id: &'a str,
    agent_id: &'a str,
    messages: &'a [Message],
    tools_enabled: bool,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum CompletionResponse {
    Final {
        content: String,
    },
    Retrieve {
        query: String,
        #[serde(default)]
        top_k: Option<usize>,
    },
}

impl From<CompletionResponse> for ModelTurn {
    fn from(response: CompletionResponse) -> Self {
        match response {
            CompletionResponse::Final { content } => ModelTurn::Final(content),
            CompletionResponse::Retrieve { query, top_k } => ModelTurn::Retrieve { query, top_k },
        }
    }
}

pub struct HttpLanguageModel {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpLanguageModel {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
            timeout,
        })
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn complete(
        &self,
        request: ModelRequest<'_>,
    ) -> std::result::Result<ModelTurn, ModelError> {
        let body = CompletionBody {
            job_id: request.job_id,
            agent_id: request.agent_id,
            messages: request.messages,
            tools_enabled: request.tools_enabled,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Unavailable(format!(
                        "no answer within {}ms",
                        timeout_ms(self.timeout)
                    ))
                } else {
                    ModelError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ModelError::Unavailable(format!(
                "model answered {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let message: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(MAX_ERROR_BODY_CHARS)
                .collect();
            return Err(ModelError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;

        Ok(parsed.into())
    }
}
