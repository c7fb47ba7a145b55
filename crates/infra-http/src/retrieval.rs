// Vector index client
//
// POST {endpoint} {"query", "top_k"} -> {"passages": [{"passage_id", "text", "score"}]}

use crate::client::{build_client, timeout_ms};
use async_trait::async_trait;
use courier_core::domain::{Passage, RetrievalResult};
use courier_core::error::Result;
use courier_core::port::{RetrievalError, RetrievalTool};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    passages: Vec<Passage>,
}

pub struct HttpRetrievalTool {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpRetrievalTool {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
            timeout,
        })
    }
}

#[async_trait]
impl RetrievalTool for HttpRetrievalTool {
    async fn query(
        &self,
        text: &str,
        top_k: usize,
    ) -> std::result::Result<RetrievalResult, RetrievalError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&QueryBody { query: text, top_k })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RetrievalError::Unavailable(format!(
                        "index did not answer within {}ms",
                        timeout_ms(self.timeout)
                    ))
                } else {
                    RetrievalError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RetrievalError::Unavailable(format!(
                "index answered {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(RetrievalError::Malformed(format!(
                "index rejected query with status {}",
                status.as_u16()
            )));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;

        debug!(hits = body.passages.len(), top_k, "Retrieval query answered");
        Ok(RetrievalResult::ranked(body.passages, top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{closed_port_url, serve};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn index(answer: Value) -> String {
        let app = Router::new().route(
            "/query",
            post(move |Json(req): Json<Value>| {
                let answer = answer.clone();
                async move {
                    assert!(req["query"].is_string());
                    Json(answer)
                }
            }),
        );
        format!("{}/query", serve(app).await)
    }

    #[tokio::test]
    async fn test_results_are_ranked_and_truncated() {
        let url = index(json!({
            "passages": [
                {"passage_id": "b", "text": "beta", "score": 0.5},
                {"passage_id": "a", "text": "alpha", "score": 0.5},
                {"passage_id": "c", "text": "gamma", "score": 1.7},
                {"passage_id": "d", "text": "delta", "score": 0.1}
            ]
        }))
        .await;
        let tool = HttpRetrievalTool::new(url, Duration::from_secs(5)).unwrap();

        let result = tool.query("greek letters", 3).await.unwrap();
        let ids: Vec<&str> = result
            .passages()
            .iter()
            .map(|p| p.passage_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(result.passages()[0].score, 1.0);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let url = index(json!({"hits": []})).await;
        let tool = HttpRetrievalTool::new(url, Duration::from_secs(5)).unwrap();

        let err = tool.query("anything", 5).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Malformed(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let app = Router::new().route(
            "/query",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "warming up") }),
        );
        let url = format!("{}/query", serve(app).await);
        let tool = HttpRetrievalTool::new(url, Duration::from_secs(5)).unwrap();

        let err = tool.query("anything", 5).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Unavailable(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_unreachable_index_is_unavailable() {
        let url = format!("{}/query", closed_port_url().await);
        let tool = HttpRetrievalTool::new(url, Duration::from_secs(5)).unwrap();

        let err = tool.query("anything", 5).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Unavailable(_)), "{:?}", err);
    }
}
