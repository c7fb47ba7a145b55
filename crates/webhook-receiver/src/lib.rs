//! Webhook receiver
//!
//! Accepts any JSON POST and answers 200 `OK`. Every request is recorded in
//! memory so tests can assert on what the pipeline delivered. The answer can
//! be forced to a fixed status, to fail the first N requests, or to redirect
//! every POST with a 303. GETs that follow such a redirect are counted.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// How the receiver answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// 200 for every request
    Accept,
    /// Always this status
    Always(u16),
    /// `status` for the first `count` requests, then 200
    FailFirst { count: usize, status: u16 },
    /// 303 See Other pointing at [`REDIRECT_TARGET`]
    Redirect,
}

/// Location sent by [`Behavior::Redirect`]
pub const REDIRECT_TARGET: &str = "/redirected";

/// One received POST
#[derive(Debug, Clone, Serialize)]
pub struct Received {
    pub path: String,
    /// Lowercased header names
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    /// Status the receiver answered with
    pub answered: u16,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug)]
pub struct ReceiverState {
    behavior: Behavior,
    received: Mutex<Vec<Received>>,
    followed: AtomicUsize,
}

impl ReceiverState {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            received: Mutex::new(Vec::new()),
            followed: AtomicUsize::new(0),
        })
    }

    pub fn received(&self) -> Vec<Received> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// GET requests received, i.e. redirects a client followed
    pub fn followed(&self) -> usize {
        self.followed.load(Ordering::SeqCst)
    }

    fn status_for(&self, index: usize) -> StatusCode {
        let code = match self.behavior {
            Behavior::Accept => 200,
            Behavior::Always(status) => status,
            Behavior::FailFirst { count, status } if index < count => status,
            Behavior::FailFirst { .. } => 200,
            Behavior::Redirect => 303,
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

async fn receive(
    State(state): State<Arc<ReceiverState>>,
    uri: axum::http::Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut received = state.received.lock().unwrap_or_else(|e| e.into_inner());
    let status = state.status_for(received.len());

    debug!(path = %uri.path(), status = status.as_u16(), "Webhook received");
    received.push(Received {
        path: uri.path().to_string(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body,
        answered: status.as_u16(),
    });

    if status.is_success() {
        (status, "OK").into_response()
    } else if status.is_redirection() {
        (status, [(header::LOCATION, REDIRECT_TARGET)], "redirect").into_response()
    } else {
        (status, "error").into_response()
    }
}

async fn follow(State(state): State<Arc<ReceiverState>>) -> &'static str {
    state.followed.fetch_add(1, Ordering::SeqCst);
    "OK"
}

/// Routes: POST on any path records, GET on any path counts a followed redirect
pub fn router(state: Arc<ReceiverState>) -> Router {
    Router::new()
        .route("/", post(receive).get(follow))
        .route("/{*path}", post(receive).get(follow))
        .with_state(state)
}

/// A receiver serving in the background
pub struct RunningReceiver {
    addr: SocketAddr,
    state: Arc<ReceiverState>,
    stop: Option<oneshot::Sender<()>>,
}

impl RunningReceiver {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Absolute URL for `path` on this receiver
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    pub fn state(&self) -> &Arc<ReceiverState> {
        &self.state
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received()
    }

    pub fn count(&self) -> usize {
        self.state.count()
    }

    pub fn followed(&self) -> usize {
        self.state.followed()
    }
}

impl Drop for RunningReceiver {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Bind `addr` (port 0 for any) and serve until the handle is dropped
pub async fn spawn(addr: &str, behavior: Behavior) -> std::io::Result<RunningReceiver> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let state = ReceiverState::new(behavior);
    let (stop, stopped) = oneshot::channel::<()>();

    let app = router(Arc::clone(&state));
    tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stopped.await;
            })
            .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "Webhook receiver stopped with error");
        }
    });

    info!(addr = %addr, behavior = ?behavior, "Webhook receiver listening");
    Ok(RunningReceiver {
        addr,
        state,
        stop: Some(stop),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn post(url: &str, body: Value) -> (u16, String) {
        let response = reqwest::Client::new()
            .post(url)
            .header("X-Courier-Job-Id", "job-1")
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }

    #[tokio::test]
    async fn test_accepts_and_records() {
        let receiver = spawn("127.0.0.1:0", Behavior::Accept).await.unwrap();

        let (status, body) = post(&receiver.url("/cb"), json!({"jobId": "job-1"})).await;
        assert_eq!(status, 200);
        assert_eq!(body, "OK");

        let received = receiver.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].path, "/cb");
        assert_eq!(received[0].body["jobId"], "job-1");
        assert_eq!(received[0].header("X-Courier-Job-Id"), Some("job-1"));
    }

    #[tokio::test]
    async fn test_always_failing() {
        let receiver = spawn("127.0.0.1:0", Behavior::Always(500)).await.unwrap();

        for _ in 0..2 {
            let (status, _) = post(&receiver.url("hook"), json!({})).await;
            assert_eq!(status, 500);
        }
        assert_eq!(receiver.count(), 2);
    }

    #[tokio::test]
    async fn test_fail_first_then_accept() {
        let receiver = spawn(
            "127.0.0.1:0",
            Behavior::FailFirst {
                count: 2,
                status: 503,
            },
        )
        .await
        .unwrap();

        let mut statuses = Vec::new();
        for _ in 0..3 {
            statuses.push(post(&receiver.url("hook"), json!({})).await.0);
        }
        assert_eq!(statuses, vec![503, 503, 200]);
        let answered: Vec<u16> = receiver.received().iter().map(|r| r.answered).collect();
        assert_eq!(answered, statuses);
    }

    #[tokio::test]
    async fn test_redirect_answers_see_other() {
        let receiver = spawn("127.0.0.1:0", Behavior::Redirect).await.unwrap();

        let response = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
            .post(receiver.url("hook"))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 303);
        assert_eq!(response.headers()["location"], REDIRECT_TARGET);
        assert_eq!(receiver.received()[0].answered, 303);

        // A client that does follow lands on the GET counter
        let followed = reqwest::get(receiver.url(REDIRECT_TARGET)).await.unwrap();
        assert_eq!(followed.status().as_u16(), 200);
        assert_eq!(receiver.followed(), 1);
        assert_eq!(receiver.count(), 1);
    }
}
