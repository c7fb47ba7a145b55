// Shared reqwest client construction
use courier_core::error::{AppError, Result};
use std::time::Duration;

const USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

fn builder(timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
}

fn finish(builder: reqwest::ClientBuilder) -> Result<reqwest::Client> {
    builder
        .build()
        .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Build a client whose requests give up after `timeout`
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    finish(builder(timeout))
}

/// Like [`build_client`], but 3xx answers are returned instead of followed.
/// Only a 2xx to the POST itself acknowledges a webhook delivery.
pub fn build_webhook_client(timeout: Duration) -> Result<reqwest::Client> {
    finish(builder(timeout).redirect(reqwest::redirect::Policy::none()))
}

pub(crate) fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
