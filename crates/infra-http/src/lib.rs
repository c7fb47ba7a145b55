// Courier Infrastructure - HTTP Adapters
// Implements: WebhookSender, RetrievalTool, LanguageModel

mod client;
mod model;
mod retrieval;
mod webhook;

#[cfg(test)]
mod test_server;

pub use client::{build_client, build_webhook_client};
pub use model::HttpLanguageModel;
pub use retrieval::HttpRetrievalTool;
pub use webhook::{ReqwestWebhookSender, DELIVERY_ATTEMPT_HEADER, JOB_ID_HEADER};
