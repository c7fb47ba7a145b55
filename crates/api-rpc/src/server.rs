//! JSON-RPC Server
//!
//! JSON-RPC 2.0 over HTTP on a local TCP port.

use crate::error::ServerError;
use crate::handler::RpcHandler;
use crate::types::{JobIdRequest, MaintenanceRequest, StatsRequest};
use courier_core::application::SubmitRequest;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9627;
const DEFAULT_RATE_LIMIT_BURST: u32 = 200;
const DEFAULT_RATE_LIMIT_PER_SEC: u32 = 100;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    /// 0 picks a free port (tests)
    pub port: u16,
    pub rate_limit_burst: u32,
    pub rate_limit_per_sec: u32,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            rate_limit_per_sec: DEFAULT_RATE_LIMIT_PER_SEC,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

macro_rules! register {
    ($module:expr, $handler:expr, $method:literal, $params:ty, $call:ident) => {{
        let handler = Arc::clone(&$handler);
        $module
            .register_async_method($method, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: $params = params.parse()?;
                    handler.$call(req).await
                }
            })
            .map_err(|e| ServerError::Register {
                method: $method,
                message: e.to_string(),
            })?;
    }};
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: Arc<RpcHandler>) -> Self {
        Self { config, handler }
    }

    /// Bind and start serving; returns the bound address and a stop handle
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = server
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let mut module = RpcModule::new(());

        register!(module, self.handler, "agent.submit.v1", SubmitRequest, submit);
        register!(module, self.handler, "agent.status.v1", JobIdRequest, status);
        register!(module, self.handler, "agent.cancel.v1", JobIdRequest, cancel);
        register!(module, self.handler, "agent.deliveries.v1", JobIdRequest, deliveries);
        register!(module, self.handler, "admin.stats.v1", StatsRequest, stats);
        register!(module, self.handler, "admin.maintenance.v1", MaintenanceRequest, maintenance);

        let handle = server.start(module);
        info!(addr = %local_addr, "JSON-RPC server started");

        Ok((local_addr, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use courier_core::application::TaskDispatcher;
    use courier_core::port::id_provider::mocks::SequentialIdProvider;
    use courier_core::port::job_repository::mocks::InMemoryJobRepository;
    use courier_core::port::time_provider::mocks::ManualClock;
    use courier_core::port::{Maintenance, MaintenanceConfig, MaintenanceStats};
    use serde_json::{json, Value};

    struct NoMaintenance;

    #[async_trait::async_trait]
    impl Maintenance for NoMaintenance {
        async fn vacuum(&self) -> courier_core::Result<f64> {
            Ok(0.0)
        }
        async fn gc_finished_jobs(&self, _retention_days: i64) -> courier_core::Result<i64> {
            Ok(0)
        }
        async fn get_stats(&self) -> courier_core::Result<MaintenanceStats> {
            Ok(MaintenanceStats::default())
        }
    }

    async fn start_server() -> (String, ServerHandle) {
        let clock = Arc::new(ManualClock::new(1_000));
        let dispatcher = Arc::new(TaskDispatcher::new(
            Arc::new(InMemoryJobRepository::new(clock.clone())),
            Arc::new(SequentialIdProvider::new("job")),
            clock,
            3,
        ));
        let handler = Arc::new(RpcHandler::new(
            dispatcher,
            Arc::new(NoMaintenance),
            MaintenanceConfig::default(),
            100,
            100,
        ));
        let config = RpcServerConfig {
            port: 0,
            ..Default::default()
        };
        let (addr, handle) = RpcServer::new(config, handler).start().await.unwrap();
        (format!("http://{}", addr), handle)
    }

    async fn call(url: &str, method: &str, params: Value) -> Value {
        reqwest::Client::new()
            .post(url)
            .json(&json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_accepts_camel_case_keys() {
        let (url, handle) = start_server().await;

        let response = call(
            &url,
            "agent.submit.v1",
            json!({
                "userId": "u1",
                "agentId": "a1",
                "conversationId": "c1",
                "webhookUrl": "http://example.com/cb",
                "messages": [{"role": "user", "content": "hello"}]
            }),
        )
        .await;
        assert_eq!(response["result"]["job_id"], "job-1");
        assert_eq!(response["result"]["status"], "queued");

        let response = call(&url, "agent.status.v1", json!({"jobId": "job-1"})).await;
        assert_eq!(response["result"]["conversation_id"], "c1");
        assert_eq!(response["result"]["delivery_status"], "none");

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn test_errors_carry_codes() {
        let (url, handle) = start_server().await;

        let response = call(
            &url,
            "agent.submit.v1",
            json!({
                "user_id": "u1",
                "agent_id": "a1",
                "conversation_id": "c1",
                "webhook_url": "http://example.com/cb",
                "messages": []
            }),
        )
        .await;
        assert_eq!(response["error"]["code"], code::VALIDATION_ERROR);

        let response = call(&url, "agent.cancel.v1", json!({"job_id": "missing"})).await;
        assert_eq!(response["error"]["code"], code::NOT_FOUND);

        handle.stop().unwrap();
    }
}
