//! Daemon configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `COURIER__*` environment variables (`__` separates nesting,
//! e.g. `COURIER__ENGINE__WORKERS=8`).

use anyhow::{bail, Result};
use courier_api_rpc::RpcServerConfig;
use courier_core::application::engine::constants::*;
use courier_core::application::{DeliveryPolicy, EngineConfig};
use courier_core::port::MaintenanceConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "~/.courier/courier.toml";
const DEFAULT_DATABASE_URL: &str = "sqlite://~/.courier/courier.db";
const ENV_PREFIX: &str = "COURIER";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CourierConfig {
    pub database: DatabaseSection,
    pub rpc: RpcSection,
    pub engine: EngineSection,
    pub delivery: DeliverySection,
    pub model: EndpointSection,
    pub retrieval: EndpointSection,
    pub maintenance: MaintenanceSection,
    pub recovery: RecoverySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    pub host: String,
    pub port: u16,
    pub rate_limit_burst: u32,
    pub rate_limit_per_sec: u32,
}

impl Default for RpcSection {
    fn default() -> Self {
        let defaults = RpcServerConfig::default();
        Self {
            host: defaults.host,
            port: defaults.port,
            rate_limit_burst: defaults.rate_limit_burst,
            rate_limit_per_sec: defaults.rate_limit_per_sec,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub workers: usize,
    pub lease_ms: i64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: i64,
    pub max_tool_rounds: u32,
    pub retrieval_top_k: usize,
    pub model_timeout_ms: u64,
    pub retrieval_timeout_ms: u64,
    pub idle_poll_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            lease_ms: DEFAULT_LEASE_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            retrieval_top_k: DEFAULT_RETRIEVAL_TOP_K,
            model_timeout_ms: DEFAULT_MODEL_TIMEOUT.as_millis() as u64,
            retrieval_timeout_ms: DEFAULT_RETRIEVAL_TIMEOUT.as_millis() as u64,
            idle_poll_ms: IDLE_SLEEP_DURATION.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliverySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_DELIVERY_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_DELIVERY_BASE_DELAY.as_millis() as u64,
            max_delay_ms: DEFAULT_DELIVERY_MAX_DELAY.as_millis() as u64,
            request_timeout_ms: DEFAULT_DELIVERY_TIMEOUT.as_millis() as u64,
        }
    }
}

/// [model] / [retrieval]
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndpointSection {
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    pub retention_days: i64,
    pub max_db_size_mb: f64,
    pub interval_hours: u64,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        let defaults = MaintenanceConfig::default();
        Self {
            retention_days: defaults.finished_job_retention_days,
            max_db_size_mb: defaults.max_db_size_mb,
            interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub interval_secs: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_RECOVERY_INTERVAL.as_secs(),
        }
    }
}

impl CourierConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.workers == 0 {
            bail!("engine.workers must be at least 1");
        }
        if self.engine.max_attempts == 0 {
            bail!("engine.max_attempts must be at least 1");
        }
        if self.engine.lease_ms <= 0 {
            bail!("engine.lease_ms must be positive");
        }
        // One external call runs between renewals; it must end before the lease does
        let longest_call_ms = self
            .engine
            .model_timeout_ms
            .max(self.engine.retrieval_timeout_ms)
            .max(self.delivery.request_timeout_ms);
        if u64::try_from(self.engine.lease_ms).unwrap_or(0) <= longest_call_ms {
            bail!(
                "engine.lease_ms ({}) must exceed the longest call timeout ({}ms)",
                self.engine.lease_ms,
                longest_call_ms
            );
        }
        if self.delivery.max_attempts == 0 {
            bail!("delivery.max_attempts must be at least 1");
        }
        if self.delivery.base_delay_ms > self.delivery.max_delay_ms {
            bail!("delivery.base_delay_ms cannot exceed delivery.max_delay_ms");
        }
        if self.model.endpoint.trim().is_empty() {
            bail!("model.endpoint is required");
        }
        if self.retrieval.endpoint.trim().is_empty() {
            bail!("retrieval.endpoint is required");
        }
        Ok(())
    }

    /// Database url with `~` expanded
    pub fn database_url(&self) -> String {
        shellexpand::tilde(&self.database.url).into_owned()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workers: self.engine.workers,
            lease_ms: self.engine.lease_ms,
            max_attempts: self.engine.max_attempts,
            retry_base_delay_ms: self.engine.retry_base_delay_ms,
            max_tool_rounds: self.engine.max_tool_rounds,
            retrieval_top_k: self.engine.retrieval_top_k,
            model_timeout: Duration::from_millis(self.engine.model_timeout_ms),
            retrieval_timeout: Duration::from_millis(self.engine.retrieval_timeout_ms),
            idle_poll: Duration::from_millis(self.engine.idle_poll_ms),
        }
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            max_attempts: self.delivery.max_attempts,
            base_delay: Duration::from_millis(self.delivery.base_delay_ms),
            max_delay: Duration::from_millis(self.delivery.max_delay_ms),
            request_timeout: Duration::from_millis(self.delivery.request_timeout_ms),
            claim_lease_ms: self.engine.lease_ms,
        }
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            finished_job_retention_days: self.maintenance.retention_days,
            max_db_size_mb: self.maintenance.max_db_size_mb,
        }
    }

    pub fn rpc_config(&self) -> RpcServerConfig {
        RpcServerConfig {
            host: self.rpc.host.clone(),
            port: self.rpc.port,
            rate_limit_burst: self.rpc.rate_limit_burst,
            rate_limit_per_sec: self.rpc.rate_limit_per_sec,
        }
    }
}

/// Load configuration
///
/// An explicit `path` must exist; the default path is optional.
pub fn load_config(path: Option<PathBuf>) -> Result<CourierConfig, config::ConfigError> {
    build(path, None)
}

fn build(
    path: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
) -> Result<CourierConfig, config::ConfigError> {
    let (file, required) = match path {
        Some(path) => (path, true),
        None => (PathBuf::from(shellexpand::tilde(DEFAULT_CONFIG_PATH).as_ref()), false),
    };

    config::Config::builder()
        .add_source(config::File::from(file).required(required))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
        .build()?
        .try_deserialize()
}
