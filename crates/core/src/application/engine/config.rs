// Engine configuration (plain values; the daemon maps its config file onto this)

use super::constants::*;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workers: usize,
    pub lease_ms: i64,
    /// Copied onto each job at submit time
    pub max_attempts: u32,
    pub retry_base_delay_ms: i64,
    pub max_tool_rounds: u32,
    pub retrieval_top_k: usize,
    pub model_timeout: Duration,
    pub retrieval_timeout: Duration,
    pub idle_poll: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            lease_ms: DEFAULT_LEASE_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            retrieval_top_k: DEFAULT_RETRIEVAL_TOP_K,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            retrieval_timeout: DEFAULT_RETRIEVAL_TIMEOUT,
            idle_poll: IDLE_SLEEP_DURATION,
        }
    }
}
