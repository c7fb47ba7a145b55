// Engine constants (no magic values)
use std::time::Duration;

/// Sleep duration when no jobs are available (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Sleep duration after worker error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default number of parallel workers
pub const DEFAULT_WORKERS: usize = 4;

/// Default execution lease (120s), renewed at every round boundary.
/// Must outlast the longest single external call.
pub const DEFAULT_LEASE_MS: i64 = 120 * 1000;

/// Default execution attempts per job
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default retry base delay (1000ms = 1s)
pub const DEFAULT_RETRY_BASE_DELAY_MS: i64 = 1000;

/// Execution backoff multiplier
pub const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 2.0;

/// Default retrieval rounds per job
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 3;

/// Default passages per retrieval
pub const DEFAULT_RETRIEVAL_TOP_K: usize = 5;

/// Upper bound on passages a model may request
pub const MAX_RETRIEVAL_TOP_K: usize = 50;

/// Default model call timeout (60s)
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default retrieval call timeout (10s)
pub const DEFAULT_RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default webhook POSTs per job
pub const DEFAULT_DELIVERY_MAX_ATTEMPTS: u32 = 3;

/// Default wait before the second webhook POST (1s)
pub const DEFAULT_DELIVERY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default cap on webhook backoff (30s)
pub const DEFAULT_DELIVERY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default webhook POST timeout (10s)
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between recovery sweeps (30s)
pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(30);

/// Response bodies kept in delivery attempt records
pub const MAX_RECORDED_BODY_CHARS: usize = 512;
