// Retry logic: execution re-queue backoff and webhook delivery backoff
use crate::domain::Job;
use crate::port::TimeProvider;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::engine::constants::{
    DEFAULT_DELIVERY_BASE_DELAY, DEFAULT_DELIVERY_MAX_ATTEMPTS, DEFAULT_DELIVERY_MAX_DELAY,
    DEFAULT_DELIVERY_TIMEOUT, DEFAULT_LEASE_MS, DEFAULT_RETRY_BACKOFF_FACTOR,
};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue the job (with backoff delay in ms)
    Retry(i64),
    /// Do not retry, job has failed permanently
    Failed,
}

/// Execution retry policy
///
/// A failed run always counts one attempt. The job is re-queued while the
/// incremented count stays below `max_attempts`.
pub struct RetryPolicy {
    time_provider: Arc<dyn TimeProvider>,
    base_delay_ms: i64,
    backoff_factor: f64,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `time_provider` - Time provider for current time
    /// * `base_delay_ms` - Base delay in milliseconds (default: 1000)
    pub fn new(time_provider: Arc<dyn TimeProvider>, base_delay_ms: i64) -> Self {
        Self {
            time_provider,
            base_delay_ms,
            backoff_factor: DEFAULT_RETRY_BACKOFF_FACTOR,
        }
    }

    /// Determine if a job should be retried after one more failed run
    ///
    /// Backoff formula:
    /// delay = base_delay * (backoff_factor ^ attempts) * jitter(0.9..1.1)
    pub fn should_retry(&self, job: &Job) -> RetryDecision {
        let attempts_after = job.attempts + 1;
        if attempts_after >= job.max_attempts {
            warn!(
                job_id = %job.id,
                attempts = %attempts_after,
                max_attempts = %job.max_attempts,
                "Max execution attempts reached"
            );
            return RetryDecision::Failed;
        }

        let base_delay_ms = self.base_delay_ms as f64 * self.backoff_factor.powi(job.attempts as i32);

        // ±10% jitter, seeded by job id so it is deterministic per job
        let jitter_seed = job.id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0);

        let delay_ms = (base_delay_ms * jitter_factor) as i64;

        info!(
            job_id = %job.id,
            attempt = %attempts_after,
            max_attempts = %job.max_attempts,
            delay_ms = %delay_ms,
            "Scheduling execution retry"
        );

        RetryDecision::Retry(delay_ms)
    }

    /// Earliest lease time for a job re-queued with `delay_ms`
    pub fn available_at(&self, delay_ms: i64) -> i64 {
        self.time_provider.now_millis() + delay_ms
    }
}

/// Webhook delivery policy
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Total POSTs per job, first try included
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles after each further failure
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on each POST
    pub request_timeout: Duration,
    /// Delivery claim lease, renewed before each attempt
    pub claim_lease_ms: i64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_DELIVERY_MAX_ATTEMPTS,
            base_delay: DEFAULT_DELIVERY_BASE_DELAY,
            max_delay: DEFAULT_DELIVERY_MAX_DELAY,
            request_timeout: DEFAULT_DELIVERY_TIMEOUT,
            claim_lease_ms: DEFAULT_LEASE_MS,
        }
    }
}

impl DeliveryPolicy {
    /// Wait before attempt `sequence` (1-based): none for the first,
    /// then `base * 2^(sequence - 2)` capped at `max_delay`
    pub fn delay_before(&self, sequence: u32) -> Duration {
        if sequence <= 1 {
            return Duration::ZERO;
        }
        let exponent = (sequence - 2).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
