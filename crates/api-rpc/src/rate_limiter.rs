//! Rate Limiter (Token Bucket)
//!
//! Tokens and the last refill instant live in one packed `AtomicU64` so
//! `try_acquire` is a lock-free CAS loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Token bucket shared by every RPC method
pub struct RateLimiter {
    // Upper 32 bits: tokens, lower 32 bits: ms since `epoch` of the last refill
    packed: AtomicU64,
    epoch: Instant,
    burst: u32,
    per_second: u32,
}

fn pack(tokens: u32, at_ms: u32) -> u64 {
    ((tokens as u64) << 32) | at_ms as u64
}

fn unpack(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, (packed & 0xFFFF_FFFF) as u32)
}

impl RateLimiter {
    /// `burst` requests at once, refilled at `per_second`
    pub fn new(burst: u32, per_second: u32) -> Self {
        Self {
            packed: AtomicU64::new(pack(burst, 0)),
            epoch: Instant::now(),
            burst,
            per_second,
        }
    }

    /// Take one token; false when the bucket is empty
    pub fn try_acquire(&self) -> bool {
        let now_ms = u32::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u32::MAX);
        let mut current = self.packed.load(Ordering::Acquire);

        loop {
            let (tokens, last_ms) = unpack(current);
            let refill = now_ms.saturating_sub(last_ms) as u64 * self.per_second as u64 / 1000;
            let available = (tokens as u64 + refill).min(self.burst as u64) as u32;

            // Refill clock moves only when whole tokens were added
            let stamp = if refill > 0 { now_ms } else { last_ms };

            let (next, allowed) = match available.checked_sub(1) {
                Some(left) => (pack(left, stamp), true),
                None => (pack(0, stamp), false),
            };

            match self
                .packed
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return allowed,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_allows_burst_then_denies() {
        let limiter = RateLimiter::new(10, 1);

        for _ in 0..10 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_refills_over_time() {
        let limiter = RateLimiter::new(5, 20);
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_the_bucket() {
        let limiter = Arc::new(RateLimiter::new(100, 1));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { (0..20).filter(|_| limiter.try_acquire()).count() })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            allowed += handle.await.unwrap();
        }
        // 200 attempts against a burst of 100; refill adds at most a handful
        assert!((100..=102).contains(&allowed), "allowed {}", allowed);
    }
}
