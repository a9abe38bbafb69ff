//! Fixed Window rate limiting algorithm.
//!
//! The simplest algorithm: a single counter tied to a calendar-aligned
//! window boundary (`now / window_ms * window_ms`), reset when a new
//! boundary is crossed. Cheap and low-memory, but bursty at window edges —
//! a client can send up to `2 * limit` requests in a short span straddling a
//! boundary. Documented and accepted per spec, not a bug.

use std::time::Duration;

use crate::algorithm::{current_timestamp_ms, timestamp_to_instant, Algorithm};
use crate::decision::{Decision, RateLimitInfo};
use crate::error::Result;
use crate::limits::RuleLimits;
use crate::storage::Storage;

/// Fixed Window rate limiting algorithm.
#[derive(Debug, Clone, Default)]
pub struct FixedWindow;

impl FixedWindow {
    /// Create a new Fixed Window algorithm instance.
    pub fn new() -> Self {
        Self
    }

    fn window_start(now: u64, window_ms: u64) -> u64 {
        (now / window_ms) * window_ms
    }

    fn build_info(&self, count: u64, limit: u64, window_start: u64, window_ms: u64) -> RateLimitInfo {
        let remaining = limit.saturating_sub(count);
        let reset_at = timestamp_to_instant(window_start + window_ms);
        let mut info =
            RateLimitInfo::new(limit, remaining, reset_at, timestamp_to_instant(window_start))
                .with_algorithm("fixed_window");

        if count > limit {
            let now = current_timestamp_ms();
            let retry_ms = (window_start + window_ms).saturating_sub(now);
            info = info.with_retry_after(Duration::from_millis(retry_ms));
        }

        info
    }
}

impl Algorithm for FixedWindow {
    fn name(&self) -> &'static str {
        "fixed_window"
    }

    async fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        limits: &RuleLimits,
        cost: u64,
    ) -> Result<Decision> {
        let now = current_timestamp_ms();
        let window_ms = limits.window().as_millis().max(1) as u64;
        let limit = limits.max_requests();
        let window_start = Self::window_start(now, window_ms);
        let ttl = Duration::from_millis((window_start + window_ms - now).max(1));

        let count = storage
            .increment_with_expiry(key, cost, window_start, ttl)
            .await?;

        let info = self.build_info(count, limit, window_start, window_ms);

        Ok(if count <= limit {
            Decision::allowed(info)
        } else {
            Decision::denied(info)
        })
    }

    async fn check<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        limits: &RuleLimits,
        _cost: u64,
    ) -> Result<Decision> {
        let now = current_timestamp_ms();
        let window_ms = limits.window().as_millis().max(1) as u64;
        let limit = limits.max_requests();
        let window_start = Self::window_start(now, window_ms);

        let entry = storage.get(key).await?;
        let count = match entry {
            Some(e) if e.window_start == window_start => e.count,
            _ => 0,
        };

        let info = self.build_info(count, limit, window_start, window_ms);

        Ok(if count <= limit {
            Decision::allowed(info)
        } else {
            Decision::denied(info)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_fixed_window_basic() {
        let algorithm = FixedWindow::new();
        let storage = MemoryStorage::new();
        let limits = RuleLimits::new(3, Duration::from_secs(10));

        for i in 1..=3 {
            let decision = algorithm
                .check_and_record(&storage, "user:1", &limits, 1)
                .await
                .unwrap();
            assert!(decision.is_allowed(), "Request {} should be allowed", i);
        }

        let decision = algorithm
            .check_and_record(&storage, "user:1", &limits, 1)
            .await
            .unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.info().remaining, 0);
        assert!(decision.info().retry_after.is_some());
    }

    #[tokio::test]
    async fn test_fixed_window_cost_weighted() {
        let algorithm = FixedWindow::new();
        let storage = MemoryStorage::new();
        let limits = RuleLimits::new(10, Duration::from_secs(10));

        let decision = algorithm
            .check_and_record(&storage, "user:1", &limits, 4)
            .await
            .unwrap();
        assert!(decision.is_allowed());
        assert_eq!(decision.info().remaining, 6);

        let decision = algorithm
            .check_and_record(&storage, "user:1", &limits, 7)
            .await
            .unwrap();
        assert!(decision.is_denied());
    }

    #[tokio::test]
    async fn test_fixed_window_independent_keys() {
        let algorithm = FixedWindow::new();
        let storage = MemoryStorage::new();
        let limits = RuleLimits::new(1, Duration::from_secs(10));

        algorithm
            .check_and_record(&storage, "user:1", &limits, 1)
            .await
            .unwrap();
        let decision = algorithm
            .check_and_record(&storage, "user:2", &limits, 1)
            .await
            .unwrap();
        assert!(decision.is_allowed());
    }
}
