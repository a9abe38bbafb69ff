//! Sliding Window (Log) rate limiting algorithm.
//!
//! Stores the timestamp of every request within the window, providing exact
//! accounting at the cost of memory proportional to the limit. This is the
//! algorithm spec.md calls "sliding window": a request of `cost > 1` pushes
//! `cost` timestamps; if the resulting count would exceed the limit, the
//! pushed timestamps are rolled back and the request is denied.

use std::time::Duration;

use crate::algorithm::{current_timestamp_ms, timestamp_to_instant, Algorithm};
use crate::decision::{Decision, RateLimitInfo};
use crate::error::Result;
use crate::limits::RuleLimits;
use crate::storage::{Storage, StorageEntry};

/// Sliding Window (Log) rate limiting algorithm.
///
/// Stores a timestamp per unit of cost for highest precision. Best for
/// accuracy-critical limits with moderate request rates.
#[derive(Debug, Clone, Default)]
pub struct SlidingLog;

impl SlidingLog {
    /// Create a new Sliding Log algorithm instance.
    pub fn new() -> Self {
        Self
    }

    fn filter_window(timestamps: &[u64], window_start: u64) -> Vec<u64> {
        timestamps
            .iter()
            .filter(|&&ts| ts >= window_start)
            .copied()
            .collect()
    }
}

impl Algorithm for SlidingLog {
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    async fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        limits: &RuleLimits,
        cost: u64,
    ) -> Result<Decision> {
        let now = current_timestamp_ms();
        let window_ms = limits.window().as_millis() as u64;
        let window_start = now.saturating_sub(window_ms);
        let ttl = Duration::from_millis(window_ms * 2);
        let limit = limits.max_requests();

        let decision = storage
            .execute_atomic(key, ttl, |entry| {
                let mut timestamps = entry.and_then(|e| e.timestamps).unwrap_or_default();
                timestamps = Self::filter_window(&timestamps, window_start);
                let before = timestamps.len();

                for _ in 0..cost {
                    timestamps.push(now);
                }
                let after = timestamps.len() as u64;

                if after <= limit {
                    let new_entry = StorageEntry::with_timestamps(timestamps);
                    let remaining = limit - after;
                    let reset_at = timestamp_to_instant(now + window_ms);
                    let info = RateLimitInfo::new(limit, remaining, reset_at, timestamp_to_instant(window_start))
                        .with_algorithm("sliding_window");

                    (new_entry, Decision::allowed(info))
                } else {
                    // Roll back: drop the `cost` entries just pushed.
                    timestamps.truncate(before);
                    let new_entry = StorageEntry::with_timestamps(timestamps.clone());

                    let oldest = timestamps.first().copied().unwrap_or(now);
                    let retry_ms = (oldest + window_ms).saturating_sub(now);
                    let reset_at = timestamp_to_instant(oldest + window_ms);

                    let info = RateLimitInfo::new(limit, 0, reset_at, timestamp_to_instant(window_start))
                        .with_algorithm("sliding_window")
                        .with_retry_after(Duration::from_millis(retry_ms));

                    (new_entry, Decision::denied(info))
                }
            })
            .await?;

        Ok(decision)
    }

    async fn check<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        limits: &RuleLimits,
        cost: u64,
    ) -> Result<Decision> {
        let now = current_timestamp_ms();
        let window_ms = limits.window().as_millis() as u64;
        let window_start = now.saturating_sub(window_ms);
        let limit = limits.max_requests();

        let entry = storage.get(key).await?;
        let timestamps = entry.and_then(|e| e.timestamps).unwrap_or_default();

        let filtered = Self::filter_window(&timestamps, window_start);
        let current_count = filtered.len() as u64;

        let remaining = limit.saturating_sub(current_count);
        let reset_at = if let Some(&oldest) = filtered.first() {
            timestamp_to_instant(oldest + window_ms)
        } else {
            timestamp_to_instant(now + window_ms)
        };

        let info = RateLimitInfo::new(limit, remaining, reset_at, timestamp_to_instant(window_start))
            .with_algorithm("sliding_window");

        Ok(if current_count + cost <= limit {
            Decision::allowed(info)
        } else {
            let oldest = filtered.first().copied().unwrap_or(now);
            let retry_ms = (oldest + window_ms).saturating_sub(now);
            Decision::denied(info.with_retry_after(Duration::from_millis(retry_ms)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_sliding_log_basic() {
        let algorithm = SlidingLog::new();
        let storage = MemoryStorage::new();
        let limits = RuleLimits::per_minute(5);

        for i in 1..=5 {
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
    }

    #[tokio::test]
    async fn test_sliding_log_cost_rollback() {
        let algorithm = SlidingLog::new();
        let storage = MemoryStorage::new();
        let limits = RuleLimits::new(5, Duration::from_secs(60));

        let decision = algorithm
            .check_and_record(&storage, "user:1", &limits, 3)
            .await
            .unwrap();
        assert!(decision.is_allowed());
        assert_eq!(decision.info().remaining, 2);

        // Cost of 3 would push the count to 6 > 5; must roll back and deny,
        // leaving the counter at 3, not 6.
        let decision = algorithm
            .check_and_record(&storage, "user:1", &limits, 3)
            .await
            .unwrap();
        assert!(decision.is_denied());

        let decision = algorithm
            .check_and_record(&storage, "user:1", &limits, 2)
            .await
            .unwrap();
        assert!(decision.is_allowed());
        assert_eq!(decision.info().remaining, 0);
    }

    #[tokio::test]
    async fn test_sliding_log_precision() {
        let algorithm = SlidingLog::new();
        let storage = MemoryStorage::new();
        let limits = RuleLimits::new(2, Duration::from_millis(200));

        algorithm
            .check_and_record(&storage, "user:1", &limits, 1)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        algorithm
            .check_and_record(&storage, "user:1", &limits, 1)
            .await
            .unwrap();

        let decision = algorithm
            .check_and_record(&storage, "user:1", &limits, 1)
            .await
            .unwrap();
        assert!(decision.is_denied());

        tokio::time::sleep(Duration::from_millis(200)).await;

        let decision = algorithm
            .check_and_record(&storage, "user:1", &limits, 1)
            .await
            .unwrap();
        assert!(decision.is_allowed());
    }
}
