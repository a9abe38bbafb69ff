//! Rate limiting algorithm trait and implementations.
//!
//! This module defines the `Algorithm` trait and provides implementations
//! for the five admission-control algorithms a [`crate::rules::Rule`] can
//! select: fixed window, sliding window (log), token bucket, leaky bucket,
//! and adaptive.
//!
//! # Available Algorithms
//!
//! - **Fixed Window** (default): simple counter per time window, bursty at
//!   window edges.
//! - **Sliding Window / Log** (`sliding-log` feature): stores every request
//!   timestamp for exact accounting.
//! - **Token Bucket** (default): controlled bursts with refilling tokens.
//! - **Leaky Bucket** (`leaky-bucket` feature): constant-rate smoothing.
//! - **Adaptive** (`adaptive` feature): fixed window wrapped with an
//!   error-rate-driven effective limit.
//! - **Concurrent** (`concurrent` feature): limits simultaneous in-flight
//!   requests rather than requests over time; used by the tier table for
//!   `concurrentRequests` enforcement.

#[cfg(feature = "adaptive")]
mod adaptive;
#[cfg(feature = "concurrent")]
mod concurrent;
mod fixed_window;
#[cfg(feature = "leaky-bucket")]
mod leaky_bucket;
#[cfg(feature = "sliding-log")]
mod sliding_log;
mod token_bucket;

#[cfg(feature = "adaptive")]
pub use adaptive::{Adaptive, ErrorRateGauge};
#[cfg(feature = "concurrent")]
pub use concurrent::{ConcurrentLimiter, ConcurrentPermit};
pub use fixed_window::FixedWindow;
#[cfg(feature = "leaky-bucket")]
pub use leaky_bucket::LeakyBucket;
#[cfg(feature = "sliding-log")]
pub use sliding_log::SlidingLog;
pub use token_bucket::TokenBucket;

use std::future::Future;

use crate::decision::Decision;
use crate::error::Result;
use crate::limits::RuleLimits;
use crate::storage::Storage;

/// Rate limiting algorithm trait.
///
/// Each algorithm provides different trade-offs between accuracy, memory
/// usage, and burst handling, but all share one signature per spec: given a
/// store, a key, the rule's limits, and a request cost, return an admission
/// decision plus residual budget. All implementations must be thread-safe.
///
/// | Algorithm | Accuracy | Memory | Burst | Best For |
/// |-----------|----------|--------|-------|----------|
/// | Fixed Window | Low | Low | Poor | Simple use cases |
/// | Sliding Window (log) | Highest | High | Good | Precision critical |
/// | Token Bucket | High | Low | Excellent | Bursty traffic |
/// | Leaky Bucket | High | Medium | None | Smooth output |
/// | Adaptive | Variable | Low | Poor | Downstream-health-aware |
pub trait Algorithm: Send + Sync + 'static {
    /// Get the algorithm name (for logging/metrics and the policy header).
    fn name(&self) -> &'static str;

    /// Check if a request of the given `cost` is allowed AND record it
    /// atomically against `limits`.
    fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        limits: &RuleLimits,
        cost: u64,
    ) -> impl Future<Output = Result<Decision>> + Send;

    /// Check without recording (peek at current state).
    fn check<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        limits: &RuleLimits,
        cost: u64,
    ) -> impl Future<Output = Result<Decision>> + Send;

    /// Reset the rate limit for a key.
    fn reset<S: Storage>(&self, storage: &S, key: &str) -> impl Future<Output = Result<()>> + Send {
        async move { storage.delete(key).await }
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
pub(crate) fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

/// Convert a timestamp to an Instant (approximate).
pub(crate) fn timestamp_to_instant(timestamp_ms: u64) -> std::time::Instant {
    let now = std::time::Instant::now();
    let now_ms = current_timestamp_ms();

    if timestamp_ms >= now_ms {
        now + std::time::Duration::from_millis(timestamp_ms - now_ms)
    } else {
        now - std::time::Duration::from_millis(now_ms - timestamp_ms)
    }
}
