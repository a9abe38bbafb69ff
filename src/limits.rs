//! Per-rule rate limit configuration.
//!
//! A `RuleLimits` defines the rate limiting parameters for a single rule: how
//! many requests are allowed over what time period, and optionally how much
//! burst capacity is available. This is distinct from [`crate::quota_manager`],
//! which tracks long-horizon (daily/weekly/monthly) usage against a subject.
//!
//! # Examples
//!
//! ```ignore
//! use gatekeeper::RuleLimits;
//! use std::time::Duration;
//!
//! // 100 requests per minute
//! let limits = RuleLimits::per_minute(100);
//!
//! // 100 requests per minute with burst of 150
//! let limits = RuleLimits::per_minute(100).with_burst(150);
//!
//! // Custom: 50 requests per 30 seconds
//! let limits = RuleLimits::new(50, Duration::from_secs(30));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Rate limiting configuration for a rule.
///
/// Defines the maximum number of requests allowed within a time window,
/// along with optional burst capacity for handling traffic spikes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleLimits {
    /// Maximum number of requests in the window.
    max_requests: u64,

    /// Time window duration.
    window: Duration,

    /// Maximum burst size (defaults to max_requests if not set).
    burst: Option<u64>,

    /// Refill/leak rate for token/leaky bucket algorithms (units per second).
    /// If not set, calculated from max_requests / window.
    refill_rate: Option<f64>,
}

impl RuleLimits {
    /// Create new limits with the given maximum requests and window.
    ///
    /// # Panics
    ///
    /// Panics if `max_requests` is 0 or `window` is zero duration.
    pub fn new(max_requests: u64, window: Duration) -> Self {
        assert!(max_requests > 0, "max_requests must be greater than 0");
        assert!(!window.is_zero(), "window must be non-zero");

        Self {
            max_requests,
            window,
            burst: None,
            refill_rate: None,
        }
    }

    /// Limits allowing `n` requests per second.
    pub fn per_second(n: u64) -> Self {
        Self::new(n, Duration::from_secs(1))
    }

    /// Limits allowing `n` requests per minute.
    pub fn per_minute(n: u64) -> Self {
        Self::new(n, Duration::from_secs(60))
    }

    /// Limits allowing `n` requests per hour.
    pub fn per_hour(n: u64) -> Self {
        Self::new(n, Duration::from_secs(3600))
    }

    /// Limits allowing `n` requests per day.
    pub fn per_day(n: u64) -> Self {
        Self::new(n, Duration::from_secs(86400))
    }

    /// Try to create new limits, returning an error if invalid.
    pub fn try_new(max_requests: u64, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(ConfigError::InvalidQuota("max_requests must be greater than 0".into()).into());
        }
        if window.is_zero() {
            return Err(ConfigError::InvalidQuota("window must be non-zero".into()).into());
        }
        Ok(Self {
            max_requests,
            window,
            burst: None,
            refill_rate: None,
        })
    }

    /// Set the burst size (maximum requests that can be made instantly).
    ///
    /// Burst is clamped to be >= max_requests.
    pub fn with_burst(mut self, burst: u64) -> Self {
        self.burst = Some(burst.max(self.max_requests));
        self
    }

    /// Set a custom refill rate (units per second).
    ///
    /// If not set, the refill rate is calculated as `max_requests / window_seconds`.
    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.refill_rate = Some(rate);
        self
    }

    /// Maximum requests allowed per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// The window duration.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The effective burst size.
    ///
    /// Returns the configured burst, or `max_requests` if not set.
    pub fn effective_burst(&self) -> u64 {
        self.burst.unwrap_or(self.max_requests)
    }

    /// The effective refill rate (units per second).
    ///
    /// Returns the configured rate, or calculates from `max_requests / window_seconds`.
    pub fn effective_refill_rate(&self) -> f64 {
        self.refill_rate
            .unwrap_or_else(|| self.max_requests as f64 / self.window.as_secs_f64())
    }

    /// How long until limits would be fully replenished.
    pub fn full_replenish_time(&self) -> Duration {
        self.window
    }
}

impl Default for RuleLimits {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Builder for creating `RuleLimits` with validation.
#[derive(Debug, Default)]
pub struct RuleLimitsBuilder {
    max_requests: Option<u64>,
    window: Option<Duration>,
    burst: Option<u64>,
    refill_rate: Option<f64>,
}

impl RuleLimitsBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum requests per window.
    pub fn max_requests(mut self, n: u64) -> Self {
        self.max_requests = Some(n);
        self
    }

    /// Set the window duration.
    pub fn window(mut self, duration: Duration) -> Self {
        self.window = Some(duration);
        self
    }

    /// Set the burst size.
    pub fn burst(mut self, n: u64) -> Self {
        self.burst = Some(n);
        self
    }

    /// Set the refill rate.
    pub fn refill_rate(mut self, rate: f64) -> Self {
        self.refill_rate = Some(rate);
        self
    }

    /// Build, returning an error if a required field is missing or invalid.
    pub fn build(self) -> Result<RuleLimits> {
        let max_requests = self
            .max_requests
            .ok_or_else(|| ConfigError::MissingRequired("max_requests".into()))?;
        let window = self
            .window
            .ok_or_else(|| ConfigError::MissingRequired("window".into()))?;

        let mut limits = RuleLimits::try_new(max_requests, window)?;

        if let Some(burst) = self.burst {
            limits = limits.with_burst(burst);
        }
        if let Some(rate) = self.refill_rate {
            limits = limits.with_refill_rate(rate);
        }

        Ok(limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_per_second() {
        let limits = RuleLimits::per_second(10);
        assert_eq!(limits.max_requests(), 10);
        assert_eq!(limits.window(), Duration::from_secs(1));
        assert_eq!(limits.effective_burst(), 10);
        assert!((limits.effective_refill_rate() - 10.0).abs() < 0.001);
    }

    #[test]
    fn test_limits_per_minute() {
        let limits = RuleLimits::per_minute(60);
        assert_eq!(limits.max_requests(), 60);
        assert_eq!(limits.window(), Duration::from_secs(60));
        assert!((limits.effective_refill_rate() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_limits_with_burst() {
        let limits = RuleLimits::per_minute(60).with_burst(100);
        assert_eq!(limits.max_requests(), 60);
        assert_eq!(limits.effective_burst(), 100);
    }

    #[test]
    fn test_limits_burst_minimum() {
        let limits = RuleLimits::per_minute(60).with_burst(30);
        assert_eq!(limits.effective_burst(), 60);
    }

    #[test]
    fn test_limits_builder() {
        let limits = RuleLimitsBuilder::new()
            .max_requests(100)
            .window(Duration::from_secs(60))
            .burst(150)
            .build()
            .unwrap();

        assert_eq!(limits.max_requests(), 100);
        assert_eq!(limits.window(), Duration::from_secs(60));
        assert_eq!(limits.effective_burst(), 150);
    }

    #[test]
    fn test_limits_builder_missing_fields() {
        let result = RuleLimitsBuilder::new().max_requests(100).build();
        assert!(result.is_err());

        let result = RuleLimitsBuilder::new()
            .window(Duration::from_secs(60))
            .build();
        assert!(result.is_err());
    }

    #[test]
    #[should_panic]
    fn test_limits_zero_requests_panics() {
        RuleLimits::new(0, Duration::from_secs(60));
    }

    #[test]
    #[should_panic]
    fn test_limits_zero_window_panics() {
        RuleLimits::new(100, Duration::ZERO);
    }
}
