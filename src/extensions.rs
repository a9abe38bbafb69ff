//! Request-facing response shapes for rate limit outcomes.
//!
//! This module provides the types a caller embeds in its own response:
//! a request-scoped extension carrying the full [`Decision`], and
//! JSON-serializable bodies for rejection responses per spec.md §6.

use crate::decision::Decision;
use crate::limits::RuleLimits;

/// Rate limit information available via request extensions.
///
/// This is attached to a request by the caller's own dispatcher after
/// calling [`crate::limiter::Limiter::consume`] (out of scope: this crate
/// does not provide the HTTP middleware layer itself, per spec.md §1).
#[derive(Debug, Clone)]
pub struct RateLimitExt {
    /// The key used for rate limiting this request.
    pub key: String,
    /// The limits applied to this request.
    pub limits: RuleLimits,
    /// The rate limit decision.
    pub decision: Decision,
    /// Whether the request was allowed.
    pub allowed: bool,
    /// Remaining requests in the current window.
    pub remaining: u64,
    /// Maximum requests allowed.
    pub limit: u64,
    /// Unix seconds since epoch (UTC) at which the rate limit resets, per
    /// spec.md §6.
    pub reset_seconds: u64,
}

impl RateLimitExt {
    /// Create a new rate limit extension from a decision.
    pub fn new(key: impl Into<String>, limits: RuleLimits, decision: Decision) -> Self {
        let info = decision.info();
        Self {
            key: key.into(),
            allowed: decision.is_allowed(),
            remaining: info.remaining,
            limit: info.limit,
            reset_seconds: info.reset_unix_seconds(),
            limits,
            decision,
        }
    }

    /// Check if the request was allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Check if the request was denied.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }
}

/// Rate limit rejection body, per spec.md §6:
/// `{statusCode, error, message, retryAfter, limit, remaining, reset, policy}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RateLimitResponse {
    /// HTTP status code (429 by default, 503 when a breaker is open).
    pub status_code: u16,
    /// Short error label (e.g. "Too Many Requests").
    pub error: String,
    /// Human-readable message, from the rule's `Action` when present.
    pub message: String,
    /// Whether the request was allowed.
    pub allowed: bool,
    /// Maximum requests allowed per window.
    pub limit: u64,
    /// Remaining requests in current window.
    pub remaining: u64,
    /// Unix seconds since epoch (UTC) at which the rate limit resets, per
    /// spec.md §6.
    pub reset_in_seconds: u64,
    /// Seconds until the client should retry, set only when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    /// The rule id responsible for this decision, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

impl From<&RateLimitExt> for RateLimitResponse {
    fn from(ext: &RateLimitExt) -> Self {
        let info = ext.decision.info();
        Self {
            status_code: if ext.allowed { 200 } else { 429 },
            error: if ext.allowed {
                String::new()
            } else {
                "Too Many Requests".to_string()
            },
            message: if ext.allowed {
                String::new()
            } else {
                "rate limit exceeded".to_string()
            },
            allowed: ext.allowed,
            limit: ext.limit,
            remaining: ext.remaining,
            reset_in_seconds: ext.reset_seconds,
            retry_after_seconds: info.retry_after.map(|d| d.as_secs()),
            policy: info.policy.clone(),
        }
    }
}

/// Quota rejection body, per spec.md §6:
/// `{statusCode:429, error:"Quota Exceeded", quotaName, remaining}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuotaRejection {
    /// Always 429.
    pub status_code: u16,
    /// Always "Quota Exceeded".
    pub error: String,
    /// The exceeded quota's name (e.g. "ai-requests").
    pub quota_name: String,
    /// Remaining budget in the offending period.
    pub remaining: u64,
}

impl QuotaRejection {
    /// Build a quota rejection body for the named quota period.
    pub fn new(quota_name: impl Into<String>, remaining: u64) -> Self {
        Self {
            status_code: 429,
            error: "Quota Exceeded".to_string(),
            quota_name: quota_name.into(),
            remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::RateLimitInfo;
    use std::time::{Duration, Instant};

    #[test]
    fn test_rate_limit_ext() {
        let info = RateLimitInfo::new(100, 50, Instant::now() + Duration::from_secs(60), Instant::now());
        let decision = Decision::allowed(info);
        let limits = RuleLimits::per_minute(100);

        let ext = RateLimitExt::new("user:123", limits, decision);

        assert!(ext.is_allowed());
        assert!(!ext.is_denied());
        assert_eq!(ext.remaining, 50);
        assert_eq!(ext.limit, 100);

        let now_unix_s = crate::storage::current_timestamp_ms() / 1000;
        assert!(
            ext.reset_seconds >= now_unix_s,
            "reset_seconds must be an epoch timestamp, not a relative delta"
        );
    }

    #[test]
    fn test_rate_limit_response_serialization() {
        let info = RateLimitInfo::new(100, 0, Instant::now() + Duration::from_secs(30), Instant::now())
            .with_retry_after(Duration::from_secs(30));
        let decision = Decision::denied(info);
        let limits = RuleLimits::per_minute(100);

        let ext = RateLimitExt::new("user:123", limits, decision);
        let response: RateLimitResponse = (&ext).into();

        assert!(!response.allowed);
        assert_eq!(response.limit, 100);
        assert_eq!(response.remaining, 0);
        assert!(response.retry_after_seconds.is_some());
        assert!(response.reset_in_seconds >= crate::storage::current_timestamp_ms() / 1000);
    }
}
