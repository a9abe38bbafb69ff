//! Configurable API rate limiting gateway.
//!
//! `gatekeeper` evaluates incoming requests against a prioritized table of
//! [`rules::Rule`]s, each scoped by IP/user/API key/tenant/route and backed
//! by one of several admission-control algorithms, then optionally gates
//! admission further through a named [`breaker::Breaker`] and a named
//! long-horizon [`quota_manager::QuotaManager`] quota. Requests that a rule
//! denies can be rejected outright, degraded, throttled with a delay, or
//! held in a bounded priority [`queue::PriorityQueue`] until capacity frees
//! up.
//!
//! # Quick Start
//!
//! ```ignore
//! use gatekeeper::{Limiter, MemoryStorage, RequestContext};
//! use gatekeeper::rules::{Rule, Scope};
//! use gatekeeper::limits::RuleLimits;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = Limiter::builder()
//!         .with_rule(Rule::new("api", 0, RuleLimits::per_minute(60)).with_scope(Scope::Ip))
//!         .build(MemoryStorage::new())
//!         .unwrap();
//!
//!     let ctx = RequestContext::new("203.0.113.5", "GET", "/v1/widgets");
//!     let outcome = limiter.consume(&ctx).await.unwrap();
//!     if outcome.is_allowed() {
//!         println!("allowed");
//!     }
//! }
//! ```
//!
//! # Algorithms
//!
//! | Algorithm | Best For | Memory | Feature Flag |
//! |-----------|----------|--------|--------------|
//! | Fixed Window | Simple use cases | Low | default |
//! | Token Bucket | Bursty traffic | Low | default |
//! | Sliding Log | Precision critical | High | `sliding-log` |
//! | Leaky Bucket | Smooth output | Low | `leaky-bucket` |
//! | Adaptive | Downstream-health-aware | Low | `adaptive` |
//! | Concurrent | Limit parallelism | Low | `concurrent` |
//!
//! # Feature Flags
//!
//! - `memory` (default): in-memory storage with garbage collection.
//! - `redis`: Redis cluster storage backend.
//! - `adaptive`: error-rate-adaptive algorithm.
//! - `leaky-bucket`: Leaky Bucket algorithm.
//! - `sliding-log`: Sliding Log (Sliding Window) algorithm.
//! - `concurrent`: concurrent-request limiter, used for tier
//!   `concurrent_requests` enforcement.
//! - `all-algorithms`: enables every non-default algorithm.
//! - `full`: `memory` + `redis` + `all-algorithms`.

pub mod admin;
pub mod algorithm;
pub mod breaker;
pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod extensions;
pub mod headers;
pub mod limiter;
pub mod limits;
pub mod queue;
pub mod quota_manager;
pub mod rules;
pub mod storage;
pub mod tiers;

// Re-export the core surface.
pub use admin::{AdminApi, AdminStats};
pub use algorithm::Algorithm;
pub use breaker::{Breaker, BreakerConfig, BreakerDecision, BreakerState};
pub use config::GatewayConfig;
pub use context::RequestContext;
pub use decision::{Decision, RateLimitInfo};
pub use error::{ConfigError, ConnectionError, RateLimitError, Result, StorageError};
pub use extensions::{RateLimitExt, RateLimitResponse};
pub use headers::RateLimitHeaders;
pub use limiter::{LimitOutcome, Limiter, LimiterBuilder};
pub use limits::RuleLimits;
pub use queue::{PriorityQueue, QueueOutcome};
pub use quota_manager::{Quota, QuotaManager, QuotaOutcome, QuotaPeriod, QuotaUsage};
pub use rules::{Action, AlgorithmKind, Matcher, Rule, RuleTable, Scope};
pub use storage::{Storage, StorageEntry};
pub use tiers::{Tier, TierTable};

// Re-export algorithms.
pub use algorithm::{FixedWindow, TokenBucket};

#[cfg(feature = "adaptive")]
pub use algorithm::{Adaptive, ErrorRateGauge};

#[cfg(feature = "leaky-bucket")]
pub use algorithm::LeakyBucket;

#[cfg(feature = "sliding-log")]
pub use algorithm::SlidingLog;

#[cfg(feature = "concurrent")]
pub use algorithm::{ConcurrentLimiter, ConcurrentPermit};

// Re-export storage backends.
#[cfg(feature = "memory")]
pub use storage::{GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisStorage};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::algorithm::Algorithm;
    pub use crate::context::RequestContext;
    pub use crate::decision::{Decision, RateLimitInfo};
    pub use crate::error::{RateLimitError, Result};
    pub use crate::limiter::{LimitOutcome, Limiter, LimiterBuilder};
    pub use crate::limits::RuleLimits;
    pub use crate::rules::{Action, Rule, Scope};
    pub use crate::storage::Storage;

    pub use crate::algorithm::{FixedWindow, TokenBucket};

    #[cfg(feature = "adaptive")]
    pub use crate::algorithm::Adaptive;

    #[cfg(feature = "leaky-bucket")]
    pub use crate::algorithm::LeakyBucket;

    #[cfg(feature = "sliding-log")]
    pub use crate::algorithm::SlidingLog;

    #[cfg(feature = "concurrent")]
    pub use crate::algorithm::ConcurrentLimiter;

    #[cfg(feature = "memory")]
    pub use crate::storage::{GcConfig, GcInterval, MemoryStorage};

    #[cfg(feature = "redis")]
    pub use crate::storage::{RedisConfig, RedisStorage};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_integration_token_bucket_rule() {
        use crate::storage::MemoryStorage;

        let limiter = Limiter::builder()
            .with_rule(Rule::new("burst", 0, RuleLimits::per_minute(60).with_burst(5)).with_scope(Scope::Ip))
            .build(MemoryStorage::new())
            .unwrap();

        let ctx = RequestContext::new("198.51.100.7", "GET", "/v1/widgets");
        for i in 1..=5 {
            let outcome = limiter.consume(&ctx).await.unwrap();
            assert!(outcome.is_allowed(), "request {i} should be allowed");
        }
        let outcome = limiter.consume(&ctx).await.unwrap();
        assert!(!outcome.is_allowed());
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_integration_headers() {
        use crate::storage::MemoryStorage;

        let limiter = Limiter::builder()
            .with_rule(Rule::new("api", 0, RuleLimits::per_minute(100)).with_scope(Scope::Global))
            .build(MemoryStorage::new())
            .unwrap();

        let ctx = RequestContext::new("203.0.113.9", "GET", "/v1/widgets");
        let outcome = limiter.consume(&ctx).await.unwrap();
        let headers = match &outcome {
            LimitOutcome::Allowed { headers, .. } => headers,
            LimitOutcome::Denied { headers, .. } => headers,
        };
        assert!(headers.iter().any(|(k, _)| *k == "X-RateLimit-Limit"));
        assert!(headers.iter().any(|(k, _)| *k == "X-RateLimit-Remaining"));
        assert!(headers.iter().any(|(k, _)| *k == "X-RateLimit-Reset"));
    }

    #[cfg(all(feature = "memory", feature = "concurrent"))]
    #[tokio::test]
    async fn test_integration_concurrent() {
        use crate::algorithm::ConcurrentLimiter;

        let limiter = ConcurrentLimiter::new(2);

        let _permit1 = limiter.try_acquire("user:1").unwrap();
        let _permit2 = limiter.try_acquire("user:1").unwrap();

        assert!(limiter.try_acquire("user:1").is_none());
        assert_eq!(limiter.remaining("user:1"), 0);
    }
}
