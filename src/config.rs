//! Gateway-wide configuration, per spec.md §6.
//!
//! A typed, `serde`-deserializable struct following the teacher's
//! `RedisConfig`/`GcConfig` convention (plain structs with `Default` impls
//! and per-field doc comments) rather than scattered environment lookups;
//! the caller is responsible for populating it from env vars, a file, or
//! any other `serde`-compatible source.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerConfig;

fn default_store_url() -> String {
    "memory://".to_string()
}

const fn default_queue_max_size() -> usize {
    10_000
}

fn default_queue_process_interval() -> Duration {
    Duration::from_millis(100)
}

const fn default_breaker_failure_threshold() -> u32 {
    5
}

const fn default_breaker_success_threshold() -> u32 {
    2
}

fn default_breaker_reset_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_ai_requests_daily() -> u64 {
    100
}
const fn default_ai_requests_monthly() -> u64 {
    2000
}
const fn default_file_uploads_daily() -> u64 {
    50
}
const fn default_file_uploads_monthly() -> u64 {
    500
}
const fn default_exports_daily() -> u64 {
    10
}
const fn default_exports_monthly() -> u64 {
    100
}

/// Default circuit breaker tunables, per spec.md §4.6/§6: 5 consecutive
/// failures trip it open, 2 consecutive half-open successes close it, and
/// it stays open for 30s before probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerDefaults {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the breaker.
    pub success_threshold: u32,
    /// How long the breaker stays open before probing, in seconds.
    #[serde(with = "duration_secs")]
    pub reset_timeout: Duration,
}

impl Default for BreakerDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: default_breaker_failure_threshold(),
            success_threshold: default_breaker_success_threshold(),
            reset_timeout: default_breaker_reset_timeout(),
        }
    }
}

impl From<BreakerDefaults> for BreakerConfig {
    fn from(defaults: BreakerDefaults) -> Self {
        BreakerConfig {
            failure_threshold: defaults.failure_threshold,
            success_threshold: defaults.success_threshold,
            reset_timeout: defaults.reset_timeout,
            half_open_max_probes: 1,
        }
    }
}

/// Default priority queue tunables, per spec.md §4.7/§6: up to 10,000
/// held requests per named queue, re-evaluated every 100ms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueDefaults {
    /// Maximum entries held per named sub-queue.
    pub max_size: usize,
    /// How often the background drainer re-evaluates waiting entries, in
    /// milliseconds.
    #[serde(with = "duration_millis")]
    pub process_interval: Duration,
}

impl Default for QueueDefaults {
    fn default() -> Self {
        Self {
            max_size: default_queue_max_size(),
            process_interval: default_queue_process_interval(),
        }
    }
}

/// One quota's default daily/monthly budget, per spec.md §4.8/§6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaDefault {
    /// Quota name (e.g. "ai-requests").
    pub name: String,
    /// Daily budget.
    pub daily: u64,
    /// Monthly budget.
    pub monthly: u64,
}

/// Default quota bundle, per spec.md §6: `ai-requests` (100/day,
/// 2000/month), `file-uploads` (50/day, 500/month), `exports` (10/day,
/// 100/month).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaDefaults(pub Vec<QuotaDefault>);

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self(vec![
            QuotaDefault {
                name: "ai-requests".to_string(),
                daily: default_ai_requests_daily(),
                monthly: default_ai_requests_monthly(),
            },
            QuotaDefault {
                name: "file-uploads".to_string(),
                daily: default_file_uploads_daily(),
                monthly: default_file_uploads_monthly(),
            },
            QuotaDefault {
                name: "exports".to_string(),
                daily: default_exports_daily(),
                monthly: default_exports_monthly(),
            },
        ])
    }
}

impl QuotaDefaults {
    /// Build a [`crate::quota_manager::QuotaManager`] from these defaults.
    pub fn build_manager(&self) -> crate::quota_manager::QuotaManager {
        let mut manager = crate::quota_manager::QuotaManager::new();
        for q in &self.0 {
            manager.register(crate::quota_manager::Quota::new(q.name.clone()).daily(q.daily).monthly(q.monthly));
        }
        manager
    }
}

/// Gateway-wide configuration, per spec.md §6. Deserializable from any
/// `serde`-compatible source (env, file, etc); every field has a sensible
/// default so a caller only needs to override what differs from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Connection string for the storage backend (e.g. `redis://...` or
    /// `memory://`).
    #[serde(default = "default_store_url")]
    pub store_url: String,
    /// IPs that bypass rate limiting entirely, per spec.md §4.5 step 1.
    pub bypass_ips: Vec<String>,
    /// API keys that bypass rate limiting entirely.
    pub bypass_api_keys: Vec<String>,
    /// Whether to admit requests when the store errors, rather than fail
    /// closed. Default `false`.
    pub fail_open_on_store_error: bool,
    /// Enable verbose diagnostic logging.
    pub debug: bool,
    /// Circuit breaker defaults.
    pub breaker: BreakerDefaults,
    /// Priority queue defaults.
    pub queue: QueueDefaults,
    /// Long-horizon quota defaults.
    pub quotas: QuotaDefaults,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_url: default_store_url(),
            bypass_ips: Vec::new(),
            bypass_api_keys: Vec::new(),
            fail_open_on_store_error: false,
            debug: false,
            breaker: BreakerDefaults::default(),
            queue: QueueDefaults::default(),
            quotas: QuotaDefaults::default(),
        }
    }
}

// serde helpers: (de)serialize a `Duration` as a plain number of seconds
// or milliseconds, matching how these fields read in config files/env
// (`RESET_TIMEOUT_SECONDS=30`, `QUEUE_PROCESS_INTERVAL_MS=100`).
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
