//! Circuit breaker: per spec.md §4.6, denies calls to a failing downstream
//! without attempting them, then probes recovery with a bounded number of
//! half-open requests.
//!
//! Grounded structurally on `tower-resilience-circuitbreaker`'s closed/open/
//! half-open state machine, but persisted through this crate's [`Storage`]
//! trait rather than an in-process atomic, so state survives across
//! replicas of a gateway behind a shared store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{current_timestamp_ms, Storage, StorageEntry};

/// Circuit breaker state, per spec.md §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Calls pass through normally.
    Closed,
    /// Calls are rejected without being attempted.
    Open,
    /// A limited number of probe calls are allowed through to test recovery.
    HalfOpen,
}

/// Tunables for a [`Breaker`], per spec.md §4.6.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures (from closed) that trip the breaker open.
    pub failure_threshold: u32,
    /// Consecutive probe successes (from half-open) that close the breaker.
    pub success_threshold: u32,
    /// How long the breaker stays open before allowing a half-open probe.
    pub reset_timeout: Duration,
    /// Maximum number of concurrent half-open probes.
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            half_open_max_probes: 1,
        }
    }
}

/// Persisted breaker state, serialized into [`StorageEntry::metadata`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BreakerRecord {
    state: BreakerState,
    failures: u32,
    successes: u32,
    opened_at_ms: u64,
    half_open_inflight: u32,
}

impl BreakerRecord {
    fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: 0,
            successes: 0,
            opened_at_ms: 0,
            half_open_inflight: 0,
        }
    }

    fn decode(entry: &Option<StorageEntry>) -> Self {
        entry
            .as_ref()
            .and_then(|e| e.metadata.as_ref())
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
            .unwrap_or_else(Self::closed)
    }

    fn encode(&self, now: u64) -> StorageEntry {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        StorageEntry::new(0, now).set_metadata(bytes)
    }
}

/// Outcome of a [`Breaker::try_acquire`] call.
#[derive(Debug, Clone)]
pub enum BreakerDecision {
    /// The call may proceed (breaker closed, or a half-open probe slot).
    Allow,
    /// The call is rejected; retry no sooner than `retry_after`.
    Deny { retry_after: Duration },
}

/// A named circuit breaker, persisted through a [`Storage`] backend.
#[derive(Debug, Clone)]
pub struct Breaker {
    name: String,
    config: BreakerConfig,
}

const BREAKER_RECORD_TTL: Duration = Duration::from_secs(3600);

impl Breaker {
    /// Create a breaker with the given name and configuration.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    fn key(&self) -> String {
        format!("breaker:{}", self.name)
    }

    /// Decide whether a call may proceed, transitioning open -> half-open
    /// once `reset_timeout` has elapsed, per spec.md §4.6.
    pub async fn try_acquire<S: Storage>(&self, storage: &S) -> Result<BreakerDecision> {
        let config = self.config;
        let name = self.name.clone();
        let decision = storage
            .execute_atomic(&self.key(), BREAKER_RECORD_TTL, move |entry| {
                let now = current_timestamp_ms();
                let mut record = BreakerRecord::decode(&entry);
                let decision = match record.state {
                    BreakerState::Closed => BreakerDecision::Allow,
                    BreakerState::Open => {
                        let elapsed = now.saturating_sub(record.opened_at_ms);
                        if elapsed >= config.reset_timeout.as_millis() as u64 {
                            record.state = BreakerState::HalfOpen;
                            record.half_open_inflight = 1;
                            record.successes = 0;
                            tracing::info!(breaker = %name, "breaker half-open, probing recovery");
                            BreakerDecision::Allow
                        } else {
                            let remaining = config.reset_timeout.as_millis() as u64 - elapsed;
                            BreakerDecision::Deny {
                                retry_after: Duration::from_millis(remaining),
                            }
                        }
                    }
                    BreakerState::HalfOpen => {
                        if record.half_open_inflight < config.half_open_max_probes {
                            record.half_open_inflight += 1;
                            BreakerDecision::Allow
                        } else {
                            BreakerDecision::Deny {
                                retry_after: Duration::from_millis(100),
                            }
                        }
                    }
                };
                (record.encode(now), decision)
            })
            .await?;
        Ok(decision)
    }

    /// Record a successful call, per spec.md §4.6: in the half-open state,
    /// enough consecutive successes close the breaker.
    pub async fn record_success<S: Storage>(&self, storage: &S) -> Result<()> {
        let name = self.name.clone();
        let success_threshold = self.config.success_threshold;
        storage
            .execute_atomic(&self.key(), BREAKER_RECORD_TTL, move |entry| {
                let now = current_timestamp_ms();
                let mut record = BreakerRecord::decode(&entry);
                match record.state {
                    BreakerState::Closed => {
                        record.failures = 0;
                    }
                    BreakerState::HalfOpen => {
                        record.successes += 1;
                        record.half_open_inflight = record.half_open_inflight.saturating_sub(1);
                        if record.successes >= success_threshold {
                            record = BreakerRecord::closed();
                            tracing::info!(breaker = %name, "breaker closed, recovery confirmed");
                        }
                    }
                    BreakerState::Open => {}
                }
                (record.encode(now), ())
            })
            .await
    }

    /// Record a failed call, per spec.md §4.6: enough consecutive failures
    /// from closed (or any failure while half-open) trip the breaker open.
    pub async fn record_failure<S: Storage>(&self, storage: &S) -> Result<()> {
        let name = self.name.clone();
        let failure_threshold = self.config.failure_threshold;
        storage
            .execute_atomic(&self.key(), BREAKER_RECORD_TTL, move |entry| {
                let now = current_timestamp_ms();
                let mut record = BreakerRecord::decode(&entry);
                match record.state {
                    BreakerState::Closed => {
                        record.failures += 1;
                        if record.failures >= failure_threshold {
                            record.state = BreakerState::Open;
                            record.opened_at_ms = now;
                            record.failures = 0;
                            tracing::info!(breaker = %name, "breaker open, failure threshold reached");
                        }
                    }
                    BreakerState::HalfOpen => {
                        record.state = BreakerState::Open;
                        record.opened_at_ms = now;
                        record.failures = 0;
                        record.successes = 0;
                        record.half_open_inflight = 0;
                        tracing::info!(breaker = %name, "breaker reopened, probe failed");
                    }
                    BreakerState::Open => {}
                }
                (record.encode(now), ())
            })
            .await
    }

    /// Read the current state without mutating it.
    pub async fn state<S: Storage>(&self, storage: &S) -> Result<BreakerState> {
        let entry = storage.get(&self.key()).await?;
        Ok(BreakerRecord::decode(&entry).state)
    }

    /// Force the breaker back to closed, e.g. via the admin surface.
    pub async fn reset<S: Storage>(&self, storage: &S) -> Result<()> {
        storage.delete(&self.key()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(50),
            half_open_max_probes: 1,
        }
    }

    #[tokio::test]
    async fn test_breaker_starts_closed() {
        let storage = MemoryStorage::new();
        let breaker = Breaker::new("svc", fast_config());
        assert_eq!(breaker.state(&storage).await.unwrap(), BreakerState::Closed);
        assert!(matches!(
            breaker.try_acquire(&storage).await.unwrap(),
            BreakerDecision::Allow
        ));
    }

    #[tokio::test]
    async fn test_breaker_trips_open_after_threshold() {
        let storage = MemoryStorage::new();
        let breaker = Breaker::new("svc", fast_config());
        for _ in 0..3 {
            breaker.record_failure(&storage).await.unwrap();
        }
        assert_eq!(breaker.state(&storage).await.unwrap(), BreakerState::Open);
        assert!(matches!(
            breaker.try_acquire(&storage).await.unwrap(),
            BreakerDecision::Deny { .. }
        ));
    }

    #[tokio::test]
    async fn test_breaker_half_open_then_closes() {
        let storage = MemoryStorage::new();
        let breaker = Breaker::new("svc", fast_config());
        for _ in 0..3 {
            breaker.record_failure(&storage).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(matches!(
            breaker.try_acquire(&storage).await.unwrap(),
            BreakerDecision::Allow
        ));
        assert_eq!(breaker.state(&storage).await.unwrap(), BreakerState::HalfOpen);

        breaker.record_success(&storage).await.unwrap();
        breaker.record_success(&storage).await.unwrap();
        assert_eq!(breaker.state(&storage).await.unwrap(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_breaker_half_open_failure_reopens() {
        let storage = MemoryStorage::new();
        let breaker = Breaker::new("svc", fast_config());
        for _ in 0..3 {
            breaker.record_failure(&storage).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        breaker.try_acquire(&storage).await.unwrap();
        breaker.record_failure(&storage).await.unwrap();
        assert_eq!(breaker.state(&storage).await.unwrap(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_breaker_reset() {
        let storage = MemoryStorage::new();
        let breaker = Breaker::new("svc", fast_config());
        for _ in 0..3 {
            breaker.record_failure(&storage).await.unwrap();
        }
        breaker.reset(&storage).await.unwrap();
        assert_eq!(breaker.state(&storage).await.unwrap(), BreakerState::Closed);
    }
}
