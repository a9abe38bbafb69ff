//! Adaptive rate limiting algorithm.
//!
//! Wraps [`FixedWindow`] with a downstream-health-aware effective limit: as
//! the observed error rate of the protected resource rises, the admitted
//! request rate is scaled down, shedding load before the resource falls
//! over entirely. The error rate itself is tracked as an exponentially
//! weighted moving average (EWMA) so a handful of recent failures move the
//! gauge quickly while isolated blips don't.

use crate::algorithm::{Algorithm, FixedWindow};
use crate::decision::Decision;
use crate::error::Result;
use crate::limits::RuleLimits;
use crate::storage::Storage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Smoothing factor for the error-rate EWMA. Higher values react faster to
/// new samples; lower values smooth out noise. 0.1 roughly means the last
/// ~10 samples dominate the estimate.
const EWMA_ALPHA: f64 = 0.1;

/// Weight applied to the error rate when shrinking the effective limit.
const LIMIT_ALPHA: f64 = 1.0;

/// Floor on the effective limit as a fraction of the configured limit. Even
/// at 100% observed errors, at least this fraction of traffic is admitted so
/// recovery probes and health checks keep getting through.
const MIN_LIMIT_FRACTION: f64 = 0.25;

/// Thread-safe, lock-free error-rate gauge shared between the admission path
/// (reads the rate to scale the limit) and the caller (records outcomes).
///
/// The f64 rate is stored as its bit pattern in an `AtomicU64`, the same
/// single-word atomic-state idiom used elsewhere in this crate for
/// lock-free cross-task state.
#[derive(Debug, Clone)]
pub struct ErrorRateGauge {
    bits: Arc<AtomicU64>,
}

impl ErrorRateGauge {
    /// Create a gauge starting at 0% error rate.
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(0f64.to_bits())),
        }
    }

    /// Record the outcome of one request (`true` = error, `false` = success)
    /// and fold it into the EWMA.
    pub fn record(&self, is_error: bool) {
        let sample = if is_error { 1.0 } else { 0.0 };
        loop {
            let current_bits = self.bits.load(Ordering::Acquire);
            let current = f64::from_bits(current_bits);
            let updated = current + EWMA_ALPHA * (sample - current);
            let updated_bits = updated.to_bits();
            if self
                .bits
                .compare_exchange_weak(current_bits, updated_bits, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Current estimated error rate in `[0.0, 1.0]`.
    pub fn error_rate(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

impl Default for ErrorRateGauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Adaptive rate limiting algorithm.
///
/// Delegates the actual admission accounting to [`FixedWindow`] against an
/// effective limit computed as:
///
/// ```text
/// effective_limit = configured_limit * clamp(MIN_LIMIT_FRACTION, 1.0, 1 - LIMIT_ALPHA * error_rate)
/// ```
#[derive(Debug, Clone)]
pub struct Adaptive {
    gauge: ErrorRateGauge,
    inner: FixedWindow,
}

impl Adaptive {
    /// Create a new Adaptive algorithm sharing the given error-rate gauge.
    ///
    /// Callers feed outcomes into the gauge (e.g. from response status codes)
    /// independently of the admission check itself.
    pub fn new(gauge: ErrorRateGauge) -> Self {
        Self {
            gauge,
            inner: FixedWindow::new(),
        }
    }

    /// The shared error-rate gauge, for recording request outcomes.
    pub fn gauge(&self) -> &ErrorRateGauge {
        &self.gauge
    }

    fn scaled_limits(&self, limits: &RuleLimits) -> RuleLimits {
        let error_rate = self.gauge.error_rate();
        let factor = (1.0 - LIMIT_ALPHA * error_rate).clamp(MIN_LIMIT_FRACTION, 1.0);
        let effective = ((limits.max_requests() as f64) * factor).round().max(1.0) as u64;
        RuleLimits::new(effective, limits.window())
    }
}

impl Default for Adaptive {
    fn default() -> Self {
        Self::new(ErrorRateGauge::new())
    }
}

impl Algorithm for Adaptive {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    async fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        limits: &RuleLimits,
        cost: u64,
    ) -> Result<Decision> {
        let scaled = self.scaled_limits(limits);
        let mut decision = self.inner.check_and_record(storage, key, &scaled, cost).await?;
        decision.info_mut().algorithm = Some("adaptive");
        Ok(decision)
    }

    async fn check<S: Storage>(&self, storage: &S, key: &str, limits: &RuleLimits, cost: u64) -> Result<Decision> {
        let scaled = self.scaled_limits(limits);
        let mut decision = self.inner.check(storage, key, &scaled, cost).await?;
        decision.info_mut().algorithm = Some("adaptive");
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::time::Duration;

    #[tokio::test]
    async fn test_adaptive_healthy_uses_full_limit() {
        let algorithm = Adaptive::new(ErrorRateGauge::new());
        let storage = MemoryStorage::new();
        let limits = RuleLimits::new(10, Duration::from_secs(10));

        for i in 1..=10 {
            let decision = algorithm
                .check_and_record(&storage, "user:1", &limits, 1)
                .await
                .unwrap();
            assert!(decision.is_allowed(), "Request {} should be allowed at 0% errors", i);
        }
    }

    #[tokio::test]
    async fn test_adaptive_sheds_load_on_errors() {
        let gauge = ErrorRateGauge::new();
        for _ in 0..50 {
            gauge.record(true);
        }
        assert!(gauge.error_rate() > 0.9);

        let algorithm = Adaptive::new(gauge);
        let storage = MemoryStorage::new();
        let limits = RuleLimits::new(100, Duration::from_secs(10));

        let mut allowed = 0;
        for _ in 0..100 {
            let decision = algorithm
                .check_and_record(&storage, "user:1", &limits, 1)
                .await
                .unwrap();
            if decision.is_allowed() {
                allowed += 1;
            }
        }

        // At ~100% observed errors, the floor admits ~25% of the configured limit.
        assert!(allowed <= 30, "expected load shedding, got {} allowed", allowed);
        assert!(allowed >= 20, "expected the floor to still admit traffic, got {} allowed", allowed);
    }

    #[tokio::test]
    async fn test_adaptive_gauge_shared_across_clones() {
        let gauge = ErrorRateGauge::new();
        let algorithm_a = Adaptive::new(gauge.clone());
        let algorithm_b = Adaptive::new(gauge.clone());

        algorithm_a.gauge().record(true);
        assert!(algorithm_b.gauge().error_rate() > 0.0);
    }
}
