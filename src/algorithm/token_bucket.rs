//! Token Bucket rate limiting algorithm.

use std::time::Duration;

use crate::algorithm::{current_timestamp_ms, timestamp_to_instant, Algorithm};
use crate::decision::{Decision, DecisionMetadata, RateLimitInfo};
use crate::error::Result;
use crate::limits::RuleLimits;
use crate::storage::{retry_bucket_write, Storage, StorageEntry};

/// Number of compare-and-swap retries before giving up on a bucket write,
/// per spec.md §4.1's "retry up to 3 times" clause.
const CAS_ATTEMPTS: u32 = 3;

/// Token Bucket rate limiting algorithm.
///
/// Allows controlled bursts while enforcing an average rate limit. Tokens
/// are refilled at a constant rate up to maximum capacity (the burst size).
#[derive(Debug, Clone, Default)]
pub struct TokenBucket;

impl TokenBucket {
    /// Create a new Token Bucket algorithm instance.
    pub fn new() -> Self {
        Self
    }

    fn refill(elapsed_ms: u64, refill_rate: f64) -> f64 {
        (elapsed_ms as f64 / 1000.0) * refill_rate
    }

    fn refilled_tokens(entry: Option<&StorageEntry>, max_tokens: f64, refill_rate: f64, now: u64) -> f64 {
        let (tokens, last_update) = match entry {
            Some(e) => (e.tokens.unwrap_or(max_tokens), e.last_update),
            None => (max_tokens, now),
        };
        if now > last_update {
            (tokens + Self::refill(now - last_update, refill_rate)).min(max_tokens)
        } else {
            tokens.min(max_tokens)
        }
    }

    fn build_info(tokens: f64, max_tokens: f64, refill_rate: f64, now: u64) -> RateLimitInfo {
        let remaining = tokens.floor().max(0.0) as u64;

        let time_to_next_token = if tokens < 1.0 {
            (((1.0 - tokens) / refill_rate) * 1000.0) as u64
        } else {
            0
        };

        let tokens_needed = (max_tokens - tokens).max(0.0);
        let time_to_full = ((tokens_needed / refill_rate) * 1000.0) as u64;

        let reset_at = timestamp_to_instant(now + time_to_full);
        let window_start = timestamp_to_instant(now);

        let mut info = RateLimitInfo::new(max_tokens as u64, remaining, reset_at, window_start)
            .with_algorithm("token_bucket")
            .with_metadata(DecisionMetadata::new().with_tokens_available(tokens));

        if remaining == 0 && time_to_next_token > 0 {
            info = info.with_retry_after(Duration::from_millis(time_to_next_token));
        }

        info
    }
}

impl Algorithm for TokenBucket {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    async fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        limits: &RuleLimits,
        cost: u64,
    ) -> Result<Decision> {
        let now = current_timestamp_ms();
        let max_tokens = limits.effective_burst() as f64;
        let refill_rate = limits.effective_refill_rate();
        let cost_f = cost.max(1) as f64;

        let ttl_ms = ((max_tokens / refill_rate) * 1000.0 * 2.0) as u64;
        let ttl = Duration::from_millis(ttl_ms.max(1000));

        let mut decision = None;
        let final_entry = retry_bucket_write(storage, key, ttl, CAS_ATTEMPTS, |entry| {
            let tokens = Self::refilled_tokens(entry, max_tokens, refill_rate, now);

            if tokens >= cost_f {
                let new_tokens = tokens - cost_f;
                let info = Self::build_info(new_tokens, max_tokens, refill_rate, now);
                decision = Some(Decision::allowed(info));
                StorageEntry::with_tokens(new_tokens, now)
            } else {
                let info = Self::build_info(tokens, max_tokens, refill_rate, now);
                decision = Some(Decision::denied(info));
                StorageEntry::with_tokens(tokens, now)
            }
        })
        .await?;
        let _ = final_entry;

        Ok(decision.expect("retry_bucket_write always invokes the closure"))
    }

    async fn check<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        limits: &RuleLimits,
        cost: u64,
    ) -> Result<Decision> {
        let now = current_timestamp_ms();
        let max_tokens = limits.effective_burst() as f64;
        let refill_rate = limits.effective_refill_rate();
        let cost_f = cost.max(1) as f64;

        let entry = storage.get_bucket(key).await?;
        let tokens = Self::refilled_tokens(entry.as_ref(), max_tokens, refill_rate, now);

        let info = Self::build_info(tokens, max_tokens, refill_rate, now);

        Ok(if tokens >= cost_f {
            Decision::allowed(info)
        } else {
            Decision::denied(info)
        })
    }
}
