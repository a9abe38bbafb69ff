//! Limiter core: the public entry point that ties the rule engine, tier
//! table, circuit breakers, priority queue, and quota manager together into
//! a single `consume`/`peek`/`reset` contract, per spec.md §4.5.
//!
//! Built via explicit constructor injection through [`LimiterBuilder`]
//! (spec.md §9's redesign note: no DI container), widening the teacher's
//! `RateLimitManagerBuilder` (`manager.rs`) shape from one algorithm+quota
//! pair to the whole rule/tier/breaker/queue/quota ensemble.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::breaker::{Breaker, BreakerConfig, BreakerDecision};
use crate::context::RequestContext;
use crate::decision::RateLimitInfo;
use crate::error::{RateLimitError, Result};
use crate::headers::{names, RateLimitHeaders};
use crate::queue::{PriorityQueue, QueueOutcome};
use crate::quota_manager::{QuotaManager, QuotaOutcome};
use crate::rules::{Action, AlgorithmKind, Rule, RuleTable, Scope};
use crate::storage::Storage;
use crate::tiers::{Tier, TierTable};

#[cfg(feature = "adaptive")]
use crate::rules::AlgorithmKind as AlgKind;

/// The outcome of [`Limiter::consume`]/[`Limiter::peek`], per spec.md §9's
/// redesign note: a tagged union (`Allowed | Denied | Error`) instead of
/// exception-based flow. The `Error` arm of that union is carried by this
/// crate's own `Result<LimitOutcome>` instead of a third enum variant —
/// `CircuitOpen`/`QuotaExceeded`/`QueueTimeout` surface as `Err(..)`, since
/// they are exceptional conditions distinct from an ordinary rate-limit
/// denial.
#[derive(Debug, Clone)]
pub enum LimitOutcome {
    /// The request may proceed.
    Allowed {
        /// Rate limit accounting at the time of the decision.
        info: RateLimitInfo,
        /// Headers to attach to the response.
        headers: Vec<(&'static str, String)>,
        /// Set when a denying rule's action was `Degrade`: the request is
        /// admitted, but the caller may choose to shed auxiliary work, per
        /// spec.md §9's resolved open question (advisory only).
        degraded: bool,
    },
    /// The request is denied.
    Denied {
        /// Rate limit accounting at the time of the decision.
        info: RateLimitInfo,
        /// Headers to attach to the response.
        headers: Vec<(&'static str, String)>,
        /// HTTP status code to return (from the rule's `Action::Reject`,
        /// or 429 by default).
        status: u16,
        /// Human-readable message (from the rule's `Action::Reject`, or a
        /// default rate-limit-exceeded message).
        message: String,
    },
}

impl LimitOutcome {
    /// Whether this outcome allows the request to proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, LimitOutcome::Allowed { .. })
    }

    fn bypass() -> Self {
        let now = std::time::Instant::now();
        let info = RateLimitInfo::new(u64::MAX, u64::MAX, now, now);
        LimitOutcome::Allowed {
            headers: vec![(names::RATE_LIMIT_BYPASS, "true".to_string())],
            info,
            degraded: false,
        }
    }

    fn unmatched() -> Self {
        let now = std::time::Instant::now();
        let info = RateLimitInfo::new(u64::MAX, u64::MAX, now, now);
        LimitOutcome::Allowed {
            headers: Vec::new(),
            info,
            degraded: false,
        }
    }
}

fn headers_for(info: &RateLimitInfo) -> Vec<(&'static str, String)> {
    RateLimitHeaders::from(info).to_vec()
}

/// Tunables controlling how a [`Limiter`] is assembled, per spec.md §4.5.
pub struct LimiterBuilder<S: Storage> {
    rules: Vec<Rule>,
    tiers: Vec<Tier>,
    tier_scope: Scope,
    tier_priority_base: i64,
    breakers: HashMap<String, BreakerConfig>,
    queue: Option<PriorityQueue>,
    quota_manager: Option<QuotaManager>,
    bypass_ips: HashSet<String>,
    bypass_api_keys: HashSet<String>,
    fail_open: bool,
    _storage: std::marker::PhantomData<S>,
}

impl<S: Storage> Default for LimiterBuilder<S> {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            tiers: Vec::new(),
            tier_scope: Scope::User,
            tier_priority_base: 1000,
            breakers: HashMap::new(),
            queue: None,
            quota_manager: None,
            bypass_ips: HashSet::new(),
            bypass_api_keys: HashSet::new(),
            fail_open: false,
            _storage: std::marker::PhantomData,
        }
    }
}

impl<S: Storage> LimiterBuilder<S> {
    /// Start a new builder with no rules, tiers, or auxiliary components.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one explicit rule.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add several explicit rules.
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Register a tier; its configured windows are expanded into synthetic
    /// rules at build time, per spec.md §4.4.
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tiers.push(tier);
        self
    }

    /// Register several tiers.
    pub fn with_tiers(mut self, tiers: impl IntoIterator<Item = Tier>) -> Self {
        self.tiers.extend(tiers);
        self
    }

    /// The scope tier-derived synthetic rules are partitioned by (default
    /// [`Scope::User`], since tiers describe per-subscriber limits).
    pub fn tier_scope(mut self, scope: Scope) -> Self {
        self.tier_scope = scope;
        self
    }

    /// The priority tier-derived rules start descending from (default
    /// 1000; keep explicit rules above or below this as desired).
    pub fn tier_priority_base(mut self, base: i64) -> Self {
        self.tier_priority_base = base;
        self
    }

    /// Register a named circuit breaker, per spec.md §4.6. A rule ties
    /// itself to this breaker via [`Rule::with_breaker`].
    pub fn with_breaker(mut self, name: impl Into<String>, config: BreakerConfig) -> Self {
        self.breakers.insert(name.into(), config);
        self
    }

    /// Enable the priority queue, per spec.md §4.7, used by rules whose
    /// action is [`Action::Queue`].
    pub fn with_queue(mut self, max_size: usize, process_interval: Duration) -> Self {
        self.queue = Some(PriorityQueue::new(max_size, process_interval));
        self
    }

    /// Install a quota manager, per spec.md §4.8. A rule ties itself to a
    /// registered quota via [`Rule::with_quota`].
    pub fn with_quota_manager(mut self, manager: QuotaManager) -> Self {
        self.quota_manager = Some(manager);
        self
    }

    /// Seed a bypass IP, per spec.md §4.5 step 1.
    pub fn with_bypass_ip(mut self, ip: impl Into<String>) -> Self {
        self.bypass_ips.insert(ip.into());
        self
    }

    /// Seed a bypass API key.
    pub fn with_bypass_api_key(mut self, key: impl Into<String>) -> Self {
        self.bypass_api_keys.insert(key.into());
        self
    }

    /// Whether to admit requests when the store errors rather than fail
    /// closed, per spec.md §6's `FAIL_OPEN_ON_STORE_ERROR`. Default false.
    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Build the limiter against the given storage backend, wrapping it in
    /// an `Arc` internally (matching the teacher's `storage: Arc<S>` idiom
    /// in `manager.rs`, which avoids requiring the backend type itself to
    /// be `Clone`).
    pub fn build(self, storage: S) -> Result<Limiter<S>> {
        let tier_table = TierTable::new(self.tiers)?;
        let mut all_rules = self.rules;
        all_rules.extend(tier_table.all_synthetic_rules(self.tier_priority_base, self.tier_scope));
        let rules = RuleTable::from_rules(all_rules)?;

        Ok(Limiter {
            storage: Arc::new(storage),
            rules,
            tiers: tier_table,
            breakers: self.breakers,
            queue: self.queue,
            quota_manager: self.quota_manager,
            bypass_ips: ArcSwap::from_pointee(self.bypass_ips),
            bypass_api_keys: ArcSwap::from_pointee(self.bypass_api_keys),
            fail_open: self.fail_open,
        })
    }
}

/// Ties the rule engine, tier table, circuit breakers, priority queue, and
/// quota manager together, per spec.md §4.5. `Send + Sync`, reentrant, and
/// stateless aside from its shared, `Arc`-backed components (spec.md §5):
/// no global mutex sits on the hot path.
pub struct Limiter<S: Storage> {
    storage: Arc<S>,
    rules: RuleTable,
    tiers: TierTable,
    breakers: HashMap<String, BreakerConfig>,
    queue: Option<PriorityQueue>,
    quota_manager: Option<QuotaManager>,
    bypass_ips: ArcSwap<HashSet<String>>,
    bypass_api_keys: ArcSwap<HashSet<String>>,
    fail_open: bool,
}

impl<S: Storage> Limiter<S> {
    /// Start building a limiter.
    pub fn builder() -> LimiterBuilder<S> {
        LimiterBuilder::new()
    }

    /// The underlying rule table, e.g. for an [`crate::admin::AdminApi`].
    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// The underlying tier table.
    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// The underlying storage backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// The configured quota manager, if any.
    pub fn quota_manager(&self) -> Option<&QuotaManager> {
        self.quota_manager.as_ref()
    }

    /// The configured priority queue, if any.
    pub fn queue(&self) -> Option<&PriorityQueue> {
        self.queue.as_ref()
    }

    /// The current bypass IP set.
    pub fn bypass_ips(&self) -> Arc<HashSet<String>> {
        self.bypass_ips.load_full()
    }

    /// The current bypass API key set.
    pub fn bypass_api_keys(&self) -> Arc<HashSet<String>> {
        self.bypass_api_keys.load_full()
    }

    /// Add a bypass IP (admin operation, per spec.md §4.9).
    pub fn add_bypass_ip(&self, ip: impl Into<String>) {
        let mut set: HashSet<String> = (*self.bypass_ips.load_full()).clone();
        set.insert(ip.into());
        self.bypass_ips.store(Arc::new(set));
    }

    /// Remove a bypass IP.
    pub fn remove_bypass_ip(&self, ip: &str) -> bool {
        let mut set: HashSet<String> = (*self.bypass_ips.load_full()).clone();
        let removed = set.remove(ip);
        self.bypass_ips.store(Arc::new(set));
        removed
    }

    /// Add a bypass API key.
    pub fn add_bypass_api_key(&self, key: impl Into<String>) {
        let mut set: HashSet<String> = (*self.bypass_api_keys.load_full()).clone();
        set.insert(key.into());
        self.bypass_api_keys.store(Arc::new(set));
    }

    /// Remove a bypass API key.
    pub fn remove_bypass_api_key(&self, key: &str) -> bool {
        let mut set: HashSet<String> = (*self.bypass_api_keys.load_full()).clone();
        let removed = set.remove(key);
        self.bypass_api_keys.store(Arc::new(set));
        removed
    }

    fn is_bypassed(&self, ctx: &RequestContext) -> bool {
        if ctx.internal {
            return true;
        }
        if let Some(key) = &ctx.api_key {
            if self.bypass_api_keys.load().contains(key) {
                return true;
            }
        }
        self.bypass_ips.load().contains(&ctx.ip)
    }

    /// Evaluate a request and record its effect in the store, per spec.md
    /// §4.5's eight-step algorithm. Side effect: counters updated exactly
    /// once per call (unless fail-open on store error).
    pub async fn consume(&self, ctx: &RequestContext) -> Result<LimitOutcome> {
        self.evaluate(ctx, true).await
    }

    /// Read-only variant of [`Limiter::consume`]: reports what `consume`
    /// would currently decide, without mutating any counters, breaker
    /// state, quota usage, or the priority queue.
    pub async fn peek(&self, ctx: &RequestContext) -> Result<LimitOutcome> {
        self.evaluate(ctx, false).await
    }

    /// Delete stored state for a key (admin operation, per spec.md §4.9).
    pub async fn reset(&self, key: &str) -> Result<()> {
        self.storage.delete(key).await
    }

    async fn evaluate(&self, ctx: &RequestContext, record: bool) -> Result<LimitOutcome> {
        // Step 1: bypass.
        if self.is_bypassed(ctx) {
            return Ok(LimitOutcome::bypass());
        }

        // Step 2: rule match. No match -> unbounded allow, no headers.
        let Some((rule, key, cost)) = self.rules.evaluate(ctx) else {
            return Ok(LimitOutcome::unmatched());
        };

        // Extension beyond spec.md §4.5's literal eight steps: when the
        // matched rule names a breaker, it gates the call before the rate
        // limit algorithm is consulted at all (an open breaker means the
        // downstream wouldn't be called regardless of remaining budget).
        if record {
            if let Some(breaker_name) = &rule.breaker {
                if let Some(config) = self.breakers.get(breaker_name) {
                    let breaker = Breaker::new(breaker_name.clone(), *config);
                    match breaker.try_acquire(&*self.storage).await {
                        Ok(BreakerDecision::Allow) => {}
                        Ok(BreakerDecision::Deny { retry_after }) => {
                            return Err(RateLimitError::CircuitOpen { retry_after });
                        }
                        Err(e) if self.fail_open => {
                            tracing::warn!(error = %e, breaker = %breaker_name, "breaker store error, failing open");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        // Steps 3-4: cost/key already derived by `rules.evaluate`; invoke
        // the rule's algorithm.
        let decision = if record {
            rule.algorithm
                .check_and_record(&*self.storage, &key, &rule.limits, cost)
                .await
        } else {
            rule.algorithm.check(&*self.storage, &key, &rule.limits, cost).await
        };

        let decision = match decision {
            Ok(d) => d,
            Err(e) if self.fail_open => {
                tracing::warn!(error = %e, rule = %rule.id, "storage error, failing open");
                let now = std::time::Instant::now();
                let info = RateLimitInfo::new(
                    rule.limits.max_requests(),
                    rule.limits.max_requests().saturating_sub(cost),
                    now + rule.limits.window(),
                    now,
                )
                .with_policy(rule.id.clone());
                return Ok(LimitOutcome::Allowed {
                    headers: headers_for(&info),
                    info,
                    degraded: false,
                });
            }
            Err(e) => return Err(e),
        };

        // Step 5: headers, with the policy header set to the rule id
        // rather than the algorithm name, per spec.md §6.
        let mut info = decision.info().clone();
        info.policy = Some(rule.id.clone());

        if decision.is_allowed() {
            // Extension beyond spec.md §4.5: a quota tied to this rule is
            // checked after the rate-limit algorithm allows, so a quota
            // denial never mutates the rate-limit counter it follows.
            if record {
                if let Some(quota_name) = &rule.quota {
                    if let Some(manager) = &self.quota_manager {
                        let subject = quota_subject(ctx);
                        match manager.check(&*self.storage, quota_name, &subject, cost).await {
                            Ok(QuotaOutcome::Allowed { .. }) => {}
                            Ok(QuotaOutcome::Denied { exhausted }) => {
                                return Err(RateLimitError::QuotaExceeded {
                                    quota_name: quota_name.clone(),
                                    remaining: exhausted.remaining(),
                                });
                            }
                            Err(e) if self.fail_open => {
                                tracing::warn!(error = %e, quota = %quota_name, "quota store error, failing open");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
            return Ok(LimitOutcome::Allowed {
                headers: headers_for(&info),
                info,
                degraded: false,
            });
        }

        // Steps 6-8: the rule's configured deny-action.
        match &rule.action {
            Action::Reject { status, message } => Ok(LimitOutcome::Denied {
                headers: headers_for(&info),
                info,
                status: *status,
                message: message.clone(),
            }),

            Action::Degrade => Ok(LimitOutcome::Allowed {
                headers: headers_for(&info),
                info,
                degraded: true,
            }),

            Action::Throttle => {
                if !record {
                    return Ok(default_denial(info));
                }
                let sleep_for = info.retry_after.unwrap_or_default().min(Duration::from_secs(2));
                tokio::time::sleep(sleep_for).await;
                Ok(LimitOutcome::Allowed {
                    headers: headers_for(&info),
                    info,
                    degraded: false,
                })
            }

            Action::Queue { timeout } => {
                if !record {
                    return Ok(default_denial(info));
                }
                let Some(queue) = &self.queue else {
                    return Ok(default_denial(info));
                };

                let storage = self.storage.clone();
                let algorithm = rule.algorithm.clone();
                let limits = rule.limits.clone();
                let admit_key = key.clone();
                let outcome = queue
                    .enqueue(&rule.id, rule.priority, *timeout, move || {
                        let storage = storage.clone();
                        let algorithm = algorithm.clone();
                        let limits = limits.clone();
                        let admit_key = admit_key.clone();
                        async move {
                            algorithm
                                .check(&*storage, &admit_key, &limits, cost)
                                .await
                                .map(|d| d.is_allowed())
                                .unwrap_or(false)
                        }
                    })
                    .await;

                match outcome {
                    QueueOutcome::Admitted => {
                        let final_decision = rule
                            .algorithm
                            .check_and_record(&*self.storage, &key, &rule.limits, cost)
                            .await?;
                        let mut final_info = final_decision.info().clone();
                        final_info.policy = Some(rule.id.clone());
                        if final_decision.is_allowed() {
                            Ok(LimitOutcome::Allowed {
                                headers: headers_for(&final_info),
                                info: final_info,
                                degraded: false,
                            })
                        } else {
                            Ok(default_denial(final_info))
                        }
                    }
                    QueueOutcome::TimedOut => Err(RateLimitError::QueueTimeout {
                        message: format!("queue wait for rule '{}' timed out", rule.id),
                    }),
                    QueueOutcome::QueueFull => Err(RateLimitError::QueueTimeout {
                        message: format!("queue for rule '{}' is full", rule.id),
                    }),
                }
            }
        }
    }

    /// Record the outcome of a downstream call guarded by the named
    /// breaker, feeding its circuit-breaker state (per spec.md §4.6) and,
    /// when the `adaptive` feature is enabled, the error-rate gauge of any
    /// rule sharing that breaker name (per spec.md §4.2's adaptive
    /// algorithm).
    pub async fn record_outcome(&self, breaker_name: &str, success: bool) -> Result<()> {
        if let Some(config) = self.breakers.get(breaker_name) {
            let breaker = Breaker::new(breaker_name, *config);
            if success {
                breaker.record_success(&*self.storage).await?;
            } else {
                breaker.record_failure(&*self.storage).await?;
            }
        }
        #[cfg(feature = "adaptive")]
        self.feed_adaptive_gauges(breaker_name, success);
        Ok(())
    }

    #[cfg(feature = "adaptive")]
    fn feed_adaptive_gauges(&self, breaker_name: &str, success: bool) {
        for rule in self.rules.snapshot().iter() {
            if rule.breaker.as_deref() != Some(breaker_name) {
                continue;
            }
            if let AlgKind::Adaptive(gauge) = &rule.algorithm {
                gauge.record(!success);
            }
        }
    }
}

fn default_denial(info: RateLimitInfo) -> LimitOutcome {
    LimitOutcome::Denied {
        headers: headers_for(&info),
        info,
        status: 429,
        message: "rate limit exceeded".to_string(),
    }
}

/// Resolve the subject a quota is tracked against: tenant, then user, then
/// the bare IP, per spec.md §4.8's "(subject, quotaName)" record key.
fn quota_subject(ctx: &RequestContext) -> String {
    ctx.tenant_id
        .clone()
        .or_else(|| ctx.user_id.clone())
        .unwrap_or_else(|| ctx.ip.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::RuleLimits;
    use crate::rules::Scope as RuleScope;
    use crate::storage::MemoryStorage;
    use std::time::Duration as StdDuration;

    fn ctx() -> RequestContext {
        RequestContext::new("1.2.3.4", "GET", "/v1/users").with_user("u1")
    }

    #[tokio::test]
    async fn test_bypass_internal_request() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .with_rule(Rule::new("r1", 1, RuleLimits::per_second(1)).with_scope(RuleScope::Global))
            .build(MemoryStorage::new())
            .unwrap();

        let outcome = limiter.consume(&ctx().internal()).await.unwrap();
        assert!(outcome.is_allowed());
        if let LimitOutcome::Allowed { headers, .. } = outcome {
            assert!(headers.iter().any(|(k, _)| *k == names::RATE_LIMIT_BYPASS));
        } else {
            panic!("expected allowed");
        }
    }

    #[tokio::test]
    async fn test_bypass_ip() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .with_bypass_ip("1.2.3.4")
            .with_rule(Rule::new("r1", 1, RuleLimits::per_second(1)).with_scope(RuleScope::Global))
            .build(MemoryStorage::new())
            .unwrap();

        let outcome = limiter.consume(&ctx()).await.unwrap();
        assert!(outcome.is_allowed());
    }

    #[tokio::test]
    async fn test_no_matching_rule_is_unbounded_allow() {
        let limiter = Limiter::<MemoryStorage>::builder().build(MemoryStorage::new()).unwrap();
        let outcome = limiter.consume(&ctx()).await.unwrap();
        match outcome {
            LimitOutcome::Allowed { info, headers, .. } => {
                assert_eq!(info.limit, u64::MAX);
                assert!(headers.is_empty());
            }
            _ => panic!("expected allowed"),
        }
    }

    #[tokio::test]
    async fn test_consume_denies_over_limit_with_reject_action() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .with_rule(Rule::new("r1", 1, RuleLimits::per_second(1)).with_scope(RuleScope::Global))
            .build(MemoryStorage::new())
            .unwrap();

        let first = limiter.consume(&ctx()).await.unwrap();
        assert!(first.is_allowed());

        let second = limiter.consume(&ctx()).await.unwrap();
        match second {
            LimitOutcome::Denied { status, headers, .. } => {
                assert_eq!(status, 429);
                assert!(headers.iter().any(|(k, _)| *k == "Retry-After"));
            }
            _ => panic!("expected denied"),
        }
    }

    #[tokio::test]
    async fn test_peek_does_not_mutate() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .with_rule(Rule::new("r1", 1, RuleLimits::per_second(1)).with_scope(RuleScope::Global))
            .build(MemoryStorage::new())
            .unwrap();

        let peeked = limiter.peek(&ctx()).await.unwrap();
        assert!(peeked.is_allowed());
        let peeked_again = limiter.peek(&ctx()).await.unwrap();
        assert!(peeked_again.is_allowed());
        let consumed = limiter.consume(&ctx()).await.unwrap();
        assert!(consumed.is_allowed());
    }

    #[tokio::test]
    async fn test_degrade_action_allows_with_flag() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .with_rule(
                Rule::new("r1", 1, RuleLimits::per_second(1))
                    .with_scope(RuleScope::Global)
                    .with_action(Action::Degrade),
            )
            .build(MemoryStorage::new())
            .unwrap();

        limiter.consume(&ctx()).await.unwrap();
        let second = limiter.consume(&ctx()).await.unwrap();
        match second {
            LimitOutcome::Allowed { degraded, .. } => assert!(degraded),
            _ => panic!("expected degraded allow"),
        }
    }

    #[tokio::test]
    async fn test_throttle_action_sleeps_then_allows() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .with_rule(
                Rule::new("r1", 1, RuleLimits::new(1, StdDuration::from_millis(50)))
                    .with_scope(RuleScope::Global)
                    .with_action(Action::Throttle),
            )
            .build(MemoryStorage::new())
            .unwrap();

        limiter.consume(&ctx()).await.unwrap();
        let started = std::time::Instant::now();
        let second = limiter.consume(&ctx()).await.unwrap();
        assert!(second.is_allowed());
        assert!(started.elapsed() <= StdDuration::from_secs(2));
    }

    #[tokio::test]
    async fn test_queue_action_admits_when_slot_frees() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .with_queue(10, StdDuration::from_millis(10))
            .with_rule(
                Rule::new("r1", 1, RuleLimits::new(1, StdDuration::from_millis(60)))
                    .with_scope(RuleScope::Global)
                    .with_action(Action::Queue {
                        timeout: StdDuration::from_millis(300),
                    }),
            )
            .build(MemoryStorage::new())
            .unwrap();

        limiter.consume(&ctx()).await.unwrap();
        let outcome = limiter.consume(&ctx()).await.unwrap();
        assert!(outcome.is_allowed());
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .with_rule(Rule::new("r1", 1, RuleLimits::per_second(1)).with_scope(RuleScope::Global))
            .build(MemoryStorage::new())
            .unwrap();

        limiter.consume(&ctx()).await.unwrap();
        limiter.reset("rule=r1:scope=global").await.unwrap();
        let after_reset = limiter.consume(&ctx()).await.unwrap();
        assert!(after_reset.is_allowed());
    }

    #[tokio::test]
    async fn test_breaker_open_denies_before_algorithm_check() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .with_breaker(
                "svc",
                BreakerConfig {
                    failure_threshold: 1,
                    success_threshold: 1,
                    reset_timeout: StdDuration::from_secs(30),
                    half_open_max_probes: 1,
                },
            )
            .with_rule(
                Rule::new("r1", 1, RuleLimits::per_second(100))
                    .with_scope(RuleScope::Global)
                    .with_breaker("svc"),
            )
            .build(MemoryStorage::new())
            .unwrap();

        limiter.record_outcome("svc", false).await.unwrap();
        let result = limiter.consume(&ctx()).await;
        assert!(matches!(result, Err(RateLimitError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_quota_exceeded_after_rule_allows() {
        let mut quotas = QuotaManager::new();
        quotas.register(crate::quota_manager::Quota::new("exports").daily(1));

        let limiter = Limiter::<MemoryStorage>::builder()
            .with_quota_manager(quotas)
            .with_rule(
                Rule::new("r1", 1, RuleLimits::per_second(100))
                    .with_scope(RuleScope::Global)
                    .with_quota("exports"),
            )
            .build(MemoryStorage::new())
            .unwrap();

        let first = limiter.consume(&ctx()).await.unwrap();
        assert!(first.is_allowed());
        let second = limiter.consume(&ctx()).await;
        assert!(matches!(second, Err(RateLimitError::QuotaExceeded { .. })));
    }
}
