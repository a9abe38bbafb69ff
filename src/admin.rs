//! Admin surface: runtime rule/tier/bypass management, per spec.md §4.9.
//!
//! Wraps a [`Limiter`] reference rather than owning storage directly, so
//! the same admin operations work regardless of backend.

use serde::{Deserialize, Serialize};

use crate::breaker::{Breaker, BreakerState};
use crate::error::{ConfigError, Result};
use crate::quota_manager::QuotaUsage;
use crate::rules::Rule;
use crate::storage::{current_timestamp_ms, Storage};
use crate::tiers::Tier;
use crate::Limiter;

/// Snapshot of gateway-wide counts, per spec.md §4.9's `stats()` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminStats {
    /// Number of currently configured rules.
    pub rules_count: usize,
    /// Number of currently configured tiers.
    pub tiers_count: usize,
    /// When this snapshot was taken, in Unix milliseconds.
    pub timestamp: u64,
}

/// Runtime administration over a [`Limiter`]'s rules, tiers, and bypass
/// lists, per spec.md §4.9. Every mutation is immediately visible to
/// in-flight evaluations via the underlying copy-on-write snapshots.
pub struct AdminApi<'a, S: Storage> {
    limiter: &'a Limiter<S>,
}

impl<'a, S: Storage> AdminApi<'a, S> {
    /// Wrap a limiter for administration.
    pub fn new(limiter: &'a Limiter<S>) -> Self {
        Self { limiter }
    }

    /// Add a new rule, or replace one with the same id.
    pub fn add_rule(&self, rule: Rule) -> Result<()> {
        self.limiter.rules().add(rule)
    }

    /// Update an existing rule by id; fails if it doesn't exist.
    pub fn update_rule(&self, rule: Rule) -> Result<()> {
        self.limiter.rules().update(rule)
    }

    /// Delete a rule by id. Returns whether a rule was removed.
    pub fn delete_rule(&self, id: &str) -> bool {
        self.limiter.rules().delete(id)
    }

    /// Fetch a rule by id.
    pub fn get_rule(&self, id: &str) -> Option<Rule> {
        self.limiter.rules().get(id)
    }

    /// List all configured rules, in evaluation order.
    pub fn list_rules(&self) -> Vec<Rule> {
        (*self.limiter.rules().snapshot()).clone()
    }

    /// Fetch a configured tier by name.
    pub fn get_tier(&self, name: &str) -> Option<Tier> {
        self.limiter.tiers().get(name).cloned()
    }

    /// List all configured tiers.
    pub fn list_tiers(&self) -> Vec<Tier> {
        self.limiter.tiers().iter().cloned().collect()
    }

    /// Add a bypass IP, per spec.md §4.9.
    pub fn add_bypass_ip(&self, ip: impl Into<String>) {
        self.limiter.add_bypass_ip(ip);
    }

    /// Remove a bypass IP. Returns whether it was present.
    pub fn remove_bypass_ip(&self, ip: &str) -> bool {
        self.limiter.remove_bypass_ip(ip)
    }

    /// Add a bypass API key.
    pub fn add_bypass_api_key(&self, key: impl Into<String>) {
        self.limiter.add_bypass_api_key(key);
    }

    /// Remove a bypass API key. Returns whether it was present.
    pub fn remove_bypass_api_key(&self, key: &str) -> bool {
        self.limiter.remove_bypass_api_key(key)
    }

    /// Current bypass IP list.
    pub fn list_bypass_ips(&self) -> Vec<String> {
        self.limiter.bypass_ips().iter().cloned().collect()
    }

    /// Current bypass API key list.
    pub fn list_bypass_api_keys(&self) -> Vec<String> {
        self.limiter.bypass_api_keys().iter().cloned().collect()
    }

    /// Clear all stored state for a key (e.g. `rule=r1:scope=user1`), per
    /// spec.md §4.9's `reset(key)` operation.
    pub async fn reset(&self, key: &str) -> Result<()> {
        self.limiter.reset(key).await
    }

    /// Force a named circuit breaker back to closed.
    pub async fn reset_breaker(&self, name: &str, config: crate::breaker::BreakerConfig) -> Result<()> {
        Breaker::new(name, config).reset(self.limiter.storage()).await
    }

    /// Read a named circuit breaker's current state.
    pub async fn breaker_state(&self, name: &str, config: crate::breaker::BreakerConfig) -> Result<BreakerState> {
        Breaker::new(name, config).state(self.limiter.storage()).await
    }

    /// Read current usage for a registered quota/subject, per spec.md §4.9.
    pub async fn quota_usage(&self, quota_name: &str, subject: &str) -> Result<Vec<QuotaUsage>> {
        match self.limiter.quota_manager() {
            Some(manager) => manager.usage(self.limiter.storage(), quota_name, subject).await,
            None => Err(ConfigError::MissingRequired("no quota manager configured".to_string()).into()),
        }
    }

    /// Reset a subject's usage for a registered quota.
    pub async fn reset_quota(&self, quota_name: &str, subject: &str) -> Result<()> {
        match self.limiter.quota_manager() {
            Some(manager) => manager.reset(self.limiter.storage(), quota_name, subject).await,
            None => Err(ConfigError::MissingRequired("no quota manager configured".to_string()).into()),
        }
    }

    /// Current depth of a named priority sub-queue, if queuing is enabled.
    pub async fn queue_depth(&self, queue_name: &str) -> Option<usize> {
        match self.limiter.queue() {
            Some(queue) => Some(queue.depth(queue_name).await),
            None => None,
        }
    }

    /// Snapshot of rule/tier counts, per spec.md §4.9.
    pub fn stats(&self) -> AdminStats {
        AdminStats {
            rules_count: self.limiter.rules().len(),
            tiers_count: self.limiter.tiers().len(),
            timestamp: current_timestamp_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::RuleLimits;
    use crate::rules::Scope;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_admin_add_and_list_rules() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .build(MemoryStorage::new())
            .unwrap();
        let admin = AdminApi::new(&limiter);

        admin
            .add_rule(Rule::new("r1", 1, RuleLimits::per_second(5)).with_scope(Scope::Global))
            .unwrap();

        assert_eq!(admin.list_rules().len(), 1);
        assert!(admin.get_rule("r1").is_some());
    }

    #[test]
    fn test_admin_delete_rule() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .build(MemoryStorage::new())
            .unwrap();
        let admin = AdminApi::new(&limiter);

        admin.add_rule(Rule::new("r1", 1, RuleLimits::per_second(5))).unwrap();
        assert!(admin.delete_rule("r1"));
        assert!(!admin.delete_rule("r1"));
    }

    #[test]
    fn test_admin_bypass_lists() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .build(MemoryStorage::new())
            .unwrap();
        let admin = AdminApi::new(&limiter);

        admin.add_bypass_ip("9.9.9.9");
        assert!(admin.list_bypass_ips().contains(&"9.9.9.9".to_string()));
        assert!(admin.remove_bypass_ip("9.9.9.9"));
        assert!(!admin.list_bypass_ips().contains(&"9.9.9.9".to_string()));
    }

    #[test]
    fn test_admin_stats() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .with_tier(Tier::new("free").per_minute(10))
            .build(MemoryStorage::new())
            .unwrap();
        let admin = AdminApi::new(&limiter);

        let stats = admin.stats();
        assert_eq!(stats.tiers_count, 1);
        // The "free" tier expands into one synthetic rule.
        assert_eq!(stats.rules_count, 1);
    }

    #[tokio::test]
    async fn test_admin_reset_clears_state() {
        let limiter = Limiter::<MemoryStorage>::builder()
            .with_rule(Rule::new("r1", 1, RuleLimits::per_second(1)).with_scope(Scope::Global))
            .build(MemoryStorage::new())
            .unwrap();
        let admin = AdminApi::new(&limiter);

        let ctx = crate::context::RequestContext::new("1.2.3.4", "GET", "/v1/users");
        limiter.consume(&ctx).await.unwrap();
        admin.reset("rule=r1:scope=global").await.unwrap();
        let outcome = limiter.consume(&ctx).await.unwrap();
        assert!(outcome.is_allowed());
    }
}
