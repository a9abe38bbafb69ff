//! Tier table: named bundles of per-window limits, per spec.md §4.4.
//!
//! A [`Tier`] is a convenience over hand-writing one [`Rule`] per window —
//! subscribers on a tier get a per-second, per-minute, per-hour, and/or
//! per-day limit plus an optional concurrency cap, all in one declaration.
//! [`Tier::synthetic_rules`] expands a tier into the individual rules the
//! rule engine actually evaluates.

use std::collections::HashMap;

#[cfg(feature = "concurrent")]
use crate::algorithm::ConcurrentLimiter;
use crate::error::{ConfigError, Result};
use crate::limits::RuleLimits;
use crate::rules::{AlgorithmKind, Rule, Scope};

/// A named bundle of limits applied together, per spec.md §4.4.
#[derive(Debug, Clone)]
pub struct Tier {
    /// Tier name (e.g. "free", "pro", "enterprise").
    pub name: String,
    /// Per-second limit, if any.
    pub per_second: Option<u64>,
    /// Per-minute limit, if any.
    pub per_minute: Option<u64>,
    /// Per-hour limit, if any.
    pub per_hour: Option<u64>,
    /// Per-day limit, if any.
    pub per_day: Option<u64>,
    /// Maximum simultaneous in-flight requests, if any.
    pub concurrent_requests: Option<u32>,
}

impl Tier {
    /// Start a tier with the given name and no limits set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            per_second: None,
            per_minute: None,
            per_hour: None,
            per_day: None,
            concurrent_requests: None,
        }
    }

    /// Set the per-second limit.
    pub fn per_second(mut self, n: u64) -> Self {
        self.per_second = Some(n);
        self
    }

    /// Set the per-minute limit.
    pub fn per_minute(mut self, n: u64) -> Self {
        self.per_minute = Some(n);
        self
    }

    /// Set the per-hour limit.
    pub fn per_hour(mut self, n: u64) -> Self {
        self.per_hour = Some(n);
        self
    }

    /// Set the per-day limit.
    pub fn per_day(mut self, n: u64) -> Self {
        self.per_day = Some(n);
        self
    }

    /// Set the concurrent-request cap.
    pub fn concurrent_requests(mut self, n: u32) -> Self {
        self.concurrent_requests = Some(n);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.per_second.is_none()
            && self.per_minute.is_none()
            && self.per_hour.is_none()
            && self.per_day.is_none()
            && self.concurrent_requests.is_none()
        {
            return Err(ConfigError::InvalidQuota(format!(
                "tier '{}' has no limits configured",
                self.name
            ))
            .into());
        }
        Ok(())
    }

    /// Expand this tier into one synthetic [`Rule`] per configured window,
    /// scoped by the given `scope` (typically [`Scope::User`] or
    /// [`Scope::ApiKey`]), per spec.md §4.4: "the tightest window gets the
    /// highest priority so it is evaluated, and can deny, first."
    ///
    /// `priority_base` positions these rules relative to the caller's other
    /// rules; each successive (wider) window gets a slightly lower
    /// priority than the last.
    pub fn synthetic_rules(&self, priority_base: i64, scope: Scope) -> Vec<Rule>
    where
        Scope: Clone,
    {
        let mut rules = Vec::new();
        let mut next_priority = priority_base;

        let push = |rules: &mut Vec<Rule>, suffix: &str, limits: RuleLimits, priority: i64| {
            let id = format!("tier:{}:{}", self.name, suffix);
            rules.push(
                Rule::new(id, priority, limits)
                    .with_scope(scope.clone())
                    .with_algorithm(AlgorithmKind::FixedWindow)
                    .with_matcher(crate::rules::Matcher::any().with_tiers([self.name.clone()])),
            );
        };

        if let Some(n) = self.per_second {
            push(&mut rules, "per_second", RuleLimits::per_second(n), next_priority);
            next_priority -= 1;
        }
        if let Some(n) = self.per_minute {
            push(&mut rules, "per_minute", RuleLimits::per_minute(n), next_priority);
            next_priority -= 1;
        }
        if let Some(n) = self.per_hour {
            push(&mut rules, "per_hour", RuleLimits::per_hour(n), next_priority);
            next_priority -= 1;
        }
        if let Some(n) = self.per_day {
            push(&mut rules, "per_day", RuleLimits::per_day(n), next_priority);
        }

        rules
    }
}

/// Table of named tiers, immutable at runtime (per SPEC_FULL §9's resolved
/// open question: a tier bundle is configuration, not live admin state;
/// admins instead author/replace the [`Rule`]s a tier expands to).
#[derive(Debug, Clone, Default)]
pub struct TierTable {
    tiers: HashMap<String, Tier>,
    #[cfg(feature = "concurrent")]
    limiters: HashMap<String, ConcurrentLimiter>,
}

impl TierTable {
    /// Build a tier table from a list of tiers, validating each.
    pub fn new(tiers: Vec<Tier>) -> Result<Self> {
        let mut map = HashMap::new();
        #[cfg(feature = "concurrent")]
        let mut limiters = HashMap::new();
        for tier in tiers {
            tier.validate()?;
            #[cfg(feature = "concurrent")]
            if let Some(n) = tier.concurrent_requests {
                limiters.insert(tier.name.clone(), ConcurrentLimiter::new(n));
            }
            map.insert(tier.name.clone(), tier);
        }
        Ok(Self {
            tiers: map,
            #[cfg(feature = "concurrent")]
            limiters,
        })
    }

    /// Look up a tier by name.
    pub fn get(&self, name: &str) -> Option<&Tier> {
        self.tiers.get(name)
    }

    /// Number of configured tiers.
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Whether the table has no tiers.
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Iterate over all tiers.
    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.values()
    }

    /// The concurrency limiter for a tier, if it has one configured.
    #[cfg(feature = "concurrent")]
    pub fn concurrent_limiter(&self, tier_name: &str) -> Option<&ConcurrentLimiter> {
        self.limiters.get(tier_name)
    }

    /// Expand every configured tier into its synthetic rules, scoped as
    /// given, starting at `priority_base` and descending per tier.
    pub fn all_synthetic_rules(&self, priority_base: i64, scope: Scope) -> Vec<Rule>
    where
        Scope: Clone,
    {
        let mut rules = Vec::new();
        let mut priority = priority_base;
        let mut names: Vec<&String> = self.tiers.keys().collect();
        names.sort();
        for name in names {
            let tier = &self.tiers[name];
            rules.extend(tier.synthetic_rules(priority, scope.clone()));
            priority -= 10;
        }
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_synthetic_rules_ordering() {
        let tier = Tier::new("pro").per_second(10).per_day(100_000);
        let rules = tier.synthetic_rules(100, Scope::User);

        assert_eq!(rules.len(), 2);
        assert!(rules[0].priority > rules[1].priority);
        assert_eq!(rules[0].id, "tier:pro:per_second");
        assert_eq!(rules[1].id, "tier:pro:per_day");
    }

    #[test]
    fn test_tier_validate_rejects_empty() {
        let empty = Tier::new("nothing");
        assert!(TierTable::new(vec![empty]).is_err());
    }

    #[test]
    fn test_tier_table_lookup() {
        let table = TierTable::new(vec![Tier::new("free").per_minute(10)]).unwrap();
        assert!(table.get("free").is_some());
        assert!(table.get("pro").is_none());
        assert_eq!(table.len(), 1);
    }

    #[cfg(feature = "concurrent")]
    #[test]
    fn test_tier_concurrent_limiter_registered() {
        let table = TierTable::new(vec![Tier::new("pro").per_minute(10).concurrent_requests(5)]).unwrap();
        assert!(table.concurrent_limiter("pro").is_some());
    }
}
