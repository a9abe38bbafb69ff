//! Rule engine: ordered match predicates, priority resolution, and key
//! derivation, per spec.md §4.3.
//!
//! Rules are held in a [`RuleTable`], a copy-on-write snapshot (`ArcSwap`)
//! so the hot path never takes a lock to read the current rule set — only
//! admin mutations (§4.9) pay for a new `Arc` allocation, matching spec.md
//! §5's "readers get a snapshot pointer (copy-on-write)".

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::Regex;

use crate::algorithm::{Adaptive, Algorithm, ErrorRateGauge, FixedWindow};
use crate::context::RequestContext;
use crate::decision::Decision;
use crate::error::{ConfigError, Result};
use crate::limits::RuleLimits;
use crate::storage::Storage;

#[cfg(feature = "leaky-bucket")]
use crate::algorithm::LeakyBucket;
#[cfg(feature = "sliding-log")]
use crate::algorithm::SlidingLog;

/// The dimension along which a rule's counter is partitioned, per spec.md
/// §3's "scope (one of global/ip/user/api_key/tenant/endpoint/custom, or an
/// ordered list composed with `:` separator)".
#[derive(Clone)]
pub enum Scope {
    /// One global counter, shared by every request the rule matches.
    Global,
    /// Partitioned by client IP.
    Ip,
    /// Partitioned by authenticated user id. Requests with no user id do
    /// not match (skipped, not denied), per spec.md §4.3.
    User,
    /// Partitioned by API key.
    ApiKey,
    /// Partitioned by tenant id.
    Tenant,
    /// Partitioned by request path.
    Endpoint,
    /// Partitioned by an arbitrary function of the context.
    Custom(Arc<dyn Fn(&RequestContext) -> Option<String> + Send + Sync>),
    /// Several scopes composed together, e.g. tenant *and* user.
    Composite(Vec<Scope>),
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "Global"),
            Scope::Ip => write!(f, "Ip"),
            Scope::User => write!(f, "User"),
            Scope::ApiKey => write!(f, "ApiKey"),
            Scope::Tenant => write!(f, "Tenant"),
            Scope::Endpoint => write!(f, "Endpoint"),
            Scope::Custom(_) => write!(f, "Custom(..)"),
            Scope::Composite(scopes) => f.debug_tuple("Composite").field(scopes).finish(),
        }
    }
}

impl Scope {
    fn flatten(&self) -> Vec<&Scope> {
        match self {
            Scope::Composite(scopes) => scopes.iter().flat_map(Scope::flatten).collect(),
            other => vec![other],
        }
    }

    fn token(&self, ctx: &RequestContext) -> Option<String> {
        match self {
            Scope::Global => Some("scope=global".to_string()),
            Scope::Ip => Some(format!("scope={}", ctx.ip)),
            Scope::User => ctx.user_id.as_ref().map(|v| format!("scope={v}")),
            Scope::ApiKey => ctx.api_key.as_ref().map(|v| format!("scope={v}")),
            Scope::Tenant => ctx.tenant_id.as_ref().map(|v| format!("scope={v}")),
            Scope::Endpoint => Some(format!("ep={}", ctx.path)),
            Scope::Custom(f) => f(ctx).map(|v| format!("scope={v}")),
            Scope::Composite(_) => None,
        }
    }
}

/// Request cost: a fixed weight, or a function of the context, per
/// spec.md §3's "cost (positive integer or function of context; default
/// 1)".
#[derive(Clone)]
pub enum Cost {
    /// A fixed cost for every matching request.
    Fixed(u64),
    /// A cost computed per request.
    Fn(Arc<dyn Fn(&RequestContext) -> u64 + Send + Sync>),
}

impl std::fmt::Debug for Cost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cost::Fixed(n) => write!(f, "Fixed({n})"),
            Cost::Fn(_) => write!(f, "Fn(..)"),
        }
    }
}

impl Default for Cost {
    fn default() -> Self {
        Cost::Fixed(1)
    }
}

impl Cost {
    /// Resolve the cost for this request, per spec.md §4.3's cost
    /// resolution: fixed numbers are used as-is, functions are evaluated
    /// with the context.
    pub fn resolve(&self, ctx: &RequestContext) -> u64 {
        match self {
            Cost::Fixed(n) => (*n).max(1),
            Cost::Fn(f) => f(ctx).max(1),
        }
    }
}

/// What happens when a rule denies a request, per spec.md §3's `action`.
#[derive(Debug, Clone)]
pub enum Action {
    /// Reject with the given HTTP status (default 429) and message.
    Reject { status: u16, message: String },
    /// Sleep for `retry_after` (bounded to 2s, per spec.md §4.5 step 8)
    /// then admit.
    Throttle,
    /// Defer to the priority queue with the given timeout.
    Queue { timeout: std::time::Duration },
    /// Admit, but flag the decision as degraded (advisory only, per
    /// spec.md §9's resolved open question).
    Degrade,
}

impl Default for Action {
    fn default() -> Self {
        Action::Reject {
            status: 429,
            message: "rate limit exceeded".to_string(),
        }
    }
}

/// A header match condition: exact string or regex.
#[derive(Clone)]
pub enum HeaderMatch {
    /// Exact, case-sensitive match.
    Exact(String),
    /// Regex match against the header value.
    Regex(Regex),
}

impl std::fmt::Debug for HeaderMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderMatch::Exact(s) => write!(f, "Exact({s:?})"),
            HeaderMatch::Regex(r) => write!(f, "Regex({})", r.as_str()),
        }
    }
}

/// AND-combined match predicate, per spec.md §4.3: "all non-nil
/// sub-conditions must hold".
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    /// Path globs (`*` = one segment, `**` = remainder). Any glob matching
    /// is sufficient; an empty list matches every path.
    pub paths: Vec<String>,
    /// Allowed HTTP methods, compared case-insensitively. Empty = any.
    pub methods: HashSet<String>,
    /// Header name (lowercased) -> required match. A missing header is
    /// not a match, per spec.md §4.3.
    pub headers: Vec<(String, HeaderMatch)>,
    /// Allowed roles. Empty = any.
    pub roles: HashSet<String>,
    /// Allowed tiers. Empty = any.
    pub tiers: HashSet<String>,
    /// Allowed tenants. Empty = any.
    pub tenants: HashSet<String>,
    /// Custom predicate, evaluated last per spec.md §4.3.
    pub custom: Option<Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>>,
}

impl Matcher {
    /// Match everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to the given path globs.
    pub fn with_paths(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given HTTP methods.
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.methods = methods.into_iter().map(|m| m.into().to_uppercase()).collect();
        self
    }

    /// Require an exact header value.
    pub fn with_header_exact(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.into().to_lowercase(), HeaderMatch::Exact(value.into())));
        self
    }

    /// Require a header value matching a regex.
    pub fn with_header_regex(mut self, name: impl Into<String>, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| ConfigError::InvalidAlgorithm(format!("bad header regex: {e}")))?;
        self.headers.push((name.into().to_lowercase(), HeaderMatch::Regex(re)));
        Ok(self)
    }

    /// Restrict to the given roles.
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given tiers.
    pub fn with_tiers(mut self, tiers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tiers = tiers.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given tenants.
    pub fn with_tenants(mut self, tenants: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tenants = tenants.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a custom predicate, evaluated last.
    pub fn with_custom(mut self, f: impl Fn(&RequestContext) -> bool + Send + Sync + 'static) -> Self {
        self.custom = Some(Arc::new(f));
        self
    }

    fn matches(&self, ctx: &RequestContext) -> bool {
        if !self.paths.is_empty() && !self.paths.iter().any(|p| path_glob_matches(p, &ctx.path)) {
            return false;
        }
        if !self.methods.is_empty() && !self.methods.contains(&ctx.method.to_uppercase()) {
            return false;
        }
        for (name, expected) in &self.headers {
            let Some(actual) = ctx.header(name) else {
                return false;
            };
            let ok = match expected {
                HeaderMatch::Exact(v) => actual == v,
                HeaderMatch::Regex(re) => re.is_match(actual),
            };
            if !ok {
                return false;
            }
        }
        if !self.roles.is_empty() {
            let Some(role) = ctx.role.as_deref() else {
                return false;
            };
            if !self.roles.contains(role) {
                return false;
            }
        }
        if !self.tiers.is_empty() {
            let Some(tier) = ctx.tier.as_deref() else {
                return false;
            };
            if !self.tiers.contains(tier) {
                return false;
            }
        }
        if !self.tenants.is_empty() {
            let Some(tenant) = ctx.tenant_id.as_deref() else {
                return false;
            };
            if !self.tenants.contains(tenant) {
                return false;
            }
        }
        if let Some(custom) = &self.custom {
            if !custom(ctx) {
                return false;
            }
        }
        true
    }
}

/// Check whether `pattern` matches `path`, using `*` for a single path
/// segment and `**` for the remainder. Promoted from the teacher's
/// `manager.rs` `pattern_matches` helper, unchanged in behavior.
pub fn path_glob_matches(pattern: &str, path: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut pi = 0;
    let mut pa = 0;

    while pi < pattern_parts.len() && pa < path_parts.len() {
        let p = pattern_parts[pi];
        if p == "**" {
            return true;
        } else if p == "*" {
            pi += 1;
            pa += 1;
        } else if p == path_parts[pa] {
            pi += 1;
            pa += 1;
        } else {
            return false;
        }
    }

    pi == pattern_parts.len() && pa == path_parts.len()
}

/// The closed set of admission-control algorithms a rule may select, per
/// spec.md §4.2 and §9's redesign flag ("use a closed set of algorithm
/// variants... avoiding runtime reflection").
#[derive(Clone)]
pub enum AlgorithmKind {
    /// §4.2 fixed window.
    FixedWindow,
    /// §4.2 sliding window (log).
    #[cfg(feature = "sliding-log")]
    SlidingWindow,
    /// §4.2 token bucket.
    TokenBucket,
    /// §4.2 leaky bucket.
    #[cfg(feature = "leaky-bucket")]
    LeakyBucket,
    /// §4.2 adaptive, wrapping fixed window with an error-rate gauge fed
    /// by the circuit breaker.
    #[cfg(feature = "adaptive")]
    Adaptive(ErrorRateGauge),
}

impl std::fmt::Debug for AlgorithmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl AlgorithmKind {
    /// The algorithm's name, matching each concrete algorithm's `Algorithm::name`.
    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmKind::FixedWindow => "fixed_window",
            #[cfg(feature = "sliding-log")]
            AlgorithmKind::SlidingWindow => "sliding_window",
            AlgorithmKind::TokenBucket => "token_bucket",
            #[cfg(feature = "leaky-bucket")]
            AlgorithmKind::LeakyBucket => "leaky_bucket",
            #[cfg(feature = "adaptive")]
            AlgorithmKind::Adaptive(_) => "adaptive",
        }
    }

    /// Dispatch to the selected algorithm's `check_and_record`.
    pub async fn check_and_record<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        limits: &RuleLimits,
        cost: u64,
    ) -> Result<Decision> {
        match self {
            AlgorithmKind::FixedWindow => {
                FixedWindow::new().check_and_record(storage, key, limits, cost).await
            }
            #[cfg(feature = "sliding-log")]
            AlgorithmKind::SlidingWindow => {
                SlidingLog::new().check_and_record(storage, key, limits, cost).await
            }
            AlgorithmKind::TokenBucket => {
                crate::algorithm::TokenBucket::new()
                    .check_and_record(storage, key, limits, cost)
                    .await
            }
            #[cfg(feature = "leaky-bucket")]
            AlgorithmKind::LeakyBucket => {
                LeakyBucket::new().check_and_record(storage, key, limits, cost).await
            }
            #[cfg(feature = "adaptive")]
            AlgorithmKind::Adaptive(gauge) => {
                Adaptive::new(gauge.clone())
                    .check_and_record(storage, key, limits, cost)
                    .await
            }
        }
    }

    /// Dispatch to the selected algorithm's `check`.
    pub async fn check<S: Storage>(
        &self,
        storage: &S,
        key: &str,
        limits: &RuleLimits,
        cost: u64,
    ) -> Result<Decision> {
        match self {
            AlgorithmKind::FixedWindow => FixedWindow::new().check(storage, key, limits, cost).await,
            #[cfg(feature = "sliding-log")]
            AlgorithmKind::SlidingWindow => SlidingLog::new().check(storage, key, limits, cost).await,
            AlgorithmKind::TokenBucket => {
                crate::algorithm::TokenBucket::new().check(storage, key, limits, cost).await
            }
            #[cfg(feature = "leaky-bucket")]
            AlgorithmKind::LeakyBucket => LeakyBucket::new().check(storage, key, limits, cost).await,
            #[cfg(feature = "adaptive")]
            AlgorithmKind::Adaptive(gauge) => Adaptive::new(gauge.clone()).check(storage, key, limits, cost).await,
        }
    }
}

/// A single rate-limiting rule, per spec.md §3.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Unique id.
    pub id: String,
    /// Human-readable name.
    pub name: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Whether this rule is active.
    pub enabled: bool,
    /// Higher evaluates first; ties broken by lexicographically smaller id.
    pub priority: i64,
    /// How the counter is partitioned.
    pub scope: Scope,
    /// Numeric limits consumed by the algorithm.
    pub limits: RuleLimits,
    /// The admission-control algorithm.
    pub algorithm: AlgorithmKind,
    /// The AND-combined match predicate.
    pub matcher: Matcher,
    /// Request cost.
    pub cost: Cost,
    /// What to do when this rule denies a request.
    pub action: Action,
    /// If present and returns true, this rule is bypassed, per spec.md
    /// §4.3's "Skip predicate".
    pub skip: Option<Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>>,
    /// Named circuit breaker this rule's downstream call is guarded by, if
    /// any. Looked up by the limiter core against its configured breakers.
    pub breaker: Option<String>,
    /// Named long-horizon quota this rule's subject is also checked
    /// against, if any, per spec.md §4.8.
    pub quota: Option<String>,
}

impl Rule {
    /// Start building a rule with the given id, priority, and limits.
    pub fn new(id: impl Into<String>, priority: i64, limits: RuleLimits) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            enabled: true,
            priority,
            scope: Scope::Global,
            limits,
            algorithm: AlgorithmKind::FixedWindow,
            matcher: Matcher::any(),
            cost: Cost::default(),
            action: Action::default(),
            skip: None,
            breaker: None,
            quota: None,
        }
    }

    /// Set the scope.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the algorithm.
    pub fn with_algorithm(mut self, algorithm: AlgorithmKind) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the matcher.
    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Set the cost.
    pub fn with_cost(mut self, cost: Cost) -> Self {
        self.cost = cost;
        self
    }

    /// Set the action.
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    /// Disable this rule.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Tie this rule to a named circuit breaker.
    pub fn with_breaker(mut self, name: impl Into<String>) -> Self {
        self.breaker = Some(name.into());
        self
    }

    /// Tie this rule to a named long-horizon quota.
    pub fn with_quota(mut self, name: impl Into<String>) -> Self {
        self.quota = Some(name.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ConfigError::MissingRequired("rule id".to_string()).into());
        }
        if self.limits.max_requests() == 0 {
            return Err(ConfigError::InvalidQuota("rule limit must be positive".to_string()).into());
        }
        if self.limits.window().is_zero() {
            return Err(ConfigError::InvalidQuota("rule window must be non-zero".to_string()).into());
        }
        Ok(())
    }
}

/// Derive the scoped storage key for a rule against a context, per
/// spec.md §4.3: `rule=<id>:scope=<value>:...`. Returns `None` (not
/// matched) if any scope atom cannot be resolved from the context (e.g.
/// `user` scope with no authenticated user).
pub fn derive_key(rule: &Rule, ctx: &RequestContext) -> Option<String> {
    let mut tokens = vec![format!("rule={}", rule.id)];
    for atom in rule.scope.flatten() {
        tokens.push(atom.token(ctx)?);
    }
    Some(tokens.join(":"))
}

fn sort_key(rule: &Rule) -> (i64, Reverse<&str>) {
    (rule.priority, Reverse(rule.id.as_str()))
}

/// Ordered, copy-on-write rule table, per spec.md §4.3/§5.
pub struct RuleTable {
    snapshot: ArcSwap<Vec<Rule>>,
}

impl std::fmt::Debug for RuleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleTable").field("len", &self.snapshot.load().len()).finish()
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleTable {
    /// Create an empty rule table.
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Create a rule table from an initial rule set, validating and
    /// sorting by descending priority (ties by ascending id).
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self> {
        let table = Self::new();
        for rule in rules {
            table.add(rule)?;
        }
        Ok(table)
    }

    /// Current rule count.
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    /// Whether the table has no rules.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A read-only snapshot of the current rules, in evaluation order.
    pub fn snapshot(&self) -> Arc<Vec<Rule>> {
        self.snapshot.load_full()
    }

    /// Add a rule, or replace it if its id already exists (idempotent,
    /// last-write-wins, per spec.md §8's admin idempotence property).
    pub fn add(&self, rule: Rule) -> Result<()> {
        rule.validate()?;
        let mut rules: Vec<Rule> = (**self.snapshot.load()).clone();
        rules.retain(|r| r.id != rule.id);
        rules.push(rule);
        rules.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
        self.snapshot.store(Arc::new(rules));
        Ok(())
    }

    /// Update a rule by id; fails if it doesn't exist.
    pub fn update(&self, rule: Rule) -> Result<()> {
        let exists = self.snapshot.load().iter().any(|r| r.id == rule.id);
        if !exists {
            return Err(ConfigError::MissingRequired(format!("rule '{}' does not exist", rule.id)).into());
        }
        self.add(rule)
    }

    /// Delete a rule by id.
    pub fn delete(&self, id: &str) -> bool {
        let mut rules: Vec<Rule> = (**self.snapshot.load()).clone();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        let removed = rules.len() != before;
        if removed {
            self.snapshot.store(Arc::new(rules));
        }
        removed
    }

    /// Get a rule by id.
    pub fn get(&self, id: &str) -> Option<Rule> {
        self.snapshot.load().iter().find(|r| r.id == id).cloned()
    }

    /// Evaluate the rule table against a context, per spec.md §4.3/§4.5
    /// steps 2-3: the first enabled, matching, non-skipped rule with a
    /// resolvable key wins; returns the rule, its derived key, and the
    /// resolved cost.
    pub fn evaluate(&self, ctx: &RequestContext) -> Option<(Rule, String, u64)> {
        let rules = self.snapshot.load();
        for rule in rules.iter() {
            if !rule.enabled {
                continue;
            }
            if let Some(skip) = &rule.skip {
                if skip(ctx) {
                    continue;
                }
            }
            if !rule.matcher.matches(ctx) {
                continue;
            }
            let Some(key) = derive_key(rule, ctx) else {
                continue;
            };
            let cost = rule.cost.resolve(ctx);
            return Some((rule.clone(), key, cost));
        }
        None
    }
}
