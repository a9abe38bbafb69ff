//! Request context: the immutable, per-request input to the rule engine
//! and limiter core, per spec.md §3's "Request Context".

use std::collections::HashMap;
use std::time::{Instant, SystemTime};

/// Immutable snapshot of a single request, as seen by the limiter.
///
/// Constructed once by the caller's own dispatcher (tenant/auth extraction
/// is out of scope, per spec.md §1) and passed by reference through
/// [`crate::rules::RuleTable::evaluate`] and [`crate::limiter::Limiter`].
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Client IP address.
    pub ip: String,
    /// Authenticated user id, if any.
    pub user_id: Option<String>,
    /// Tenant id, if any.
    pub tenant_id: Option<String>,
    /// API key, if any.
    pub api_key: Option<String>,
    /// Subscription tier name, if any.
    pub tier: Option<String>,
    /// Caller role, if any.
    pub role: Option<String>,
    /// HTTP method (e.g. "GET").
    pub method: String,
    /// Request path (e.g. "/v1/ai/generate").
    pub path: String,
    /// Request headers, lowercased keys, per spec.md §3.
    pub headers: HashMap<String, String>,
    /// Monotonic arrival instant, used for duration arithmetic.
    pub arrival: Instant,
    /// Wall-clock arrival time, used for calendar-aligned accounting.
    pub arrival_wall: SystemTime,
    /// Whether this is an internal (service-to-service) request; internal
    /// requests bypass rate limiting per spec.md §4.5 step 1.
    pub internal: bool,
}

impl RequestContext {
    /// Construct a context for an external request arriving now.
    pub fn new(ip: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_id: None,
            tenant_id: None,
            api_key: None,
            tier: None,
            role: None,
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
            arrival: Instant::now(),
            arrival_wall: SystemTime::now(),
            internal: false,
        }
    }

    /// Attach a user id.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach a tenant id.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Attach an API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Attach a tier name.
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    /// Attach a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Attach a header, lowercasing its name per spec.md §3.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_lowercase(), value.into());
        self
    }

    /// Mark this context as an internal (bypass-eligible) request.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Get a header value by (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let ctx = RequestContext::new("1.2.3.4", "GET", "/v1/users")
            .with_user("u1")
            .with_tenant("t1")
            .with_header("X-Api-Key", "abc");

        assert_eq!(ctx.user_id.as_deref(), Some("u1"));
        assert_eq!(ctx.tenant_id.as_deref(), Some("t1"));
        assert_eq!(ctx.header("x-api-key"), Some("abc"));
        assert!(!ctx.internal);
    }

    #[test]
    fn test_context_internal() {
        let ctx = RequestContext::new("1.2.3.4", "GET", "/v1/users").internal();
        assert!(ctx.internal);
    }
}
