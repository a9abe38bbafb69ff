//! Per-route rate limiting example.
//!
//! Run with:
//! ```
//! cargo run --example per_route_limits --features memory
//! ```

use gatekeeper::limits::RuleLimits;
use gatekeeper::rules::{Rule, Scope};
use gatekeeper::{Limiter, MemoryStorage, RequestContext};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let storage = MemoryStorage::new();

    // Define per-route limits, highest priority first so the most specific
    // route wins over the catch-all default rule.
    let limiter = Limiter::builder()
        .with_rule(
            Rule::new("search", 30, RuleLimits::per_minute(30))
                .with_scope(Scope::Endpoint)
                .with_matcher(gatekeeper::rules::Matcher::default().with_paths(["/api/search"])),
        )
        .with_rule(
            Rule::new("login", 30, RuleLimits::per_minute(5))
                .with_scope(Scope::Endpoint)
                .with_matcher(gatekeeper::rules::Matcher::default().with_paths(["/api/auth/login"])),
        )
        .with_rule(
            Rule::new("users", 30, RuleLimits::per_second(20))
                .with_scope(Scope::Endpoint)
                .with_matcher(gatekeeper::rules::Matcher::default().with_paths(["/api/users"])),
        )
        .with_rule(Rule::new("default", 0, RuleLimits::per_minute(100)).with_scope(Scope::Endpoint))
        .build(storage)?;

    println!("=== Per-Route Rate Limiting Demo ===\n");

    let routes = [
        ("/api/data", 5),       // falls through to the default rule (100/min)
        ("/api/search", 35),    // 30/min limit - should deny some
        ("/api/auth/login", 7), // 5/min limit - should deny some
        ("/api/users", 25),     // 20/sec limit
    ];

    for (route, count) in routes {
        println!("Route: {route} (sending {count} requests)");

        let mut allowed = 0;
        let mut denied = 0;

        for _ in 0..count {
            let ctx = RequestContext::new("203.0.113.5", "GET", route);
            let outcome = limiter.consume(&ctx).await?;
            if outcome.is_allowed() {
                allowed += 1;
            } else {
                denied += 1;
            }
        }

        println!("  allowed: {allowed}, denied: {denied}\n");
    }

    Ok(())
}
