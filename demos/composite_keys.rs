//! Composite key example - rate limit by multiple scope atoms at once.
//!
//! Run with:
//! ```
//! cargo run --example composite_keys --features memory
//! ```

use gatekeeper::limits::RuleLimits;
use gatekeeper::rules::{Rule, Scope};
use gatekeeper::{Limiter, MemoryStorage, RequestContext};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let storage = MemoryStorage::new();

    // Scope::Composite([Ip, Endpoint]) means the counter is keyed on the
    // (IP, path) pair: the same IP hitting two different paths gets two
    // independent budgets, and two IPs hitting the same path don't share one.
    let limiter = Limiter::builder()
        .with_rule(
            Rule::new("per-ip-per-route", 0, RuleLimits::per_minute(5))
                .with_scope(Scope::Composite(vec![Scope::Ip, Scope::Endpoint])),
        )
        .build(storage)?;

    println!("=== Composite Key Rate Limiting Demo ===\n");
    println!("Limit: 5 requests per minute per (IP, path) combination\n");

    let scenarios = [
        ("192.168.1.1", "/api/users", 3), // fresh combo
        ("192.168.1.1", "/api/posts", 3), // same IP, different path -> fresh budget
        ("192.168.1.2", "/api/users", 3), // different IP, same path -> fresh budget
        ("192.168.1.1", "/api/users", 5), // back to the first combo -> hits the limit
    ];

    for (ip, path, count) in scenarios {
        println!("Requests from {ip} to {path}:");

        for i in 1..=count {
            let ctx = RequestContext::new(ip, "GET", path);
            let outcome = limiter.consume(&ctx).await?;
            let (mark, remaining) = match &outcome {
                gatekeeper::LimitOutcome::Allowed { info, .. } => ("allowed", info.remaining),
                gatekeeper::LimitOutcome::Denied { info, .. } => ("denied", info.remaining),
            };
            println!("  request {i}: {mark} (remaining: {remaining})");
        }
        println!();
    }

    Ok(())
}
