//! Algorithm comparison example.
//!
//! Run with:
//! ```
//! cargo run --example algorithms --features "memory all-algorithms"
//! ```

use gatekeeper::algorithm::Algorithm;
use gatekeeper::limits::RuleLimits;
use gatekeeper::{Adaptive, FixedWindow, LeakyBucket, MemoryStorage, SlidingLog, TokenBucket};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let limits = RuleLimits::per_second(5).with_burst(3);

    println!("=== Algorithm Comparison Demo ===\n");
    println!("Limits: 5 requests/second, burst: 3\n");

    test_algorithm("Fixed Window", FixedWindow::new(), &limits).await?;
    test_algorithm("Token Bucket", TokenBucket::new(), &limits).await?;
    test_algorithm("Leaky Bucket", LeakyBucket::new(), &limits).await?;
    test_algorithm("Sliding Log", SlidingLog::new(), &limits).await?;
    test_algorithm("Adaptive", Adaptive::default(), &limits).await?;

    println!("\n=== Algorithm Characteristics ===\n");
    println!("| Algorithm     | Memory | Burst Handling | Best For                |");
    println!("|---------------|--------|-----------------|-------------------------|");
    println!("| Fixed Window  | Low    | Poor            | Simple use cases        |");
    println!("| Token Bucket  | Low    | Excellent       | Bursty traffic          |");
    println!("| Leaky Bucket  | Low    | Smooth          | Stable backend load     |");
    println!("| Sliding Log   | High   | Excellent       | Precision critical      |");
    println!("| Adaptive      | Low    | Poor            | Downstream-health-aware |");

    Ok(())
}

async fn test_algorithm<A: Algorithm>(
    name: &str,
    algorithm: A,
    limits: &RuleLimits,
) -> Result<(), Box<dyn std::error::Error>> {
    let storage = MemoryStorage::new();
    let key = format!("test:{}", name.to_lowercase().replace(' ', "_"));

    print!("{name:15} | ");

    let mut results = Vec::new();
    for _ in 0..8 {
        let decision = algorithm.check_and_record(&storage, &key, limits, 1).await?;
        results.push(if decision.is_allowed() { "A" } else { "D" });
    }

    println!("{}", results.join(" "));
    Ok(())
}
