//! # Basic Async Cache Example
//!
//! The first call runs the function and stores its value; later calls with
//! the same arguments decode it from storage.

use cacheval_async::{async_cache_value, CacheResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

static EXEC_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Simple async addition with caching
#[async_cache_value(expires_in = 60)]
async fn slow_add(a: u32, b: u32) -> u32 {
    EXEC_COUNT.fetch_add(1, Ordering::SeqCst);
    println!("Computing {} + {} (async)", a, b);
    tokio::time::sleep(Duration::from_millis(100)).await;
    a + b
}

#[tokio::main]
async fn main() -> CacheResult<()> {
    println!("=== Basic Async Cache Example ===\n");

    for (a, b) in [(1, 1), (1, 1), (2, 3), (2, 3)] {
        let start = Instant::now();
        let result = slow_add(a, b).await?;
        println!(
            "slow_add({}, {}) -> {} (took {:?})",
            a,
            b,
            result,
            start.elapsed()
        );
    }

    let executions = EXEC_COUNT.load(Ordering::SeqCst);
    println!("\nFunction executed {} times (expected 2)", executions);
    assert_eq!(executions, 2);

    println!("\n✅ Basic async cache example completed!");
    Ok(())
}
