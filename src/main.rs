// Esox ResourcePool
// Bounded, blocking resource pool with lifecycle-policy dispatch

// This is just a binary wrapper - the actual library is in lib.rs
// Run examples with: cargo run --example basic

use esox_resourcepool::{BoundedPool, FnFactory, Pool, PoolConfiguration};
use std::sync::Arc;

fn main() {
    println!("=== Esox ResourcePool ===");
    println!("See the demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    // Quick demo
    println!("Quick Demo:");
    let pool = BoundedPool::new(
        Arc::new(FnFactory::infallible(|| 1u32)),
        PoolConfiguration::default(),
    );

    {
        let obj = pool.checkout().unwrap();
        println!("  Got object: {}", *obj);
    }

    println!("  Idle after return: {}", pool.stats().idle);
}
