//! Async usage examples

use esox_resourcepool::{BoundedPool, FnFactory, Pool, PoolConfiguration};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() {
    println!("=== Esox ResourcePool - Async Examples ===\n");

    // Example 1: Async acquire
    async_acquire().await;

    // Example 2: Async with timeout
    async_with_timeout().await;

    // Example 3: Concurrent access
    concurrent_access().await;
}

async fn async_acquire() {
    println!("1. Async Acquire:");
    let pool = BoundedPool::new(Arc::new(FnFactory::infallible(|| 7u32)), PoolConfiguration::default());

    let obj = pool.acquire_async().await.unwrap();
    println!("   Got object asynchronously: {}", *obj);
    pool.release(obj).unwrap();

    println!();
}

async fn async_with_timeout() {
    println!("2. Async with Timeout:");

    let config = PoolConfiguration::new()
        .with_max_size(1)
        .with_max_strict(true)
        .with_block_timeout(Duration::from_millis(100));
    let pool = BoundedPool::new(Arc::new(FnFactory::infallible(|| 42u32)), config);

    // Hold the only object
    let held = pool.acquire().unwrap();

    // Try to get another (should time out)
    match pool.acquire_async().await {
        Ok(obj) => println!("   Got object {}", *obj),
        Err(e) => println!("   Error: {}", e),
    }
    pool.release(held).unwrap();

    println!();
}

async fn concurrent_access() {
    println!("3. Concurrent Access:");

    let config = PoolConfiguration::new().with_max_size(2).with_max_strict(true);
    let pool = Arc::new(BoundedPool::new(Arc::new(FnFactory::infallible(|| 0u64)), config));

    let mut handles = vec![];
    for i in 0..6 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            let mut obj = pool.acquire_async().await.unwrap();
            *obj += 1;
            sleep(Duration::from_millis(10)).await;
            println!("   Task {} used {} (uses: {})", i, obj.id(), *obj);
            pool.release(obj).unwrap();
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let stats = pool.stats();
    println!("   Total objects created: {}", stats.total);
}
