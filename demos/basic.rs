//! Basic usage examples for the resource pool

use esox_resourcepool::{
    BoundedPool, ComponentOptions, FnFactory, LifecycleDispatcher, ObjectFactory, Pool,
    PoolConfiguration, PoolError, build_pool,
};
use std::sync::Arc;

fn main() {
    println!("=== Esox ResourcePool - Basic Examples ===\n");

    // Example 1: Simple pool
    simple_pool();

    // Example 2: Strict, non-blocking pool
    strict_pool();

    // Example 3: Validation and tracing
    validated_and_traced();

    // Example 4: Lifecycle policies
    lifecycle_policies();

    // Example 5: Metrics and health
    metrics_and_health();
}

fn simple_pool() {
    println!("1. Simple Pool:");
    let pool = BoundedPool::new(
        Arc::new(FnFactory::infallible(|| String::from("connection"))),
        PoolConfiguration::default(),
    );

    {
        let obj = pool.checkout().unwrap();
        println!("   Got object: {} ({})", *obj, obj.id());
        // Object automatically returned when dropped
    }

    println!("   Idle after return: {}\n", pool.stats().idle);
}

fn strict_pool() {
    println!("2. Strict Pool:");
    let config = PoolConfiguration::new()
        .with_max_size(2)
        .with_max_strict(true)
        .with_blocking(false);
    let pool = BoundedPool::new(Arc::new(FnFactory::infallible(|| 0u32)), config);

    let first = pool.acquire().unwrap();
    let second = pool.acquire().unwrap();
    match pool.acquire() {
        Err(PoolError::Exhausted) => println!("   Third acquire: exhausted, as expected"),
        other => println!("   Third acquire: {:?}", other.map(|item| item.id())),
    }

    pool.release(first).unwrap();
    pool.release(second).unwrap();
    println!("   Idle after return: {}\n", pool.stats().idle);
}

fn validated_and_traced() {
    println!("3. Validation and Tracing:");
    let factory: Arc<dyn ObjectFactory<Vec<u8>>> = Arc::new(FnFactory::infallible(Vec::<u8>::new));
    let config = PoolConfiguration::new()
        .with_validation(|buffer: &Vec<u8>| buffer.is_empty())
        .with_trace(true);
    let pool = build_pool(factory, config);

    let mut buffer = pool.acquire().unwrap();
    buffer.extend_from_slice(b"dirty");
    for record in pool.snapshot().unwrap() {
        println!("   {} checked out at {}", record.resource, record.site);
    }
    pool.release(buffer).unwrap();

    // The dirty buffer fails validation and is replaced.
    let buffer = pool.acquire().unwrap();
    println!("   Fresh replacement: {}", buffer.is_fresh());
    println!("   Validation failures: {}\n", pool.metrics().validation_failures);
    pool.release(buffer).unwrap();
}

fn lifecycle_policies() {
    println!("4. Lifecycle Policies:");
    let dispatcher = LifecycleDispatcher::new();

    for (key, policy) in [("config", "singleton"), ("db", "pooled"), ("session", "per-thread"), ("job", "transient")] {
        let factory: Arc<dyn ObjectFactory<String>> =
            Arc::new(FnFactory::infallible(move || format!("{key} instance")));
        dispatcher.register(key, policy, factory, ComponentOptions::new()).unwrap();
    }

    for key in dispatcher.keys() {
        let component = dispatcher.acquire(&key).unwrap();
        println!("   {:<8} {:<11} -> {}", key, dispatcher.policy_of(&key).unwrap(), *component);
        dispatcher.release(&key, component).unwrap();
    }

    dispatcher.shutdown();
    println!();
}

fn metrics_and_health() {
    println!("5. Metrics and Health:");
    let pool = BoundedPool::new(
        Arc::new(FnFactory::infallible(|| 1u64)),
        PoolConfiguration::new().with_max_size(5),
    );

    {
        let _obj1 = pool.checkout().unwrap();
        let _obj2 = pool.checkout().unwrap();

        let health = pool.health_status();
        println!("   Health: {}", if health.is_healthy { "Healthy" } else { "Unhealthy" });
        println!("   Utilization: {:.1}%", health.utilization * 100.0);
        println!("   Outstanding: {}, Idle: {}", health.outstanding_objects, health.idle_objects);
    }

    let mut metrics: Vec<_> = pool.metrics().export().into_iter().collect();
    metrics.sort();
    println!("\n   Metrics:");
    for (key, value) in metrics {
        println!("     {}: {}", key, value);
    }
}
