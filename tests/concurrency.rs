//! Multi-threaded behaviour of pools and lifecycle handlers

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use esox_resourcepool::{
    BoundedPool, CancelToken, ComponentOptions, FnFactory, LifecycleDispatcher, ObjectFactory,
    Pool, PoolConfiguration, PoolError, build_pool,
};

/// Pooled object that flags concurrent use
struct Slot {
    in_use: AtomicBool,
}

fn slot_factory() -> Arc<dyn ObjectFactory<Slot>> {
    Arc::new(FnFactory::infallible(|| Slot {
        in_use: AtomicBool::new(false),
    }))
}

fn hammer(pool: Arc<dyn Pool<Slot>>, threads: usize, cycles: usize) -> usize {
    let violations = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let violations = Arc::clone(&violations);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..cycles {
                    let item = pool.acquire().unwrap();
                    if item.in_use.swap(true, Ordering::SeqCst) {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::yield_now();
                    item.in_use.store(false, Ordering::SeqCst);
                    pool.release(item).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    violations.load(Ordering::SeqCst)
}

#[test]
fn test_single_owner_under_contention() {
    let config = PoolConfiguration::new().with_max_size(3).with_max_strict(true);
    let pool: Arc<dyn Pool<Slot>> = Arc::new(BoundedPool::from_shared(slot_factory(), config));

    assert_eq!(hammer(Arc::clone(&pool), 8, 1000), 0);

    let stats = pool.stats();
    assert!(stats.total <= 3);
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.total, stats.idle);
    assert_eq!(pool.metrics().acquired, 8000);
}

#[test]
fn test_single_owner_through_decorators() {
    let config = PoolConfiguration::new()
        .with_max_size(2)
        .with_max_strict(true)
        .with_validation(|slot: &Slot| !slot.in_use.load(Ordering::SeqCst))
        .with_trace(true);
    let pool: Arc<dyn Pool<Slot>> = Arc::from(build_pool(slot_factory(), config));

    assert_eq!(hammer(Arc::clone(&pool), 6, 500), 0);
    assert!(pool.snapshot().unwrap().is_empty());
    assert_eq!(pool.metrics().validation_failures, 0);
}

#[test]
fn test_strict_capacity_without_blocking() {
    let config = PoolConfiguration::new()
        .with_max_size(4)
        .with_max_strict(true)
        .with_blocking(false);
    let pool = Arc::new(BoundedPool::from_shared(slot_factory(), config));
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                pool.acquire().unwrap()
            })
        })
        .collect();
    let held: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    let ids: HashSet<_> = held.iter().map(|item| item.id()).collect();
    assert_eq!(ids.len(), 4);
    assert!(matches!(pool.acquire(), Err(PoolError::Exhausted)));

    for item in held {
        pool.release(item).unwrap();
    }
}

#[test]
fn test_many_waiters_all_served() {
    let config = PoolConfiguration::new()
        .with_max_size(1)
        .with_max_strict(true)
        .with_block_timeout(Duration::from_secs(10));
    let pool = Arc::new(BoundedPool::from_shared(slot_factory(), config));
    let held = pool.acquire().unwrap();

    let waiters: Vec<_> = (0..5)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let item = pool.acquire()?;
                thread::sleep(Duration::from_millis(2));
                pool.release(item)
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    pool.release(held).unwrap();

    for waiter in waiters {
        assert!(waiter.join().unwrap().is_ok());
    }
    assert_eq!(pool.stats().total, 1);
}

#[test]
fn test_cancel_one_waiter_leaves_others_waiting() {
    let config = PoolConfiguration::new().with_max_size(1).with_max_strict(true);
    let pool = Arc::new(BoundedPool::from_shared(slot_factory(), config));
    let held = pool.acquire().unwrap();
    let token = CancelToken::new();

    let cancelled = {
        let pool = Arc::clone(&pool);
        let token = token.clone();
        thread::spawn(move || pool.acquire_cancellable(&token).map(|item| item.id()))
    };
    let patient = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let item = pool.acquire()?;
            pool.release(item)
        })
    };

    thread::sleep(Duration::from_millis(50));
    token.cancel();
    assert!(matches!(cancelled.join().unwrap(), Err(PoolError::Cancelled)));

    pool.release(held).unwrap();
    assert!(patient.join().unwrap().is_ok());
}

#[test]
fn test_timeout_is_close_to_configured() {
    let timeout = Duration::from_millis(100);
    let config = PoolConfiguration::new()
        .with_max_size(1)
        .with_max_strict(true)
        .with_block_timeout(timeout);
    let pool = BoundedPool::from_shared(slot_factory(), config);
    let held = pool.acquire().unwrap();

    let started = Instant::now();
    assert!(matches!(pool.acquire(), Err(PoolError::Timeout(_))));
    let waited = started.elapsed();
    assert!(waited >= timeout);
    assert!(waited < timeout * 5);

    pool.release(held).unwrap();
}

#[test]
fn test_per_thread_instances_across_threads() {
    let created = Arc::new(AtomicUsize::new(0));
    let factory: Arc<dyn ObjectFactory<usize>> = {
        let created = Arc::clone(&created);
        Arc::new(FnFactory::infallible(move || created.fetch_add(1, Ordering::SeqCst)))
    };
    let dispatcher = Arc::new(LifecycleDispatcher::new());
    dispatcher
        .register("session", "per-thread", factory, ComponentOptions::new())
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                let first = dispatcher.acquire("session").unwrap();
                let second = dispatcher.acquire("session").unwrap();
                assert!(Arc::ptr_eq(first.as_shared().unwrap(), second.as_shared().unwrap()));
                let value = *first;
                dispatcher.release("session", first).unwrap();
                dispatcher.release("session", second).unwrap();
                value
            })
        })
        .collect();
    let values: Vec<usize> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    let distinct: HashSet<_> = values.iter().copied().collect();
    assert_eq!(distinct.len(), 4);
    assert_eq!(created.load(Ordering::SeqCst), 4);
    dispatcher.shutdown();
}

#[test]
fn test_pooled_component_under_dispatcher_contention() {
    let factory = Arc::new(FnFactory::infallible(|| 0u64));
    let dispatcher = Arc::new(LifecycleDispatcher::new());
    let config = PoolConfiguration::new().with_max_size(2).with_max_strict(true);
    dispatcher
        .register(
            "counter",
            "pooled",
            Arc::clone(&factory) as Arc<dyn ObjectFactory<u64>>,
            ComponentOptions::new().with_pool(config),
        )
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                for _ in 0..200 {
                    let component = dispatcher.acquire("counter").unwrap();
                    dispatcher.release("counter", component).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let metrics = dispatcher.metrics("counter").unwrap().unwrap();
    assert_eq!(metrics.acquired, 800);
    assert!(factory.created_count() <= 2);
}
