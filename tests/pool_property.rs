//! Property tests for pool accounting.
//!
//! Any interleaving of checkouts, releases, discards, trims and prefills keeps
//! `total == idle + outstanding`, and a strict pool never exceeds `max_size`.

use std::sync::Arc;

use esox_resourcepool::{FnFactory, ObjectFactory, Pool, PoolConfiguration, Pooled, build_pool};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    Release(usize),
    Discard(usize),
    Trim,
    Prefill(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Acquire),
        3 => any::<usize>().prop_map(Op::Release),
        1 => any::<usize>().prop_map(Op::Discard),
        1 => Just(Op::Trim),
        1 => (0usize..6).prop_map(Op::Prefill),
    ]
}

fn pool_for(max_size: usize, strict: bool, decorated: bool) -> (Arc<FnFactory<u64>>, Box<dyn Pool<u64>>) {
    let factory = Arc::new(FnFactory::infallible(|| 0u64));
    let config = PoolConfiguration::new()
        .with_max_size(max_size)
        .with_max_strict(strict)
        .with_blocking(false)
        .with_trace(decorated);
    let config = if decorated { config.with_validation(|_: &u64| true) } else { config };
    let pool = build_pool(Arc::clone(&factory) as Arc<dyn ObjectFactory<u64>>, config);
    (factory, pool)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pool_accounting_holds_for_any_sequence(
        max_size in 1usize..6,
        strict in any::<bool>(),
        decorated in any::<bool>(),
        ops in proptest::collection::vec(op(), 1..60),
    ) {
        let (factory, pool) = pool_for(max_size, strict, decorated);
        let mut held: Vec<Pooled<u64>> = Vec::new();

        for op in &ops {
            match *op {
                Op::Acquire => match pool.try_acquire() {
                    Ok(item) => held.push(item),
                    Err(err) => prop_assert!(strict && err.is_retryable(), "unexpected {err}"),
                },
                Op::Release(pick) if !held.is_empty() => {
                    let item = held.swap_remove(pick % held.len());
                    prop_assert!(pool.release(item).is_ok());
                }
                Op::Discard(pick) if !held.is_empty() => {
                    let item = held.swap_remove(pick % held.len());
                    prop_assert!(pool.discard(item).is_ok());
                }
                Op::Release(_) | Op::Discard(_) => {}
                Op::Trim => {
                    pool.trim();
                }
                Op::Prefill(count) => {
                    prop_assert!(pool.prefill(count).is_ok());
                }
            }

            let stats = pool.stats();
            prop_assert_eq!(
                stats.total, stats.idle + stats.outstanding,
                "total={} idle={} outstanding={} after {:?}",
                stats.total, stats.idle, stats.outstanding, op
            );
            prop_assert_eq!(stats.outstanding, held.len());
            if strict {
                prop_assert!(stats.total <= max_size, "total={} > max_size={}", stats.total, max_size);
            }
            prop_assert_eq!(
                factory.created_count() - factory.destroyed_count(),
                stats.total
            );
            if decorated {
                prop_assert_eq!(pool.snapshot().unwrap().len(), held.len());
            }
        }

        for item in held.drain(..) {
            prop_assert!(pool.release(item).is_ok());
        }
        let stats = pool.stats();
        prop_assert_eq!(stats.outstanding, 0);
        prop_assert_eq!(stats.total, stats.idle);
        prop_assert!(stats.total <= max_size);
    }
}

/// A non-strict pool overflows under load and drains back to its bound.
#[test]
fn overflow_drains_back_to_bound() {
    let (factory, pool) = pool_for(2, false, false);
    let held: Vec<_> = (0..5).map(|_| pool.try_acquire().unwrap()).collect();
    assert_eq!(pool.stats().total, 5);

    for item in held {
        pool.release(item).unwrap();
    }
    let stats = pool.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.idle, 2);
    assert_eq!(factory.destroyed_count(), 3);
}
