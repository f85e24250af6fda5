//! Pool decorator that revalidates reused objects before handing them out

use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::Validator;
use crate::errors::PoolResult;
use crate::metrics::PoolMetrics;
use crate::pool::{Pool, PoolStats, Pooled};
use crate::trace::TraceRecord;

/// Wraps a pool and checks every object that comes out of the idle set.
///
/// Freshly created objects are trusted. A reused object that fails validation,
/// or whose validator panics, is discarded and the acquire starts over.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{BoundedPool, FnFactory, Pool, PoolConfiguration, ValidatingPool};
/// use std::sync::Arc;
///
/// let inner = BoundedPool::new(Arc::new(FnFactory::infallible(|| 5u32)), PoolConfiguration::new());
/// let pool = ValidatingPool::new(inner, Arc::new(|value: &u32| *value < 10));
///
/// let mut obj = pool.acquire().unwrap();
/// *obj = 50;
/// pool.release(obj).unwrap();
///
/// // The stale object is rejected and replaced by a new one.
/// let obj = pool.acquire().unwrap();
/// assert_eq!(*obj, 5);
/// assert_eq!(pool.metrics().validation_failures, 1);
/// # pool.release(obj).unwrap();
/// ```
pub struct ValidatingPool<T, P> {
    inner: P,
    validator: Validator<T>,
    failures: AtomicUsize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static, P: Pool<T>> ValidatingPool<T, P> {
    pub fn new(inner: P, validator: Validator<T>) -> Self {
        Self {
            inner,
            validator,
            failures: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn is_valid(&self, item: &Pooled<T>) -> bool {
        catch_unwind(AssertUnwindSafe(|| (self.validator)(&**item))).unwrap_or_else(|_| {
            debug!(resource = %item.id(), "Validator panicked, treating object as invalid");
            false
        })
    }

    /// Keep drawing from `attempt` until a fresh or valid object comes out.
    fn validated<F>(&self, mut attempt: F) -> PoolResult<Pooled<T>>
    where
        F: FnMut() -> PoolResult<Pooled<T>>,
    {
        loop {
            let item = attempt()?;
            if item.is_fresh() || self.is_valid(&item) {
                return Ok(item);
            }

            self.failures.fetch_add(1, Ordering::Relaxed);
            debug!(resource = %item.id(), "Removing an object from the pool because it failed validation");
            self.inner.discard(item)?;
        }
    }
}

impl<T: Send + 'static, P: Pool<T>> Pool<T> for ValidatingPool<T, P> {
    fn acquire(&self) -> PoolResult<Pooled<T>> {
        self.validated(|| self.inner.acquire())
    }

    fn acquire_cancellable(&self, cancel: &CancelToken) -> PoolResult<Pooled<T>> {
        self.validated(|| self.inner.acquire_cancellable(cancel))
    }

    fn try_acquire(&self) -> PoolResult<Pooled<T>> {
        self.validated(|| self.inner.try_acquire())
    }

    fn release(&self, item: Pooled<T>) -> PoolResult<()> {
        self.inner.release(item)
    }

    fn discard(&self, item: Pooled<T>) -> PoolResult<()> {
        self.inner.discard(item)
    }

    fn prefill(&self, count: usize) -> PoolResult<usize> {
        self.inner.prefill(count)
    }

    fn trim(&self) -> usize {
        self.inner.trim()
    }

    fn dispose(&self) {
        self.inner.dispose()
    }

    fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    fn metrics(&self) -> PoolMetrics {
        let mut metrics = self.inner.metrics();
        metrics.validation_failures += self.failures.load(Ordering::Relaxed);
        metrics
    }

    fn snapshot(&self) -> PoolResult<Vec<TraceRecord>> {
        self.inner.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfiguration;
    use crate::errors::PoolError;
    use crate::factory::FnFactory;
    use crate::pool::BoundedPool;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn pool_with(
        validator: Validator<u32>,
    ) -> (Arc<FnFactory<u32>>, ValidatingPool<u32, BoundedPool<u32>>) {
        let next = AtomicUsize::new(0);
        let factory = Arc::new(FnFactory::infallible(move || next.fetch_add(1, Ordering::Relaxed) as u32));
        let config = PoolConfiguration::new().with_max_size(1).with_max_strict(true);
        let inner = BoundedPool::new(Arc::clone(&factory), config);
        (factory, ValidatingPool::new(inner, validator))
    }

    #[test]
    fn test_rejected_idle_object_is_replaced() {
        let reject_first = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&reject_first);
        let (factory, pool) = pool_with(Arc::new(move |_: &u32| !flag.swap(false, Ordering::SeqCst)));

        let first = pool.acquire().unwrap();
        assert_eq!(*first, 0);
        pool.release(first).unwrap();

        let second = pool.acquire().unwrap();
        assert_eq!(*second, 1);
        assert!(second.is_fresh());
        assert_eq!(factory.created_count(), 2);
        assert_eq!(factory.destroyed_count(), 1);
        assert_eq!(pool.stats().total, 1);
        assert!(!reject_first.load(Ordering::SeqCst));
        pool.release(second).unwrap();
    }

    #[test]
    fn test_fresh_objects_are_never_validated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let (_, pool) = pool_with(Arc::new(move |_: &u32| {
            counted.fetch_add(1, Ordering::SeqCst);
            false
        }));

        let item = pool.acquire().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        pool.release(item).unwrap();

        let item = pool.acquire().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(item.is_fresh());
        pool.release(item).unwrap();
    }

    #[test]
    fn test_panicking_validator_counts_as_invalid() {
        let (factory, pool) = pool_with(Arc::new(|_: &u32| -> bool { panic!("validator blew up") }));

        let item = pool.acquire().unwrap();
        pool.release(item).unwrap();

        let item = pool.acquire().unwrap();
        assert!(item.is_fresh());
        assert_eq!(factory.destroyed_count(), 1);
        assert_eq!(pool.metrics().validation_failures, 1);
        pool.release(item).unwrap();
    }

    #[test]
    fn test_errors_from_inner_pass_through() {
        let (_, pool) = pool_with(Arc::new(|_: &u32| true));
        let held = pool.acquire().unwrap();

        assert!(matches!(pool.try_acquire(), Err(PoolError::Exhausted)));
        pool.release(held).unwrap();
    }
}
