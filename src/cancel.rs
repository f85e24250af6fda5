//! Cooperative cancellation for blocked acquires

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Something a blocked acquire is parked on.
pub(crate) trait Interrupt: Send + Sync {
    /// Wake every waiter so it can re-check its cancellation token.
    fn interrupt(&self);
}

/// Token used to cancel a blocked [`acquire_cancellable`](crate::Pool::acquire_cancellable)
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{BoundedPool, CancelToken, FnFactory, Pool, PoolConfiguration, PoolError};
/// use std::sync::Arc;
/// use std::thread;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new().with_max_size(1).with_max_strict(true);
/// let pool = Arc::new(BoundedPool::new(Arc::new(FnFactory::infallible(|| 0u8)), config));
/// let held = pool.acquire().unwrap();
///
/// let token = CancelToken::new();
/// let waiter = {
///     let pool = Arc::clone(&pool);
///     let token = token.clone();
///     thread::spawn(move || pool.acquire_cancellable(&token).map(|_| ()))
/// };
///
/// thread::sleep(Duration::from_millis(20));
/// token.cancel();
/// assert!(matches!(waiter.join().unwrap(), Err(PoolError::Cancelled)));
/// pool.release(held).unwrap();
/// ```
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    listeners: Mutex<Vec<Weak<dyn Interrupt>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel, waking any acquire currently blocked on this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);

        // Never hold the listener lock while taking a pool lock.
        let listeners = std::mem::take(&mut *self.inner.listeners.lock());
        for listener in listeners.iter().filter_map(Weak::upgrade) {
            listener.interrupt();
        }
    }

    /// Register a pool to interrupt. Callers must check `is_cancelled` afterwards.
    pub(crate) fn register(&self, target: Weak<dyn Interrupt>) {
        let mut listeners = self.inner.listeners.lock();
        listeners.retain(|existing| existing.strong_count() > 0);
        if !listeners.iter().any(|existing| Weak::ptr_eq(existing, &target)) {
            listeners.push(target);
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl Interrupt for Counter {
        fn interrupt(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_interrupts_registered_targets_once() {
        let token = CancelToken::new();
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let as_interrupt: Arc<dyn Interrupt> = target.clone();

        token.register(Arc::downgrade(&as_interrupt));
        token.register(Arc::downgrade(&as_interrupt));
        token.cancel();

        assert!(token.is_cancelled());
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_targets_are_skipped() {
        let token = CancelToken::new();
        {
            let target: Arc<dyn Interrupt> = Arc::new(Counter(AtomicUsize::new(0)));
            token.register(Arc::downgrade(&target));
        }
        token.cancel();
        assert!(token.is_cancelled());
    }
}
