//! Background trimming for pools that may sit idle between checkouts

use std::io;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::pool::Pool;

/// Runs [`Pool::trim`] on a dedicated thread every `interval`.
///
/// The thread holds only a weak reference and exits once the pool is dropped
/// or disposed. Dropping the `Trimmer` stops and joins it.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{BoundedPool, FnFactory, Pool, PoolConfiguration, Trimmer};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let pool = Arc::new(BoundedPool::new(Arc::new(FnFactory::infallible(|| 0u8)), PoolConfiguration::new()));
/// pool.prefill(4).unwrap();
///
/// let trimmer = Trimmer::spawn(&pool, Duration::from_millis(10)).unwrap();
/// while pool.stats().idle > 0 {
///     std::thread::sleep(Duration::from_millis(5));
/// }
/// trimmer.stop();
/// ```
pub struct Trimmer<T> {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Trimmer<T> {
    pub fn spawn<P>(pool: &Arc<P>, interval: Duration) -> io::Result<Self>
    where
        P: Pool<T> + ?Sized + 'static,
    {
        let (stop, ticks) = channel::bounded::<()>(0);
        let pool: Weak<P> = Arc::downgrade(pool);

        let handle = thread::Builder::new()
            .name("resourcepool-trimmer".into())
            .spawn(move || {
                loop {
                    match ticks.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let Some(pool) = pool.upgrade() else { break };
                    if pool.stats().disposed {
                        break;
                    }
                    let trimmed = pool.trim();
                    if trimmed > 0 {
                        debug!(trimmed, "Background trim pass");
                    }
                }
                debug!("Trimmer stopped");
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
            _marker: PhantomData,
        })
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(self) {
        drop(self);
    }
}

impl<T> Drop for Trimmer<T> {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Trimmer thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfiguration;
    use crate::factory::FnFactory;
    use crate::pool::BoundedPool;
    use std::time::Instant;

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let started = Instant::now();
        while started.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn test_background_trim_empties_idle_pool() {
        let factory = Arc::new(FnFactory::infallible(|| 0u8));
        let pool = Arc::new(BoundedPool::new(Arc::clone(&factory), PoolConfiguration::new()));
        pool.prefill(3).unwrap();

        let _trimmer = Trimmer::spawn(&pool, Duration::from_millis(10)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || pool.stats().idle == 0));
        assert_eq!(factory.destroyed_count(), 3);
    }

    #[test]
    fn test_trimmer_leaves_outstanding_alone() {
        let pool = Arc::new(BoundedPool::new(Arc::new(FnFactory::infallible(|| 0u8)), PoolConfiguration::new()));
        let held = pool.acquire().unwrap();

        let trimmer = Trimmer::spawn(&pool, Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(50));
        trimmer.stop();

        assert_eq!(pool.stats().outstanding, 1);
        pool.release(held).unwrap();
    }

    #[test]
    fn test_trimmer_exits_when_pool_dropped() {
        let pool = Arc::new(BoundedPool::new(Arc::new(FnFactory::infallible(|| 0u8)), PoolConfiguration::new()));
        let trimmer = Trimmer::spawn(&pool, Duration::from_millis(5)).unwrap();
        drop(pool);

        thread::sleep(Duration::from_millis(30));
        assert!(trimmer.handle.as_ref().is_some_and(|handle| handle.is_finished()));
    }

    #[test]
    fn test_works_with_type_erased_pool() {
        let pool: Arc<dyn Pool<u8>> =
            Arc::new(BoundedPool::new(Arc::new(FnFactory::infallible(|| 0u8)), PoolConfiguration::new()));
        pool.prefill(1).unwrap();

        let trimmer = Trimmer::spawn(&pool, Duration::from_millis(5)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || pool.stats().idle == 0));
        trimmer.stop();
    }
}
