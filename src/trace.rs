//! Checkout tracing for leak diagnosis

use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic::Location;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tracing::error;

use crate::cancel::CancelToken;
use crate::errors::{PoolError, PoolResult};
use crate::metrics::PoolMetrics;
use crate::pool::{Pool, PoolStats, Pooled, ResourceId};

/// Who checked an object out, from where, and when
#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub resource: ResourceId,
    pub thread_id: ThreadId,
    pub thread_name: Option<String>,
    pub checked_out_at: SystemTime,
    pub site: &'static Location<'static>,
    started: Instant,
}

impl TraceRecord {
    fn capture(resource: ResourceId, site: &'static Location<'static>) -> Self {
        let current = thread::current();
        Self {
            resource,
            thread_id: current.id(),
            thread_name: current.name().map(str::to_owned),
            checked_out_at: SystemTime::now(),
            site,
            started: Instant::now(),
        }
    }

    /// How long the object has been checked out
    pub fn held_for(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Records a [`TraceRecord`] per outstanding object.
///
/// When constructed disabled it is a plain pass-through and allocates nothing.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{BoundedPool, FnFactory, Pool, PoolConfiguration, TracingPool};
/// use std::sync::Arc;
///
/// let inner = BoundedPool::new(Arc::new(FnFactory::infallible(|| 0u64)), PoolConfiguration::new());
/// let pool = TracingPool::new(inner, true);
///
/// let obj = pool.acquire().unwrap();
/// let records = pool.snapshot().unwrap();
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].resource, obj.id());
///
/// pool.release(obj).unwrap();
/// assert!(pool.snapshot().unwrap().is_empty());
/// ```
pub struct TracingPool<T, P> {
    inner: P,
    records: Option<Mutex<HashMap<ResourceId, TraceRecord>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static, P: Pool<T>> TracingPool<T, P> {
    pub fn new(inner: P, enabled: bool) -> Self {
        Self {
            inner,
            records: enabled.then(|| Mutex::new(HashMap::new())),
            _marker: PhantomData,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.records.is_some()
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Checkouts held longer than `threshold`, longest first
    pub fn outstanding_longer_than(&self, threshold: Duration) -> PoolResult<Vec<TraceRecord>> {
        let mut records = self.snapshot()?;
        records.retain(|record| record.held_for() > threshold);
        Ok(records)
    }

    fn traced(
        &self,
        site: &'static Location<'static>,
        acquired: PoolResult<Pooled<T>>,
    ) -> PoolResult<Pooled<T>> {
        let item = acquired?;
        if let Some(ref records) = self.records {
            records.lock().insert(item.id(), TraceRecord::capture(item.id(), site));
        }
        Ok(item)
    }

    fn untraced<F>(&self, item: Pooled<T>, hand_back: F) -> PoolResult<()>
    where
        F: FnOnce(Pooled<T>) -> PoolResult<()>,
    {
        let Some(ref records) = self.records else {
            return hand_back(item);
        };

        // Held across the hand-back so a concurrent checkout of the same object
        // cannot be recorded before this record is cleared.
        let mut records = records.lock();
        let id = item.id();
        hand_back(item)?;
        if records.remove(&id).is_none() {
            error!(resource = %id, "Trace record not found for returned object");
        }
        Ok(())
    }
}

impl<T: Send + 'static, P: Pool<T>> Pool<T> for TracingPool<T, P> {
    fn acquire(&self) -> PoolResult<Pooled<T>> {
        let site = Location::caller();
        self.traced(site, self.inner.acquire())
    }

    fn acquire_cancellable(&self, cancel: &CancelToken) -> PoolResult<Pooled<T>> {
        let site = Location::caller();
        self.traced(site, self.inner.acquire_cancellable(cancel))
    }

    fn try_acquire(&self) -> PoolResult<Pooled<T>> {
        let site = Location::caller();
        self.traced(site, self.inner.try_acquire())
    }

    fn release(&self, item: Pooled<T>) -> PoolResult<()> {
        self.untraced(item, |item| self.inner.release(item))
    }

    fn discard(&self, item: Pooled<T>) -> PoolResult<()> {
        self.untraced(item, |item| self.inner.discard(item))
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
        self.inner.metrics()
    }

    /// Records of every checkout, oldest first.
    ///
    /// Reads the trace map under its own lock, not the pool's. A checkout that
    /// the inner pool has granted but whose `acquire` has not yet returned may
    /// be missing; every checkout whose `acquire` returned before the call is
    /// present.
    fn snapshot(&self) -> PoolResult<Vec<TraceRecord>> {
        let records = self.records.as_ref().ok_or(PoolError::TracingDisabled)?;
        let mut snapshot: Vec<TraceRecord> = records.lock().values().cloned().collect();
        snapshot.sort_by_key(|record| record.started);
        Ok(snapshot)
    }
}
