//! Core pool trait and the bounded pool implementation

use crate::cancel::{CancelToken, Interrupt};
use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::eviction::IdleSet;
use crate::factory::ObjectFactory;
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::trace::{TraceRecord, TracingPool};
use crate::validating::ValidatingPool;

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a pooled object, unique across every pool in the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pool: u64,
    seq: u64,
}

impl ResourceId {
    pub(crate) fn new(pool: u64, seq: u64) -> Self {
        Self { pool, seq }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.pool, self.seq)
    }
}

/// An object checked out of a pool.
///
/// Ownership is the checkout: only the holder of a `Pooled` can use or release
/// the object, and handing it back consumes it.
pub struct Pooled<T> {
    id: ResourceId,
    object: T,
    fresh: bool,
}

impl<T> Pooled<T> {
    pub(crate) fn new(id: ResourceId, object: T, fresh: bool) -> Self {
        Self { id, object, fresh }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Whether the object was created for this checkout rather than reused from the idle set
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub(crate) fn into_parts(self) -> (ResourceId, T) {
        (self.id, self.object)
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.object
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.id)
            .field("object", &self.object)
            .field("fresh", &self.fresh)
            .finish()
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolStats {
    pub idle: usize,
    pub outstanding: usize,
    pub total: usize,
    pub max_size: usize,
    pub disposed: bool,
}

impl PoolStats {
    /// Outstanding objects relative to capacity, 0.0 for unbounded pools
    pub fn utilization(&self) -> f64 {
        if self.max_size > 0 {
            self.outstanding as f64 / self.max_size as f64
        } else {
            0.0
        }
    }
}

/// Acquire/release interface shared by the bounded pool and its decorators
pub trait Pool<T>: Send + Sync {
    /// Check an object out, blocking if the pool is configured to.
    #[track_caller]
    fn acquire(&self) -> PoolResult<Pooled<T>>;

    /// Like [`acquire`](Pool::acquire), but a blocked wait ends with
    /// [`PoolError::Cancelled`] once `cancel` fires.
    #[track_caller]
    fn acquire_cancellable(&self, cancel: &CancelToken) -> PoolResult<Pooled<T>>;

    /// Single attempt that never blocks, whatever the blocking setting.
    #[track_caller]
    fn try_acquire(&self) -> PoolResult<Pooled<T>>;

    /// Hand an object back.
    fn release(&self, item: Pooled<T>) -> PoolResult<()>;

    /// Permanently remove an outstanding object and destroy it.
    fn discard(&self, item: Pooled<T>) -> PoolResult<()>;

    /// Create idle objects until `count` are idle or capacity is reached.
    /// Returns how many were created.
    fn prefill(&self, count: usize) -> PoolResult<usize>;

    /// Run one trim pass now. Returns how many idle objects were destroyed.
    fn trim(&self) -> usize;

    /// Destroy idle objects and refuse further checkouts. Idempotent.
    fn dispose(&self);

    fn stats(&self) -> PoolStats;

    fn metrics(&self) -> PoolMetrics;

    /// Outstanding checkouts, for leak diagnosis
    fn snapshot(&self) -> PoolResult<Vec<TraceRecord>> {
        Err(PoolError::TracingDisabled)
    }

    fn health_status(&self) -> HealthStatus {
        HealthStatus::new(&self.stats())
    }

    /// Check an object out behind a guard that releases it on drop.
    #[track_caller]
    fn checkout(&self) -> PoolResult<PooledObject<'_, T>>
    where
        Self: Sized,
        T: 'static,
    {
        let item = self.acquire()?;
        Ok(PooledObject::new(self, item))
    }
}

/// A checked-out object that automatically returns to its pool when dropped
pub struct PooledObject<'a, T> {
    pool: &'a dyn Pool<T>,
    item: Option<Pooled<T>>,
}

impl<'a, T> PooledObject<'a, T> {
    fn new(pool: &'a dyn Pool<T>, item: Pooled<T>) -> Self {
        Self {
            pool,
            item: Some(item),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.item.as_ref().expect("Value already taken").id()
    }

    /// Take over the checkout; the caller becomes responsible for releasing it.
    pub fn into_pooled(mut self) -> Pooled<T> {
        self.item.take().expect("Value already taken")
    }
}

impl<T> Deref for PooledObject<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.item.as_deref().expect("Value already taken")
    }
}

impl<T> DerefMut for PooledObject<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.item.as_deref_mut().expect("Value already taken")
    }
}

impl<T> Drop for PooledObject<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            let id = item.id();
            if let Err(err) = self.pool.release(item) {
                warn!(resource = %id, error = %err, "Failed to return a guarded object to its pool");
            }
        }
    }
}

struct PoolState<T> {
    idle: IdleSet<T>,
    outstanding: HashSet<ResourceId>,
    total: usize,
    next_seq: u64,
    disposed: bool,
    last_trim: Instant,
}

impl<T> PoolState<T> {
    fn next_id(&mut self, pool: u64) -> ResourceId {
        self.next_seq += 1;
        ResourceId::new(pool, self.next_seq)
    }

    fn check_invariants(&self) {
        debug_assert_eq!(self.total, self.idle.len() + self.outstanding.len());
    }
}

struct Shared<T> {
    state: Mutex<PoolState<T>>,
    available: Condvar,
    notify: Notify,
}

impl<T> Shared<T> {
    fn wake_one(&self) {
        self.available.notify_one();
        self.notify.notify_one();
    }

    fn wake_all(&self) {
        self.available.notify_all();
        self.notify.notify_waiters();
    }
}

impl<T: Send> Interrupt for Shared<T> {
    fn interrupt(&self) {
        // Taking the lock orders this wake-up after any waiter's last token check.
        let _state = self.state.lock();
        self.available.notify_all();
    }
}

#[derive(Clone, Copy)]
enum Wait<'a> {
    /// Fail with `Exhausted` at once
    Never,
    /// Like `Never`, without counting the exhaustion; used by the async retry loop
    Poll,
    Block(Option<&'a CancelToken>),
}

/// Capacity-bounded pool that creates objects on demand through an [`ObjectFactory`]
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{BoundedPool, FnFactory, Pool, PoolConfiguration, PoolError};
/// use std::sync::Arc;
///
/// let config = PoolConfiguration::new()
///     .with_max_size(2)
///     .with_max_strict(true)
///     .with_blocking(false);
/// let pool = BoundedPool::new(Arc::new(FnFactory::infallible(|| vec![0u8; 64])), config);
///
/// let a = pool.acquire().unwrap();
/// let b = pool.acquire().unwrap();
/// assert!(matches!(pool.acquire(), Err(PoolError::Exhausted)));
///
/// pool.release(a).unwrap();
/// pool.release(b).unwrap();
/// assert_eq!(pool.stats().idle, 2);
/// ```
pub struct BoundedPool<T> {
    shared: Arc<Shared<T>>,
    factory: Arc<dyn ObjectFactory<T>>,
    config: PoolConfiguration<T>,
    metrics: MetricsTracker,
    pool_id: u64,
}

impl<T: Send + 'static> BoundedPool<T> {
    /// Create a new pool around a factory
    pub fn new<F>(factory: Arc<F>, config: PoolConfiguration<T>) -> Self
    where
        F: ObjectFactory<T> + 'static,
    {
        Self::from_shared(factory, config)
    }

    /// Create a new pool around an already type-erased factory
    pub fn from_shared(factory: Arc<dyn ObjectFactory<T>>, config: PoolConfiguration<T>) -> Self {
        let state = PoolState {
            idle: IdleSet::new(),
            outstanding: HashSet::new(),
            total: 0,
            next_seq: 0,
            disposed: false,
            last_trim: Instant::now(),
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                available: Condvar::new(),
                notify: Notify::new(),
            }),
            factory,
            config,
            metrics: MetricsTracker::new(),
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Positional constructor mirroring the container's pool parameters.
    /// Zero `block_timeout` waits forever; zero `trim_interval` disables trimming.
    pub fn with_limits(
        factory: Arc<dyn ObjectFactory<T>>,
        max_size: usize,
        max_strict: bool,
        blocking: bool,
        block_timeout: Duration,
        trim_interval: Duration,
    ) -> Self {
        let config = PoolConfiguration::new()
            .with_max_size(max_size)
            .with_max_strict(max_strict)
            .with_blocking(blocking)
            .with_block_timeout(block_timeout)
            .with_trim_interval(trim_interval);
        Self::from_shared(factory, config)
    }

    pub fn config(&self) -> &PoolConfiguration<T> {
        &self.config
    }

    pub fn resource_type(&self) -> &'static str {
        self.factory.resource_type()
    }

    /// Acquire without blocking a thread; waits on the configured timeout asynchronously.
    pub async fn acquire_async(&self) -> PoolResult<Pooled<T>> {
        let attempt = async {
            loop {
                let notified = self.shared.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                match self.acquire_inner(Wait::Poll) {
                    Err(PoolError::Exhausted) if self.config.blocking => {}
                    Err(PoolError::Exhausted) => {
                        MetricsTracker::bump(&self.metrics.exhausted_events);
                        return Err(PoolError::Exhausted);
                    }
                    result => return result,
                }
                notified.await;
            }
        };

        match self.config.block_timeout {
            Some(timeout) => tokio::time::timeout(timeout, attempt)
                .await
                .map_err(|_| {
                    MetricsTracker::bump(&self.metrics.timeouts);
                    PoolError::Timeout(timeout)
                })?,
            None => attempt.await,
        }
    }

    fn at_capacity(&self, total: usize) -> bool {
        self.config.max_size != 0 && total >= self.config.max_size
    }

    fn over_capacity(&self, total: usize) -> bool {
        self.config.max_size != 0 && total > self.config.max_size
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.shared.state.lock()
    }

    fn acquire_inner(&self, wait: Wait<'_>) -> PoolResult<Pooled<T>> {
        let mut state = self.lock();
        if state.disposed {
            return Err(PoolError::Disposed);
        }
        self.trim_if_due(&mut state);

        let mut blocked_since: Option<Instant> = None;
        loop {
            if let Some((id, object)) = state.idle.pop() {
                state.outstanding.insert(id);
                state.check_invariants();
                MetricsTracker::bump(&self.metrics.acquired);
                match blocked_since {
                    Some(since) => debug!(
                        resource = %id,
                        waited_ms = since.elapsed().as_millis() as u64,
                        "Got an object after blocking"
                    ),
                    None => debug!(resource = %id, "Got an idle object from the pool"),
                }
                return Ok(Pooled::new(id, object, false));
            }

            // Non-strict pools create past the bound rather than wait or fail.
            if !self.at_capacity(state.total) || !self.config.max_strict {
                return self.create_locked(&mut state);
            }

            let cancel = match wait {
                Wait::Block(cancel) if self.config.blocking => cancel,
                Wait::Poll => return Err(PoolError::Exhausted),
                _ => {
                    MetricsTracker::bump(&self.metrics.exhausted_events);
                    return Err(PoolError::Exhausted);
                }
            };

            let since = *blocked_since.get_or_insert_with(|| {
                debug!(
                    thread = ?std::thread::current().id(),
                    outstanding = state.outstanding.len(),
                    "Blocking until an object is available"
                );
                Instant::now()
            });

            if let Some(token) = cancel {
                let weak = Arc::downgrade(&self.shared);
                let target: Weak<dyn Interrupt> = weak;
                token.register(target);
                if token.is_cancelled() {
                    MetricsTracker::bump(&self.metrics.cancellations);
                    return Err(PoolError::Cancelled);
                }
            }

            match self.config.block_timeout {
                Some(timeout) => {
                    let remaining = timeout.saturating_sub(since.elapsed());
                    if remaining.is_zero() {
                        MetricsTracker::bump(&self.metrics.timeouts);
                        warn!(
                            blocked_ms = since.elapsed().as_millis() as u64,
                            "Timed out waiting for an object to become available"
                        );
                        return Err(PoolError::Timeout(timeout));
                    }
                    self.shared.available.wait_for(&mut state, remaining);
                }
                None => self.shared.available.wait(&mut state),
            }

            if state.disposed {
                return Err(PoolError::Disposed);
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                MetricsTracker::bump(&self.metrics.cancellations);
                return Err(PoolError::Cancelled);
            }
        }
    }

    fn create_locked(&self, state: &mut PoolState<T>) -> PoolResult<Pooled<T>> {
        let object = match self.factory.create() {
            Ok(object) => object,
            Err(source) => {
                MetricsTracker::bump(&self.metrics.creation_failures);
                debug!(resource_type = self.resource_type(), error = %source, "Unable to create new instance");
                return Err(PoolError::creation(self.resource_type(), source));
            }
        };

        let id = state.next_id(self.pool_id);
        state.total += 1;
        state.outstanding.insert(id);
        state.check_invariants();
        MetricsTracker::bump(&self.metrics.created);
        MetricsTracker::bump(&self.metrics.acquired);

        if self.over_capacity(state.total) {
            debug!(resource = %id, total = state.total, "Created an object beyond max_size");
        } else {
            debug!(resource = %id, resource_type = self.resource_type(), "Created a new object from the factory");
        }
        Ok(Pooled::new(id, object, true))
    }

    fn destroy_locked(&self, id: ResourceId, object: T) {
        MetricsTracker::bump(&self.metrics.destroyed);
        if let Err(err) = self.factory.destroy(object) {
            MetricsTracker::bump(&self.metrics.destroy_failures);
            warn!(resource = %id, error = %err, "Error decommissioning object");
        }
    }

    fn trim_locked(&self, state: &mut PoolState<T>) -> usize {
        let evicted = state.idle.trim(self.config.min_size);
        state.last_trim = Instant::now();
        state.total -= evicted.len();

        let count = evicted.len();
        for (id, object) in evicted {
            self.destroy_locked(id, object);
        }
        state.check_invariants();

        if count > 0 {
            self.metrics.trimmed.fetch_add(count, Ordering::Relaxed);
            debug!(trimmed = count, idle = state.idle.len(), "Trimmed idle objects from pool");
            self.shared.wake_all();
        }
        count
    }

    fn trim_if_due(&self, state: &mut PoolState<T>) {
        if let Some(interval) = self.config.trim_interval
            && state.last_trim.elapsed() >= interval
        {
            self.trim_locked(state);
        }
    }
}

impl<T: Send + 'static> Pool<T> for BoundedPool<T> {
    fn acquire(&self) -> PoolResult<Pooled<T>> {
        self.acquire_inner(Wait::Block(None))
    }

    fn acquire_cancellable(&self, cancel: &CancelToken) -> PoolResult<Pooled<T>> {
        self.acquire_inner(Wait::Block(Some(cancel)))
    }

    fn try_acquire(&self) -> PoolResult<Pooled<T>> {
        self.acquire_inner(Wait::Never)
    }

    fn release(&self, item: Pooled<T>) -> PoolResult<()> {
        let (id, mut object) = item.into_parts();
        let mut state = self.lock();

        if !state.outstanding.remove(&id) {
            warn!(resource = %id, "Released an object that is not outstanding in this pool");
            return Err(PoolError::InvalidRelease(id.to_string()));
        }
        MetricsTracker::bump(&self.metrics.released);

        if !state.disposed && !self.over_capacity(state.total) {
            self.factory.recycle(&mut object);
            state.idle.push(id, object);
            debug!(resource = %id, "Put an object back into the pool");
            self.shared.wake_one();
        } else {
            state.total -= 1;
            debug!(resource = %id, disposed = state.disposed, "No room to put an object back, removing it");
            self.destroy_locked(id, object);
            if !state.disposed {
                self.shared.wake_one();
            }
        }
        state.check_invariants();

        if !state.disposed {
            self.trim_if_due(&mut state);
        }
        Ok(())
    }

    fn discard(&self, item: Pooled<T>) -> PoolResult<()> {
        let (id, object) = item.into_parts();
        let mut state = self.lock();

        if !state.outstanding.remove(&id) {
            warn!(resource = %id, "Discarded an object that is not outstanding in this pool");
            return Err(PoolError::InvalidRelease(id.to_string()));
        }
        state.total -= 1;
        debug!(resource = %id, "Permanently removing an object from the pool");
        self.destroy_locked(id, object);
        state.check_invariants();

        self.shared.wake_one();
        Ok(())
    }

    fn prefill(&self, count: usize) -> PoolResult<usize> {
        let mut state = self.lock();
        if state.disposed {
            return Err(PoolError::Disposed);
        }

        let mut created = 0;
        while state.idle.len() < count && !self.at_capacity(state.total) {
            let object = self
                .factory
                .create()
                .map_err(|source| {
                    MetricsTracker::bump(&self.metrics.creation_failures);
                    PoolError::creation(self.resource_type(), source)
                })?;
            let id = state.next_id(self.pool_id);
            state.total += 1;
            state.idle.push(id, object);
            MetricsTracker::bump(&self.metrics.created);
            created += 1;
        }
        state.check_invariants();

        if created > 0 {
            debug!(created, idle = state.idle.len(), "Prefilled pool");
            self.shared.wake_all();
        }
        Ok(created)
    }

    fn trim(&self) -> usize {
        let mut state = self.lock();
        self.trim_locked(&mut state)
    }

    fn dispose(&self) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;

        let idle = state.idle.drain();
        state.total -= idle.len();
        for (id, object) in idle {
            self.destroy_locked(id, object);
        }
        state.check_invariants();

        if !state.outstanding.is_empty() {
            info!(
                outstanding = state.outstanding.len(),
                resource_type = self.resource_type(),
                "Pool disposed with outstanding objects"
            );
        }
        self.shared.wake_all();
    }

    fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            idle: state.idle.len(),
            outstanding: state.outstanding.len(),
            total: state.total,
            max_size: self.config.max_size,
            disposed: state.disposed,
        }
    }

    fn metrics(&self) -> PoolMetrics {
        self.metrics.get_metrics(&self.stats())
    }
}

impl<T> Drop for BoundedPool<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        for (id, object) in state.idle.drain() {
            if let Err(err) = self.factory.destroy(object) {
                warn!(resource = %id, error = %err, "Error decommissioning object");
            }
        }
    }
}

/// Compose a bounded pool with the decorators its configuration asks for.
///
/// Validation sits closest to the bounded pool, tracing outermost, so trace
/// records only ever describe objects that passed validation.
pub fn build_pool<T: Send + 'static>(
    factory: Arc<dyn ObjectFactory<T>>,
    config: PoolConfiguration<T>,
) -> Box<dyn Pool<T>> {
    let validator = config.validation_function.clone();
    let trace = config.trace;
    let bounded = BoundedPool::from_shared(factory, config);

    match (validator, trace) {
        (Some(validator), true) => Box::new(TracingPool::new(ValidatingPool::new(bounded, validator), true)),
        (Some(validator), false) => Box::new(ValidatingPool::new(bounded, validator)),
        (None, true) => Box::new(TracingPool::new(bounded, true)),
        (None, false) => Box::new(bounded),
    }
}
