//! Lifecycle policies and the dispatcher that maps component keys to them.
//!
//! A component is registered under a key with a policy name. The dispatcher
//! builds the matching [`ComponentHandler`] and routes every acquire/release
//! for that key through it:
//!
//! - `singleton`: one shared instance until shutdown
//! - `pooled`: checkouts from a [`BoundedPool`](crate::BoundedPool), optionally validated and traced
//! - `per-thread`: one shared instance per calling thread
//! - `transient`: a new instance per request, destroyed on release

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::factory::ObjectFactory;
use crate::metrics::PoolMetrics;
use crate::pool::{Pool, Pooled, build_pool};
use crate::trace::TraceRecord;
use crate::trimmer::Trimmer;

/// How consumers obtain and return instances of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePolicy {
    Singleton,
    Pooled,
    PerThread,
    Transient,
}

impl LifecyclePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            LifecyclePolicy::Singleton => "singleton",
            LifecyclePolicy::Pooled => "pooled",
            LifecyclePolicy::PerThread => "per-thread",
            LifecyclePolicy::Transient => "transient",
        }
    }
}

impl fmt::Display for LifecyclePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Parses policy names case-insensitively, including the older handler names.
///
/// ```
/// use esox_resourcepool::{LifecyclePolicy, PoolError};
///
/// assert_eq!("Poolable".parse::<LifecyclePolicy>().unwrap(), LifecyclePolicy::Pooled);
/// assert_eq!("thread-safe".parse::<LifecyclePolicy>().unwrap(), LifecyclePolicy::Singleton);
/// assert!(matches!("session".parse::<LifecyclePolicy>(), Err(PoolError::UnknownPolicy(_))));
/// ```
impl FromStr for LifecyclePolicy {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "singleton" | "thread-safe" | "threadsafe" => Ok(LifecyclePolicy::Singleton),
            "pooled" | "poolable" => Ok(LifecyclePolicy::Pooled),
            "per-thread" | "perthread" | "per_thread" => Ok(LifecyclePolicy::PerThread),
            "transient" | "factory" => Ok(LifecyclePolicy::Transient),
            _ => Err(PoolError::UnknownPolicy(s.to_string())),
        }
    }
}

/// Identity of a handler, stamped on the components it hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    /// A fresh id, distinct from every other one in the process
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HandlerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// An instance handed out by a [`ComponentHandler`]
pub enum Component<T> {
    /// Shared by reference (singleton and per-thread)
    Shared { instance: Arc<T>, owner: HandlerId },
    /// Checked out of a pool; the resource id names the pool
    Pooled(Pooled<T>),
    /// Exclusively owned (transient)
    Owned { object: T, owner: HandlerId },
}

impl<T> Component<T> {
    pub fn as_shared(&self) -> Option<&Arc<T>> {
        match self {
            Component::Shared { instance, .. } => Some(instance),
            _ => None,
        }
    }

    /// The handler that produced a shared or owned component
    pub fn owner(&self) -> Option<HandlerId> {
        match self {
            Component::Shared { owner, .. } | Component::Owned { owner, .. } => Some(*owner),
            Component::Pooled(_) => None,
        }
    }
}

impl<T> Deref for Component<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Component::Shared { instance, .. } => &**instance,
            Component::Pooled(item) => &**item,
            Component::Owned { object, .. } => object,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Component<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Shared { instance, owner } => f
                .debug_struct("Shared")
                .field("instance", instance)
                .field("owner", owner)
                .finish(),
            Component::Pooled(item) => f.debug_tuple("Pooled").field(item).finish(),
            Component::Owned { object, owner } => f
                .debug_struct("Owned")
                .field("object", object)
                .field("owner", owner)
                .finish(),
        }
    }
}

/// One acquisition strategy
pub trait ComponentHandler<T>: Send + Sync {
    fn policy(&self) -> LifecyclePolicy;

    fn get(&self) -> PoolResult<Component<T>>;

    fn put(&self, component: Component<T>) -> PoolResult<()>;

    /// Outstanding checkouts; only traced pools have any
    fn snapshot(&self) -> PoolResult<Vec<TraceRecord>> {
        Err(PoolError::TracingDisabled)
    }

    fn metrics(&self) -> Option<PoolMetrics> {
        None
    }

    /// Destroy every instance the handler still owns. Idempotent.
    fn dispose(&self);
}

fn wrong_kind(policy: LifecyclePolicy) -> PoolError {
    PoolError::InvalidRelease(format!("component was not obtained from a {} handler", policy))
}

fn wrong_owner(expected: HandlerId, found: HandlerId) -> PoolError {
    warn!(%expected, %found, "Released a component to a handler that did not create it");
    PoolError::InvalidRelease(format!("component belongs to {found}, not {expected}"))
}

/// Destroy a shared instance if nobody else still holds it
fn destroy_shared<T>(factory: &dyn ObjectFactory<T>, instance: Arc<T>) {
    match Arc::try_unwrap(instance) {
        Ok(object) => {
            if let Err(err) = factory.destroy(object) {
                warn!(resource_type = factory.resource_type(), error = %err, "Error decommissioning component");
            }
        }
        Err(instance) => warn!(
            resource_type = factory.resource_type(),
            holders = Arc::strong_count(&instance) - 1,
            "Component still in use, leaving it to its holders"
        ),
    }
}

enum Slot<T> {
    Empty,
    Ready(Arc<T>),
    Disposed,
}

/// One instance for the lifetime of the handler
pub struct SingletonHandler<T> {
    id: HandlerId,
    factory: Arc<dyn ObjectFactory<T>>,
    slot: Mutex<Slot<T>>,
}

impl<T: Send + Sync + 'static> SingletonHandler<T> {
    /// With `eager` the instance is created now rather than on first request.
    pub fn new(factory: Arc<dyn ObjectFactory<T>>, eager: bool) -> PoolResult<Self> {
        let handler = Self {
            id: HandlerId::next(),
            factory,
            slot: Mutex::new(Slot::Empty),
        };
        if eager {
            handler.instance()?;
        }
        Ok(handler)
    }

    fn instance(&self) -> PoolResult<Arc<T>> {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Ready(instance) => Ok(Arc::clone(instance)),
            Slot::Disposed => Err(PoolError::Disposed),
            Slot::Empty => {
                let object = self
                    .factory
                    .create()
                    .map_err(|source| PoolError::creation(self.factory.resource_type(), source))?;
                debug!(resource_type = self.factory.resource_type(), "Created singleton component");
                let instance = Arc::new(object);
                *slot = Slot::Ready(Arc::clone(&instance));
                Ok(instance)
            }
        }
    }
}

impl<T: Send + Sync + 'static> ComponentHandler<T> for SingletonHandler<T> {
    fn policy(&self) -> LifecyclePolicy {
        LifecyclePolicy::Singleton
    }

    fn get(&self) -> PoolResult<Component<T>> {
        let instance = self.instance()?;
        Ok(Component::Shared { instance, owner: self.id })
    }

    fn put(&self, component: Component<T>) -> PoolResult<()> {
        match component {
            Component::Shared { owner, .. } if owner == self.id => Ok(()),
            Component::Shared { owner, .. } => Err(wrong_owner(self.id, owner)),
            _ => Err(wrong_kind(self.policy())),
        }
    }

    fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.slot.lock(), Slot::Disposed);
        if let Slot::Ready(instance) = previous {
            destroy_shared(self.factory.as_ref(), instance);
        }
    }
}

/// Checkouts from a pool built from the handler's configuration.
///
/// The pool is prefilled to `min_size` and, when a trim interval is set,
/// trimmed in the background as well as on access.
pub struct PooledHandler<T> {
    pool: Arc<dyn Pool<T>>,
    trimmer: Mutex<Option<Trimmer<T>>>,
}

impl<T: Send + 'static> PooledHandler<T> {
    pub fn new(factory: Arc<dyn ObjectFactory<T>>, config: PoolConfiguration<T>) -> PoolResult<Self> {
        let min_size = config.min_size;
        let trim_interval = config.trim_interval;
        let pool: Arc<dyn Pool<T>> = Arc::from(build_pool(factory, config));

        if min_size > 0 {
            pool.prefill(min_size)?;
        }

        let trimmer = trim_interval.and_then(|interval| match Trimmer::spawn(&pool, interval) {
            Ok(trimmer) => Some(trimmer),
            Err(err) => {
                warn!(error = %err, "Unable to start background trimmer; trimming on access only");
                None
            }
        });

        Ok(Self {
            pool,
            trimmer: Mutex::new(trimmer),
        })
    }

    pub fn pool(&self) -> &dyn Pool<T> {
        self.pool.as_ref()
    }
}

impl<T: Send + 'static> ComponentHandler<T> for PooledHandler<T> {
    fn policy(&self) -> LifecyclePolicy {
        LifecyclePolicy::Pooled
    }

    fn get(&self) -> PoolResult<Component<T>> {
        self.pool.acquire().map(Component::Pooled)
    }

    fn put(&self, component: Component<T>) -> PoolResult<()> {
        match component {
            Component::Pooled(item) => self.pool.release(item),
            _ => Err(wrong_kind(self.policy())),
        }
    }

    fn snapshot(&self) -> PoolResult<Vec<TraceRecord>> {
        self.pool.snapshot()
    }

    fn metrics(&self) -> Option<PoolMetrics> {
        Some(self.pool.metrics())
    }

    fn dispose(&self) {
        drop(self.trimmer.lock().take());
        self.pool.dispose();
    }
}

/// Cleanups that run when the current thread exits
#[derive(Default)]
struct ExitHooks(RefCell<Vec<Box<dyn FnOnce()>>>);

impl Drop for ExitHooks {
    fn drop(&mut self) {
        for hook in self.0.get_mut().drain(..) {
            hook();
        }
    }
}

thread_local! {
    static EXIT_HOOKS: ExitHooks = ExitHooks::default();
}

/// Returns false once the thread is already tearing down its locals.
fn on_thread_exit(hook: Box<dyn FnOnce()>) -> bool {
    EXIT_HOOKS
        .try_with(move |hooks| hooks.0.borrow_mut().push(hook))
        .is_ok()
}

struct ThreadInstances<T> {
    factory: Arc<dyn ObjectFactory<T>>,
    instances: DashMap<ThreadId, Arc<T>>,
    disposed: AtomicBool,
}

impl<T> ThreadInstances<T> {
    fn forget(&self, thread: ThreadId) {
        if let Some((_, instance)) = self.instances.remove(&thread) {
            debug!(?thread, resource_type = self.factory.resource_type(), "Destroying per-thread component");
            destroy_shared(self.factory.as_ref(), instance);
        }
    }
}

/// One instance per calling thread.
///
/// Instances live in a registry owned by the handler, so shutdown can reach
/// every thread's instance. A thread's instance is destroyed when that thread
/// exits.
pub struct PerThreadHandler<T> {
    id: HandlerId,
    registry: Arc<ThreadInstances<T>>,
}

impl<T: Send + Sync + 'static> PerThreadHandler<T> {
    pub fn new(factory: Arc<dyn ObjectFactory<T>>) -> Self {
        Self {
            id: HandlerId::next(),
            registry: Arc::new(ThreadInstances {
                factory,
                instances: DashMap::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of threads currently holding an instance
    pub fn instance_count(&self) -> usize {
        self.registry.instances.len()
    }

    fn shared(&self, instance: Arc<T>) -> Component<T> {
        Component::Shared { instance, owner: self.id }
    }
}

impl<T: Send + Sync + 'static> ComponentHandler<T> for PerThreadHandler<T> {
    fn policy(&self) -> LifecyclePolicy {
        LifecyclePolicy::PerThread
    }

    fn get(&self) -> PoolResult<Component<T>> {
        let registry = &self.registry;
        if registry.disposed.load(Ordering::Acquire) {
            return Err(PoolError::Disposed);
        }

        let thread = thread::current().id();
        if let Some(instance) = registry.instances.get(&thread) {
            return Ok(self.shared(Arc::clone(instance.value())));
        }

        // Only this thread inserts under its own id, so nothing can race the create.
        let object = registry
            .factory
            .create()
            .map_err(|source| PoolError::creation(registry.factory.resource_type(), source))?;
        let instance = Arc::new(object);
        registry.instances.insert(thread, Arc::clone(&instance));
        debug!(?thread, resource_type = registry.factory.resource_type(), "Created per-thread component");

        // Lost a race with dispose; clean up what it could not see.
        if registry.disposed.load(Ordering::Acquire) {
            drop(instance);
            registry.forget(thread);
            return Err(PoolError::Disposed);
        }

        let weak = Arc::downgrade(registry);
        let registered = on_thread_exit(Box::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.forget(thread);
            }
        }));
        if !registered {
            warn!(?thread, "Thread is exiting; its per-thread component lives until dispose");
        }
        Ok(self.shared(instance))
    }

    fn put(&self, component: Component<T>) -> PoolResult<()> {
        match component {
            Component::Shared { owner, .. } if owner == self.id => Ok(()),
            Component::Shared { owner, .. } => Err(wrong_owner(self.id, owner)),
            _ => Err(wrong_kind(self.policy())),
        }
    }

    fn dispose(&self) {
        let registry = &self.registry;
        if registry.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let threads: Vec<ThreadId> = registry.instances.iter().map(|entry| *entry.key()).collect();
        for thread in threads {
            registry.forget(thread);
        }
    }
}

/// A new instance per request, destroyed as soon as it comes back
pub struct TransientHandler<T> {
    id: HandlerId,
    factory: Arc<dyn ObjectFactory<T>>,
    disposed: AtomicBool,
}

impl<T: Send + 'static> TransientHandler<T> {
    pub fn new(factory: Arc<dyn ObjectFactory<T>>) -> Self {
        Self {
            id: HandlerId::next(),
            factory,
            disposed: AtomicBool::new(false),
        }
    }
}

impl<T: Send + 'static> ComponentHandler<T> for TransientHandler<T> {
    fn policy(&self) -> LifecyclePolicy {
        LifecyclePolicy::Transient
    }

    fn get(&self) -> PoolResult<Component<T>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PoolError::Disposed);
        }
        let object = self
            .factory
            .create()
            .map_err(|source| PoolError::creation(self.factory.resource_type(), source))?;
        Ok(Component::Owned { object, owner: self.id })
    }

    fn put(&self, component: Component<T>) -> PoolResult<()> {
        let object = match component {
            Component::Owned { object, owner } if owner == self.id => object,
            Component::Owned { owner, .. } => return Err(wrong_owner(self.id, owner)),
            _ => return Err(wrong_kind(self.policy())),
        };
        if let Err(err) = self.factory.destroy(object) {
            warn!(resource_type = self.factory.resource_type(), error = %err, "Error decommissioning component");
        }
        Ok(())
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

/// Per-registration settings
pub struct ComponentOptions<T> {
    /// Pool settings, used by the pooled policy
    pub pool: PoolConfiguration<T>,
    /// Create a singleton at registration instead of on first request
    pub eager: bool,
}

impl<T> Default for ComponentOptions<T> {
    fn default() -> Self {
        Self {
            pool: PoolConfiguration::default(),
            eager: false,
        }
    }
}

impl<T> ComponentOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(mut self, pool: PoolConfiguration<T>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }
}

/// Routes requests for registered components to their lifecycle handlers.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{ComponentOptions, FnFactory, LifecycleDispatcher, ObjectFactory};
/// use std::sync::Arc;
///
/// let dispatcher = LifecycleDispatcher::new();
/// let factory: Arc<dyn ObjectFactory<String>> = Arc::new(FnFactory::infallible(|| "conn".to_string()));
/// dispatcher.register("db", "poolable", factory, ComponentOptions::new()).unwrap();
///
/// let conn = dispatcher.acquire("db").unwrap();
/// assert_eq!(conn.as_str(), "conn");
/// dispatcher.release("db", conn).unwrap();
///
/// dispatcher.shutdown();
/// assert!(dispatcher.acquire("db").is_err());
/// ```
pub struct LifecycleDispatcher<T> {
    handlers: RwLock<HashMap<String, Arc<dyn ComponentHandler<T>>>>,
    shut_down: AtomicBool,
}

impl<T> LifecycleDispatcher<T> {
    /// Dispose every handler. Later acquires fail with [`PoolError::Disposed`];
    /// releases are still routed so late returns get destroyed.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let handlers: Vec<(String, Arc<dyn ComponentHandler<T>>)> = self
            .handlers
            .read()
            .iter()
            .map(|(key, handler)| (key.clone(), Arc::clone(handler)))
            .collect();
        for (key, handler) in &handlers {
            debug!(component = %key, policy = %handler.policy(), "Disposing component handler");
            handler.dispose();
        }
        info!(components = handlers.len(), "Lifecycle dispatcher shut down");
    }
}

impl<T: Send + Sync + 'static> LifecycleDispatcher<T> {
    /// Register `key` under the named policy. Fails with `UnknownPolicy` for an
    /// unrecognised name and `DuplicateComponent` if the key is taken.
    ///
    /// Singleton and per-thread instances are shared across threads, hence
    /// `T: Sync`. Components that are only `Send` register a [`PooledHandler`]
    /// or [`TransientHandler`] through [`register_handler`](Self::register_handler).
    pub fn register(
        &self,
        key: impl Into<String>,
        policy: &str,
        factory: Arc<dyn ObjectFactory<T>>,
        options: ComponentOptions<T>,
    ) -> PoolResult<LifecyclePolicy> {
        let policy: LifecyclePolicy = policy.parse()?;
        let key = key.into();
        if self.handlers.read().contains_key(&key) {
            return Err(PoolError::DuplicateComponent(key));
        }

        let handler: Arc<dyn ComponentHandler<T>> = match policy {
            LifecyclePolicy::Singleton => Arc::new(SingletonHandler::new(factory, options.eager)?),
            LifecyclePolicy::Pooled => Arc::new(PooledHandler::new(factory, options.pool)?),
            LifecyclePolicy::PerThread => Arc::new(PerThreadHandler::new(factory)),
            LifecyclePolicy::Transient => Arc::new(TransientHandler::new(factory)),
        };
        self.register_handler(key, handler)?;
        Ok(policy)
    }
}

impl<T: Send + 'static> LifecycleDispatcher<T> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Register a prebuilt handler
    pub fn register_handler(
        &self,
        key: impl Into<String>,
        handler: Arc<dyn ComponentHandler<T>>,
    ) -> PoolResult<()> {
        let key = key.into();
        let mut handlers = self.handlers.write();
        if self.shut_down.load(Ordering::Acquire) {
            drop(handlers);
            handler.dispose();
            return Err(PoolError::Disposed);
        }
        if handlers.contains_key(&key) {
            drop(handlers);
            handler.dispose();
            return Err(PoolError::DuplicateComponent(key));
        }

        debug!(component = %key, policy = %handler.policy(), "Registered component");
        handlers.insert(key, handler);
        Ok(())
    }

    fn handler(&self, key: &str) -> PoolResult<Arc<dyn ComponentHandler<T>>> {
        self.handlers
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| PoolError::UnknownComponent(key.to_string()))
    }

    pub fn acquire(&self, key: &str) -> PoolResult<Component<T>> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PoolError::Disposed);
        }
        self.handler(key)?.get()
    }

    pub fn release(&self, key: &str, component: Component<T>) -> PoolResult<()> {
        self.handler(key)?.put(component)
    }

    pub fn policy_of(&self, key: &str) -> Option<LifecyclePolicy> {
        self.handlers.read().get(key).map(|handler| handler.policy())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn snapshot(&self, key: &str) -> PoolResult<Vec<TraceRecord>> {
        self.handler(key)?.snapshot()
    }

    /// Pool metrics for a pooled component, `None` for the other policies
    pub fn metrics(&self, key: &str) -> PoolResult<Option<PoolMetrics>> {
        Ok(self.handler(key)?.metrics())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> Default for LifecycleDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LifecycleDispatcher<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
