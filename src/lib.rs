//! # Esox ResourcePool
//!
//! Bounded, thread-safe resource pool with blocking checkout, validation,
//! checkout tracing and lifecycle-policy dispatch.
//!
//! ## Features
//!
//! - Capacity-bounded pool with strict or overflowing limits
//! - Blocking acquire with timeout and cooperative cancellation
//! - Async acquire on top of the same pool
//! - Validation of reused objects, with automatic replacement
//! - Checkout tracing for leak diagnosis
//! - Two-generation trimming of idle objects, on access or in the background
//! - Singleton, pooled, per-thread and transient lifecycle policies
//! - Health monitoring and metrics, with Prometheus text export
//! - Automatic return of objects via RAII (Drop trait)
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_resourcepool::{BoundedPool, FnFactory, Pool, PoolConfiguration};
//! use std::sync::Arc;
//!
//! let factory = Arc::new(FnFactory::infallible(|| Vec::<u8>::with_capacity(1024)));
//! let pool = BoundedPool::new(factory, PoolConfiguration::new().with_max_size(4));
//! {
//!     let mut buffer = pool.checkout().unwrap();
//!     buffer.extend_from_slice(b"hello");
//!     // Returned to the pool when `buffer` goes out of scope
//! }
//! assert_eq!(pool.stats().idle, 1);
//! ```

mod cancel;
mod config;
mod errors;
mod eviction;
mod factory;
mod health;
mod lifecycle;
mod metrics;
mod pool;
mod trace;
mod trimmer;
mod validating;

pub use cancel::CancelToken;
pub use config::{PoolConfiguration, Validator};
pub use errors::{BoxError, PoolError, PoolResult};
pub use factory::{FnFactory, ObjectFactory};
pub use health::HealthStatus;
pub use lifecycle::{
    Component, ComponentHandler, ComponentOptions, HandlerId, LifecycleDispatcher, LifecyclePolicy,
    PerThreadHandler, PooledHandler, SingletonHandler, TransientHandler,
};
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::{BoundedPool, Pool, PoolStats, Pooled, PooledObject, ResourceId, build_pool};
pub use trace::{TraceRecord, TracingPool};
pub use trimmer::Trimmer;
pub use validating::ValidatingPool;
