//! Object factories create and destroy pooled resources

use std::any::type_name;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::BoxError;

/// Creates and destroys raw resource instances.
///
/// Pools serialize calls to a factory under their own lock, so implementations
/// do not need internal synchronization beyond what `Send + Sync` demands.
pub trait ObjectFactory<T>: Send + Sync {
    /// Construct a new resource.
    fn create(&self) -> Result<T, BoxError>;

    /// Tear a resource down. Errors are logged by the caller and never propagated.
    fn destroy(&self, object: T) -> Result<(), BoxError> {
        drop(object);
        Ok(())
    }

    /// Reset an object before it goes back to the idle set.
    ///
    /// Called under the pool lock on every release that keeps the object.
    fn recycle(&self, _object: &mut T) {}

    /// Name of the produced type, for diagnostics.
    fn resource_type(&self) -> &'static str {
        type_name::<T>()
    }
}

type CreateFn<T> = Box<dyn Fn() -> Result<T, BoxError> + Send + Sync>;
type DestroyFn<T> = Box<dyn Fn(T) -> Result<(), BoxError> + Send + Sync>;
type RecycleFn<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Factory built from closures
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{FnFactory, ObjectFactory};
///
/// let factory = FnFactory::infallible(|| String::from("buffer"));
/// let value = factory.create().unwrap();
/// assert_eq!(value, "buffer");
/// assert_eq!(factory.created_count(), 1);
/// ```
pub struct FnFactory<T> {
    create: CreateFn<T>,
    destroy: Option<DestroyFn<T>>,
    recycle: Option<RecycleFn<T>>,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

impl<T> FnFactory<T> {
    /// Create a factory from a fallible constructor
    pub fn new<F>(create: F) -> Self
    where
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            create: Box::new(create),
            destroy: None,
            recycle: None,
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        }
    }

    /// Create a factory from a constructor that cannot fail
    pub fn infallible<F>(create: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::new(move || Ok(create()))
    }

    /// Attach a destructor
    pub fn with_destroy<D>(mut self, destroy: D) -> Self
    where
        D: Fn(T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.destroy = Some(Box::new(destroy));
        self
    }

    /// Attach a reset step run on every release back to the idle set
    pub fn with_recycle<R>(mut self, recycle: R) -> Self
    where
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        self.recycle = Some(Box::new(recycle));
        self
    }

    /// Number of successful creations
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Number of destroy calls, failed ones included
    pub fn destroyed_count(&self) -> usize {
        self.destroyed.load(Ordering::Relaxed)
    }
}

impl<T> ObjectFactory<T> for FnFactory<T> {
    fn create(&self) -> Result<T, BoxError> {
        let object = (self.create)()?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(object)
    }

    fn destroy(&self, object: T) -> Result<(), BoxError> {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        match self.destroy {
            Some(ref destroy) => destroy(object),
            None => Ok(()),
        }
    }

    fn recycle(&self, object: &mut T) {
        if let Some(ref recycle) = self.recycle {
            recycle(object);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_create_is_not_counted() {
        let factory: FnFactory<u32> = FnFactory::new(|| Err("no backend".into()));
        assert!(factory.create().is_err());
        assert_eq!(factory.created_count(), 0);
    }

    #[test]
    fn test_destroy_counts_failures() {
        let factory = FnFactory::infallible(|| 7u32).with_destroy(|_| Err("stuck".into()));
        let value = factory.create().unwrap();
        assert!(factory.destroy(value).is_err());
        assert_eq!(factory.destroyed_count(), 1);
    }

    #[test]
    fn test_recycle_runs_attached_reset() {
        let factory = FnFactory::infallible(Vec::<u8>::new).with_recycle(|buffer| buffer.clear());
        let mut buffer = factory.create().unwrap();
        buffer.push(1);
        factory.recycle(&mut buffer);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_recycle_defaults_to_no_op() {
        let factory = FnFactory::infallible(|| vec![1u8]);
        let mut buffer = factory.create().unwrap();
        buffer.push(2);
        factory.recycle(&mut buffer);
        assert_eq!(buffer, vec![1, 2]);
    }

    #[test]
    fn test_resource_type_names_output() {
        let factory = FnFactory::infallible(Vec::<u8>::new);
        assert!(factory.resource_type().contains("Vec<u8>"));
    }
}
