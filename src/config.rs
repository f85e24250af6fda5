//! Pool configuration options

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Validation hook run against objects handed out from the idle set.
pub type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Configuration for pool behavior
///
/// # Examples
///
/// ```
/// use esox_resourcepool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::<i32>::new()
///     .with_max_size(16)
///     .with_max_strict(true)
///     .with_block_timeout(Duration::from_millis(250))
///     .with_trim_interval(Duration::from_secs(60));
///
/// assert_eq!(config.max_size, 16);
/// assert!(config.max_strict);
/// assert_eq!(config.block_timeout, Some(Duration::from_millis(250)));
/// ```
pub struct PoolConfiguration<T> {
    /// Capacity bound on idle plus outstanding objects. 0 means unbounded.
    pub max_size: usize,

    /// Whether `max_size` is a hard ceiling
    pub max_strict: bool,

    /// Whether an exhausted strict pool blocks instead of failing
    pub blocking: bool,

    /// How long a blocked acquire waits. `None` waits indefinitely.
    pub block_timeout: Option<Duration>,

    /// Interval between automatic trim passes. `None` disables automatic trimming.
    pub trim_interval: Option<Duration>,

    /// Objects created up front by lifecycle handlers, and the idle floor for trimming
    pub min_size: usize,

    /// Custom validation function
    pub validation_function: Option<Validator<T>>,

    /// Record a trace entry for every checkout
    pub trace: bool,
}

impl<T> Default for PoolConfiguration<T> {
    fn default() -> Self {
        Self {
            max_size: 8,
            max_strict: false,
            blocking: true,
            block_timeout: None,
            trim_interval: None,
            min_size: 0,
            validation_function: None,
            trace: false,
        }
    }
}

impl<T> Clone for PoolConfiguration<T> {
    fn clone(&self) -> Self {
        Self {
            max_size: self.max_size,
            max_strict: self.max_strict,
            blocking: self.blocking,
            block_timeout: self.block_timeout,
            trim_interval: self.trim_interval,
            min_size: self.min_size,
            validation_function: self.validation_function.clone(),
            trace: self.trace,
        }
    }
}

impl<T> fmt::Debug for PoolConfiguration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfiguration")
            .field("max_size", &self.max_size)
            .field("max_strict", &self.max_strict)
            .field("blocking", &self.blocking)
            .field("block_timeout", &self.block_timeout)
            .field("trim_interval", &self.trim_interval)
            .field("min_size", &self.min_size)
            .field("validation_function", &self.validation_function.is_some())
            .field("trace", &self.trace)
            .finish()
    }
}

impl<T> PoolConfiguration<T> {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum pool size (0 for unbounded)
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Make `max_size` a hard ceiling
    pub fn with_max_strict(mut self, strict: bool) -> Self {
        self.max_strict = strict;
        self
    }

    /// Block on an exhausted strict pool instead of failing
    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Set the blocking timeout. A zero duration waits indefinitely.
    ///
    /// ```
    /// use esox_resourcepool::PoolConfiguration;
    /// use std::time::Duration;
    ///
    /// let config = PoolConfiguration::<i32>::new().with_block_timeout(Duration::ZERO);
    /// assert_eq!(config.block_timeout, None);
    /// ```
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Set the automatic trim interval. A zero duration disables trimming.
    pub fn with_trim_interval(mut self, interval: Duration) -> Self {
        self.trim_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Set the minimum size
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Validate objects taken from the idle set before handing them out
    pub fn with_validation<F>(mut self, func: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.validation_function = Some(Arc::new(func));
        self
    }

    /// Enable checkout tracing
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pooled_handler() {
        let config = PoolConfiguration::<u8>::default();
        assert_eq!(config.max_size, 8);
        assert!(!config.max_strict);
        assert!(config.blocking);
        assert_eq!(config.block_timeout, None);
        assert_eq!(config.trim_interval, None);
        assert!(config.validation_function.is_none());
        assert!(!config.trace);
    }

    #[test]
    fn test_zero_trim_interval_disables_trimming() {
        let config = PoolConfiguration::<u8>::new()
            .with_trim_interval(Duration::from_secs(1))
            .with_trim_interval(Duration::ZERO);
        assert_eq!(config.trim_interval, None);
    }

    #[test]
    fn test_validation_survives_clone() {
        let config = PoolConfiguration::<u8>::new().with_validation(|x| *x > 3);
        let copy = config.clone();
        let validate = copy.validation_function.unwrap();
        assert!(validate(&4));
        assert!(!validate(&1));
    }
}
