//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::pool::PoolStats;

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{BoundedPool, FnFactory, Pool, PoolConfiguration};
/// use std::sync::Arc;
///
/// let pool = BoundedPool::new(Arc::new(FnFactory::infallible(|| 1u32)), PoolConfiguration::new());
///
/// let obj = pool.acquire().unwrap();
/// let metrics = pool.metrics();
/// assert_eq!(metrics.created, 1);
/// assert_eq!(metrics.outstanding_objects, 1);
/// pool.release(obj).unwrap();
/// ```
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolMetrics {
    /// Objects created by the factory
    pub created: usize,

    /// Objects handed to the factory for destruction
    pub destroyed: usize,

    /// Successful acquisitions
    pub acquired: usize,

    /// Successful releases
    pub released: usize,

    /// Acquisitions refused because the pool was exhausted
    pub exhausted_events: usize,

    /// Blocked acquisitions that timed out
    pub timeouts: usize,

    /// Blocked acquisitions that were cancelled
    pub cancellations: usize,

    /// Idle objects rejected by validation
    pub validation_failures: usize,

    /// Objects evicted by trimming
    pub trimmed: usize,

    /// Factory creation failures
    pub creation_failures: usize,

    /// Factory destroy failures
    pub destroy_failures: usize,

    /// Current idle objects
    pub idle_objects: usize,

    /// Current outstanding objects
    pub outstanding_objects: usize,

    /// Current total objects
    pub total_objects: usize,

    /// Configured capacity (0 = unbounded)
    pub max_size: usize,

    /// Pool utilization ratio (0.0 to 1.0, 0.0 when unbounded)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("destroyed".to_string(), self.destroyed.to_string());
        metrics.insert("acquired".to_string(), self.acquired.to_string());
        metrics.insert("released".to_string(), self.released.to_string());
        metrics.insert("exhausted_events".to_string(), self.exhausted_events.to_string());
        metrics.insert("timeouts".to_string(), self.timeouts.to_string());
        metrics.insert("cancellations".to_string(), self.cancellations.to_string());
        metrics.insert("validation_failures".to_string(), self.validation_failures.to_string());
        metrics.insert("trimmed".to_string(), self.trimmed.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("destroy_failures".to_string(), self.destroy_failures.to_string());
        metrics.insert("idle_objects".to_string(), self.idle_objects.to_string());
        metrics.insert("outstanding_objects".to_string(), self.outstanding_objects.to_string());
        metrics.insert("total_objects".to_string(), self.total_objects.to_string());
        metrics.insert("max_size".to_string(), self.max_size.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::{BoundedPool, FnFactory, MetricsExporter, Pool, PoolConfiguration};
    /// use std::collections::HashMap;
    /// use std::sync::Arc;
    ///
    /// let pool = BoundedPool::new(Arc::new(FnFactory::infallible(|| 1u32)), PoolConfiguration::new());
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&pool.metrics(), "my_pool", Some(&tags));
    /// assert!(output.contains("resourcepool_objects_outstanding"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let labels = Self::format_labels(pool_name, tags);
        let mut output = String::new();

        let gauges = [
            ("resourcepool_objects_idle", "Current idle objects", metrics.idle_objects as f64),
            ("resourcepool_objects_outstanding", "Current outstanding objects", metrics.outstanding_objects as f64),
            ("resourcepool_objects_total", "Current total objects", metrics.total_objects as f64),
            ("resourcepool_utilization", "Pool utilization ratio", metrics.utilization),
        ];
        for (name, help, value) in gauges {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} gauge\n", name));
            output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
        }

        let counters = [
            ("resourcepool_objects_created_total", "Objects created", metrics.created),
            ("resourcepool_objects_destroyed_total", "Objects destroyed", metrics.destroyed),
            ("resourcepool_acquired_total", "Successful acquisitions", metrics.acquired),
            ("resourcepool_released_total", "Successful releases", metrics.released),
            ("resourcepool_events_exhausted_total", "Pool exhausted events", metrics.exhausted_events),
            ("resourcepool_timeouts_total", "Blocked acquisitions that timed out", metrics.timeouts),
            ("resourcepool_validation_failures_total", "Validation failures", metrics.validation_failures),
            ("resourcepool_trimmed_total", "Objects evicted by trimming", metrics.trimmed),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
        }

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut sorted: Vec<_> = tags.iter().collect();
            sorted.sort();
            for (key, value) in sorted {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub exhausted_events: AtomicUsize,
    pub timeouts: AtomicUsize,
    pub cancellations: AtomicUsize,
    pub trimmed: AtomicUsize,
    pub creation_failures: AtomicUsize,
    pub destroy_failures: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, stats: &PoolStats) -> PoolMetrics {
        PoolMetrics {
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            exhausted_events: self.exhausted_events.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            validation_failures: 0,
            trimmed: self.trimmed.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            destroy_failures: self.destroy_failures.load(Ordering::Relaxed),
            idle_objects: stats.idle,
            outstanding_objects: stats.outstanding,
            total_objects: stats.total,
            max_size: stats.max_size,
            utilization: stats.utilization(),
        }
    }
}
