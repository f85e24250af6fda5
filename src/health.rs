//! Health monitoring for resource pools

use crate::pool::PoolStats;

/// Health status of a pool
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{BoundedPool, FnFactory, Pool, PoolConfiguration};
/// use std::sync::Arc;
///
/// let pool = BoundedPool::new(Arc::new(FnFactory::infallible(|| 1u32)), PoolConfiguration::new());
///
/// let health = pool.health_status();
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_objects, 0);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Outstanding objects relative to capacity (0.0 when unbounded)
    pub utilization: f64,

    /// Idle objects count
    pub idle_objects: usize,

    /// Outstanding objects count
    pub outstanding_objects: usize,

    /// Configured capacity
    pub max_size: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Derive a health status from a stats snapshot
    pub fn new(stats: &PoolStats) -> Self {
        let utilization = stats.utilization();
        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if stats.disposed {
            warnings.push("Pool is disposed".to_string());
            is_healthy = false;
        }

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if stats.max_size > 0 && stats.total > stats.max_size {
            warnings.push(format!(
                "Pool holds {} objects, above its maximum of {}",
                stats.total, stats.max_size
            ));
        }

        if stats.idle == 0 && stats.outstanding > 0 {
            warnings.push("Pool is empty".to_string());
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_objects: stats.idle,
            outstanding_objects: stats.outstanding,
            max_size: stats.max_size,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(idle: usize, outstanding: usize, max_size: usize) -> PoolStats {
        PoolStats {
            idle,
            outstanding,
            total: idle + outstanding,
            max_size,
            disposed: false,
        }
    }

    #[test]
    fn test_full_pool_is_unhealthy() {
        let health = HealthStatus::new(&stats(0, 4, 4));
        assert!(!health.is_healthy());
        assert_eq!(health.warning_count, 2);
    }

    #[test]
    fn test_unbounded_pool_has_no_utilization() {
        let health = HealthStatus::new(&stats(2, 50, 0));
        assert!(health.is_healthy());
        assert_eq!(health.utilization, 0.0);
    }

    #[test]
    fn test_overflow_is_reported() {
        let health = HealthStatus::new(&stats(1, 2, 2));
        assert!(health.warnings.iter().any(|w| w.contains("above its maximum")));
    }
}
