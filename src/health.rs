//! Health monitoring for resource pools

use crate::metrics::PoolMetrics;

/// Health status of a resource pool
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{BoxError, Pool, PoolConfiguration, Resource};
///
/// struct Conn;
/// impl Resource for Conn {}
///
/// let pool = Pool::builder(|_: &PoolConfiguration| Ok::<_, BoxError>(Conn))
///     .build()
///     .unwrap();
///
/// let health = pool.health_status();
/// assert!(health.is_healthy());
/// assert_eq!(health.active_objects, 0);
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Current pool utilization (0.0 to 1.0)
    pub utilization: f64,

    /// Idle objects
    pub free_objects: usize,

    /// Checked-out objects
    pub active_objects: usize,

    /// Callers blocked waiting for an object
    pub waiting_requests: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub fn from_metrics(metrics: &PoolMetrics) -> Self {
        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if metrics.error_active {
            warnings.push("Resource creation is failing; acquirers fail fast".to_string());
            is_healthy = false;
        }

        if metrics.utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", metrics.utilization * 100.0));
            is_healthy = false;
        }

        if metrics.waiting_requests > 0 {
            warnings.push(format!("{} requests waiting for an object", metrics.waiting_requests));
        }

        if metrics.total_objects < metrics.min_pool_size {
            warnings.push(format!(
                "Below minimum size: {} of {}",
                metrics.total_objects, metrics.min_pool_size
            ));
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization: metrics.utilization,
            free_objects: metrics.free_objects.max(0) as usize,
            active_objects: metrics.active_objects(),
            waiting_requests: metrics.waiting_requests,
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
    use crate::metrics::{PoolCounters, PoolGauges};

    fn metrics(total: usize, error_active: bool) -> PoolMetrics {
        PoolCounters::new().snapshot(PoolGauges {
            total_objects: total,
            waiting_requests: 1,
            min_pool_size: 2,
            max_pool_size: 10,
            error_active,
            next_error_wait_ms: 5000,
        })
    }

    #[test]
    fn test_error_makes_pool_unhealthy() {
        let health = HealthStatus::from_metrics(&metrics(2, true));
        assert!(!health.is_healthy());
        assert_eq!(health.warning_count, 2);
    }

    #[test]
    fn test_high_utilization() {
        let health = HealthStatus::from_metrics(&metrics(10, false));
        assert!(!health.is_healthy());
        assert_eq!(health.active_objects, 10);
    }

    #[test]
    fn test_below_minimum_is_a_warning_only() {
        let health = HealthStatus::from_metrics(&metrics(1, false));
        assert!(health.is_healthy());
        assert!(health.warnings.iter().any(|w| w.starts_with("Below minimum")));
    }
}
