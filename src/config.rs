//! Pool configuration options

use std::time::Duration;

use crate::errors::{PoolError, PoolResult};

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use esox_resourcepool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_min_pool_size(2)
///     .with_max_pool_size(20)
///     .with_creation_timeout(Duration::from_secs(5))
///     .with_transaction_affinity(true);
///
/// assert_eq!(config.min_pool_size, 2);
/// assert_eq!(config.max_pool_size, 20);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfiguration {
    /// Number of objects the pool keeps alive even when idle
    pub min_pool_size: usize,

    /// Upper bound on live objects; 0 means unbounded
    pub max_pool_size: usize,

    /// Default bound on how long an acquire waits for an object
    pub creation_timeout: Duration,

    /// Maximum lifetime of an object when load balancing is enabled
    pub load_balance_timeout: Duration,

    /// Destroy objects older than `load_balance_timeout` when they are returned
    pub use_load_balancing: bool,

    /// Route objects enlisted in a transaction back to callers in the same transaction
    pub transaction_affinity: bool,

    /// Deactivate released objects on the worker runtime instead of the caller's thread
    pub use_deferred_reclaim: bool,

    /// Interval of the prune/age pass; `None` picks a random 2-4 minute interval
    pub cleanup_interval: Option<Duration>,

    /// First backoff interval after a creation failure
    pub error_wait_initial: Duration,

    /// Cap of the doubling backoff interval
    pub error_wait_max: Duration,

    /// Replenishment only runs when this returns true
    pub identity_check: Option<fn() -> bool>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            min_pool_size: 0,
            max_pool_size: 100,
            creation_timeout: Duration::from_secs(15),
            load_balance_timeout: Duration::ZERO,
            use_load_balancing: false,
            transaction_affinity: false,
            use_deferred_reclaim: false,
            cleanup_interval: None,
            error_wait_initial: Duration::from_secs(5),
            error_wait_max: Duration::from_secs(60),
            identity_check: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum pool size
    pub fn with_min_pool_size(mut self, size: usize) -> Self {
        self.min_pool_size = size;
        self
    }

    /// Set the maximum pool size (0 for unbounded)
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_max_pool_size(0);
    /// assert!(config.is_unbounded());
    /// ```
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the default acquire wait
    pub fn with_creation_timeout(mut self, timeout: Duration) -> Self {
        self.creation_timeout = timeout;
        self
    }

    /// Enable load balancing with the given object lifetime
    pub fn with_load_balance_timeout(mut self, timeout: Duration) -> Self {
        self.use_load_balancing = !timeout.is_zero();
        self.load_balance_timeout = timeout;
        self
    }

    /// Enable or disable transaction affinity
    pub fn with_transaction_affinity(mut self, enabled: bool) -> Self {
        self.transaction_affinity = enabled;
        self
    }

    /// Enable or disable the deferred reclaim queue
    pub fn with_deferred_reclaim(mut self, enabled: bool) -> Self {
        self.use_deferred_reclaim = enabled;
        self
    }

    /// Use a fixed maintenance interval
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Set the initial and maximum error backoff
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::PoolConfiguration;
    /// use std::time::Duration;
    ///
    /// let config = PoolConfiguration::new()
    ///     .with_error_backoff(Duration::from_millis(50), Duration::from_millis(400));
    ///
    /// assert_eq!(config.error_wait_initial, Duration::from_millis(50));
    /// assert_eq!(config.error_wait_max, Duration::from_millis(400));
    /// ```
    pub fn with_error_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.error_wait_initial = initial;
        self.error_wait_max = max;
        self
    }

    /// Only replenish when `check` confirms the executing identity
    pub fn with_identity_check(mut self, check: fn() -> bool) -> Self {
        self.identity_check = Some(check);
        self
    }

    /// Whether the pool has no upper bound
    pub fn is_unbounded(&self) -> bool {
        self.max_pool_size == 0
    }

    /// Whether `total` objects leave room for another one
    pub(crate) fn has_capacity_for(&self, total: usize) -> bool {
        self.is_unbounded() || total < self.max_pool_size
    }

    /// Check the configuration for contradictory values
    pub fn validate(&self) -> PoolResult<()> {
        if !self.is_unbounded() && self.min_pool_size > self.max_pool_size {
            return Err(PoolError::InvalidConfiguration(format!(
                "min_pool_size ({}) exceeds max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        if self.error_wait_initial.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "error_wait_initial must be greater than zero".to_string(),
            ));
        }
        if self.error_wait_initial > self.error_wait_max {
            return Err(PoolError::InvalidConfiguration(format!(
                "error_wait_initial ({:?}) exceeds error_wait_max ({:?})",
                self.error_wait_initial, self.error_wait_max
            )));
        }
        if let Some(interval) = self.cleanup_interval
            && interval.is_zero()
        {
            return Err(PoolError::InvalidConfiguration(
                "cleanup_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PoolConfiguration::default();
        assert!(config.validate().is_ok());
        assert!(!config.use_load_balancing);
        assert_eq!(config.error_wait_initial, Duration::from_secs(5));
        assert_eq!(config.error_wait_max, Duration::from_secs(60));
    }

    #[test]
    fn test_min_above_max_rejected() {
        let config = PoolConfiguration::new()
            .with_min_pool_size(10)
            .with_max_pool_size(5);
        assert!(matches!(
            config.validate(),
            Err(PoolError::InvalidConfiguration(_))
        ));

        // unbounded pools accept any minimum
        let config = config.with_max_pool_size(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_capacity() {
        let config = PoolConfiguration::new().with_max_pool_size(2);
        assert!(config.has_capacity_for(1));
        assert!(!config.has_capacity_for(2));
        assert!(PoolConfiguration::new().with_max_pool_size(0).has_capacity_for(usize::MAX - 1));
    }

    #[test]
    fn test_load_balance_flag_follows_timeout() {
        let config = PoolConfiguration::new().with_load_balance_timeout(Duration::from_secs(30));
        assert!(config.use_load_balancing);
        let config = config.with_load_balance_timeout(Duration::ZERO);
        assert!(!config.use_load_balancing);
    }
}
