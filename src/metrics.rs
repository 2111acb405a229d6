//! Diagnostic counters and their export

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Snapshot of a pool's diagnostic counters
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{BoxError, Pool, PoolConfiguration, Resource};
/// use std::sync::Arc;
///
/// struct Conn;
/// impl Resource for Conn {}
///
/// let pool = Pool::builder(|_: &PoolConfiguration| Ok::<_, BoxError>(Conn))
///     .build()
///     .unwrap();
/// let owner = Arc::new(());
///
/// let conn = pool.get(&owner).unwrap();
/// let metrics = pool.metrics();
/// assert_eq!(metrics.soft_connects, 1);
/// assert_eq!(metrics.hard_connects, 1);
/// assert_eq!(metrics.total_objects, 1);
/// pool.release(conn, &owner).unwrap();
/// assert_eq!(pool.metrics().free_objects, 1);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Acquire calls
    pub soft_connects: u64,

    /// Release calls
    pub soft_disconnects: u64,

    /// Backing resources created
    pub hard_connects: u64,

    /// Backing resources destroyed
    pub hard_disconnects: u64,

    /// Idle objects, general and transacted
    pub free_objects: i64,

    /// Objects known to the pool
    pub pooled_objects: i64,

    /// Objects held aside until their transaction ends
    pub stasis_objects: i64,

    /// Abandoned objects recovered by reclamation scans
    pub reclaimed_objects: u64,

    /// Acquire calls that gave up waiting
    pub timeouts: u64,

    /// Failed creations
    pub creation_failures: u64,

    /// Live objects
    pub total_objects: usize,

    /// Callers currently blocked in acquire
    pub waiting_requests: usize,

    pub min_pool_size: usize,

    /// 0 means unbounded
    pub max_pool_size: usize,

    /// Whether acquirers currently fail fast with a stored creation error
    pub error_active: bool,

    /// Backoff the next creation failure will use, in milliseconds
    pub next_error_wait_ms: u64,

    /// Ratio of checked-out objects to `max_pool_size` (0.0 when unbounded)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Objects currently held by callers
    pub fn active_objects(&self) -> usize {
        let idle = (self.free_objects.max(0) + self.stasis_objects.max(0)) as usize;
        self.total_objects.saturating_sub(idle)
    }

    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("soft_connects".to_string(), self.soft_connects.to_string());
        metrics.insert("soft_disconnects".to_string(), self.soft_disconnects.to_string());
        metrics.insert("hard_connects".to_string(), self.hard_connects.to_string());
        metrics.insert("hard_disconnects".to_string(), self.hard_disconnects.to_string());
        metrics.insert("free_objects".to_string(), self.free_objects.to_string());
        metrics.insert("pooled_objects".to_string(), self.pooled_objects.to_string());
        metrics.insert("stasis_objects".to_string(), self.stasis_objects.to_string());
        metrics.insert("reclaimed_objects".to_string(), self.reclaimed_objects.to_string());
        metrics.insert("timeouts".to_string(), self.timeouts.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("total_objects".to_string(), self.total_objects.to_string());
        metrics.insert("waiting_requests".to_string(), self.waiting_requests.to_string());
        metrics.insert("error_active".to_string(), self.error_active.to_string());
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
    /// use esox_resourcepool::{BoxError, Pool, PoolConfiguration, Resource};
    /// use std::collections::HashMap;
    ///
    /// struct Conn;
    /// impl Resource for Conn {}
    ///
    /// let pool = Pool::builder(|_: &PoolConfiguration| Ok::<_, BoxError>(Conn))
    ///     .build()
    ///     .unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("orders", Some(&tags));
    /// assert!(output.contains("resourcepool_objects_free"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let labels = Self::format_labels(pool_name, tags);
        let gauges: [(&str, &str, String); 6] = [
            ("resourcepool_objects_total", "Live objects", metrics.total_objects.to_string()),
            ("resourcepool_objects_free", "Idle objects", metrics.free_objects.to_string()),
            ("resourcepool_objects_stasis", "Objects held for pending transactions", metrics.stasis_objects.to_string()),
            ("resourcepool_requests_waiting", "Callers blocked in acquire", metrics.waiting_requests.to_string()),
            ("resourcepool_error_active", "Whether creation errors are being fanned out", u8::from(metrics.error_active).to_string()),
            ("resourcepool_utilization", "Pool utilization ratio", format!("{:.2}", metrics.utilization)),
        ];
        let counters: [(&str, &str, u64); 7] = [
            ("resourcepool_soft_connects_total", "Acquire calls", metrics.soft_connects),
            ("resourcepool_soft_disconnects_total", "Release calls", metrics.soft_disconnects),
            ("resourcepool_hard_connects_total", "Backing resources created", metrics.hard_connects),
            ("resourcepool_hard_disconnects_total", "Backing resources destroyed", metrics.hard_disconnects),
            ("resourcepool_reclaimed_total", "Abandoned objects reclaimed", metrics.reclaimed_objects),
            ("resourcepool_timeouts_total", "Acquire calls that timed out", metrics.timeouts),
            ("resourcepool_creation_failures_total", "Failed creations", metrics.creation_failures),
        ];

        let mut output = String::new();
        for (name, help, value) in gauges {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} gauge");
            let _ = writeln!(output, "{name}{{{labels}}} {value}");
        }
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} counter");
            let _ = writeln!(output, "{name}{{{labels}}} {value}");
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

/// Counters the pool updates as objects move around
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub soft_connects: AtomicU64,
    pub soft_disconnects: AtomicU64,
    pub hard_connects: AtomicU64,
    pub hard_disconnects: AtomicU64,
    pub free_objects: AtomicI64,
    pub pooled_objects: AtomicI64,
    pub stasis_objects: AtomicI64,
    pub reclaimed_objects: AtomicU64,
    pub timeouts: AtomicU64,
    pub creation_failures: AtomicU64,
}

/// Pool-level values that are not counters
pub(crate) struct PoolGauges {
    pub total_objects: usize,
    pub waiting_requests: usize,
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub error_active: bool,
    pub next_error_wait_ms: u64,
}

impl PoolCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn adjust(gauge: &AtomicI64, delta: i64) {
        gauge.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn snapshot(&self, gauges: PoolGauges) -> PoolMetrics {
        let free_objects = self.free_objects.load(Ordering::Relaxed);
        let stasis_objects = self.stasis_objects.load(Ordering::Relaxed);
        let idle = (free_objects.max(0) + stasis_objects.max(0)) as usize;
        let active = gauges.total_objects.saturating_sub(idle);
        let utilization = if gauges.max_pool_size > 0 {
            active as f64 / gauges.max_pool_size as f64
        } else {
            0.0
        };

        PoolMetrics {
            soft_connects: self.soft_connects.load(Ordering::Relaxed),
            soft_disconnects: self.soft_disconnects.load(Ordering::Relaxed),
            hard_connects: self.hard_connects.load(Ordering::Relaxed),
            hard_disconnects: self.hard_disconnects.load(Ordering::Relaxed),
            free_objects,
            pooled_objects: self.pooled_objects.load(Ordering::Relaxed),
            stasis_objects,
            reclaimed_objects: self.reclaimed_objects.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            total_objects: gauges.total_objects,
            waiting_requests: gauges.waiting_requests,
            min_pool_size: gauges.min_pool_size,
            max_pool_size: gauges.max_pool_size,
            error_active: gauges.error_active,
            next_error_wait_ms: gauges.next_error_wait_ms,
            utilization,
        }
    }
}
