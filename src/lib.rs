//! # EsoxSolutions.ResourcePool
//!
//! Bounded, thread-safe pool for expensive stateful resources such as
//! database connections.
//!
//! ## Features
//!
//! - Blocking acquire with a bounded wait, plus an async wrapper
//! - Serialized creation with fail-fast error backoff
//! - Transaction affinity: idle objects stay reserved for their transaction
//! - Generational pruning down to a minimum pool size
//! - Background replenishment and optional deferred deactivation
//! - Reclamation of objects abandoned by their owners
//! - Health monitoring and metrics, with Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_resourcepool::{BoxError, Pool, PoolConfiguration, Resource};
//! use std::sync::Arc;
//!
//! struct Connection {
//!     dsn: String,
//! }
//!
//! impl Resource for Connection {}
//!
//! let config = PoolConfiguration::new()
//!     .with_min_pool_size(1)
//!     .with_max_pool_size(8);
//!
//! let pool = Pool::builder(|_: &PoolConfiguration| {
//!     Ok::<_, BoxError>(Connection { dsn: "db://local".to_string() })
//! })
//! .config(config)
//! .build()
//! .unwrap();
//!
//! let owner = Arc::new(());
//! let conn = pool.get(&owner).unwrap();
//! println!("connected to {}", conn.dsn);
//! pool.release(conn, &owner).unwrap();
//! ```

mod config;
mod error_backoff;
mod errors;
mod eviction;
mod factory;
mod free_stack;
mod health;
mod metrics;
mod object;
mod pool;
mod reclaim_queue;
mod transacted;
mod transaction;
mod wait;

pub use config::PoolConfiguration;
pub use error_backoff::ErrorState;
pub use errors::{BoxError, PoolError, PoolResult, SharedError};
pub use factory::ResourceFactory;
pub use health::HealthStatus;
pub use metrics::{MetricsExporter, PoolMetrics};
pub use object::{PooledObject, Resource};
pub use pool::{Pool, PoolBuilder, PoolState};
pub use transaction::{Transaction, TransactionId, TransactionSource};
