//! Resource creation collaborator

use crate::config::PoolConfiguration;
use crate::errors::BoxError;

/// Creates the backing resources a pool hands out.
///
/// The pool serializes calls: at most one `create` runs at a time per pool.
/// Failures are expected and feed the pool's error backoff.
///
/// Closures taking the pool configuration implement this trait:
///
/// ```
/// use esox_resourcepool::{BoxError, PoolConfiguration, ResourceFactory};
///
/// let factory = |_: &PoolConfiguration| Ok::<_, BoxError>(42u32);
/// assert_eq!(factory.create(&PoolConfiguration::default()).unwrap(), 42);
/// ```
pub trait ResourceFactory<R>: Send + Sync + 'static {
    fn create(&self, config: &PoolConfiguration) -> Result<R, BoxError>;
}

impl<R, F> ResourceFactory<R> for F
where
    F: Fn(&PoolConfiguration) -> Result<R, BoxError> + Send + Sync + 'static,
{
    fn create(&self, config: &PoolConfiguration) -> Result<R, BoxError> {
        self(config)
    }
}
