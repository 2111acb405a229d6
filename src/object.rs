//! Pooled object wrapper and the capability contract of pooled resources

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::errors::BoxError;
use crate::transaction::Transaction;

/// Capability contract of a resource managed by the pool.
///
/// Hooks are called outside of every pool lock and may block.
pub trait Resource: Send + Sync + 'static {
    /// Whether the resource is still healthy enough to be reused
    fn can_be_pooled(&self) -> bool {
        true
    }

    /// Whether the resource owns a delegated transaction
    fn is_transaction_root(&self) -> bool {
        false
    }

    /// A transaction root that must be held aside until its transaction ends
    fn is_non_poolable_transaction_root(&self) -> bool {
        false
    }

    /// Prepare the resource for a caller, enlisting it in `transaction` if given
    fn activate(&self, _transaction: Option<&Arc<dyn Transaction>>) -> Result<(), BoxError> {
        Ok(())
    }

    /// Reset caller state; must be idempotent
    fn deactivate(&self) {}

    /// Tear down the backing resource
    fn close(&self) {}
}

/// Per-object state, guarded by the object's own lock
#[derive(Default)]
pub(crate) struct ObjectState {
    pub checked_out: bool,
    pub owner: Option<Weak<dyn Any + Send + Sync>>,
    pub in_stasis: bool,
    pub doomed: bool,
    pub destroyed: bool,
    pub enlisted: Option<Arc<dyn Transaction>>,
}

impl ObjectState {
    /// Checked out, but the owner has gone away without releasing it
    pub fn is_emancipated(&self) -> bool {
        self.checked_out
            && self
                .owner
                .as_ref()
                .is_none_or(|owner| owner.strong_count() == 0)
    }

    pub fn check_in(&mut self) {
        self.checked_out = false;
        self.owner = None;
    }
}

/// A resource tracked by the pool.
///
/// Handed out as `Arc<PooledObject<R>>`; the caller gives it back with
/// [`Pool::release`](crate::Pool::release). Dereferences to the resource.
pub struct PooledObject<R: Resource> {
    id: u64,
    created_at: Instant,
    resource: R,
    state: Mutex<ObjectState>,
}

impl<R: Resource> PooledObject<R> {
    pub(crate) fn new(id: u64, resource: R) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            resource,
            state: Mutex::new(ObjectState::default()),
        }
    }

    /// Stable identifier, for diagnostics
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Time since the backing resource was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Mark the object as unusable; it is destroyed instead of pooled when returned
    pub fn doom(&self) {
        self.state.lock().doomed = true;
    }

    pub fn is_doomed(&self) -> bool {
        self.state.lock().doomed
    }

    /// Whether the object may go back into circulation
    pub fn can_be_pooled(&self) -> bool {
        !self.state.lock().doomed && self.resource.can_be_pooled()
    }

    pub fn is_emancipated(&self) -> bool {
        self.state.lock().is_emancipated()
    }

    pub fn is_in_stasis(&self) -> bool {
        self.state.lock().in_stasis
    }

    /// Transaction the object is currently enlisted in
    pub fn enlisted_transaction(&self) -> Option<Arc<dyn Transaction>> {
        self.state.lock().enlisted.clone()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ObjectState> {
        self.state.lock()
    }

    pub(crate) fn try_lock_state(&self) -> Option<MutexGuard<'_, ObjectState>> {
        self.state.try_lock()
    }
}

impl<R: Resource> Deref for PooledObject<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<R: Resource> fmt::Debug for PooledObject<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PooledObject")
            .field("id", &self.id)
            .field("checked_out", &state.checked_out)
            .field("in_stasis", &state.in_stasis)
            .field("doomed", &state.doomed)
            .field("enlisted", &state.enlisted.as_ref().map(|tx| tx.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;
    impl Resource for Plain {}

    #[test]
    fn test_emancipation_follows_owner() {
        let object = PooledObject::new(1, Plain);
        let owner: Arc<dyn Any + Send + Sync> = Arc::new(());
        {
            let mut state = object.lock_state();
            state.checked_out = true;
            state.owner = Some(Arc::downgrade(&owner));
        }
        assert!(!object.is_emancipated());

        drop(owner);
        assert!(object.is_emancipated());

        object.lock_state().check_in();
        assert!(!object.is_emancipated());
    }

    #[test]
    fn test_doom() {
        let object = PooledObject::new(2, Plain);
        assert!(object.can_be_pooled());
        object.doom();
        assert!(object.is_doomed());
        assert!(!object.can_be_pooled());
    }
}
