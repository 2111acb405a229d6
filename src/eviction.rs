//! Periodic pruning and object lifetime
//!
//! Idle objects age through two generations. A cleanup pass retires the old
//! generation down to the minimum pool size, then promotes everything
//! released since the previous pass. An idle object therefore survives at
//! least one full interval and is gone by the end of the second.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::metrics::PoolCounters;
use crate::object::{PooledObject, Resource};
use crate::pool::PoolInner;

/// Cleanup interval when none is configured, spread over 2 to 4 minutes
pub(crate) fn random_cleanup_interval() -> Duration {
    Duration::from_secs(rand::rng().random_range(120..=240))
}

impl<R: Resource> PoolInner<R> {
    /// Whether `object` has outlived the load-balancing lifetime
    pub(crate) fn has_expired(&self, object: &PooledObject<R>) -> bool {
        self.config.use_load_balancing && object.age() > self.config.load_balance_timeout
    }

    /// Whether a checked-in object may go back into circulation
    pub(crate) fn is_reusable(&self, object: &PooledObject<R>) -> bool {
        object.can_be_pooled() && !self.has_expired(object)
    }

    pub(crate) fn cleanup(self: &Arc<Self>) {
        let mut destroyed = 0usize;
        let mut parked = 0usize;

        while self.total_objects() > self.config.min_pool_size {
            if !self.waiter.try_claim_free() {
                break;
            }
            let Some(object) = self.old_stack.pop() else {
                // the claimed unit belongs to an object on the new stack
                self.waiter.signal_free(1);
                break;
            };
            PoolCounters::adjust(&self.counters.free_objects, -1);

            if object.resource().is_transaction_root() {
                object.lock_state().in_stasis = true;
                PoolCounters::adjust(&self.counters.stasis_objects, 1);
                parked += 1;
            } else {
                self.destroy_object(&object);
                destroyed += 1;
            }
        }

        // the claimed unit stands for the object in transit between the stacks
        if self.waiter.try_claim_free() {
            while let Some(object) = self.new_stack.pop() {
                self.old_stack.push(object);
            }
            self.waiter.signal_free(1);
        }

        tracing::debug!(
            destroyed,
            parked,
            total = self.total_objects(),
            "cleanup pass finished"
        );
        self.queue_replenishment();
    }
}
