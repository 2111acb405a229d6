//! Deferred deactivation of released objects

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::queue::SegQueue;

use crate::object::{PooledObject, Resource};

/// Released objects waiting to be deactivated off the caller's thread.
///
/// Bursts of releases are coalesced: only the enqueue that finds no drain
/// scheduled asks for one.
pub(crate) struct DeferredReclaimQueue<R: Resource> {
    queue: SegQueue<Arc<PooledObject<R>>>,
    drain_scheduled: AtomicBool,
}

impl<R: Resource> DeferredReclaimQueue<R> {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            drain_scheduled: AtomicBool::new(false),
        }
    }

    /// Queue `object`; returns `true` when the caller must schedule a drain
    pub fn enqueue(&self, object: Arc<PooledObject<R>>) -> bool {
        self.queue.push(object);
        !self.drain_scheduled.swap(true, Ordering::SeqCst)
    }

    /// Hand every queued object to `deactivate` until the queue stays empty
    pub fn drain(&self, mut deactivate: impl FnMut(Arc<PooledObject<R>>)) {
        loop {
            while let Some(object) = self.queue.pop() {
                deactivate(object);
            }
            self.drain_scheduled.store(false, Ordering::SeqCst);
            // an enqueue between the last pop and the store saw the flag set
            if self.queue.is_empty() || self.drain_scheduled.swap(true, Ordering::SeqCst) {
                return;
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
