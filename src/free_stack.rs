//! Lock-protected LIFO of idle objects

use std::sync::Arc;

use parking_lot::Mutex;

use crate::object::{PooledObject, Resource};

/// Idle objects of one generation.
///
/// An object enters by value and leaves by value, so it can only be on one
/// stack at a time as long as callers move it rather than clone it in.
pub(crate) struct FreeStack<R: Resource> {
    items: Mutex<Vec<Arc<PooledObject<R>>>>,
}

impl<R: Resource> FreeStack<R> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, object: Arc<PooledObject<R>>) {
        let mut items = self.items.lock();
        debug_assert!(
            !items.iter().any(|o| Arc::ptr_eq(o, &object)),
            "object {} pushed twice onto a free stack",
            object.id()
        );
        items.push(object);
    }

    pub fn pop(&self) -> Option<Arc<PooledObject<R>>> {
        self.items.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[cfg(test)]
    pub fn contains(&self, object: &Arc<PooledObject<R>>) -> bool {
        self.items.lock().iter().any(|o| Arc::ptr_eq(o, object))
    }
}
