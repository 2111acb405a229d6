//! Per-transaction lists of idle objects

use std::sync::Arc;

use dashmap::DashMap;

use crate::object::{PooledObject, Resource};
use crate::transaction::{Transaction, TransactionId};

struct TransactedList<R: Resource> {
    /// Clone owned by the pool, disposed when the list goes away
    handle: Arc<dyn Transaction>,
    objects: Vec<Arc<PooledObject<R>>>,
}

/// Idle objects still enlisted in a live transaction, keyed by transaction.
///
/// A list exists from the first enlistment of its transaction until the last
/// member leaves. All operations tolerate the list having vanished
/// concurrently.
pub(crate) struct TransactedPool<R: Resource> {
    lists: DashMap<TransactionId, TransactedList<R>>,
}

impl<R: Resource> TransactedPool<R> {
    pub fn new() -> Self {
        Self {
            lists: DashMap::new(),
        }
    }

    /// Most recently parked object of `tx`, if any
    pub fn take(&self, tx: TransactionId) -> Option<Arc<PooledObject<R>>> {
        self.lists.get_mut(&tx).and_then(|mut list| list.objects.pop())
    }

    /// Park `object` on the list of `tx`.
    ///
    /// Returns `false` when the list no longer exists; the caller keeps
    /// responsibility for the object.
    pub fn put(&self, tx: TransactionId, object: Arc<PooledObject<R>>) -> bool {
        match self.lists.get_mut(&tx) {
            Some(mut list) => {
                debug_assert!(
                    !list.objects.iter().any(|o| Arc::ptr_eq(o, &object)),
                    "object {} already parked for {}",
                    object.id(),
                    tx
                );
                list.objects.push(object);
                true
            }
            None => false,
        }
    }

    /// Make sure a list exists for `tx`
    pub fn begin(&self, tx: &Arc<dyn Transaction>) {
        self.lists
            .entry(tx.id())
            .or_insert_with(|| TransactedList {
                handle: tx.clone_handle(),
                objects: Vec::new(),
            });
    }

    /// Remove `object` from the list of `tx`, dropping the list once empty.
    ///
    /// Returns whether the object was found.
    pub fn transaction_ended(&self, tx: TransactionId, object: &Arc<PooledObject<R>>) -> bool {
        let (found, now_empty) = match self.lists.get_mut(&tx) {
            Some(mut list) => {
                let position = list.objects.iter().position(|o| Arc::ptr_eq(o, object));
                if let Some(position) = position {
                    list.objects.remove(position);
                }
                (position.is_some(), list.objects.is_empty())
            }
            None => (false, false),
        };

        if now_empty {
            self.discard_if_empty(tx);
        }
        found
    }

    /// Drop the list of `tx` and dispose its handle if nothing is parked on it
    pub fn discard_if_empty(&self, tx: TransactionId) {
        if let Some((_, list)) = self.lists.remove_if(&tx, |_, list| list.objects.is_empty()) {
            list.handle.dispose();
        }
    }

    /// Number of objects parked across all transactions
    pub fn len(&self) -> usize {
        self.lists.iter().map(|list| list.objects.len()).sum()
    }

    #[cfg(test)]
    pub fn has_list(&self, tx: TransactionId) -> bool {
        self.lists.contains_key(&tx)
    }

    #[cfg(test)]
    pub fn contains(&self, object: &Arc<PooledObject<R>>) -> bool {
        self.lists
            .iter()
            .any(|list| list.objects.iter().any(|o| Arc::ptr_eq(o, object)))
    }
}
