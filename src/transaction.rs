//! Ambient transaction collaborators

use std::fmt;
use std::sync::Arc;

/// Identity of an ambient transaction, used to key transacted object lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Handle on an ambient transaction.
///
/// The pool clones the handle when it starts tracking a transaction and
/// disposes the clone once the last object enlisted in it leaves the pool, so
/// the lifetime of the pool's copy is independent of the caller's handle.
pub trait Transaction: Send + Sync + 'static {
    fn id(&self) -> TransactionId;

    /// Produce an independent handle on the same transaction
    fn clone_handle(&self) -> Arc<dyn Transaction>;

    /// Release whatever the handle holds
    fn dispose(&self) {}
}

impl fmt::Debug for dyn Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id()).finish()
    }
}

/// Lookup of the transaction the calling thread currently runs in
pub trait TransactionSource: Send + Sync + 'static {
    fn current(&self) -> Option<Arc<dyn Transaction>>;
}

impl<F> TransactionSource for F
where
    F: Fn() -> Option<Arc<dyn Transaction>> + Send + Sync + 'static,
{
    fn current(&self) -> Option<Arc<dyn Transaction>> {
        self()
    }
}
