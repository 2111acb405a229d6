//! Resource pool orchestration
//!
//! Callers block in [`Pool::acquire`] on a single wait that yields, in order of
//! preference, an idle object, the stored creation error, or the permit to
//! create a new object. Released objects go back to the generational free
//! stacks, to the list of the transaction they are enlisted in, or into
//! stasis. Replenishment, deferred deactivation and timers run on the worker
//! runtime, never on a caller's request path.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::PoolConfiguration;
use crate::error_backoff::{ErrorBackoff, ErrorState};
use crate::errors::{PoolError, PoolResult};
use crate::eviction::random_cleanup_interval;
use crate::factory::ResourceFactory;
use crate::free_stack::FreeStack;
use crate::health::HealthStatus;
use crate::metrics::{MetricsExporter, PoolCounters, PoolGauges, PoolMetrics};
use crate::object::{PooledObject, Resource};
use crate::reclaim_queue::DeferredReclaimQueue;
use crate::transacted::TransactedPool;
use crate::transaction::{Transaction, TransactionId, TransactionSource};
use crate::wait::{CreatePermit, WaitCoordinator, WaitOutcome};

/// Lifecycle of a pool; `ShuttingDown` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Initializing,
    Running,
    ShuttingDown,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PoolState::Initializing,
            1 => PoolState::Running,
            _ => PoolState::ShuttingDown,
        }
    }
}

type OwnerRef = Weak<dyn Any + Send + Sync>;

fn owner_ref<O: Send + Sync + 'static>(owner: &Arc<O>) -> OwnerRef {
    let owner: Arc<dyn Any + Send + Sync> = owner.clone();
    Arc::downgrade(&owner)
}

/// Runtime that background work is spawned on
struct Workers {
    handle: Handle,
    owned: Option<Runtime>,
}

impl Workers {
    fn new(handle: Option<Handle>) -> PoolResult<Self> {
        if let Some(handle) = handle.or_else(|| Handle::try_current().ok()) {
            return Ok(Self { handle, owned: None });
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("resourcepool-worker")
            .enable_all()
            .build()
            .map_err(|e| PoolError::Runtime(e.to_string()))?;
        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(runtime),
        })
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        if let Some(runtime) = self.owned.take() {
            runtime.shutdown_background();
        }
    }
}

/// Decrements the waiting-request count when the waiter leaves
struct WaitingRequest<'a>(&'a AtomicUsize);

impl<'a> WaitingRequest<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for WaitingRequest<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) struct PoolInner<R: Resource> {
    pub(crate) config: PoolConfiguration,
    factory: Box<dyn ResourceFactory<R>>,
    transactions: Option<Arc<dyn TransactionSource>>,
    state: AtomicU8,
    registry: DashMap<u64, Arc<PooledObject<R>>>,
    total_objects: AtomicUsize,
    waiting_requests: AtomicUsize,
    next_id: AtomicU64,
    pub(crate) new_stack: FreeStack<R>,
    pub(crate) old_stack: FreeStack<R>,
    transacted: TransactedPool<R>,
    reclaim_queue: Option<DeferredReclaimQueue<R>>,
    pub(crate) waiter: WaitCoordinator,
    backoff: ErrorBackoff,
    pub(crate) counters: PoolCounters,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
    workers: Workers,
}

/// Bounded pool of expensive, stateful resources.
///
/// Cloning a `Pool` yields another handle on the same pool.
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
///     .config(PoolConfiguration::new().with_max_pool_size(4))
///     .build()
///     .unwrap();
///
/// let owner = Arc::new(());
/// let conn = pool.acquire(&owner).unwrap().expect("pool has capacity");
/// pool.release(conn, &owner).unwrap();
/// assert_eq!(pool.free_count(), 1);
/// ```
pub struct Pool<R: Resource> {
    inner: Arc<PoolInner<R>>,
}

impl<R: Resource> Clone for Pool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Resource> fmt::Debug for Pool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("state", &self.inner.state())
            .field("total_objects", &self.inner.total_objects())
            .field("free", &self.inner.free_count())
            .field("transacted", &self.inner.transacted.len())
            .field("waiting", &self.inner.waiting_requests.load(Ordering::Relaxed))
            .finish()
    }
}

/// Builder for [`Pool`]
pub struct PoolBuilder<R: Resource> {
    factory: Box<dyn ResourceFactory<R>>,
    config: PoolConfiguration,
    transactions: Option<Arc<dyn TransactionSource>>,
    runtime: Option<Handle>,
}

impl<R: Resource> PoolBuilder<R> {
    pub fn config(mut self, config: PoolConfiguration) -> Self {
        self.config = config;
        self
    }

    /// Where the pool looks up the caller's ambient transaction
    pub fn transaction_source<S: TransactionSource>(mut self, source: S) -> Self {
        self.transactions = Some(Arc::new(source));
        self
    }

    /// Run background work on `handle` instead of the ambient or a private runtime
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Validate the configuration and start the pool
    pub fn build(self) -> PoolResult<Pool<R>> {
        let pool = Pool::from_parts(self.factory, self.config, self.transactions, self.runtime)?;
        pool.start();
        Ok(pool)
    }
}

impl<R: Resource> Pool<R> {
    pub fn builder<F: ResourceFactory<R>>(factory: F) -> PoolBuilder<R> {
        PoolBuilder {
            factory: Box::new(factory),
            config: PoolConfiguration::default(),
            transactions: None,
            runtime: None,
        }
    }

    /// Create a pool in the `Initializing` state; call [`Pool::start`] before use
    pub fn new<F: ResourceFactory<R>>(factory: F, config: PoolConfiguration) -> PoolResult<Self> {
        Self::from_parts(Box::new(factory), config, None, None)
    }

    fn from_parts(
        factory: Box<dyn ResourceFactory<R>>,
        config: PoolConfiguration,
        transactions: Option<Arc<dyn TransactionSource>>,
        runtime: Option<Handle>,
    ) -> PoolResult<Self> {
        config.validate()?;
        let workers = Workers::new(runtime)?;
        let reclaim_queue = config.use_deferred_reclaim.then(DeferredReclaimQueue::new);
        let backoff = ErrorBackoff::new(config.error_wait_initial, config.error_wait_max);

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                transactions,
                state: AtomicU8::new(PoolState::Initializing as u8),
                registry: DashMap::new(),
                total_objects: AtomicUsize::new(0),
                waiting_requests: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                new_stack: FreeStack::new(),
                old_stack: FreeStack::new(),
                transacted: TransactedPool::new(),
                reclaim_queue,
                waiter: WaitCoordinator::new(),
                backoff,
                counters: PoolCounters::new(),
                cleanup_task: Mutex::new(None),
                workers,
            }),
        })
    }

    /// Move to `Running`, start the cleanup timer and fill toward the minimum size
    pub fn start(&self) {
        self.inner.start();
    }

    pub fn state(&self) -> PoolState {
        self.inner.state()
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.inner.config
    }

    /// Acquire an object for `owner`, waiting up to the configured creation timeout.
    ///
    /// `Ok(None)` means no object became available in time. If `owner` is
    /// dropped without releasing the object, a reclamation scan returns the
    /// object to the pool.
    pub fn acquire<O: Send + Sync + 'static>(
        &self,
        owner: &Arc<O>,
    ) -> PoolResult<Option<Arc<PooledObject<R>>>> {
        self.inner.acquire(owner_ref(owner), self.inner.config.creation_timeout)
    }

    /// Like [`Pool::acquire`] with an explicit wait bound
    pub fn acquire_timeout<O: Send + Sync + 'static>(
        &self,
        owner: &Arc<O>,
        timeout: Duration,
    ) -> PoolResult<Option<Arc<PooledObject<R>>>> {
        self.inner.acquire(owner_ref(owner), timeout)
    }

    /// Acquire an object, reporting exhaustion as [`PoolError::Timeout`]
    pub fn get<O: Send + Sync + 'static>(&self, owner: &Arc<O>) -> PoolResult<Arc<PooledObject<R>>> {
        let timeout = self.inner.config.creation_timeout;
        self.inner
            .acquire(owner_ref(owner), timeout)?
            .ok_or(PoolError::Timeout(timeout))
    }

    /// Acquire on the blocking thread pool of the current runtime
    pub async fn acquire_async<O: Send + Sync + 'static>(
        &self,
        owner: Arc<O>,
    ) -> PoolResult<Option<Arc<PooledObject<R>>>> {
        let inner = Arc::clone(&self.inner);
        let timeout = inner.config.creation_timeout;
        tokio::task::spawn_blocking(move || inner.acquire(owner_ref(&owner), timeout))
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    /// Give a checked-out object back to the pool
    pub fn release<O: Send + Sync + 'static>(
        &self,
        object: Arc<PooledObject<R>>,
        owner: &Arc<O>,
    ) -> PoolResult<()> {
        self.inner.release(object, owner)
    }

    /// Notify the pool that `transaction` ended for `object`
    pub fn transaction_ended(&self, transaction: &Arc<dyn Transaction>, object: &Arc<PooledObject<R>>) {
        self.inner.transaction_ended(transaction, object);
    }

    /// Notify the pool that `transaction` ended for every object enlisted in it
    pub fn complete_transaction(&self, transaction: &Arc<dyn Transaction>) {
        let id = transaction.id();
        let enlisted: Vec<_> = self
            .inner
            .live_objects()
            .into_iter()
            .filter(|object| {
                object
                    .enlisted_transaction()
                    .is_some_and(|tx| tx.id() == id)
            })
            .collect();
        for object in &enlisted {
            self.inner.transaction_ended(transaction, object);
        }
        self.inner.transacted.discard_if_empty(id);
    }

    /// Recover objects whose owners went away without releasing them
    pub fn reclaim_emancipated(&self) -> bool {
        self.inner.reclaim_emancipated()
    }

    /// Doom every object, destroying the idle ones now and the rest on return
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Stop accepting acquisitions and cancel the pool's timers.
    ///
    /// Checked-out objects stay valid; releasing them destroys them.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn total_objects(&self) -> usize {
        self.inner.total_objects()
    }

    /// Idle objects on the general free stacks
    pub fn free_count(&self) -> usize {
        self.inner.free_count()
    }

    pub fn waiting_requests(&self) -> usize {
        self.inner.waiting_requests.load(Ordering::Acquire)
    }

    pub fn error_state(&self) -> ErrorState {
        self.inner.backoff.state()
    }

    /// Backoff the next creation failure will wait
    pub fn next_error_wait(&self) -> Duration {
        self.inner.backoff.next_wait()
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics()
    }

    pub fn health_status(&self) -> HealthStatus {
        HealthStatus::from_metrics(&self.inner.metrics())
    }

    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.inner.metrics().export()
    }

    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        MetricsExporter::export_prometheus(&self.inner.metrics(), pool_name, tags)
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<PoolInner<R>> {
        &self.inner
    }
}

impl<R: Resource> PoolInner<R> {
    pub(crate) fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    pub(crate) fn total_objects(&self) -> usize {
        self.total_objects.load(Ordering::Acquire)
    }

    fn free_count(&self) -> usize {
        self.new_stack.len() + self.old_stack.len()
    }

    fn live_objects(&self) -> Vec<Arc<PooledObject<R>>> {
        self.registry
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn metrics(&self) -> PoolMetrics {
        self.counters.snapshot(PoolGauges {
            total_objects: self.total_objects(),
            waiting_requests: self.waiting_requests.load(Ordering::Acquire),
            min_pool_size: self.config.min_pool_size,
            max_pool_size: self.config.max_pool_size,
            error_active: self.backoff.state() == ErrorState::ErrorSet,
            next_error_wait_ms: self.backoff.next_wait().as_millis() as u64,
        })
    }

    fn start(self: &Arc<Self>) {
        let started = self.state.compare_exchange(
            PoolState::Initializing as u8,
            PoolState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if started.is_err() {
            return;
        }

        let interval = self
            .config
            .cleanup_interval
            .unwrap_or_else(random_cleanup_interval);
        let pool = Arc::downgrade(self);
        let task = self.workers.handle.spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else { break };
                if tokio::task::spawn_blocking(move || pool.cleanup()).await.is_err() {
                    break;
                }
            }
        });
        *self.cleanup_task.lock() = Some(task);

        tracing::info!(
            min = self.config.min_pool_size,
            max = self.config.max_pool_size,
            cleanup_interval_ms = interval.as_millis() as u64,
            "resource pool started"
        );
        if self.config.min_pool_size > 0 {
            self.queue_replenishment();
        }
    }

    fn acquire(
        self: &Arc<Self>,
        owner: OwnerRef,
        timeout: Duration,
    ) -> PoolResult<Option<Arc<PooledObject<R>>>> {
        PoolCounters::bump(&self.counters.soft_connects);
        if !self.is_running() {
            return Err(PoolError::PoolUnavailable);
        }

        let transaction = if self.config.transaction_affinity {
            self.transactions.as_ref().and_then(|source| source.current())
        } else {
            None
        };

        let transacted = match &transaction {
            Some(tx) => {
                self.transacted.begin(tx);
                self.take_transacted(tx.id())
            }
            None => None,
        };
        let object = match transacted {
            Some(object) => object,
            None => match self.wait_for_object(timeout)? {
                Some(object) => object,
                None => return Ok(None),
            },
        };

        // enlist together with checkout so a transaction end during activation sees it
        {
            let mut state = object.lock_state();
            debug_assert!(!state.checked_out, "object {} handed out twice", object.id());
            state.checked_out = true;
            state.owner = Some(owner);
            if let Some(tx) = &transaction {
                state.enlisted = Some(Arc::clone(tx));
            }
        }

        if let Err(err) = object.resource().activate(transaction.as_ref()) {
            tracing::warn!(object = object.id(), error = %err, "activation failed, returning object");
            {
                let mut state = object.lock_state();
                state.check_in();
                if transaction.is_some() {
                    state.enlisted = None;
                }
            }
            self.deactivate_object(object);
            return Err(PoolError::ActivationFailed(Arc::from(err)));
        }

        tracing::trace!(object = object.id(), "object acquired");
        Ok(Some(object))
    }

    fn wait_for_object(self: &Arc<Self>, timeout: Duration) -> PoolResult<Option<Arc<PooledObject<R>>>> {
        let _waiting = WaitingRequest::enter(&self.waiting_requests);
        let start = Instant::now();
        let mut allow_create = true;

        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            match self.waiter.wait(remaining, allow_create) {
                WaitOutcome::FreeObjectAvailable => match self.pop_general() {
                    Some(object) if self.is_reusable(&object) => return Ok(Some(object)),
                    // doomed or expired while idle
                    Some(object) => self.retire_object(&object),
                    // the object behind this unit was destroyed by a clear
                    None => continue,
                },
                WaitOutcome::ErrorSignaled => match self.backoff.error() {
                    Some(error) => return Err(error),
                    // the backoff expired between the wait and the lookup
                    None => continue,
                },
                WaitOutcome::CreatePermissionGranted => {
                    let created = {
                        let _permit = CreatePermit::assume_held(&self.waiter);
                        self.user_create()
                    };
                    match created? {
                        Some(object) => return Ok(Some(object)),
                        None => {
                            if !self.config.has_capacity_for(self.total_objects()) {
                                allow_create = false;
                            }
                        }
                    }
                }
                WaitOutcome::TimedOut => {
                    PoolCounters::bump(&self.counters.timeouts);
                    tracing::trace!(timeout_ms = timeout.as_millis() as u64, "acquire timed out");
                    return Ok(None);
                }
            }
        }
    }

    /// Most recent reusable object parked for `tx`
    fn take_transacted(self: &Arc<Self>, tx: TransactionId) -> Option<Arc<PooledObject<R>>> {
        while let Some(object) = self.transacted.take(tx) {
            PoolCounters::adjust(&self.counters.free_objects, -1);
            if self.is_reusable(&object) {
                return Some(object);
            }
            self.retire_object(&object);
        }
        None
    }

    fn retire_object(self: &Arc<Self>, object: &Arc<PooledObject<R>>) {
        self.destroy_object(object);
        self.queue_replenishment();
    }

    fn pop_general(&self) -> Option<Arc<PooledObject<R>>> {
        let object = self.new_stack.pop().or_else(|| self.old_stack.pop())?;
        PoolCounters::adjust(&self.counters.free_objects, -1);
        Some(object)
    }

    /// Create an object for a waiting caller, or recycle abandoned ones instead
    fn user_create(self: &Arc<Self>) -> PoolResult<Option<Arc<PooledObject<R>>>> {
        if let Some(error) = self.backoff.error() {
            return Err(error);
        }
        let total = self.total_objects();
        if !self.config.has_capacity_for(total) {
            return Ok(None);
        }
        // every other attempt recycles abandoned objects before growing
        if total % 2 == 1 && self.reclaim_emancipated() {
            return Ok(None);
        }
        self.create_object().map(Some)
    }

    fn create_object(self: &Arc<Self>) -> PoolResult<Arc<PooledObject<R>>> {
        match self.factory.create(&self.config) {
            Ok(resource) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let object = Arc::new(PooledObject::new(id, resource));
                self.registry.insert(id, Arc::clone(&object));
                let total = self.total_objects.fetch_add(1, Ordering::AcqRel) + 1;
                PoolCounters::bump(&self.counters.hard_connects);
                PoolCounters::adjust(&self.counters.pooled_objects, 1);
                self.backoff.record_success();
                tracing::debug!(object = id, total, "created pooled object");
                Ok(object)
            }
            Err(err) => {
                let error = PoolError::CreationFailed(Arc::from(err));
                self.enter_error_state(error.clone());
                Err(error)
            }
        }
    }

    fn enter_error_state(self: &Arc<Self>, error: PoolError) {
        PoolCounters::bump(&self.counters.creation_failures);
        let wait = self.backoff.record_failure(error.clone());
        self.waiter.set_error();
        tracing::warn!(error = %error, backoff_ms = wait.as_millis() as u64, "resource creation failed");

        let pool = Arc::downgrade(self);
        let timer = self.workers.handle.spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(pool) = pool.upgrade() {
                pool.leave_error_state();
            }
        });
        self.backoff.replace_timer(timer);
    }

    fn leave_error_state(&self) {
        self.backoff.clear();
        self.waiter.clear_error();
        tracing::debug!("creation error backoff elapsed");
    }

    fn release<O: Send + Sync + 'static>(
        self: &Arc<Self>,
        object: Arc<PooledObject<R>>,
        owner: &Arc<O>,
    ) -> PoolResult<()> {
        PoolCounters::bump(&self.counters.soft_disconnects);
        {
            let mut state = object.lock_state();
            if !state.checked_out {
                return Err(PoolError::Internal(format!(
                    "object {} released while not checked out",
                    object.id()
                )));
            }
            let by_owner = state
                .owner
                .as_ref()
                .is_some_and(|o| std::ptr::addr_eq(o.as_ptr(), Arc::as_ptr(owner)));
            if !by_owner {
                tracing::warn!(object = object.id(), "object released by a caller other than its owner");
            }
            state.check_in();
        }
        tracing::trace!(object = object.id(), "object released");

        match &self.reclaim_queue {
            Some(queue) => {
                if queue.enqueue(object) {
                    self.schedule_reclaim_drain();
                }
            }
            None => self.deactivate_object(object),
        }
        Ok(())
    }

    fn schedule_reclaim_drain(self: &Arc<Self>) {
        let pool = Arc::downgrade(self);
        self.workers.handle.spawn_blocking(move || {
            if let Some(pool) = pool.upgrade()
                && let Some(queue) = &pool.reclaim_queue
            {
                queue.drain(|object| pool.deactivate_object(object));
            }
        });
    }

    /// Route a checked-in object to stasis, its transaction's list, the free
    /// stack, or destruction
    pub(crate) fn deactivate_object(self: &Arc<Self>, object: Arc<PooledObject<R>>) {
        object.resource().deactivate();

        if !(self.is_running() && self.is_reusable(&object)) {
            self.retire_object(&object);
            return;
        }

        let mut state = object.lock_state();
        if object.resource().is_non_poolable_transaction_root() {
            state.in_stasis = true;
            drop(state);
            PoolCounters::adjust(&self.counters.stasis_objects, 1);
            tracing::trace!(object = object.id(), "object held in stasis");
            return;
        }

        match state.enlisted.clone() {
            Some(tx) => {
                // the list exists from enlistment until the transaction ends
                let parked = self.transacted.put(tx.id(), Arc::clone(&object));
                if !parked {
                    state.enlisted = None;
                }
                drop(state);
                if parked {
                    PoolCounters::adjust(&self.counters.free_objects, 1);
                    tracing::trace!(object = object.id(), transaction = %tx.id(), "object parked for transaction");
                } else {
                    self.put_new_object(object);
                }
            }
            None => {
                drop(state);
                self.put_new_object(object);
            }
        }
    }

    pub(crate) fn put_new_object(&self, object: Arc<PooledObject<R>>) {
        self.new_stack.push(object);
        PoolCounters::adjust(&self.counters.free_objects, 1);
        self.waiter.signal_free(1);
    }

    pub(crate) fn destroy_object(&self, object: &Arc<PooledObject<R>>) {
        {
            let mut state = object.lock_state();
            debug_assert!(!state.destroyed, "object {} destroyed twice", object.id());
            if state.destroyed {
                tracing::error!(object = object.id(), "object destroyed twice");
                return;
            }
            state.destroyed = true;
            state.doomed = true;
            if std::mem::take(&mut state.in_stasis) {
                PoolCounters::adjust(&self.counters.stasis_objects, -1);
            }
        }

        if self.registry.remove(&object.id()).is_some() {
            self.total_objects.fetch_sub(1, Ordering::AcqRel);
            PoolCounters::adjust(&self.counters.pooled_objects, -1);
        } else {
            tracing::error!(object = object.id(), "destroyed object was not registered");
        }
        object.resource().close();
        PoolCounters::bump(&self.counters.hard_disconnects);
        tracing::debug!(object = object.id(), total = self.total_objects(), "destroyed pooled object");
    }

    fn transaction_ended(self: &Arc<Self>, transaction: &Arc<dyn Transaction>, object: &Arc<PooledObject<R>>) {
        let id = transaction.id();
        let was_in_stasis = {
            let mut state = object.lock_state();
            if state.enlisted.as_ref().is_some_and(|tx| tx.id() != id) {
                return;
            }
            state.enlisted = None;
            std::mem::take(&mut state.in_stasis)
        };

        if self.transacted.transaction_ended(id, object) {
            PoolCounters::adjust(&self.counters.free_objects, -1);
            self.put_object_from_transacted_pool(Arc::clone(object));
        } else if was_in_stasis {
            PoolCounters::adjust(&self.counters.stasis_objects, -1);
            self.put_object_from_transacted_pool(Arc::clone(object));
        }
    }

    fn put_object_from_transacted_pool(self: &Arc<Self>, object: Arc<PooledObject<R>>) {
        if self.is_running() && self.is_reusable(&object) {
            self.put_new_object(object);
        } else {
            self.retire_object(&object);
        }
    }

    pub(crate) fn reclaim_emancipated(self: &Arc<Self>) -> bool {
        let mut reclaimed = Vec::new();
        for object in self.live_objects() {
            let emancipated = match object.try_lock_state() {
                Some(mut state) if state.is_emancipated() => {
                    state.check_in();
                    true
                }
                _ => false,
            };
            if emancipated {
                reclaimed.push(object);
            }
        }

        let found = !reclaimed.is_empty();
        for object in reclaimed {
            PoolCounters::bump(&self.counters.reclaimed_objects);
            tracing::warn!(object = object.id(), "reclaimed object abandoned by its owner");
            self.deactivate_object(object);
        }
        found
    }

    pub(crate) fn queue_replenishment(self: &Arc<Self>) {
        if !self.is_running() || self.backoff.state() == ErrorState::ErrorSet {
            return;
        }
        let pool = Arc::downgrade(self);
        self.workers.handle.spawn_blocking(move || {
            if let Some(pool) = pool.upgrade() {
                pool.replenish();
            }
        });
    }

    fn needs_replenishment(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let total = self.total_objects();
        if !self.config.has_capacity_for(total) {
            return false;
        }
        if total < self.config.min_pool_size {
            return true;
        }
        let free = self.free_count();
        let waiting = self.waiting_requests.load(Ordering::Acquire);
        free < waiting || (free == waiting && total > 1)
    }

    fn replenish(self: &Arc<Self>) {
        if !self.is_running() || self.backoff.state() == ErrorState::ErrorSet {
            return;
        }
        self.reclaim_emancipated();
        if !self.needs_replenishment() {
            return;
        }
        if let Some(check) = self.config.identity_check
            && !check()
        {
            tracing::debug!("replenishment skipped: identity check failed");
            return;
        }
        if !self.waiter.acquire_create_permit(self.config.creation_timeout) {
            return;
        }
        let _permit = CreatePermit::assume_held(&self.waiter);

        let mut created = 0usize;
        while self.needs_replenishment() && self.backoff.state() == ErrorState::Normal {
            match self.create_object() {
                Ok(object) => {
                    self.put_new_object(object);
                    created += 1;
                }
                Err(_) => break,
            }
        }
        tracing::debug!(created, total = self.total_objects(), "replenishment pass finished");
    }

    fn clear(self: &Arc<Self>) {
        tracing::info!(total = self.total_objects(), "clearing pool");
        for object in self.live_objects() {
            object.doom();
        }
        for stack in [&self.new_stack, &self.old_stack] {
            while let Some(object) = stack.pop() {
                // a waiter may already hold this object's unit and will find the stacks empty
                self.waiter.try_claim_free();
                PoolCounters::adjust(&self.counters.free_objects, -1);
                self.destroy_object(&object);
            }
        }
        self.reclaim_emancipated();
        self.queue_replenishment();
    }

    fn shutdown(&self) {
        let previous = self.state.swap(PoolState::ShuttingDown as u8, Ordering::AcqRel);
        if PoolState::from_u8(previous) == PoolState::ShuttingDown {
            return;
        }
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
        self.backoff.cancel_timer();
        tracing::info!(total = self.total_objects(), "resource pool shut down");
    }
}

impl<R: Resource> Drop for PoolInner<R> {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.get_mut().take() {
            task.abort();
        }
        self.backoff.cancel_timer();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::errors::BoxError;
    use std::sync::atomic::AtomicBool;

    /// Resource with switchable behavior for pool tests
    #[derive(Default)]
    pub(crate) struct TestConn {
        pub fail_activation: AtomicBool,
        pub transaction_root: AtomicBool,
        pub non_poolable_root: AtomicBool,
        pub broken: AtomicBool,
        pub deactivations: AtomicUsize,
        pub closed: AtomicBool,
        /// Activation waits on this barrier twice when set
        pub activation_gate: Mutex<Option<Arc<std::sync::Barrier>>>,
    }

    impl Resource for TestConn {
        fn can_be_pooled(&self) -> bool {
            !self.broken.load(Ordering::SeqCst)
        }

        fn is_transaction_root(&self) -> bool {
            self.transaction_root.load(Ordering::SeqCst)
        }

        fn is_non_poolable_transaction_root(&self) -> bool {
            self.non_poolable_root.load(Ordering::SeqCst)
        }

        fn activate(&self, _transaction: Option<&Arc<dyn Transaction>>) -> Result<(), BoxError> {
            if self.fail_activation.swap(false, Ordering::SeqCst) {
                return Err("activation refused".into());
            }
            let gate = self.activation_gate.lock().clone();
            if let Some(gate) = gate {
                gate.wait();
                gate.wait();
            }
            Ok(())
        }

        fn deactivate(&self) {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn counting_pool(
        config: PoolConfiguration,
    ) -> (PoolBuilder<TestConn>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let builder = Pool::builder(move |_: &PoolConfiguration| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(TestConn::default())
        })
        .config(config.with_cleanup_interval(Duration::from_secs(3600)));
        (builder, created)
    }

    pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }
}
