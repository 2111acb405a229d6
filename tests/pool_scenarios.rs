use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use esox_resourcepool::{
    BoxError, ErrorState, Pool, PoolConfiguration, PoolError, PoolState, Resource, Transaction,
    TransactionId,
};

struct Conn {
    serial: usize,
    closed: AtomicBool,
}

impl Resource for Conn {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn counting_factory(
    created: Arc<AtomicUsize>,
) -> impl Fn(&PoolConfiguration) -> Result<Conn, BoxError> + Send + Sync + 'static {
    move |_: &PoolConfiguration| {
        let serial = created.fetch_add(1, Ordering::SeqCst);
        Ok(Conn {
            serial,
            closed: AtomicBool::new(false),
        })
    }
}

fn base_config() -> PoolConfiguration {
    PoolConfiguration::new().with_cleanup_interval(Duration::from_secs(3600))
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

struct Tx(u64);

impl Transaction for Tx {
    fn id(&self) -> TransactionId {
        TransactionId(self.0)
    }

    fn clone_handle(&self) -> Arc<dyn Transaction> {
        Arc::new(Tx(self.0))
    }
}

#[test]
fn test_never_exceeds_max_under_contention() {
    let created = Arc::new(AtomicUsize::new(0));
    let pool = Pool::builder(counting_factory(Arc::clone(&created)))
        .config(base_config().with_max_pool_size(4))
        .build()
        .unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                let owner = Arc::new(());
                for _ in 0..50 {
                    let conn = pool.get(&owner).unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(pool.total_objects() <= 4);
                    active.fetch_sub(1, Ordering::SeqCst);
                    pool.release(conn, &owner).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(created.load(Ordering::SeqCst) <= 4);
    assert_eq!(pool.free_count(), pool.total_objects());
    assert_eq!(pool.waiting_requests(), 0);
}

#[test]
fn test_sixth_caller_times_out_at_capacity() {
    let created = Arc::new(AtomicUsize::new(0));
    let pool = Pool::builder(counting_factory(Arc::clone(&created)))
        .config(base_config().with_min_pool_size(2).with_max_pool_size(5))
        .build()
        .unwrap();
    assert!(wait_until(|| pool.free_count() == 2));

    let start = Arc::new(Barrier::new(6));
    let done = Arc::new(Barrier::new(6));
    let acquired = Arc::new(AtomicUsize::new(0));
    let holders: Vec<_> = (0..5)
        .map(|_| {
            let pool = pool.clone();
            let start = Arc::clone(&start);
            let done = Arc::clone(&done);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let owner = Arc::new(());
                start.wait();
                let conn = pool.get(&owner).unwrap();
                acquired.fetch_add(1, Ordering::SeqCst);
                done.wait();
                pool.release(conn, &owner).unwrap();
            })
        })
        .collect();

    start.wait();
    assert!(wait_until(|| acquired.load(Ordering::SeqCst) == 5));
    assert_eq!(created.load(Ordering::SeqCst), 5);

    let began = Instant::now();
    let sixth = pool
        .acquire_timeout(&Arc::new(()), Duration::from_millis(100))
        .unwrap();
    assert!(sixth.is_none());
    assert!(began.elapsed() >= Duration::from_millis(100));
    assert_eq!(created.load(Ordering::SeqCst), 5);
    assert_eq!(pool.metrics().timeouts, 1);

    done.wait();
    for holder in holders {
        holder.join().unwrap();
    }
    assert_eq!(pool.free_count(), 5);
}

#[test]
fn test_creation_error_fails_fast_with_backoff() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let pool = Pool::builder(move |_: &PoolConfiguration| -> Result<Conn, BoxError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err("connection refused".into())
    })
    .config(base_config().with_error_backoff(Duration::from_millis(500), Duration::from_secs(2)))
    .build()
    .unwrap();
    let owner = Arc::new(());

    let first = pool.acquire(&owner).unwrap_err();
    assert!(matches!(first, PoolError::CreationFailed(_)));
    assert_eq!(pool.error_state(), ErrorState::ErrorSet);
    assert_eq!(pool.next_error_wait(), Duration::from_secs(1));

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire(&Arc::new(())).unwrap_err())
        })
        .collect();
    for caller in callers {
        let error = caller.join().unwrap();
        assert!(Arc::ptr_eq(first.cause().unwrap(), error.cause().unwrap()));
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(!pool.health_status().is_healthy());

    assert!(wait_until(|| pool.error_state() == ErrorState::Normal));
    let second = pool.acquire(&owner).unwrap_err();
    assert!(!Arc::ptr_eq(first.cause().unwrap(), second.cause().unwrap()));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(pool.next_error_wait(), Duration::from_secs(2));

    assert!(wait_until(|| pool.error_state() == ErrorState::Normal));
    pool.acquire(&owner).unwrap_err();
    // capped
    assert_eq!(pool.next_error_wait(), Duration::from_secs(2));
    assert_eq!(pool.metrics().creation_failures, 3);
}

#[test]
fn test_shutdown_rejects_acquire_but_accepts_release() {
    let created = Arc::new(AtomicUsize::new(0));
    let pool = Pool::builder(counting_factory(created))
        .config(base_config())
        .build()
        .unwrap();
    let owner = Arc::new(());
    let conn = pool.get(&owner).unwrap();
    let held = Arc::clone(&conn);

    pool.shutdown();
    assert_eq!(pool.state(), PoolState::ShuttingDown);

    let began = Instant::now();
    assert!(matches!(pool.acquire(&owner), Err(PoolError::PoolUnavailable)));
    assert!(began.elapsed() < Duration::from_millis(100));

    pool.release(conn, &owner).unwrap();
    assert!(held.closed.load(Ordering::SeqCst));
    assert_eq!(pool.total_objects(), 0);

    // idempotent
    pool.shutdown();
}

#[test]
fn test_waiter_receives_released_object() {
    let created = Arc::new(AtomicUsize::new(0));
    let pool = Pool::builder(counting_factory(Arc::clone(&created)))
        .config(base_config().with_max_pool_size(1))
        .build()
        .unwrap();
    let owner = Arc::new(());
    let conn = pool.get(&owner).unwrap();
    let serial = conn.serial;

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let owner = Arc::new(());
            let conn = pool
                .acquire_timeout(&owner, Duration::from_secs(2))
                .unwrap()
                .expect("released object handed over");
            let serial = conn.serial;
            pool.release(conn, &owner).unwrap();
            serial
        })
    };

    assert!(wait_until(|| pool.waiting_requests() == 1));
    pool.release(conn, &owner).unwrap();
    assert_eq!(waiter.join().unwrap(), serial);
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[test]
fn test_replenishes_to_minimum() {
    let created = Arc::new(AtomicUsize::new(0));
    let pool = Pool::builder(counting_factory(Arc::clone(&created)))
        .config(base_config().with_min_pool_size(3).with_max_pool_size(10))
        .build()
        .unwrap();

    assert!(wait_until(|| pool.free_count() == 3));
    assert_eq!(pool.total_objects(), 3);
    assert_eq!(pool.metrics().hard_connects, 3);
}

#[test]
fn test_abandoned_object_is_reused() {
    let created = Arc::new(AtomicUsize::new(0));
    let pool = Pool::builder(counting_factory(Arc::clone(&created)))
        .config(base_config().with_max_pool_size(1))
        .build()
        .unwrap();

    let abandoned = {
        let owner = Arc::new(());
        pool.get(&owner).unwrap().serial
    };
    assert!(pool.reclaim_emancipated());

    let owner = Arc::new(());
    let conn = pool.get(&owner).unwrap();
    assert_eq!(conn.serial, abandoned);
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[test]
fn test_transaction_keeps_object_reserved() {
    let ambient: Arc<Mutex<Option<Arc<dyn Transaction>>>> = Arc::new(Mutex::new(None));
    let current = Arc::clone(&ambient);
    let created = Arc::new(AtomicUsize::new(0));
    let pool = Pool::builder(counting_factory(Arc::clone(&created)))
        .config(base_config().with_transaction_affinity(true))
        .transaction_source(move || current.lock().ok().and_then(|tx| tx.clone()))
        .build()
        .unwrap();
    let owner = Arc::new(());
    let tx: Arc<dyn Transaction> = Arc::new(Tx(42));

    *ambient.lock().unwrap() = Some(Arc::clone(&tx));
    let conn = pool.get(&owner).unwrap();
    let serial = conn.serial;
    pool.release(conn, &owner).unwrap();
    *ambient.lock().unwrap() = None;

    assert_eq!(pool.free_count(), 0);
    let outsider = pool.get(&owner).unwrap();
    assert_ne!(outsider.serial, serial);
    pool.release(outsider, &owner).unwrap();

    pool.complete_transaction(&tx);
    assert_eq!(pool.free_count(), 2);
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_acquire_shares_bounded_pool() {
    let created = Arc::new(AtomicUsize::new(0));
    let pool = Pool::builder(counting_factory(Arc::clone(&created)))
        .config(base_config().with_max_pool_size(2))
        .build()
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let owner = Arc::new(());
                let conn = pool
                    .acquire_async(Arc::clone(&owner))
                    .await
                    .unwrap()
                    .expect("object within creation timeout");
                tokio::time::sleep(Duration::from_millis(10)).await;
                pool.release(conn, &owner).unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert!(created.load(Ordering::SeqCst) <= 2);
    assert_eq!(pool.metrics().soft_connects, 8);
}
