// EsoxSolutions.ResourcePool
// Bounded pool for expensive stateful resources
// Version 1.0.0

// Small demo binary; the library lives in lib.rs.
// Set RUST_LOG=esox_resourcepool=debug to watch the pool work.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use esox_resourcepool::{BoxError, Pool, PoolConfiguration, Resource};
use tracing_subscriber::EnvFilter;

struct DemoConnection {
    serial: usize,
}

impl Resource for DemoConnection {
    fn close(&self) {
        tracing::info!(serial = self.serial, "connection closed");
    }
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== EsoxSolutions.ResourcePool v1.0.0 ===");

    let serials = AtomicUsize::new(0);
    let pool = Pool::builder(move |_: &PoolConfiguration| {
        thread::sleep(Duration::from_millis(20));
        Ok::<_, BoxError>(DemoConnection {
            serial: serials.fetch_add(1, Ordering::Relaxed),
        })
    })
    .config(
        PoolConfiguration::new()
            .with_min_pool_size(2)
            .with_max_pool_size(4)
            .with_creation_timeout(Duration::from_secs(2)),
    )
    .build()?;

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let pool = pool.clone();
            thread::spawn(move || -> Result<(), BoxError> {
                let owner = Arc::new(worker);
                let conn = pool.get(&owner)?;
                println!("  worker {worker} got connection {}", conn.serial);
                thread::sleep(Duration::from_millis(50));
                pool.release(conn, &owner)?;
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        if let Ok(Err(err)) = worker.join() {
            eprintln!("  worker failed: {err}");
        }
    }

    let health = pool.health_status();
    println!();
    println!("Total objects: {}", pool.total_objects());
    println!("Idle objects:  {}", pool.free_count());
    println!("Healthy:       {}", health.is_healthy());
    println!();
    print!("{}", pool.export_metrics_prometheus("demo", None));

    pool.shutdown();
    Ok(())
}
