use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use latchless_pool::{FullAction, LockFreePool, PoolConfig, PoolEvent, PoolObserver, PruneAction};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Instances handed out concurrently are always distinct, and everything
/// checked out can be returned and seen again.
#[test]
fn concurrent_get_return_keeps_accounting_straight() {
    init_tracing();

    const THREADS: usize = 8;
    const ROUNDS: usize = 500;

    let next_id = Arc::new(AtomicUsize::new(0));
    let pool = Arc::new(LockFreePool::new(
        PoolConfig {
            initial_capacity: 4,
            max_capacity: 16,
            action_when_full: FullAction::Grow,
            action_when_pruning: PruneAction::Ignore,
        },
        {
            let next_id = next_id.clone();
            move || next_id.fetch_add(1, Ordering::Relaxed)
        },
    ));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    if let Some(item) = pool.get().unwrap() {
                        pool.return_item(item).unwrap();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.live, stats.available, "everything was returned");
    assert!(stats.live <= pool.max_capacity());
    assert_eq!(
        stats.created as usize,
        next_id.load(Ordering::Relaxed),
        "factory calls and created events agree"
    );
}

#[test]
fn events_are_broadcast_to_every_subscriber() {
    struct Tally(AtomicUsize);
    impl PoolObserver for Tally {
        fn on_event(&self, _event: PoolEvent) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    let pool = LockFreePool::new(PoolConfig::default(), || 0u8);
    let first = Arc::new(Tally(AtomicUsize::new(0)));
    let second = Arc::new(Tally(AtomicUsize::new(0)));
    pool.subscribe(first.clone());
    pool.subscribe(second.clone());

    let item = pool.get().unwrap().unwrap();
    pool.return_item(item).unwrap();

    // one Created and one Returned each
    assert_eq!(first.0.load(Ordering::Relaxed), 2);
    assert_eq!(second.0.load(Ordering::Relaxed), 2);
}

#[test]
fn reuse_bumps_the_pool_version() {
    let pool = LockFreePool::new(
        PoolConfig {
            initial_capacity: 1,
            max_capacity: 2,
            ..PoolConfig::default()
        },
        || 0u8,
    );
    let before = pool.version();
    let item = pool.get().unwrap().unwrap();
    assert!(pool.version() > before, "reuse counts as a modification");
    pool.return_item(item).unwrap();
}
