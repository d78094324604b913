//! Lock-free object pool layered on [`latchless_queue::LockFreeQueue`]
//!
//! Instances are created lazily through a factory up to a soft capacity,
//! recycled through the free list, and pruned or grown according to the
//! configured overflow policies. The pool broadcasts created/reused/
//! returned lifecycle events to subscribed observers; observer failures
//! are contained and never corrupt pool state.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use latchless_core::{LatchlessError, Result};
use latchless_queue::LockFreeQueue;

/// What to do when the pool is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FullAction {
    /// Raise the capacity to cover the new instance.
    Grow,
    /// Discard the oldest free instance to make room for the returned one.
    PopOldest,
    /// Discard the instance being returned.
    PopNewest,
    /// Silently refuse the overflow.
    Ignore,
    /// Fail the operation with `Exhausted`.
    Throw,
}

/// What to do with an instance returned to an already-full free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PruneAction {
    /// Leave overflow handling to the `FullAction` policy.
    Ignore,
    /// Drop the instance instead of recycling it.
    PruneToMax,
}

/// Pool construction parameters. The factory itself is passed separately
/// so the config stays serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Instances constructed up front.
    pub initial_capacity: usize,
    /// Soft cap on instances in existence; `FullAction::Grow` raises it.
    pub max_capacity: usize,
    pub action_when_full: FullAction,
    pub action_when_pruning: PruneAction,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 0,
            max_capacity: 64,
            action_when_full: FullAction::Grow,
            action_when_pruning: PruneAction::Ignore,
        }
    }
}

/// Lifecycle notifications broadcast to [`PoolObserver`]s. Best effort:
/// delivery is not part of the pool's correctness contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// A fresh instance came out of the factory.
    Created,
    /// A recycled instance was handed out.
    Reused,
    /// An instance re-entered the free list.
    Returned,
}

/// Subscriber interface for pool lifecycle events, invoked synchronously
/// from the mutating thread.
pub trait PoolObserver: Send + Sync {
    fn on_event(&self, event: PoolEvent);
}

/// Counter snapshot for metrics consumers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub returned: u64,
    pub pruned: u64,
    pub live: usize,
    pub available: usize,
    pub max_capacity: usize,
}

#[derive(Debug, Default)]
struct EventCounters {
    created: AtomicU64,
    reused: AtomicU64,
    returned: AtomicU64,
    pruned: AtomicU64,
}

/// Object recycler over a lock-free free list.
///
/// `live` tracks instances in existence (checked out or free); it only
/// grows past `max_capacity` under `FullAction::Grow`, which raises the
/// cap along with it.
pub struct LockFreePool<T: Send> {
    free: LockFreeQueue<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    max_capacity: AtomicUsize,
    live: AtomicUsize,
    action_when_full: FullAction,
    action_when_pruning: PruneAction,
    observers: ArcSwap<Vec<Arc<dyn PoolObserver>>>,
    counters: EventCounters,
}

impl<T: Send> LockFreePool<T> {
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let pool = Self {
            free: LockFreeQueue::new(),
            factory: Box::new(factory),
            max_capacity: AtomicUsize::new(config.max_capacity),
            live: AtomicUsize::new(0),
            action_when_full: config.action_when_full,
            action_when_pruning: config.action_when_pruning,
            observers: ArcSwap::from_pointee(Vec::new()),
            counters: EventCounters::default(),
        };
        let prefill = config.initial_capacity.min(config.max_capacity);
        for _ in 0..prefill {
            let item = (pool.factory)();
            // construction is single-threaded; these cannot fail
            let _ = pool.free.enqueue(item);
        }
        pool.live.store(prefill, Ordering::Release);
        pool.counters
            .created
            .store(prefill as u64, Ordering::Release);
        pool
    }

    /// Subscribe an observer to lifecycle events.
    pub fn subscribe(&self, observer: Arc<dyn PoolObserver>) {
        self.observers.rcu(|current| {
            let mut next = (**current).clone();
            next.push(observer.clone());
            next
        });
    }

    fn emit(&self, event: PoolEvent) {
        let observers = self.observers.load();
        for observer in observers.iter() {
            if catch_unwind(AssertUnwindSafe(|| observer.on_event(event))).is_err() {
                warn!(?event, "pool observer panicked; event dropped");
            }
        }
    }

    /// Fetch an instance: a recycled one when the free list has any,
    /// otherwise a fresh one while capacity allows. At capacity the
    /// `FullAction` policy decides between growing, failing, and handing
    /// back nothing.
    pub fn get(&self) -> Result<Option<T>> {
        match self.free.dequeue() {
            Ok(item) => {
                self.counters.reused.fetch_add(1, Ordering::Relaxed);
                self.emit(PoolEvent::Reused);
                Ok(Some(item))
            }
            Err(LatchlessError::Empty) => self.create_on_miss(),
            Err(e) => Err(e),
        }
    }

    fn create_on_miss(&self) -> Result<Option<T>> {
        loop {
            let live = self.live.load(Ordering::Acquire);
            if live >= self.max_capacity.load(Ordering::Acquire) {
                match self.action_when_full {
                    FullAction::Grow => {}
                    FullAction::Throw => return Err(LatchlessError::Exhausted),
                    FullAction::PopOldest | FullAction::PopNewest | FullAction::Ignore => {
                        return Ok(None);
                    }
                }
            }
            if self
                .live
                .compare_exchange_weak(live, live + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            // no-op unless the reservation outgrew the cap (Grow)
            self.raise_max(live + 1);

            let item = (self.factory)();
            self.counters.created.fetch_add(1, Ordering::Relaxed);
            debug!(live = live + 1, "pool instance created");
            self.emit(PoolEvent::Created);
            return Ok(Some(item));
        }
    }

    /// Hand an instance back. A full free list either prunes it (the
    /// `PruneToMax` policy) or falls to the `FullAction` policy; below
    /// capacity it simply re-enters the free list.
    pub fn return_item(&self, item: T) -> Result<()> {
        if self.free.is_disposed() {
            return Err(LatchlessError::Disposed);
        }
        if self.free.len() >= self.max_capacity.load(Ordering::Acquire) {
            if self.action_when_pruning == PruneAction::PruneToMax {
                // dropped, not recycled: the instance's Drop impl is its
                // disposal hook, run exactly once
                drop(item);
                self.release_one();
                self.counters.pruned.fetch_add(1, Ordering::Relaxed);
                debug!("pool instance pruned");
                return Ok(());
            }
            match self.action_when_full {
                FullAction::Grow => {
                    self.raise_max(self.free.len() + 1);
                }
                FullAction::PopOldest => {
                    if self.free.dequeue().is_ok() {
                        self.release_one();
                    }
                }
                FullAction::PopNewest | FullAction::Ignore => {
                    drop(item);
                    self.release_one();
                    return Ok(());
                }
                FullAction::Throw => {
                    drop(item);
                    self.release_one();
                    return Err(LatchlessError::Exhausted);
                }
            }
        }
        self.free.enqueue(item)?;
        self.counters.returned.fetch_add(1, Ordering::Relaxed);
        self.emit(PoolEvent::Returned);
        Ok(())
    }

    fn raise_max(&self, floor: usize) {
        let mut current = self.max_capacity.load(Ordering::Acquire);
        while current < floor {
            match self.max_capacity.compare_exchange_weak(
                current,
                floor,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn release_one(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    /// Free instances currently available for reuse.
    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Instances in existence, checked out or free.
    #[inline]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    #[inline]
    pub fn max_capacity(&self) -> usize {
        self.max_capacity.load(Ordering::Acquire)
    }

    /// Version of the underlying free list; reuse counts as a touch.
    #[inline]
    pub fn version(&self) -> u64 {
        self.free.version()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.counters.created.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            returned: self.counters.returned.load(Ordering::Relaxed),
            pruned: self.counters.pruned.load(Ordering::Relaxed),
            live: self.live(),
            available: self.available(),
            max_capacity: self.max_capacity(),
        }
    }

    /// Tear the pool down, dropping every free instance. Later `get` and
    /// `return_item` calls fail with `Disposed`.
    pub fn dispose(&self) {
        let drained = self.available();
        self.free.dispose();
        debug!(drained, "pool disposed");
    }
}
