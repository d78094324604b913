use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use crossbeam_utils::CachePadded;
use tracing::debug;

use crate::{LatchlessError, Result};

/// Count/version bookkeeping embedded in every latchless structure.
///
/// `count` is the logical element count, clamped at zero under racing
/// decrements. `version` increases on every structural mutation so that
/// enumerators can detect concurrent changes after the fact. Version
/// wraparound of the `u64` counter is outside the supported range and is
/// not defended against.
#[derive(Debug, Default)]
pub struct VersionedState {
    count: CachePadded<AtomicUsize>,
    version: CachePadded<AtomicU64>,
    disposed: AtomicBool,
}

impl VersionedState {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    #[inline]
    pub fn increment_count(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement by one, clamped at zero.
    #[inline]
    pub fn decrement_count(&self) {
        self.update_count(-1);
    }

    /// Adjust the count by `delta`, clamping the result at zero. Retries
    /// until the full old -> new transition lands.
    pub fn update_count(&self, delta: isize) {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            let next = if delta < 0 {
                current.saturating_sub(delta.unsigned_abs())
            } else {
                current.saturating_add(delta as usize)
            };
            match self.count.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    #[inline]
    pub fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Reset the version to its baseline. Only `clear` paths call this,
    /// under the caller's guarantee that no mutator is in flight.
    pub fn reset_version(&self) {
        self.version.store(0, Ordering::Release);
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Mark the owner disposed. Returns `false` when it already was, so
    /// double-dispose stays a no-op.
    pub fn mark_disposed(&self) -> bool {
        let first = !self.disposed.swap(true, Ordering::AcqRel);
        if first {
            debug!(count = self.len(), "structure disposed");
        }
        first
    }

    #[inline]
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(LatchlessError::Disposed)
        } else {
            Ok(())
        }
    }
}
