use core::mem::ManuallyDrop;
use core::ptr;
use core::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;
use tracing::debug;

use latchless_core::{LatchlessError, Result, VersionedState};

struct Node<T> {
    value: ManuallyDrop<T>,
    next: Atomic<Node<T>>,
}

/// Treiber LIFO stack.
///
/// A null head is the empty boundary; pushes and pops are each a single
/// CAS on the head pointer. Popped nodes are retired through the epoch
/// reclaimer, so a node observed by a pinned reader is never freed under
/// it and never re-linked into the live chain.
pub struct LockFreeStack<T> {
    head: CachePadded<Atomic<Node<T>>>,
    state: VersionedState,
}

unsafe impl<T: Send> Send for LockFreeStack<T> {}
unsafe impl<T: Send> Sync for LockFreeStack<T> {}

impl<T> Default for LockFreeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockFreeStack<T> {
    pub fn new() -> Self {
        Self {
            head: CachePadded::new(Atomic::null()),
            state: VersionedState::new(),
        }
    }

    /// Push a value on top of the stack.
    pub fn push(&self, value: T) -> Result<()> {
        self.state.ensure_live()?;
        let guard = epoch::pin();
        let mut new = Owned::new(Node {
            value: ManuallyDrop::new(value),
            next: Atomic::null(),
        });
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            new.next.store(head, Ordering::Relaxed);
            match self
                .head
                .compare_exchange(head, new, Ordering::AcqRel, Ordering::Acquire, &guard)
            {
                Ok(_) => {
                    self.state.increment_count();
                    self.state.bump_version();
                    return Ok(());
                }
                Err(err) => new = err.new,
            }
        }
    }

    /// Pop the most recently pushed value that has not been removed.
    pub fn pop(&self) -> Result<T> {
        self.state.ensure_live()?;
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            let Some(head_ref) = (unsafe { head.as_ref() }) else {
                return Err(LatchlessError::Empty);
            };
            let next = head_ref.next.load(Ordering::Acquire, &guard);
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire, &guard)
                .is_ok()
            {
                let value = unsafe { ptr::read(&head_ref.value) };
                unsafe { guard.defer_destroy(head) };
                self.state.decrement_count();
                self.state.bump_version();
                return Ok(ManuallyDrop::into_inner(value));
            }
        }
    }

    /// Read the top value without removing it.
    pub fn peek(&self) -> Result<T>
    where
        T: Clone,
    {
        self.state.ensure_live()?;
        let guard = epoch::pin();
        let head = self.head.load(Ordering::Acquire, &guard);
        match unsafe { head.as_ref() } {
            None => Err(LatchlessError::Empty),
            Some(node) => Ok((*node.value).clone()),
        }
    }

    /// Detach the whole chain with one head swap and drop the values.
    pub fn clear(&self) -> Result<()> {
        self.state.ensure_live()?;
        let guard = epoch::pin();
        let detached = self.detach_all(&guard);
        self.state.update_count(-(detached as isize));
        self.state.reset_version();
        debug!(detached, "stack cleared");
        Ok(())
    }

    /// Tear the stack down. Every later operation fails with `Disposed`.
    pub fn dispose(&self) {
        if !self.state.mark_disposed() {
            return;
        }
        let guard = epoch::pin();
        let detached = self.detach_all(&guard);
        self.state.update_count(-(detached as isize));
    }

    fn detach_all(&self, guard: &Guard) -> usize {
        let mut node = self.head.swap(Shared::null(), Ordering::AcqRel, guard);
        let mut detached = 0usize;
        while let Some(node_ref) = unsafe { node.as_ref() } {
            unsafe { drop(ManuallyDrop::into_inner(ptr::read(&node_ref.value))) };
            let next = node_ref.next.load(Ordering::Acquire, guard);
            unsafe { guard.defer_destroy(node) };
            node = next;
            detached += 1;
        }
        detached
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.state.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.state.version()
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.state.is_disposed()
    }

    /// Iterate top-to-bottom over a pinned view of the chain, failing
    /// fast with `ConcurrentModification` once a mutation lands.
    pub fn iter(&self) -> Result<Iter<'_, T>>
    where
        T: Clone,
    {
        self.state.ensure_live()?;
        let guard = epoch::pin();
        let current = self.head.load(Ordering::Acquire, &guard).as_raw();
        Ok(Iter {
            stack: self,
            expected: self.state.version(),
            current,
            guard,
            done: false,
        })
    }
}

impl<T> Drop for LockFreeStack<T> {
    fn drop(&mut self) {
        let guard = unsafe { epoch::unprotected() };
        let mut node = self.head.load(Ordering::Relaxed, guard);
        while !node.is_null() {
            let mut owned = unsafe { node.into_owned() };
            unsafe { ManuallyDrop::drop(&mut owned.value) };
            node = owned.next.load(Ordering::Relaxed, guard);
        }
    }
}

/// Versioned enumerator over a [`LockFreeStack`].
pub struct Iter<'a, T> {
    stack: &'a LockFreeStack<T>,
    guard: Guard,
    current: *const Node<T>,
    expected: u64,
    done: bool,
}

impl<T: Clone> Iterator for Iter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.stack.state.is_disposed() {
            self.done = true;
            return Some(Err(LatchlessError::Disposed));
        }
        if self.stack.state.version() != self.expected {
            self.done = true;
            return Some(Err(LatchlessError::ConcurrentModification));
        }
        if self.current.is_null() {
            self.done = true;
            return None;
        }
        let node = unsafe { &*self.current };
        let next = node.next.load(Ordering::Acquire, &self.guard);
        self.current = next.as_raw();
        Some(Ok((*node.value).clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn lifo_basic() {
        let s = LockFreeStack::new();
        s.push(1).unwrap();
        s.push(2).unwrap();
        s.push(3).unwrap();
        assert_eq!(s.len(), 3);

        assert_eq!(s.pop().unwrap(), 3);
        assert_eq!(s.pop().unwrap(), 2);
        assert_eq!(s.pop().unwrap(), 1);
        assert!(matches!(s.pop(), Err(LatchlessError::Empty)));
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn peek_returns_top() {
        let s = LockFreeStack::new();
        assert!(matches!(s.peek(), Err(LatchlessError::Empty)));
        s.push(10).unwrap();
        s.push(20).unwrap();
        assert_eq!(s.peek().unwrap(), 20);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn clear_is_a_single_detach() {
        let s = LockFreeStack::new();
        for i in 0..8 {
            s.push(i).unwrap();
        }
        s.clear().unwrap();
        assert_eq!(s.len(), 0);
        assert_eq!(s.version(), 0);
        assert!(s.is_empty());

        s.push(5).unwrap();
        assert_eq!(s.pop().unwrap(), 5);
    }

    #[test]
    fn iter_walks_top_down_and_fails_fast() {
        let s = LockFreeStack::new();
        s.push(1).unwrap();
        s.push(2).unwrap();
        s.push(3).unwrap();

        let values: Result<Vec<i32>> = s.iter().unwrap().collect();
        assert_eq!(values.unwrap(), vec![3, 2, 1]);

        let mut iter = s.iter().unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), 3);
        s.pop().unwrap();
        assert_eq!(
            iter.next().unwrap(),
            Err(LatchlessError::ConcurrentModification)
        );
        assert!(iter.next().is_none());
    }

    #[test]
    fn dispose_rejects_later_operations() {
        let s = LockFreeStack::new();
        s.push(1).unwrap();
        s.dispose();
        assert_eq!(s.push(2), Err(LatchlessError::Disposed));
        assert_eq!(s.pop(), Err(LatchlessError::Disposed));
    }

    #[test]
    fn concurrent_push_pop_accounts_for_everything() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 5_000;

        let s = Arc::new(LockFreeStack::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let s = s.clone();
                thread::spawn(move || {
                    let mut popped = Vec::new();
                    for i in 0..PER_THREAD {
                        s.push(t * PER_THREAD + i).unwrap();
                        if i % 2 == 0 {
                            if let Ok(v) = s.pop() {
                                popped.push(v);
                            }
                        }
                    }
                    popped
                })
            })
            .collect();

        let mut seen: Vec<usize> = Vec::new();
        for h in handles {
            seen.extend(h.join().unwrap());
        }
        while let Ok(v) = s.pop() {
            seen.push(v);
        }

        assert_eq!(seen.len(), THREADS * PER_THREAD);
        let distinct: HashSet<usize> = seen.iter().copied().collect();
        assert_eq!(distinct.len(), THREADS * PER_THREAD);
        assert_eq!(s.len(), 0);
    }

    #[cfg(feature = "loom")]
    mod loom_tests {
        use super::*;
        use loom::thread;

        #[test]
        fn loom_push_pop() {
            loom::model(|| {
                let s = Arc::new(LockFreeStack::new());
                let s2 = s.clone();
                let t = thread::spawn(move || {
                    s2.push(1).unwrap();
                });
                let _ = s.pop();
                t.join().unwrap();
            });
        }
    }
}
