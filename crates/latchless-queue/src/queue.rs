use core::mem::MaybeUninit;
use core::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;
use tracing::debug;

use latchless_core::{LatchlessError, Result, VersionedState};

struct Node<T> {
    value: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    fn sentinel() -> Self {
        Self {
            value: MaybeUninit::uninit(),
            next: Atomic::null(),
        }
    }

    fn new(value: T) -> Self {
        Self {
            value: MaybeUninit::new(value),
            next: Atomic::null(),
        }
    }
}

/// Michael-Scott two-pointer FIFO queue.
///
/// `head` and `tail` start out pointing at a shared sentinel node that
/// never carries user data. Enqueuers link at the tail and help a
/// straggling tail pointer along; dequeuers advance the head, and the
/// node whose value was taken becomes the new sentinel. Retired nodes
/// are handed to the epoch reclaimer and freed once no pinned thread can
/// still reach them.
pub struct LockFreeQueue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
    state: VersionedState,
}

unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockFreeQueue<T> {
    pub fn new() -> Self {
        let sentinel = Owned::new(Node::sentinel()).into_shared(unsafe { epoch::unprotected() });
        Self {
            head: CachePadded::new(Atomic::from(sentinel)),
            tail: CachePadded::new(Atomic::from(sentinel)),
            state: VersionedState::new(),
        }
    }

    /// Append a value at the tail.
    pub fn enqueue(&self, value: T) -> Result<()> {
        self.state.ensure_live()?;
        let guard = epoch::pin();
        let new = Owned::new(Node::new(value)).into_shared(&guard);
        loop {
            let tail = self.tail.load(Ordering::Acquire, &guard);
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, &guard);

            if tail != self.tail.load(Ordering::Acquire, &guard) {
                continue;
            }

            if next.is_null() {
                if tail_ref
                    .next
                    .compare_exchange(
                        Shared::null(),
                        new,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        &guard,
                    )
                    .is_ok()
                {
                    // best effort: a straggling tail is corrected by the
                    // next enqueuer or dequeuer
                    let _ = self.tail.compare_exchange(
                        tail,
                        new,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        &guard,
                    );
                    self.state.increment_count();
                    self.state.bump_version();
                    return Ok(());
                }
            } else {
                // another enqueuer linked ahead of us; help the tail along
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    &guard,
                );
            }
        }
    }

    /// Remove and return the value at the head, oldest first.
    pub fn dequeue(&self) -> Result<T> {
        self.state.ensure_live()?;
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            let tail = self.tail.load(Ordering::Acquire, &guard);
            let head_ref = unsafe { head.deref() };
            let next = head_ref.next.load(Ordering::Acquire, &guard);

            if head != self.head.load(Ordering::Acquire, &guard) {
                continue;
            }

            if head == tail {
                if next.is_null() {
                    return Err(LatchlessError::Empty);
                }
                // an enqueue is mid-flight; help the straggling tail
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    &guard,
                );
                continue;
            }

            let next_ref = unsafe { next.deref() };
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire, &guard)
                .is_ok()
            {
                // winning the head CAS grants exclusive ownership of the
                // new head's value; the old sentinel is retired
                let value = unsafe { next_ref.value.assume_init_read() };
                unsafe { guard.defer_destroy(head) };
                self.state.decrement_count();
                self.state.bump_version();
                return Ok(value);
            }
        }
    }

    /// Read the head value without removing it.
    pub fn peek(&self) -> Result<T>
    where
        T: Clone,
    {
        self.state.ensure_live()?;
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            let next = unsafe { head.deref() }.next.load(Ordering::Acquire, &guard);
            let Some(next_ref) = (unsafe { next.as_ref() }) else {
                return Err(LatchlessError::Empty);
            };
            // the head must still be current, otherwise the observed node
            // may already belong to a dequeuer
            if head == self.head.load(Ordering::Acquire, &guard) {
                return Ok(unsafe { (*next_ref.value.as_ptr()).clone() });
            }
        }
    }

    /// Detach the whole chain behind a fresh sentinel and drop the values.
    ///
    /// Callers guarantee no mutator is still in flight (see crate docs);
    /// the detached nodes go through the epoch reclaimer like any other
    /// retirement.
    pub fn clear(&self) -> Result<()> {
        self.state.ensure_live()?;
        let guard = epoch::pin();
        let detached = self.detach_all(&guard);
        self.state.update_count(-(detached as isize));
        self.state.reset_version();
        debug!(detached, "queue cleared");
        Ok(())
    }

    /// Tear the queue down. Every later operation fails with `Disposed`.
    /// Idempotent; second and later calls are no-ops.
    pub fn dispose(&self) {
        if !self.state.mark_disposed() {
            return;
        }
        let guard = epoch::pin();
        let detached = self.detach_all(&guard);
        self.state.update_count(-(detached as isize));
    }

    fn detach_all(&self, guard: &Guard) -> usize {
        let sentinel = Owned::new(Node::sentinel()).into_shared(guard);
        let old_head = self.head.swap(sentinel, Ordering::AcqRel, guard);
        self.tail.store(sentinel, Ordering::Release);

        // the old head is a consumed sentinel; every node behind it still
        // owns its value
        let mut node = unsafe { old_head.deref() }.next.load(Ordering::Acquire, guard);
        unsafe { guard.defer_destroy(old_head) };
        let mut detached = 0usize;
        while !node.is_null() {
            let node_ref = unsafe { node.deref() };
            unsafe { drop(node_ref.value.assume_init_read()) };
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

    /// Iterate head-to-tail over a pinned view of the chain.
    ///
    /// The iterator captures the current version; the first mutation that
    /// lands afterwards makes it yield `ConcurrentModification` and fuse.
    pub fn iter(&self) -> Result<Iter<'_, T>>
    where
        T: Clone,
    {
        self.state.ensure_live()?;
        let guard = epoch::pin();
        let current = self.head.load(Ordering::Acquire, &guard).as_raw();
        Ok(Iter {
            queue: self,
            expected: self.state.version(),
            current,
            guard,
            done: false,
        })
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        let guard = unsafe { epoch::unprotected() };
        let mut node = self.head.load(Ordering::Relaxed, guard);
        let mut is_sentinel = true;
        while let Some(node_ref) = unsafe { node.as_ref() } {
            if !is_sentinel {
                unsafe { drop(node_ref.value.assume_init_read()) };
            }
            is_sentinel = false;
            let next = node_ref.next.load(Ordering::Relaxed, guard);
            unsafe { drop(node.into_owned()) };
            node = next;
        }
    }
}

/// Versioned enumerator over a [`LockFreeQueue`].
pub struct Iter<'a, T> {
    queue: &'a LockFreeQueue<T>,
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
        if self.queue.state.is_disposed() {
            self.done = true;
            return Some(Err(LatchlessError::Disposed));
        }
        if self.queue.state.version() != self.expected {
            self.done = true;
            return Some(Err(LatchlessError::ConcurrentModification));
        }
        let current = unsafe { &*self.current };
        let next = current.next.load(Ordering::Acquire, &self.guard);
        match unsafe { next.as_ref() } {
            None => {
                self.done = true;
                None
            }
            Some(node) => {
                self.current = next.as_raw();
                Some(Ok(unsafe { (*node.value.as_ptr()).clone() }))
            }
        }
    }
}
