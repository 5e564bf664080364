//! Bounded work-stealing deque for marking tasks.
//!
//! Chase-Lev deque ("Dynamic Circular Work-Stealing Deque", Chase and Lev
//! 2005) over a fixed ring of heap addresses. The owning worker pushes and
//! pops at the bottom (LIFO); other workers steal from the top (FIFO).
//! Slots are atomics so a stealer racing with the owner never reads torn
//! data; a stale read is discarded when its CAS on `top` fails.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;

use crate::addr::Addr;

/// Outcome of a steal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steal {
    /// The queue looked empty.
    Empty,
    /// Lost a race with another thief or the owner; worth retrying.
    Retry,
    /// Took an item.
    Success(Addr),
}

/// A fixed-capacity work-stealing deque of addresses.
///
/// # Invariants
///
/// - `N` is a power of two
/// - empty when `bottom == top`, full when `bottom - top == N`
/// - only the owner calls `push` and `pop`
#[derive(Debug)]
pub struct StealQueue<const N: usize> {
    buffer: Box<[AtomicUsize]>,
    bottom: CachePadded<AtomicUsize>,
    top: CachePadded<AtomicUsize>,
}

impl<const N: usize> Default for StealQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> StealQueue<N> {
    /// Create an empty queue.
    ///
    /// # Panics
    ///
    /// Panics if `N` is not a power of 2.
    #[must_use]
    pub fn new() -> Self {
        assert!(N.is_power_of_two(), "StealQueue size N must be a power of 2");
        Self {
            buffer: (0..N).map(|_| AtomicUsize::new(0)).collect(),
            bottom: CachePadded::new(AtomicUsize::new(0)),
            top: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    fn slot(&self, index: usize) -> &AtomicUsize {
        &self.buffer[index & (N - 1)]
    }

    /// Push at the bottom. Returns `false` if the queue is full.
    ///
    /// Owner only.
    pub fn push(&self, item: Addr) -> bool {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        if b.wrapping_sub(t) >= N {
            return false;
        }
        self.slot(b).store(item.as_usize(), Ordering::Relaxed);
        // Publish the slot before the new bottom.
        self.bottom.store(b.wrapping_add(1), Ordering::Release);
        true
    }

    /// Pop from the bottom.
    ///
    /// Owner only.
    pub fn pop(&self) -> Option<Addr> {
        let b = self.bottom.load(Ordering::Relaxed);
        if b == self.top.load(Ordering::Acquire) {
            return None;
        }
        let new_b = b.wrapping_sub(1);
        // The bottom store must be ordered before the top load below so a
        // concurrent thief and this pop cannot both take the last item.
        self.bottom.store(new_b, Ordering::SeqCst);
        let t = self.top.load(Ordering::SeqCst);

        let size = new_b.wrapping_sub(t) as isize;
        if size < 0 {
            // A thief took the last item first.
            self.bottom.store(b, Ordering::Relaxed);
            return None;
        }
        let item = Addr::new(self.slot(new_b).load(Ordering::Relaxed));
        if size > 0 {
            return Some(item);
        }
        // Last item: race thieves for it.
        let won = self
            .top
            .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.bottom.store(b, Ordering::Relaxed);
        won.then_some(item)
    }

    /// Steal from the top. Safe to call from any thread.
    pub fn steal(&self) -> Steal {
        let t = self.top.load(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::SeqCst);
        if b.wrapping_sub(t) as isize <= 0 {
            return Steal::Empty;
        }
        let item = Addr::new(self.slot(t).load(Ordering::Relaxed));
        if self
            .top
            .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            Steal::Success(item)
        } else {
            Steal::Retry
        }
    }

    /// Approximate number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        let size = b.wrapping_sub(t) as isize;
        usize::try_from(size).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr(i: usize) -> Addr {
        Addr::new(i * 8)
    }

    #[test]
    fn push_pop_is_lifo() {
        let q: StealQueue<4> = StealQueue::new();
        assert!(q.push(addr(1)));
        assert!(q.push(addr(2)));
        assert_eq!(q.pop(), Some(addr(2)));
        assert_eq!(q.pop(), Some(addr(1)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn steal_is_fifo() {
        let q: StealQueue<4> = StealQueue::new();
        q.push(addr(1));
        q.push(addr(2));
        assert_eq!(q.steal(), Steal::Success(addr(1)));
        assert_eq!(q.pop(), Some(addr(2)));
        assert_eq!(q.steal(), Steal::Empty);
    }

    #[test]
    fn full_queue_rejects_push() {
        let q: StealQueue<2> = StealQueue::new();
        assert!(q.push(addr(1)));
        assert!(q.push(addr(2)));
        assert!(!q.push(addr(3)));
        assert_eq!(q.len(), 2);
        q.steal();
        assert!(q.push(addr(3)));
    }

    #[test]
    fn concurrent_steal_takes_each_item_once() {
        const ITEMS: usize = 1000;
        let q: Arc<StealQueue<1024>> = Arc::new(StealQueue::new());
        for i in 1..=ITEMS {
            assert!(q.push(addr(i)));
        }
        let thieves: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    loop {
                        match q.steal() {
                            Steal::Success(a) => got.push(a),
                            Steal::Retry => {}
                            Steal::Empty => break,
                        }
                    }
                    got
                })
            })
            .collect();
        let mut all: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        for t in thieves {
            all.extend(t.join().unwrap());
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total, "an item was taken twice");
        assert_eq!(total, ITEMS);
    }
}
