//! Pooled card buffers.
//!
//! Card sets allocate one fixed-size buffer per source region they track.
//! Buffers released by a cleared card set first land on a pending list and
//! are moved to the free list in batches, so allocation and release traffic
//! on the free list stays low while many card sets are torn down at once.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

/// Bitmap of cards covering one source region.
#[derive(Debug)]
pub struct CardBuffer {
    words: Box<[u64]>,
}

impl CardBuffer {
    fn new(num_words: usize) -> Self {
        Self {
            words: vec![0; num_words].into_boxed_slice(),
        }
    }

    /// Set card `card`; returns `true` if it was not set before.
    pub fn set(&mut self, card: usize) -> bool {
        let (word, bit) = (card / 64, 1u64 << (card % 64));
        let was_set = self.words[word] & bit != 0;
        self.words[word] |= bit;
        !was_set
    }

    /// Whether card `card` is set.
    #[must_use]
    pub fn get(&self, card: usize) -> bool {
        self.words[card / 64] & (1u64 << (card % 64)) != 0
    }

    /// Number of set cards.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Call `f` for every set card in ascending order.
    pub fn for_each(&self, mut f: impl FnMut(usize)) {
        for (i, &word) in self.words.iter().enumerate() {
            let mut w = word;
            while w != 0 {
                let bit = w.trailing_zeros() as usize;
                f(i * 64 + bit);
                w &= w - 1;
            }
        }
    }

    fn clear(&mut self) {
        self.words.fill(0);
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Buffers ready for reuse.
    pub free: usize,
    /// Released buffers not yet moved to the free list.
    pub pending: usize,
    /// Buffers currently handed out.
    pub in_use: usize,
}

/// A shared pool of [`CardBuffer`]s.
#[derive(Debug)]
pub struct BufferPool {
    buffer_words: usize,
    transfer_threshold: usize,
    free: SegQueue<Box<CardBuffer>>,
    pending: SegQueue<Box<CardBuffer>>,
    free_count: AtomicUsize,
    pending_count: AtomicUsize,
    in_use: AtomicUsize,
    transfer_in_progress: AtomicBool,
}

impl BufferPool {
    /// Create a pool of buffers holding `cards_per_buffer` cards each.
    ///
    /// Released buffers are moved to the free list once
    /// `transfer_threshold` of them are pending.
    #[must_use]
    pub fn new(cards_per_buffer: usize, transfer_threshold: usize) -> Self {
        Self {
            buffer_words: cards_per_buffer.div_ceil(64).max(1),
            transfer_threshold: transfer_threshold.max(1),
            free: SegQueue::new(),
            pending: SegQueue::new(),
            free_count: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            transfer_in_progress: AtomicBool::new(false),
        }
    }

    /// Take a cleared buffer from the pool, allocating if none is free.
    pub fn allocate(&self) -> Box<CardBuffer> {
        self.in_use.fetch_add(1, Ordering::Relaxed);
        if let Some(buf) = self.pop_free() {
            return buf;
        }
        if self.pending_count.load(Ordering::Relaxed) > 0 && self.try_transfer_pending() {
            if let Some(buf) = self.pop_free() {
                return buf;
            }
        }
        Box::new(CardBuffer::new(self.buffer_words))
    }

    /// Return a buffer to the pool.
    pub fn release(&self, mut buf: Box<CardBuffer>) {
        buf.clear();
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        self.pending.push(buf);
        let pending = self.pending_count.fetch_add(1, Ordering::AcqRel) + 1;
        if pending >= self.transfer_threshold {
            self.try_transfer_pending();
        }
    }

    /// Move all pending buffers to the free list.
    ///
    /// Returns `false` if another thread is already transferring.
    pub fn try_transfer_pending(&self) -> bool {
        if self
            .transfer_in_progress
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        while let Some(buf) = self.pending.pop() {
            self.pending_count.fetch_sub(1, Ordering::AcqRel);
            self.free.push(buf);
            self.free_count.fetch_add(1, Ordering::AcqRel);
        }
        self.transfer_in_progress.store(false, Ordering::Release);
        true
    }

    /// Drop up to `goal` free buffers; returns how many were dropped.
    pub fn reduce_free_list(&self, goal: usize) -> usize {
        let mut removed = 0;
        while removed < goal {
            if self.pop_free().is_none() {
                break;
            }
            removed += 1;
        }
        removed
    }

    /// Current occupancy.
    #[must_use]
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            free: self.free_count.load(Ordering::Relaxed),
            pending: self.pending_count.load(Ordering::Relaxed),
            in_use: self.in_use.load(Ordering::Relaxed),
        }
    }

    fn pop_free(&self) -> Option<Box<CardBuffer>> {
        let buf = self.free.pop()?;
        self.free_count.fetch_sub(1, Ordering::AcqRel);
        Some(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_bits() {
        let pool = BufferPool::new(130, 10);
        let mut buf = pool.allocate();
        assert!(buf.set(0));
        assert!(buf.set(129));
        assert!(!buf.set(129));
        assert!(buf.get(129));
        assert_eq!(buf.count(), 2);
        let mut seen = Vec::new();
        buf.for_each(|c| seen.push(c));
        assert_eq!(seen, vec![0, 129]);
        pool.release(buf);
    }

    #[test]
    fn release_batches_into_free_list() {
        let pool = BufferPool::new(64, 3);
        let bufs: Vec<_> = (0..3).map(|_| pool.allocate()).collect();
        assert_eq!(pool.stats().in_use, 3);

        let mut iter = bufs.into_iter();
        pool.release(iter.next().unwrap());
        pool.release(iter.next().unwrap());
        assert_eq!(pool.stats().pending, 2);
        assert_eq!(pool.stats().free, 0);

        pool.release(iter.next().unwrap());
        assert_eq!(
            pool.stats(),
            BufferPoolStats {
                free: 3,
                pending: 0,
                in_use: 0
            }
        );
    }

    #[test]
    fn allocate_reuses_cleared_buffers() {
        let pool = BufferPool::new(64, 1);
        let mut buf = pool.allocate();
        buf.set(5);
        pool.release(buf);
        let buf = pool.allocate();
        assert_eq!(buf.count(), 0);
        assert_eq!(pool.stats().free, 0);
        pool.release(buf);
        assert_eq!(pool.reduce_free_list(10), 1);
    }

    #[test]
    fn allocate_drains_pending_below_threshold() {
        let pool = BufferPool::new(64, 100);
        let buf = pool.allocate();
        pool.release(buf);
        assert_eq!(pool.stats().pending, 1);
        let _buf = pool.allocate();
        assert_eq!(pool.stats().pending, 0);
        assert_eq!(pool.stats().free, 0);
    }
}
