//! Heap addresses and address ranges.
//!
//! Heap memory is only ever accessed through word-sized atomics or raw
//! copies during compaction, never through references to typed data.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bytes per heap word.
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// A byte address inside (or one past) the managed heap.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Addr(usize);

impl Addr {
    /// The null address.
    pub const NULL: Self = Self(0);

    /// Wrap a raw address.
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// The raw address.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Whether this is the null address.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The address `words` words above this one.
    #[must_use]
    pub const fn add_words(self, words: usize) -> Self {
        Self(self.0 + words * WORD_SIZE)
    }

    /// The address `words` words below this one.
    #[must_use]
    pub const fn sub_words(self, words: usize) -> Self {
        Self(self.0 - words * WORD_SIZE)
    }

    /// Distance in words from `lower` up to `self`.
    #[must_use]
    pub const fn words_since(self, lower: Self) -> usize {
        debug_assert!(self.0 >= lower.0);
        (self.0 - lower.0) / WORD_SIZE
    }

    /// Whether the address is word aligned.
    #[must_use]
    pub const fn is_word_aligned(self) -> bool {
        self.0 % WORD_SIZE == 0
    }

    /// View the word at this address as an atomic.
    ///
    /// # Safety
    ///
    /// The address must be word aligned and point into committed heap memory
    /// that outlives `'a`.
    #[must_use]
    pub unsafe fn word<'a>(self) -> &'a AtomicUsize {
        // SAFETY: caller guarantees alignment and validity.
        unsafe { &*(self.0 as *const AtomicUsize) }
    }

    /// Load the word at this address.
    ///
    /// # Safety
    ///
    /// See [`Addr::word`].
    #[must_use]
    pub unsafe fn load(self) -> usize {
        unsafe { self.word() }.load(Ordering::Relaxed)
    }

    /// Store `value` at this address.
    ///
    /// # Safety
    ///
    /// See [`Addr::word`].
    pub unsafe fn store(self, value: usize) {
        unsafe { self.word() }.store(value, Ordering::Relaxed);
    }

    /// Copy `words` words from `self` to `dest`; the ranges may overlap.
    ///
    /// # Safety
    ///
    /// Both ranges must lie in committed heap memory and no other thread may
    /// access them concurrently.
    pub unsafe fn copy_words_to(self, dest: Self, words: usize) {
        if self == dest || words == 0 {
            return;
        }
        // SAFETY: caller guarantees both ranges are valid and unshared.
        unsafe {
            std::ptr::copy(self.0 as *const usize, dest.0 as *mut usize, words);
        }
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A half-open address range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemRegion {
    start: Addr,
    end: Addr,
}

impl MemRegion {
    /// Create a range; `end` must not be below `start`.
    #[must_use]
    pub const fn new(start: Addr, end: Addr) -> Self {
        assert!(start.0 <= end.0, "inverted memory range");
        Self { start, end }
    }

    /// Create a range of `words` words starting at `start`.
    #[must_use]
    pub const fn with_words(start: Addr, words: usize) -> Self {
        Self::new(start, start.add_words(words))
    }

    #[must_use]
    pub const fn start(&self) -> Addr {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> Addr {
        self.end
    }

    /// Size of the range in words.
    #[must_use]
    pub const fn word_size(&self) -> usize {
        (self.end.0 - self.start.0) / WORD_SIZE
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start.0 == self.end.0
    }

    /// Whether `addr` lies in the range.
    #[must_use]
    pub const fn contains(&self, addr: Addr) -> bool {
        addr.0 >= self.start.0 && addr.0 < self.end.0
    }

    /// The overlap of two ranges, possibly empty.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start >= end {
            Self::new(start, start)
        } else {
            Self::new(start, end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_arithmetic() {
        let a = Addr::new(0x1000);
        assert_eq!(a.add_words(2).as_usize(), 0x1000 + 2 * WORD_SIZE);
        assert_eq!(a.add_words(5).words_since(a), 5);
        assert_eq!(a.add_words(5).sub_words(5), a);
        assert!(Addr::NULL.is_null());
    }

    #[test]
    fn range_intersection() {
        let a = MemRegion::with_words(Addr::new(0x1000), 10);
        let b = MemRegion::with_words(Addr::new(0x1000).add_words(4), 10);
        let i = a.intersection(&b);
        assert_eq!(i.word_size(), 6);
        assert!(i.contains(Addr::new(0x1000).add_words(4)));
        assert!(!i.contains(a.end()));

        let far = MemRegion::with_words(Addr::new(0x9000), 1);
        assert!(a.intersection(&far).is_empty());
    }
}
