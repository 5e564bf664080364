//! Low-level virtual memory primitives.
//!
//! Provides anonymous mappings that are either committed up front or merely
//! reserved, plus page-granular commit and decommit on reserved ranges.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows, this is typically 64KB. On Unix, this is the page size.
#[must_use]
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// Rounds `size` up to a multiple of the page size.
#[must_use]
pub fn align_to_page(size: usize) -> usize {
    let ps = page_size();
    (size + ps - 1) & !(ps - 1)
}

/// A handle to a memory mapped region.
///
/// The region is automatically unmapped when this handle is dropped.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Returns a pointer to the start of the memory mapping.
    #[must_use]
    pub const fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the memory mapping in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the mapping is zero-sized.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    fn check_range(&self, offset: usize, len: usize) -> io::Result<()> {
        let ps = page_size();
        if offset % ps != 0 || len % ps != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "range must be page aligned",
            ));
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "range exceeds mapping",
            )),
        }
    }

    /// Commits `[offset, offset + len)` so it can be read and written.
    ///
    /// Freshly committed pages read as zero.
    ///
    /// # Errors
    ///
    /// Fails if the range is not page aligned, lies outside the mapping, or
    /// the OS refuses to back it.
    pub fn commit(&self, offset: usize, len: usize) -> io::Result<()> {
        self.check_range(offset, len)?;
        // SAFETY: range validated above.
        unsafe { self.inner.commit(offset, len) }
    }

    /// Releases the backing pages of `[offset, offset + len)`.
    ///
    /// # Errors
    ///
    /// Fails if the range is not page aligned or lies outside the mapping.
    ///
    /// # Safety
    ///
    /// No references into the range may be used until it is committed again.
    pub unsafe fn decommit(&self, offset: usize, len: usize) -> io::Result<()> {
        self.check_range(offset, len)?;
        // SAFETY: range validated above, caller guarantees no live users.
        unsafe { self.inner.decommit(offset, len) }
    }
}

unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

/// Configuration for creating a memory mapping.
#[derive(Debug, Clone, Default)]
pub struct MmapOptions {
    len: usize,
    populate: bool,
    no_reserve: bool,
    reserve_only: bool,
}

impl MmapOptions {
    /// Creates a new `MmapOptions` with default settings (length 0).
    /// You must set a length before mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: 0,
            populate: false,
            no_reserve: false,
            reserve_only: false,
        }
    }

    /// Sets the length of the mapping in bytes.
    #[must_use]
    pub const fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Sets whether to pre-populate (prefault) the page tables.
    ///
    /// On Linux, this adds `MAP_POPULATE`. Ignored for reserve-only mappings.
    #[must_use]
    pub const fn populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    /// Sets whether to skip reserving swap space (on supported platforms).
    ///
    /// On Linux, this adds `MAP_NORESERVE`.
    #[must_use]
    pub const fn no_reserve(mut self, no_reserve: bool) -> Self {
        self.no_reserve = no_reserve;
        self
    }

    /// Reserves address space only; pages must be committed with
    /// [`Mmap::commit`] before they are touched.
    #[must_use]
    pub const fn reserve_only(mut self, reserve_only: bool) -> Self {
        self.reserve_only = reserve_only;
        self
    }

    /// Creates an anonymous memory map.
    ///
    /// # Errors
    ///
    /// Fails on a zero length or when the OS refuses the mapping.
    ///
    /// # Safety
    ///
    /// The returned pointer is raw; callers must not access reserved but
    /// uncommitted pages.
    pub unsafe fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }

        let inner = unsafe {
            os::MmapInner::map_anon(self.len, self.populate, self.no_reserve, self.reserve_only)?
        };

        Ok(Mmap { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn test_page_size() {
        let ps = page_size();
        assert!(ps > 0);
        assert_eq!(ps & (ps - 1), 0, "Page size should be power of 2");
        assert!(allocation_granularity() >= ps);
    }

    #[test]
    fn test_align_to_page() {
        let ps = page_size();
        assert_eq!(align_to_page(0), 0);
        assert_eq!(align_to_page(1), ps);
        assert_eq!(align_to_page(ps), ps);
        assert_eq!(align_to_page(ps + 1), 2 * ps);
    }

    #[test]
    fn test_basic_map() {
        let len = page_size();
        let mmap = unsafe { MmapOptions::new().len(len).map_anon().expect("failed to map") };

        let ptr = mmap.ptr();
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % page_size(), 0);

        unsafe {
            ptr::write_volatile(ptr, 42);
            assert_eq!(ptr::read_volatile(ptr), 42);
        }
    }

    #[test]
    fn test_reserve_commit_decommit() {
        let ps = page_size();
        let mmap = unsafe {
            MmapOptions::new()
                .len(4 * ps)
                .reserve_only(true)
                .map_anon()
                .expect("failed to reserve")
        };

        mmap.commit(ps, ps).expect("commit");
        let page = unsafe { mmap.ptr().add(ps) };
        unsafe {
            assert_eq!(ptr::read_volatile(page), 0);
            ptr::write_volatile(page, 7);
            assert_eq!(ptr::read_volatile(page), 7);
        }

        unsafe { mmap.decommit(ps, ps).expect("decommit") };
        mmap.commit(ps, ps).expect("recommit");
        unsafe {
            assert_eq!(ptr::read_volatile(page), 0, "recommitted page is zero-filled");
        }
    }

    #[test]
    fn test_commit_rejects_bad_ranges() {
        let ps = page_size();
        let mmap = unsafe {
            MmapOptions::new()
                .len(2 * ps)
                .reserve_only(true)
                .map_anon()
                .expect("failed to reserve")
        };
        assert!(mmap.commit(1, ps).is_err());
        assert!(mmap.commit(ps, 2 * ps).is_err());
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(unsafe { MmapOptions::new().map_anon() }.is_err());
    }
}
