use std::io::{self, Error};
use std::mem;
use std::ptr;

#[cfg(not(miri))]
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE,
    PAGE_NOACCESS, PAGE_READWRITE,
};
#[cfg(not(miri))]
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

/// Returns the system allocation granularity (typically 64KB).
pub fn allocation_granularity() -> usize {
    #[cfg(miri)]
    {
        65536
    }
    #[cfg(not(miri))]
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        match info.dwAllocationGranularity as usize {
            0 => 65536,
            gran => gran,
        }
    }
}

pub fn page_size() -> usize {
    #[cfg(miri)]
    {
        4096
    }
    #[cfg(not(miri))]
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        match info.dwPageSize as usize {
            0 => 4096,
            size => size,
        }
    }
}

pub struct MmapInner {
    ptr: *mut std::ffi::c_void,
    len: usize,
}

impl MmapInner {
    /// Reserves `len` bytes, committing them unless `reserve_only` is set.
    pub unsafe fn map_anon(
        len: usize,
        _populate: bool,
        _no_reserve: bool,
        reserve_only: bool,
    ) -> io::Result<Self> {
        #[cfg(miri)]
        {
            use std::alloc::{alloc_zeroed, Layout};
            let _ = reserve_only;
            let layout = Layout::from_size_align(len, allocation_granularity())
                .map_err(|_| Error::from(io::ErrorKind::InvalidInput))?;
            let ptr = unsafe { alloc_zeroed(layout) };
            if ptr.is_null() {
                return Err(Error::from(io::ErrorKind::OutOfMemory));
            }
            Ok(Self {
                ptr: ptr.cast::<std::ffi::c_void>(),
                len,
            })
        }
        #[cfg(not(miri))]
        {
            let (kind, protect) = if reserve_only {
                (MEM_RESERVE, PAGE_NOACCESS)
            } else {
                (MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
            };
            let ptr = unsafe { VirtualAlloc(ptr::null(), len, kind, protect) };
            if ptr.is_null() {
                return Err(Error::last_os_error());
            }
            Ok(Self { ptr, len })
        }
    }

    /// Commits `[offset, offset + len)` as read/write memory.
    pub unsafe fn commit(&self, offset: usize, len: usize) -> io::Result<()> {
        #[cfg(miri)]
        {
            let _ = (offset, len);
            Ok(())
        }
        #[cfg(not(miri))]
        {
            let addr = unsafe { self.ptr.cast::<u8>().add(offset) }.cast::<std::ffi::c_void>();
            let ptr = unsafe { VirtualAlloc(addr, len, MEM_COMMIT, PAGE_READWRITE) };
            if ptr.is_null() {
                return Err(Error::last_os_error());
            }
            Ok(())
        }
    }

    /// Decommits `[offset, offset + len)`. A later commit sees zero-filled pages.
    pub unsafe fn decommit(&self, offset: usize, len: usize) -> io::Result<()> {
        let addr = unsafe { self.ptr.cast::<u8>().add(offset) };
        #[cfg(miri)]
        {
            unsafe { ptr::write_bytes(addr, 0, len) };
            Ok(())
        }
        #[cfg(not(miri))]
        {
            if unsafe { VirtualFree(addr.cast::<std::ffi::c_void>(), len, MEM_DECOMMIT) } == 0 {
                return Err(Error::last_os_error());
            }
            Ok(())
        }
    }

    pub const fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    pub const fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MmapInner {
    fn drop(&mut self) {
        if self.len > 0 {
            #[cfg(miri)]
            unsafe {
                use std::alloc::{dealloc, Layout};
                if let Ok(layout) = Layout::from_size_align(self.len, allocation_granularity()) {
                    dealloc(self.ptr.cast::<u8>(), layout);
                }
            }
            #[cfg(not(miri))]
            unsafe {
                // MEM_RELEASE requires dwSize to be 0
                VirtualFree(self.ptr, 0, MEM_RELEASE);
            }
        }
    }
}

unsafe impl Send for MmapInner {}
unsafe impl Sync for MmapInner {}
