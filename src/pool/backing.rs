//! Raw backing allocation for a [`super::BufferPool`].
//!
//! Mirrors the create/fallback shape of a raw `mmap`-based shared
//! memory region: try the fast/large-page path first, fall back to a
//! plain anonymous mapping when the kernel refuses it.

use std::io;
use std::ptr::NonNull;

/// One contiguous `mmap`-ed region backing a pool's buffers.
pub(super) struct Backing {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is exclusively owned by the `BufferPool` that
// created it; slices handed out of it are synchronized by the pool's
// acquire/release protocol, not by this type.
unsafe impl Send for Backing {}
unsafe impl Sync for Backing {}

impl Backing {
    /// Maps `len` bytes, preferring huge pages and falling back to a
    /// normal anonymous mapping when the kernel rejects `MAP_HUGETLB`.
    pub(super) fn map(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "backing length must be nonzero"));
        }

        let huge = Self::try_mmap(len, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB);
        let ptr = match huge {
            Ok(ptr) => ptr,
            Err(_) => Self::try_mmap(len, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS)?,
        };

        Ok(Self { ptr, len })
    }

    fn try_mmap(len: usize, flags: i32) -> io::Result<NonNull<u8>> {
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        // mmap with MAP_ANONYMOUS never returns null on success.
        Ok(NonNull::new(raw as *mut u8).expect("mmap returned null on success"))
    }

    #[inline]
    pub(super) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub(super) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Backing {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}
