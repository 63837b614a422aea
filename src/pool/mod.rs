//! Fixed-count, fixed-size zero-copy buffer pool.
//!
//! A pool owns one contiguous `mmap`-ed region sliced into `count`
//! buffers of `buf_size` bytes each. Free buffers are tracked by a
//! [`Ring<u32>`](crate::ring::Ring) of slab indices: this is the same
//! Vyukov MPMC protocol used for the message ring, just applied to the
//! pool's own free list, so `acquire`/`release` inherit its lock-free,
//! multi-threaded-safe behavior for free.

mod backing;

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::TransportError;
use crate::ring::Ring;
use backing::Backing;

/// Hard cap on a single buffer's size (2 MiB per buffer).
pub const MAX_BUFFER_SIZE: usize = 2 * 1024 * 1024;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// An exclusively-owned, fixed-size buffer checked out of a [`BufferPool`].
///
/// Not zeroed on acquire — callers must write before reading. Must be
/// returned via [`BufferPool::release`] exactly once; releasing it to
/// a different pool than the one that produced it, or releasing it
/// twice, is a contract violation that this type detects on a
/// best-effort basis and never turns into a crash.
pub struct BufferHandle {
    ptr: std::ptr::NonNull<u8>,
    len: usize,
    index: u32,
    pool_id: u64,
}

// SAFETY: the pointer addresses a slice of the pool's mmap region that
// this handle exclusively owns between acquire and release.
unsafe impl Send for BufferHandle {}

impl BufferHandle {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Identity of the pool this handle was acquired from. Used by
    /// `release` to reject foreign-pointer release without crashing.
    #[inline]
    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    #[inline]
    pub(crate) fn index(&self) -> u32 {
        self.index
    }
}

impl Deref for BufferHandle {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for BufferHandle {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// A fixed population of `count` uniform buffers of `buf_size` bytes.
pub struct BufferPool {
    backing: Backing,
    buf_size: usize,
    count: usize,
    free_list: Ring<u32>,
    owned: Box<[AtomicBool]>,
    pool_id: u64,
}

impl BufferPool {
    /// Creates a pool of `count` buffers of `buf_size` bytes each.
    ///
    /// `buf_size` beyond [`MAX_BUFFER_SIZE`] is rejected with
    /// [`TransportError::InvalidArgument`]; backing allocation failure
    /// surfaces as [`TransportError::OutOfMemory`].
    pub fn new(count: usize, buf_size: usize) -> Result<Self, TransportError> {
        if buf_size == 0 || buf_size > MAX_BUFFER_SIZE {
            return Err(TransportError::InvalidArgument(
                "buf_size must be nonzero and at most MAX_BUFFER_SIZE",
            ));
        }
        if count == 0 {
            return Err(TransportError::InvalidArgument("count must be nonzero"));
        }

        let total = count
            .checked_mul(buf_size)
            .ok_or(TransportError::InvalidArgument("count * buf_size overflows"))?;
        let backing = Backing::map(total).map_err(|_| TransportError::OutOfMemory)?;

        let ring_capacity = count.next_power_of_two();
        let free_list = Ring::new(ring_capacity)?;
        for i in 0..count as u32 {
            free_list.enqueue(i).expect("freshly created free list has room for every buffer");
        }

        let owned = (0..count).map(|_| AtomicBool::new(false)).collect::<Vec<_>>().into_boxed_slice();

        Ok(Self {
            backing,
            buf_size,
            count,
            free_list,
            owned,
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    #[inline]
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Approximate free-buffer count; advisory only, not linearizable.
    pub fn free_count(&self) -> usize {
        self.free_list.count()
    }

    /// Total bytes backing this pool (`count * buf_size`).
    pub fn total_bytes(&self) -> usize {
        self.backing.len()
    }

    /// Checks out an exclusively-owned buffer, or `None` if exhausted.
    pub fn acquire(&self) -> Option<BufferHandle> {
        let index = self.free_list.dequeue()?;
        if self.owned[index as usize].swap(true, Ordering::AcqRel) {
            log::warn!("buffer pool: slot {index} was already marked owned at acquire time");
        }
        let ptr = unsafe { self.backing.as_ptr().add(index as usize * self.buf_size) };
        Some(BufferHandle {
            ptr: std::ptr::NonNull::new(ptr).expect("backing pointer is never null"),
            len: self.buf_size,
            index,
            pool_id: self.pool_id,
        })
    }

    /// Returns a buffer to the pool.
    ///
    /// A handle from a different pool, or a handle already released,
    /// is logged and dropped without mutating this pool's state — the
    /// pool never crashes on a contract violation.
    pub fn release(&self, handle: BufferHandle) {
        if handle.pool_id != self.pool_id {
            log::warn!("buffer pool: ignoring release of a buffer from a foreign pool");
            return;
        }
        let idx = handle.index as usize;
        if !self.owned[idx].swap(false, Ordering::AcqRel) {
            log::warn!("buffer pool: ignoring double release of slot {idx}");
            return;
        }
        self.free_list
            .enqueue(handle.index)
            .expect("free list capacity always covers every buffer index");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_exhausts_then_release_replenishes() {
        let pool = BufferPool::new(4, 64).unwrap();
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(pool.acquire().expect("should have buffers available"));
        }
        assert!(pool.acquire().is_none());

        let h = handles.pop().unwrap();
        pool.release(h);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn acquired_buffer_never_reissued_before_release() {
        let pool = BufferPool::new(8, 32).unwrap();
        let mut seen = std::collections::HashSet::new();
        let mut held = Vec::new();
        for _ in 0..8 {
            let h = pool.acquire().unwrap();
            assert!(seen.insert(h.index()), "same buffer handed out twice while still held");
            held.push(h);
        }
    }

    #[test]
    fn double_release_does_not_duplicate_free_list_entry() {
        let pool = BufferPool::new(2, 16).unwrap();
        let h = pool.acquire().unwrap();
        let idx = h.index();
        pool.release(h);

        // Craft a duplicate handle (simulating a foreign double-release) and
        // make sure releasing it again does not let the same slot be handed
        // out twice concurrently.
        let dup = BufferHandle {
            ptr: std::ptr::NonNull::new(unsafe { pool.backing.as_ptr().add(idx as usize * pool.buf_size) }).unwrap(),
            len: pool.buf_size,
            index: idx,
            pool_id: pool.pool_id,
        };
        pool.release(dup);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.index(), b.index());
    }

    #[test]
    fn rejects_oversized_buffer() {
        assert!(BufferPool::new(1, MAX_BUFFER_SIZE + 1).is_err());
    }

    #[test]
    fn buffer_is_writable_and_readable() {
        let pool = BufferPool::new(1, 16).unwrap();
        let mut h = pool.acquire().unwrap();
        h.copy_from_slice(&[1u8; 16]);
        assert_eq!(&h[..], &[1u8; 16]);
    }
}
