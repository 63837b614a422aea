//! The "acquire, then re-check shutting" dance, factored out of
//! `acquire_tx`/`acquire_rx` so both share one implementation of the
//! counter/flag protocol.
//!
//! [`crate::transport`] keeps the pool's own explicit
//! `release_tx`/`release_rx` entry points rather than a `Drop`-based
//! guard, so `PoolGuard` is a namespaced helper for the acquire-side
//! protocol only: the counter decrement on the release side lives
//! next to the pool release call it must always accompany, which
//! keeps both happening under one glance instead of splitting "return
//! to pool" and "decrement counter" across a destructor and an
//! explicit call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::pool::{BufferHandle, BufferPool};

pub struct PoolGuard;

impl PoolGuard {
    /// Increments `users`, re-checks `shutting` to close the
    /// acquire/shutdown race, then calls into the pool. Decrements
    /// `users` again on any failure path (shutting, or pool exhausted)
    /// so a failed acquire never leaves a phantom user counted.
    pub fn acquire(pool: &BufferPool, users: &AtomicU64, shutting: &AtomicBool) -> Option<BufferHandle> {
        users.fetch_add(1, Ordering::AcqRel);
        if shutting.load(Ordering::SeqCst) {
            users.fetch_sub(1, Ordering::AcqRel);
            log::trace!("transport: acquire lost the race with a shutdown in progress");
            return None;
        }
        match pool.acquire() {
            Some(buf) => Some(buf),
            None => {
                users.fetch_sub(1, Ordering::AcqRel);
                None
            }
        }
    }
}
