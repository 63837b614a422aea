//! Process-wide composition of [`crate::framing`] and two
//! [`crate::pool::BufferPool`]s (`TX`, `RX`) into `send_message` /
//! `recv_message` and their zero-copy siblings.
//!
//! State lives behind a `std::sync::OnceLock<TransportState>`, set
//! once by [`init_transport`]: a single owned, explicitly-initialized
//! singleton rather than a macro-generated hidden global, with
//! creation/destruction serialized by a `parking_lot::Mutex`.

mod guard;

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::framing::{self, flags, Header};
use crate::pool::BufferHandle;
use crate::pool::BufferPool;

pub use guard::PoolGuard;

struct TransportState {
    tx: BufferPool,
    rx: BufferPool,
    tx_users: AtomicU64,
    rx_users: AtomicU64,
    tx_shutting: AtomicBool,
    rx_shutting: AtomicBool,
    /// Guards only creation and destruction, never the hot acquire/release path.
    lifecycle: Mutex<()>,
}

static STATE: OnceLock<TransportState> = OnceLock::new();

fn state() -> Result<&'static TransportState, TransportError> {
    STATE
        .get()
        .ok_or(TransportError::InvalidArgument("transport not initialized"))
}

/// Creates the process-wide `TX`/`RX` pools. Idempotent: a second call
/// with any arguments is a no-op once the pools exist.
pub fn init_transport(tx_count: usize, rx_count: usize, buf_size: usize) -> Result<(), TransportError> {
    if STATE.get().is_some() {
        return Ok(());
    }
    let tx = BufferPool::new(tx_count, buf_size)?;
    let rx = BufferPool::new(rx_count, buf_size)?;
    let built = TransportState {
        tx,
        rx,
        tx_users: AtomicU64::new(0),
        rx_users: AtomicU64::new(0),
        tx_shutting: AtomicBool::new(false),
        rx_shutting: AtomicBool::new(false),
        lifecycle: Mutex::new(()),
    };
    // Another thread may have raced us to initialization; either
    // outcome leaves a usable singleton in place, so the result is
    // discarded.
    let _ = STATE.set(built);
    log::debug!("transport: initialized with tx_count={tx_count} rx_count={rx_count} buf_size={buf_size}");
    Ok(())
}

/// Blocks until both pools have no outstanding users, then marks the
/// singleton shut down. Acquire calls made after this returns continue
/// to fail with [`TransportError::InvalidArgument`] since there is no
/// way to tear down a `'static` `OnceLock` entry; the two pools live
/// for the rest of the process either way.
pub fn shutdown_transport() -> Result<(), TransportError> {
    let s = state()?;
    let _guard = s.lifecycle.lock();
    s.tx_shutting.store(true, Ordering::SeqCst);
    s.rx_shutting.store(true, Ordering::SeqCst);
    let tx_outstanding = s.tx_users.load(Ordering::Acquire);
    let rx_outstanding = s.rx_users.load(Ordering::Acquire);
    if tx_outstanding != 0 || rx_outstanding != 0 {
        log::debug!(
            "transport: shutdown waiting on {tx_outstanding} outstanding tx user(s), {rx_outstanding} outstanding rx user(s)"
        );
    }
    while s.tx_users.load(Ordering::Acquire) != 0 || s.rx_users.load(Ordering::Acquire) != 0 {
        std::thread::yield_now();
    }
    log::debug!("transport: shutdown complete");
    Ok(())
}

/// Checks out a `TX` buffer, or `None` if exhausted or shutting down.
pub fn acquire_tx() -> Result<Option<BufferHandle>, TransportError> {
    let s = state()?;
    Ok(PoolGuard::acquire(&s.tx, &s.tx_users, &s.tx_shutting))
}

/// Checks out an `RX` buffer, or `None` if exhausted or shutting down.
pub fn acquire_rx() -> Result<Option<BufferHandle>, TransportError> {
    let s = state()?;
    Ok(PoolGuard::acquire(&s.rx, &s.rx_users, &s.rx_shutting))
}

/// Returns a `TX` buffer acquired via [`acquire_tx`].
pub fn release_tx(buf: BufferHandle) -> Result<(), TransportError> {
    let s = state()?;
    s.tx.release(buf);
    s.tx_users.fetch_sub(1, Ordering::AcqRel);
    Ok(())
}

/// Returns an `RX` buffer acquired via [`acquire_rx`] or returned by
/// [`recv_message`]/[`recv_message_zcp`].
pub fn release_rx(buf: BufferHandle) -> Result<(), TransportError> {
    let s = state()?;
    s.rx.release(buf);
    s.rx_users.fetch_sub(1, Ordering::AcqRel);
    Ok(())
}

/// Sends `payload` as one frame. Does not touch either pool.
pub fn send_message(fd: RawFd, msg_type: u8, flags: u8, payload: &[u8]) -> Result<(), TransportError> {
    framing::write_message(fd, msg_type, flags, payload)
}

/// Sends the first `len` bytes of a pool-owned buffer as one frame's
/// payload. The caller retains ownership of `pool_buf` — framing never
/// releases caller buffers, so it is passed by reference. `len` may be
/// smaller than the buffer's fixed capacity; only the logical prefix
/// actually written by the caller goes out on the wire.
pub fn send_message_zcp(
    fd: RawFd,
    msg_type: u8,
    wire_flags: u8,
    pool_buf: &BufferHandle,
    len: usize,
) -> Result<(), TransportError> {
    framing::write_message(fd, msg_type, wire_flags, &pool_buf[..len])
}

/// Reads one frame into a freshly acquired `RX` buffer.
///
/// On success, ownership of the returned buffer transfers to the
/// caller, who must call [`release_rx`] exactly once. On any error the
/// buffer is released back to the pool before the error is returned,
/// so a caller never leaks a buffer on a failed receive.
pub fn recv_message(fd: RawFd, header_out: &mut Header) -> Result<BufferHandle, TransportError> {
    let s = state()?;
    let mut buf = PoolGuard::acquire(&s.rx, &s.rx_users, &s.rx_shutting).ok_or(TransportError::OutOfMemory)?;

    match framing::read_message_into(fd, &mut buf) {
        Ok((header, len)) => {
            *header_out = header;
            // The handle's own length is the pool's fixed buf_size;
            // callers read only `header.payload_len` bytes of it.
            debug_assert!(len <= buf.len());
            Ok(buf)
        }
        Err(e) => {
            s.rx.release(buf);
            s.rx_users.fetch_sub(1, Ordering::AcqRel);
            Err(e)
        }
    }
}

/// Like [`recv_message`] but uses the non-blocking atomic read
/// contract, threading `partial` as the connection's persistent
/// length/header cursor and `inflight` as its persistent payload
/// buffer.
///
/// The zero-copy receive counterpart to [`send_message_zcp`]: frames
/// the read directly into a pool buffer and returns the handle
/// instead of copying into a caller-supplied slice. `inflight` must be
/// the same `Option` across every call for a given `fd` until this
/// returns `Ok`: once the atomic read has started landing payload
/// bytes into the acquired buffer, handing the caller a *different*
/// buffer on the next call (as a fresh `acquire` would) loses that
/// progress, so the buffer — not just the length/header cursor — is
/// part of the in-flight state a `WouldBlock` caller must keep.
pub fn recv_message_zcp(
    fd: RawFd,
    partial: &mut framing::PartialRead,
    inflight: &mut Option<BufferHandle>,
    header_out: &mut Header,
) -> Result<BufferHandle, TransportError> {
    let s = state()?;
    if inflight.is_none() {
        let buf = PoolGuard::acquire(&s.rx, &s.rx_users, &s.rx_shutting).ok_or(TransportError::OutOfMemory)?;
        *inflight = Some(buf);
    }
    let buf = inflight.as_mut().expect("just ensured Some above");

    match framing::read_message_atomic(fd, partial, buf) {
        Ok((header, len)) => {
            *header_out = header;
            debug_assert!(len <= buf.len());
            Ok(inflight.take().expect("buffer was populated above"))
        }
        Err(TransportError::WouldBlock) => {
            // Partial bytes, if any landed in this call, live in the
            // buffer `inflight` still holds; keep it for the next call
            // rather than releasing it back to the pool.
            Err(TransportError::WouldBlock)
        }
        Err(e) => {
            if let Some(buf) = inflight.take() {
                s.rx.release(buf);
                s.rx_users.fetch_sub(1, Ordering::AcqRel);
            }
            Err(e)
        }
    }
}

pub use flags as wire_flags;

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn reset_state_for_test() {
        // `OnceLock` cannot be cleared; tests in this module are
        // `#[serial]` and share one process-wide singleton sized
        // generously enough for every test's needs.
        let _ = init_transport(4, 4, 64);
    }

    #[test]
    #[serial]
    fn round_trip_send_and_recv() {
        reset_state_for_test();
        let (a, b) = UnixStream::pair().unwrap();
        send_message(a.as_raw_fd(), 0x34, 0x00, b"abc\0").unwrap();

        let mut header = Header::new(0, 0, 0);
        let buf = recv_message(b.as_raw_fd(), &mut header).unwrap();
        assert_eq!(header.msg_type, 0x34);
        assert_eq!(header.payload_len, 4);
        assert_eq!(&buf[..4], b"abc\0");
        release_rx(buf).unwrap();
    }

    #[test]
    #[serial]
    fn send_message_zcp_uses_pool_buffer_as_payload() {
        reset_state_for_test();
        let mut tx_buf = acquire_tx().unwrap().expect("tx pool should have room");
        tx_buf[..5].copy_from_slice(b"zcp!!");

        let (a, b) = UnixStream::pair().unwrap();
        send_message_zcp(a.as_raw_fd(), 1, 0, &tx_buf, 5).unwrap();
        release_tx(tx_buf).unwrap();

        let mut header = Header::new(0, 0, 0);
        let buf = recv_message(b.as_raw_fd(), &mut header).unwrap();
        assert_eq!(header.payload_len, 5);
        assert_eq!(&buf[..5], b"zcp!!");
        release_rx(buf).unwrap();
    }

    #[test]
    #[serial]
    fn recv_message_zcp_resumes_into_the_same_buffer_after_would_block() {
        reset_state_for_test();
        let (a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();

        let header = Header::new(5, 0, 5);
        let prefix = (Header::WIRE_SIZE as u32 + header.payload_len).to_be_bytes();
        use std::io::Write;
        // Deliver the length prefix, the header, and only the first 2
        // of 5 payload bytes; the rest follows on a second write, after
        // the first WouldBlock lands with partial payload progress.
        (&a).write_all(&prefix).unwrap();
        (&a).write_all(&header.to_wire_bytes()).unwrap();
        (&a).write_all(b"zc").unwrap();

        let mut partial = framing::PartialRead::new();
        let mut inflight: Option<BufferHandle> = None;
        let mut out_header = Header::new(0, 0, 0);

        let err = recv_message_zcp(b.as_raw_fd(), &mut partial, &mut inflight, &mut out_header).unwrap_err();
        assert!(matches!(err, TransportError::WouldBlock));
        assert!(inflight.is_some(), "the in-flight buffer must be retained across WouldBlock");
        assert_eq!(&inflight.as_ref().unwrap()[..2], b"zc", "partial payload bytes must survive in the retained buffer");

        (&a).write_all(b"p!!").unwrap();
        let buf = loop {
            match recv_message_zcp(b.as_raw_fd(), &mut partial, &mut inflight, &mut out_header) {
                Ok(buf) => break buf,
                Err(TransportError::WouldBlock) => std::thread::yield_now(),
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        };
        assert_eq!(out_header.msg_type, 5);
        assert_eq!(&buf[..5], b"zcp!!");
        release_rx(buf).unwrap();
    }

    #[test]
    #[serial]
    fn recv_message_releases_buffer_on_framing_error() {
        reset_state_for_test();
        let (a, b) = UnixStream::pair().unwrap();
        // Malformed length prefix: one less than the header size.
        use std::io::Write;
        (&a).write_all(&7u32.to_be_bytes()).unwrap();

        let mut header = Header::new(0, 0, 0);
        let err = recv_message(b.as_raw_fd(), &mut header).unwrap_err();
        assert!(matches!(err, TransportError::MalformedFrame));

        // The RX buffer must have been returned to the pool, not leaked.
        let s = state().unwrap();
        assert_eq!(s.rx_users.load(Ordering::Acquire), 0);
    }

    #[test]
    #[serial]
    fn shutdown_waits_for_outstanding_users() {
        reset_state_for_test();
        let held = acquire_rx().unwrap().expect("rx pool should have room");

        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let done2 = std::sync::Arc::clone(&done);
        let handle = std::thread::spawn(move || {
            shutdown_transport().unwrap();
            done2.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst), "shutdown must block while a user is outstanding");

        release_rx(held).unwrap();
        handle.join().unwrap();
        assert!(done.load(Ordering::SeqCst));

        // Leave the singleton in a state later tests in this module can use.
        let s = state().unwrap();
        s.tx_shutting.store(false, Ordering::SeqCst);
        s.rx_shutting.store(false, Ordering::SeqCst);
    }
}
