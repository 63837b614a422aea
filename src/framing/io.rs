//! Raw read/write syscall wrappers.
//!
//! `Interrupted` is always retried here and never surfaces past this
//! module: every raw syscall wrapper loops on `EINTR` rather than
//! handing a transient errno back to its caller.

use std::io;
use std::os::unix::io::RawFd;

use crate::error::TransportError;

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// `read(2)`, retrying on `EINTR`. Returns `Ok(0)` on orderly close,
/// `Err(WouldBlock)` on `EAGAIN`/`EWOULDBLOCK`.
fn raw_read(fd: RawFd, buf: &mut [u8]) -> Result<usize, TransportError> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        match last_errno() {
            libc::EINTR => continue,
            libc::EAGAIN | libc::EWOULDBLOCK => return Err(TransportError::WouldBlock),
            _ => return Err(TransportError::Io(io::Error::last_os_error())),
        }
    }
}

/// Reads exactly `buf.len()` bytes.
///
/// If `allow_wouldblock_if_empty` is true and the very first attempt
/// returns `EAGAIN` with zero bytes consumed, `WouldBlock` is
/// propagated with no side effects. Once any byte of this call has
/// been consumed, further `EAGAIN` is retried
/// (busy-yield) rather than surfaced, since there is no way to return
/// partial progress to a caller that holds no cursor across calls.
pub(super) fn read_exact_blocking(
    fd: RawFd,
    buf: &mut [u8],
    allow_wouldblock_if_empty: bool,
) -> Result<(), TransportError> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match raw_read(fd, &mut buf[filled..]) {
            Ok(0) => return Err(TransportError::PeerClosed),
            Ok(n) => filled += n,
            Err(TransportError::WouldBlock) => {
                if filled == 0 && allow_wouldblock_if_empty {
                    return Err(TransportError::WouldBlock);
                }
                std::thread::yield_now();
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Single non-blocking read attempt into `buf[have..]`.
///
/// Returns the number of new bytes read. `EAGAIN` with zero new bytes
/// is reported as `Ok(0)` distinguishable from orderly close via the
/// `Err(PeerClosed)` variant — callers distinguish "no progress this
/// call" from "peer closed" by checking for that error explicitly.
pub(super) fn read_some_nonblocking(fd: RawFd, buf: &mut [u8]) -> Result<usize, TransportError> {
    if buf.is_empty() {
        return Ok(0);
    }
    match raw_read(fd, buf) {
        Ok(0) => Err(TransportError::PeerClosed),
        Ok(n) => Ok(n),
        Err(TransportError::WouldBlock) => Ok(0),
        Err(e) => Err(e),
    }
}

/// `write(2)`, retrying on `EINTR`, mapping `EPIPE` to `PeerClosed`.
fn raw_write(fd: RawFd, buf: &[u8]) -> Result<usize, TransportError> {
    loop {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        match last_errno() {
            libc::EINTR => continue,
            libc::EPIPE => return Err(TransportError::PeerClosed),
            libc::EAGAIN | libc::EWOULDBLOCK => return Err(TransportError::WouldBlock),
            _ => return Err(TransportError::Io(io::Error::last_os_error())),
        }
    }
}

/// Blocking-retry write loop: finishes writing `buf` in full, retrying
/// `EAGAIN` by yielding. Used as the short-write fallback once a
/// scatter write lands short of the full frame.
pub(super) fn write_all_blocking(fd: RawFd, buf: &[u8]) -> Result<(), TransportError> {
    let mut written = 0usize;
    while written < buf.len() {
        match raw_write(fd, &buf[written..]) {
            Ok(n) => written += n,
            Err(TransportError::WouldBlock) => std::thread::yield_now(),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Issues one scatter write of up to three regions (length prefix,
/// header, payload). Returns the number of bytes actually written in
/// this single `writev` call, which may be less than the sum of the
/// regions (a short write) on a non-blocking fd or under backpressure.
pub(super) fn writev_once(fd: RawFd, regions: &[&[u8]]) -> Result<usize, TransportError> {
    let iovecs: Vec<libc::iovec> = regions
        .iter()
        .map(|r| libc::iovec {
            iov_base: r.as_ptr() as *mut libc::c_void,
            iov_len: r.len(),
        })
        .collect();

    loop {
        let n = unsafe { libc::writev(fd, iovecs.as_ptr(), iovecs.len() as i32) };
        if n >= 0 {
            return Ok(n as usize);
        }
        match last_errno() {
            libc::EINTR => continue,
            libc::EPIPE => return Err(TransportError::PeerClosed),
            libc::EAGAIN | libc::EWOULDBLOCK => return Ok(0),
            _ => return Err(TransportError::Io(io::Error::last_os_error())),
        }
    }
}
