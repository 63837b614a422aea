//! A self-pipe the reactor can always select on to interrupt `epoll_wait`.
//!
//! `eventfd(2)`, registered into the epoll set, fills the "cheap
//! kernel primitive purpose-built for one waiter/one waker" role:
//! writing to it makes a blocked `epoll_wait` return immediately, and
//! the reactor drains it before returning events to the caller so a
//! wake is never mistaken for a registered fd becoming ready.

use std::os::unix::io::RawFd;

use crate::error::TransportError;

pub struct WakeFd {
    fd: RawFd,
}

impl WakeFd {
    pub fn new() -> Result<Self, TransportError> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }
        Ok(Self { fd })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Wakes one blocked `epoll_wait`, coalescing with any pending wake
    /// that has not yet been drained.
    pub fn wake(&self) {
        let one: u64 = 1;
        unsafe {
            libc::write(self.fd, &one as *const u64 as *const libc::c_void, 8);
        }
    }

    /// Drains the eventfd counter. Called once per `epoll_wait` return
    /// whenever the wake fd's readiness bit was set, so repeated wakes
    /// between two `wait` calls coalesce into a single drain.
    pub fn drain(&self) {
        let mut buf = [0u8; 8];
        loop {
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, 8) };
            if n != 8 {
                break;
            }
        }
    }
}

impl Drop for WakeFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
