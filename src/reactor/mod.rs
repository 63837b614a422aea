//! Readiness reactor: multiplexes many connections' read/write
//! readiness over a single blocking wait, with an internal wake path
//! an unrelated thread can use to interrupt it.
//!
//! Built directly on `epoll` via raw `libc` calls rather than a
//! runtime dependency: no `mio`/`tokio` is introduced here.

mod wake;

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use crate::error::TransportError;
use wake::WakeFd;

/// Readiness a registration cares about: a bitmask of `READABLE`,
/// `WRITABLE`, `EDGE_TRIGGERED`, and `ONE_SHOT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
    pub edge_triggered: bool,
    pub one_shot: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
        edge_triggered: false,
        one_shot: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
        edge_triggered: false,
        one_shot: false,
    };
    pub const BOTH: Interest = Interest {
        readable: true,
        writable: true,
        edge_triggered: false,
        one_shot: false,
    };

    /// Returns this interest with `EDGE_TRIGGERED` added.
    pub const fn edge_triggered(self) -> Self {
        Interest { edge_triggered: true, ..self }
    }

    /// Returns this interest with `ONE_SHOT` added: after the next
    /// event fires, `epoll` disarms the registration until a
    /// subsequent [`Reactor::modify`] re-arms it.
    pub const fn one_shot(self) -> Self {
        Interest { one_shot: true, ..self }
    }

    fn to_epoll_events(self) -> u32 {
        let mut bits = 0u32;
        if self.readable {
            bits |= libc::EPOLLIN as u32;
        }
        if self.writable {
            bits |= libc::EPOLLOUT as u32;
        }
        if self.edge_triggered {
            bits |= libc::EPOLLET as u32;
        }
        if self.one_shot {
            bits |= libc::EPOLLONESHOT as u32;
        }
        bits
    }
}

/// One readiness notification returned from [`Reactor::wait`].
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// An epoll-backed readiness multiplexer.
///
/// Registrations are tracked in `fd -> Interest` purely so
/// [`Reactor::modify`] can be expressed as a single `EPOLL_CTL_MOD`
/// call with the caller only needing to state the new interest (not
/// the old one, which `epoll_ctl` otherwise requires you to recompute
/// yourself).
pub struct Reactor {
    epoll_fd: RawFd,
    wake: WakeFd,
    registered: parking_lot::Mutex<HashMap<RawFd, Interest>>,
}

impl Reactor {
    /// Creates a reactor with its own epoll instance and wake object.
    pub fn new() -> Result<Self, TransportError> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }
        let wake = WakeFd::new()?;

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: wake.raw_fd() as u64,
        };
        let rc = unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, wake.raw_fd(), &mut ev) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(epoll_fd) };
            return Err(TransportError::Io(err));
        }

        Ok(Self {
            epoll_fd,
            wake,
            registered: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Registers `fd` for the given interest. Replaces any prior
    /// registration for the same fd (use [`Reactor::modify`] instead
    /// to change interest without a remove/re-add).
    pub fn add(&self, fd: RawFd, interest: Interest) -> Result<(), TransportError> {
        let mut ev = libc::epoll_event {
            events: interest.to_epoll_events(),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            log::warn!("reactor: failed to register fd {fd} with {interest:?}: {err}");
            return Err(TransportError::Io(err));
        }
        log::trace!("reactor: registered fd {fd} with {interest:?}");
        self.registered.lock().insert(fd, interest);
        Ok(())
    }

    /// Changes a registered fd's interest.
    pub fn modify(&self, fd: RawFd, interest: Interest) -> Result<(), TransportError> {
        let mut ev = libc::epoll_event {
            events: interest.to_epoll_events(),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_MOD, fd, &mut ev) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            log::warn!("reactor: failed to modify fd {fd} to {interest:?}: {err}");
            return Err(TransportError::Io(err));
        }
        log::trace!("reactor: modified fd {fd} to {interest:?}");
        self.registered.lock().insert(fd, interest);
        Ok(())
    }

    /// Deregisters `fd`. A no-op (not an error) if it was never
    /// registered or was already closed out from under the reactor.
    pub fn remove(&self, fd: RawFd) {
        unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
        if self.registered.lock().remove(&fd).is_some() {
            log::trace!("reactor: removed fd {fd}");
        }
    }

    /// Interrupts a concurrent or future call to [`Reactor::wait`] /
    /// [`Reactor::timed_wait`] from any thread, without needing to
    /// register anything.
    pub fn wake(&self) {
        self.wake.wake();
    }

    /// Blocks until at least one registered fd is ready or the reactor
    /// is woken, then returns every ready event (the wake fd's own
    /// event, if present, is drained and filtered out before the
    /// caller sees this batch).
    ///
    /// A signal interrupting the underlying wait is not surfaced as an
    /// error: per spec, `Interrupted` yields an empty batch rather than
    /// a real event, so this simply re-enters the wait.
    pub fn wait(&self) -> Result<Vec<Event>, TransportError> {
        loop {
            match self.poll(-1) {
                Ok(events) => return Ok(events),
                Err(TransportError::Io(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Like [`Reactor::wait`], but gives up after `timeout` with an
    /// empty batch if nothing became ready.
    ///
    /// Elapsed time is measured with [`std::time::Instant`]
    /// (monotonic, immune to wall-clock adjustment), not `SystemTime`.
    /// `epoll_wait`'s own timeout is
    /// re-armed with the remaining budget across `EINTR` retries so a
    /// signal delivered mid-wait cannot silently extend the deadline.
    pub fn timed_wait(&self, timeout: Duration) -> Result<Vec<Event>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let millis = remaining.as_millis().min(i32::MAX as u128) as i32;
            match self.poll(millis) {
                Ok(events) => return Ok(events),
                Err(TransportError::Io(e)) if e.kind() == std::io::ErrorKind::Interrupted => {
                    if Instant::now() >= deadline {
                        return Ok(Vec::new());
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn poll(&self, timeout_millis: i32) -> Result<Vec<Event>, TransportError> {
        const MAX_EVENTS: usize = 256;
        let mut raw: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };

        let n = unsafe {
            libc::epoll_wait(self.epoll_fd, raw.as_mut_ptr(), MAX_EVENTS as i32, timeout_millis)
        };
        if n < 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }

        let mut out = Vec::with_capacity(n as usize);
        for ev in &raw[..n as usize] {
            let fd = ev.u64 as RawFd;
            if fd == self.wake.raw_fd() {
                self.wake.drain();
                continue;
            }
            out.push(Event {
                fd,
                readable: ev.events & (libc::EPOLLIN as u32) != 0,
                writable: ev.events & (libc::EPOLLOUT as u32) != 0,
                error: ev.events & ((libc::EPOLLERR | libc::EPOLLHUP) as u32) != 0,
            });
        }
        Ok(out)
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

// SAFETY: all mutable state (the registration map) is behind a mutex;
// the raw fds are only ever touched through epoll_ctl/epoll_wait,
// which are safe to call concurrently from multiple threads.
unsafe impl Send for Reactor {}
unsafe impl Sync for Reactor {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_readable_once_peer_writes() {
        let (a, b) = UnixStream::pair().unwrap();
        let reactor = Reactor::new().unwrap();
        reactor.add(b.as_raw_fd(), Interest::READABLE).unwrap();

        a.set_nonblocking(true).unwrap();
        use std::io::Write;
        (&a).write_all(b"hi").unwrap();

        let events = reactor.timed_wait(Duration::from_secs(1)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd, b.as_raw_fd());
        assert!(events[0].readable);
    }

    #[test]
    fn timed_wait_returns_empty_on_timeout() {
        let (_a, b) = UnixStream::pair().unwrap();
        let reactor = Reactor::new().unwrap();
        reactor.add(b.as_raw_fd(), Interest::READABLE).unwrap();

        let start = Instant::now();
        let events = reactor.timed_wait(Duration::from_millis(50)).unwrap();
        assert!(events.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn wake_interrupts_a_blocked_wait() {
        use std::sync::Arc;
        let reactor = Arc::new(Reactor::new().unwrap());
        let r2 = Arc::clone(&reactor);

        let handle = std::thread::spawn(move || r2.wait().unwrap());
        std::thread::sleep(Duration::from_millis(50));
        reactor.wake();

        let events = handle.join().unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn one_shot_registration_fires_once_until_rearmed() {
        let (a, b) = UnixStream::pair().unwrap();
        let reactor = Reactor::new().unwrap();
        reactor
            .add(b.as_raw_fd(), Interest::READABLE.one_shot())
            .unwrap();

        a.set_nonblocking(true).unwrap();
        use std::io::Write;
        (&a).write_all(b"one").unwrap();

        let events = reactor.timed_wait(Duration::from_millis(200)).unwrap();
        assert_eq!(events.len(), 1);

        // Disarmed until modify() re-arms it, even though there is
        // still unread data on the socket.
        let events = reactor.timed_wait(Duration::from_millis(100)).unwrap();
        assert!(events.is_empty());

        reactor
            .modify(b.as_raw_fd(), Interest::READABLE.one_shot())
            .unwrap();
        let events = reactor.timed_wait(Duration::from_millis(200)).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn remove_stops_future_notifications() {
        let (a, b) = UnixStream::pair().unwrap();
        let reactor = Reactor::new().unwrap();
        reactor.add(b.as_raw_fd(), Interest::READABLE).unwrap();
        reactor.remove(b.as_raw_fd());

        a.set_nonblocking(true).unwrap();
        use std::io::Write;
        (&a).write_all(b"hi").unwrap();

        let events = reactor.timed_wait(Duration::from_millis(50)).unwrap();
        assert!(events.is_empty());
    }
}
