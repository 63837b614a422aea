//! S6: waking a reactor with no real events ready returns an empty
//! batch promptly, and the wake fd itself is never exposed to the caller.

use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use transport_core::reactor::{Interest, Reactor};

#[test]
fn wake_with_no_real_events_returns_empty_promptly() {
    let (_a, b) = UnixStream::pair().unwrap();
    let reactor = Reactor::new().unwrap();
    reactor.add(b.as_raw_fd(), Interest::READABLE).unwrap();

    reactor.wake();

    let start = Instant::now();
    let events = reactor.timed_wait(Duration::from_secs(1)).unwrap();
    assert!(events.is_empty());
    assert!(start.elapsed() < Duration::from_millis(200));
}
