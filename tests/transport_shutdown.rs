//! S8: shutdown blocks until every outstanding buffer is released.
//!
//! Kept in its own test binary so this file's `shutdown_transport`
//! call — which permanently marks the process-wide singleton as
//! shutting down — cannot affect any other integration test's shared
//! state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use transport_core::transport::{acquire_rx, init_transport, release_rx, shutdown_transport};

#[test]
fn s8_shutdown_waits_for_outstanding_users() {
    init_transport(4, 4, 64).unwrap();
    let held = acquire_rx().unwrap().expect("rx pool should have room");

    let finished = Arc::new(AtomicBool::new(false));
    let finished2 = Arc::clone(&finished);
    let shutdown_thread = std::thread::spawn(move || {
        shutdown_transport().unwrap();
        finished2.store(true, Ordering::SeqCst);
    });

    std::thread::sleep(Duration::from_millis(60));
    assert!(
        !finished.load(Ordering::SeqCst),
        "shutdown must not return while a buffer is held"
    );

    release_rx(held).unwrap();
    shutdown_thread.join().unwrap();
    assert!(finished.load(Ordering::SeqCst));

    assert!(acquire_rx().unwrap().is_none(), "acquire after shutdown must return None");
}
