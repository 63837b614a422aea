//! Lock-free ring buffer, zero-copy buffer pool, length-prefixed wire
//! framing, and readiness reactor, composed by [`transport`] into a
//! process-wide `send_message`/`recv_message` transport.
//!
//! - [`ring`] — bounded MPMC queue of pointer-sized elements.
//! - [`pool`] — fixed-count, fixed-size buffer pool backed by `mmap`.
//! - [`framing`] — length-prefixed wire format, blocking and
//!   non-blocking-atomic read contracts.
//! - [`reactor`] — `epoll`-backed readiness multiplexer.
//! - [`transport`] — process-wide `TX`/`RX` pools plus
//!   `send_message`/`recv_message` and their zero-copy siblings.
//! - [`metrics`] — per-path atomic counters for the framing layer.
//! - [`error`] — the flat error taxonomy every module returns into.

pub mod error;
pub mod framing;
pub mod metrics;
pub mod pool;
pub mod reactor;
pub mod ring;
pub mod transport;

pub use error::{RingError, TransportError};
