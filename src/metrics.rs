//! A minimal structured metrics registry for framing's per-path counters.
//!
//! Deliberately small: a fixed set of named counters, each a plain
//! `AtomicU64`, no dynamic registration and no label cardinality, at
//! roughly one atomic add per record. Counter names are observable to
//! an external sink (something outside this crate can read
//! [`FramingMetrics::snapshot`]) but are not part of the core's
//! contract.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-path counters for [`crate::framing`]'s read/write operations.
#[derive(Default)]
pub struct FramingMetrics {
    pub writes_ok: AtomicU64,
    pub write_bytes: AtomicU64,
    pub write_too_large: AtomicU64,
    pub write_peer_closed: AtomicU64,
    pub write_io_errors: AtomicU64,

    pub reads_ok: AtomicU64,
    pub read_bytes: AtomicU64,
    pub read_would_block: AtomicU64,
    pub read_malformed: AtomicU64,
    pub read_unsupported_version: AtomicU64,
    pub read_too_large: AtomicU64,
    pub read_buffer_too_small: AtomicU64,
    pub read_peer_closed: AtomicU64,
    pub read_io_errors: AtomicU64,
}

/// A point-in-time copy of every counter, for an external sink to export.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramingMetricsSnapshot {
    pub writes_ok: u64,
    pub write_bytes: u64,
    pub write_too_large: u64,
    pub write_peer_closed: u64,
    pub write_io_errors: u64,
    pub reads_ok: u64,
    pub read_bytes: u64,
    pub read_would_block: u64,
    pub read_malformed: u64,
    pub read_unsupported_version: u64,
    pub read_too_large: u64,
    pub read_buffer_too_small: u64,
    pub read_peer_closed: u64,
    pub read_io_errors: u64,
}

impl FramingMetrics {
    pub const fn new() -> Self {
        Self {
            writes_ok: AtomicU64::new(0),
            write_bytes: AtomicU64::new(0),
            write_too_large: AtomicU64::new(0),
            write_peer_closed: AtomicU64::new(0),
            write_io_errors: AtomicU64::new(0),
            reads_ok: AtomicU64::new(0),
            read_bytes: AtomicU64::new(0),
            read_would_block: AtomicU64::new(0),
            read_malformed: AtomicU64::new(0),
            read_unsupported_version: AtomicU64::new(0),
            read_too_large: AtomicU64::new(0),
            read_buffer_too_small: AtomicU64::new(0),
            read_peer_closed: AtomicU64::new(0),
            read_io_errors: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> FramingMetricsSnapshot {
        FramingMetricsSnapshot {
            writes_ok: self.writes_ok.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            write_too_large: self.write_too_large.load(Ordering::Relaxed),
            write_peer_closed: self.write_peer_closed.load(Ordering::Relaxed),
            write_io_errors: self.write_io_errors.load(Ordering::Relaxed),
            reads_ok: self.reads_ok.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            read_would_block: self.read_would_block.load(Ordering::Relaxed),
            read_malformed: self.read_malformed.load(Ordering::Relaxed),
            read_unsupported_version: self.read_unsupported_version.load(Ordering::Relaxed),
            read_too_large: self.read_too_large.load(Ordering::Relaxed),
            read_buffer_too_small: self.read_buffer_too_small.load(Ordering::Relaxed),
            read_peer_closed: self.read_peer_closed.load(Ordering::Relaxed),
            read_io_errors: self.read_io_errors.load(Ordering::Relaxed),
        }
    }
}

/// The process-wide instance framing operations record against.
pub static FRAMING: FramingMetrics = FramingMetrics::new();

#[inline]
pub(crate) fn record_write_ok(bytes: u64) {
    FRAMING.writes_ok.fetch_add(1, Ordering::Relaxed);
    FRAMING.write_bytes.fetch_add(bytes, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_read_ok(bytes: u64) {
    FRAMING.reads_ok.fetch_add(1, Ordering::Relaxed);
    FRAMING.read_bytes.fetch_add(bytes, Ordering::Relaxed);
}
