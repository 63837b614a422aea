//! Length-prefixed wire framing.
//!
//! Wire layout for one frame:
//!
//! ```text
//! [ 4-byte BE length prefix ][ 8-byte header ][ payload ]
//! ```
//!
//! `length` covers everything after itself: `Header::WIRE_SIZE as u32 +
//! payload_len`. Two read contracts are provided:
//!
//! - [`read_message_into`]: blocking. Retries `EAGAIN` internally once
//!   any byte of the frame has been consumed, so the caller never sees
//!   a partial frame. Suited to callers not driven by the reactor.
//! - [`read_message_atomic`]: non-blocking. Never blocks; on `EAGAIN`
//!   before any byte of a new frame is read, returns `WouldBlock` with
//!   no side effects. Progress made mid-frame is retained in the
//!   caller-owned [`PartialRead`] cursor and resumed on the next call,
//!   so bytes already off the wire are never lost or duplicated.

mod header;
mod io;
mod partial;

pub use header::{flags, Header, PROTOCOL_VERSION};
pub use partial::PartialRead;

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};

use partial::Stage;

use crate::error::TransportError;
use crate::metrics;

/// Default cap on a single frame's payload (2 MiB).
pub const DEFAULT_MAX_PAYLOAD: u32 = 2 * 1024 * 1024;

/// Absolute ceiling [`framing_init`] cannot exceed (64 MiB).
pub const HARD_CAP_MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

static MAX_PAYLOAD: AtomicU32 = AtomicU32::new(DEFAULT_MAX_PAYLOAD);

/// Sets the process-wide maximum payload size, clamped to
/// [`HARD_CAP_MAX_PAYLOAD`]. Call once during transport setup; later
/// calls simply replace the limit for subsequently framed messages.
pub fn framing_init(max_payload: u32) {
    MAX_PAYLOAD.store(max_payload.min(HARD_CAP_MAX_PAYLOAD), Ordering::Relaxed);
}

/// Current process-wide maximum payload size.
pub fn framing_get_max_payload() -> u32 {
    MAX_PAYLOAD.load(Ordering::Relaxed)
}

fn length_prefix(payload_len: u32) -> [u8; 4] {
    (Header::WIRE_SIZE as u32 + payload_len).to_be_bytes()
}

/// Writes one frame to `fd`: length prefix, header, then payload.
///
/// Issues a single scatter `writev` of all three regions first. If
/// that falls short (a non-blocking fd, or backpressure), the
/// remainder is finished with a linear blocking-retry loop — a short
/// write never leaves a half-frame on the wire with no way to
/// complete it.
pub fn write_message(fd: RawFd, msg_type: u8, flags: u8, payload: &[u8]) -> Result<(), TransportError> {
    let max_payload = framing_get_max_payload();
    if payload.len() as u64 > max_payload as u64 {
        metrics::FRAMING.write_too_large.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "framing: write to fd {fd} rejected: payload of {} bytes exceeds max_payload of {max_payload}",
            payload.len()
        );
        return Err(TransportError::MessageTooLarge {
            len: payload.len() as u32,
            max: max_payload,
        });
    }

    let header = Header::new(msg_type, flags, payload.len() as u32);
    let prefix = length_prefix(header.payload_len);
    let header_bytes = header.to_wire_bytes();
    let regions: [&[u8]; 3] = [&prefix, &header_bytes, payload];
    let total_len: usize = regions.iter().map(|r| r.len()).sum();

    let result = (|| -> Result<(), TransportError> {
        let written = io::writev_once(fd, &regions)?;
        if written >= total_len {
            return Ok(());
        }

        // Short write: flatten the remainder into one linear buffer and
        // finish it with the blocking-retry fallback.
        let mut remainder = Vec::with_capacity(total_len - written);
        let mut skip = written;
        for region in regions {
            if skip >= region.len() {
                skip -= region.len();
                continue;
            }
            remainder.extend_from_slice(&region[skip..]);
            skip = 0;
        }
        io::write_all_blocking(fd, &remainder)
    })();

    match &result {
        Ok(()) => metrics::record_write_ok(total_len as u64),
        Err(TransportError::PeerClosed) => {
            metrics::FRAMING.write_peer_closed.fetch_add(1, Ordering::Relaxed);
            log::warn!("framing: write to fd {fd} failed: peer closed connection mid-frame");
        }
        Err(e) => {
            metrics::FRAMING.write_io_errors.fetch_add(1, Ordering::Relaxed);
            log::warn!("framing: write to fd {fd} failed: {e}");
        }
    }
    result
}

/// Bumps the matching counter and, for a genuine I/O failure, logs it.
///
/// Covers the three read-path failure kinds a short-circuiting `?` can
/// propagate out of the raw read helpers (`WouldBlock`, `PeerClosed`,
/// `Io`); the other read failures (malformed, unsupported version, too
/// large, buffer too small) are recorded at their own call sites since
/// each needs its own message.
fn record_read_failure(fd: RawFd, err: &TransportError) {
    match err {
        // Routine backpressure on a non-blocking fd, not a failure worth
        // logging — only counted.
        TransportError::WouldBlock => {
            metrics::FRAMING.read_would_block.fetch_add(1, Ordering::Relaxed);
        }
        TransportError::PeerClosed => {
            metrics::FRAMING.read_peer_closed.fetch_add(1, Ordering::Relaxed);
            log::warn!("framing: read from fd {fd} failed: peer closed connection mid-frame");
        }
        TransportError::Io(e) => {
            metrics::FRAMING.read_io_errors.fetch_add(1, Ordering::Relaxed);
            log::warn!("framing: read from fd {fd} failed: {e}");
        }
        _ => {}
    }
}

fn validate_header(fd: RawFd, header: &Header) -> Result<(), TransportError> {
    if header.version != PROTOCOL_VERSION {
        metrics::FRAMING.read_unsupported_version.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "framing: fd {fd} sent unsupported wire version 0x{:04x}",
            header.version
        );
        return Err(TransportError::UnsupportedVersion(header.version));
    }
    let max_payload = framing_get_max_payload();
    if header.payload_len > max_payload {
        metrics::FRAMING.read_too_large.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "framing: fd {fd} declared payload of {} bytes, exceeding max_payload of {max_payload}",
            header.payload_len
        );
        return Err(TransportError::MessageTooLarge {
            len: header.payload_len,
            max: max_payload,
        });
    }
    Ok(())
}

/// Reads one frame from `fd` into `payload_out`, blocking as needed.
///
/// `payload_out` must be at least `payload_len` bytes once the header
/// is known; a shorter buffer fails with [`TransportError::BufferTooSmall`]
/// after the header has already been consumed off the wire (the frame
/// is lost — this contract is for callers who size buffers up front).
/// Returns the decoded header and the number of payload bytes written.
pub fn read_message_into(fd: RawFd, payload_out: &mut [u8]) -> Result<(Header, usize), TransportError> {
    let mut prefix = [0u8; 4];
    if let Err(e) = io::read_exact_blocking(fd, &mut prefix, true) {
        record_read_failure(fd, &e);
        return Err(e);
    }
    let total = u32::from_be_bytes(prefix);
    if (total as usize) < Header::WIRE_SIZE {
        metrics::FRAMING.read_malformed.fetch_add(1, Ordering::Relaxed);
        log::warn!("framing: fd {fd} sent malformed frame: length prefix {total} smaller than header size");
        return Err(TransportError::MalformedFrame);
    }

    let mut header_buf = [0u8; Header::WIRE_SIZE];
    if let Err(e) = io::read_exact_blocking(fd, &mut header_buf, false) {
        record_read_failure(fd, &e);
        return Err(e);
    }
    let header = Header::from_wire_bytes(&header_buf);
    validate_header(fd, &header)?;

    let payload_len = header.payload_len as usize;
    if total as usize != Header::WIRE_SIZE + payload_len {
        metrics::FRAMING.read_malformed.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "framing: fd {fd} sent malformed frame: length prefix {total} inconsistent with header payload_len {payload_len}"
        );
        return Err(TransportError::MalformedFrame);
    }
    if payload_len > payload_out.len() {
        metrics::FRAMING.read_buffer_too_small.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "framing: fd {fd} payload of {payload_len} bytes does not fit caller buffer of {} bytes",
            payload_out.len()
        );
        return Err(TransportError::BufferTooSmall {
            needed: payload_len as u32,
            have: payload_out.len(),
        });
    }

    if let Err(e) = io::read_exact_blocking(fd, &mut payload_out[..payload_len], false) {
        record_read_failure(fd, &e);
        return Err(e);
    }
    metrics::record_read_ok((Header::WIRE_SIZE + payload_len) as u64);
    Ok((header, payload_len))
}

/// Reads one frame from a non-blocking `fd` without ever losing or
/// duplicating bytes across `WouldBlock` returns.
///
/// `state` persists this connection's in-flight stage between calls.
/// Returns `Ok(Some((header, len)))` once a full frame has landed in
/// `payload_out`, `Ok(None)` (via `Err(WouldBlock)`) when the socket
/// has no more bytes right now, or a fatal framing error — after which
/// `state` has already been reset and the connection should be torn
/// down.
pub fn read_message_atomic(
    fd: RawFd,
    state: &mut PartialRead,
    payload_out: &mut [u8],
) -> Result<(Header, usize), TransportError> {
    loop {
        match *state.stage_mut() {
            Stage::Length { mut have, mut buf } => {
                let n = match io::read_some_nonblocking(fd, &mut buf[have..]) {
                    Ok(n) => n,
                    Err(e) => {
                        state.reset();
                        record_read_failure(fd, &e);
                        return Err(e);
                    }
                };
                if n == 0 {
                    if have == 0 {
                        record_read_failure(fd, &TransportError::WouldBlock);
                        return Err(TransportError::WouldBlock);
                    }
                    state.set_stage(Stage::Length { have, buf });
                    record_read_failure(fd, &TransportError::WouldBlock);
                    return Err(TransportError::WouldBlock);
                }
                have += n;
                if have < buf.len() {
                    state.set_stage(Stage::Length { have, buf });
                    record_read_failure(fd, &TransportError::WouldBlock);
                    return Err(TransportError::WouldBlock);
                }

                let total = u32::from_be_bytes(buf);
                if (total as usize) < Header::WIRE_SIZE {
                    state.reset();
                    metrics::FRAMING.read_malformed.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "framing: fd {fd} sent malformed frame: length prefix {total} smaller than header size"
                    );
                    return Err(TransportError::MalformedFrame);
                }
                state.set_stage(Stage::Header {
                    total,
                    have: 0,
                    buf: [0; Header::WIRE_SIZE],
                });
            }

            Stage::Header { total, mut have, mut buf } => {
                let n = match io::read_some_nonblocking(fd, &mut buf[have..]) {
                    Ok(n) => n,
                    Err(e) => {
                        state.reset();
                        record_read_failure(fd, &e);
                        return Err(e);
                    }
                };
                if n == 0 {
                    state.set_stage(Stage::Header { total, have, buf });
                    record_read_failure(fd, &TransportError::WouldBlock);
                    return Err(TransportError::WouldBlock);
                }
                have += n;
                if have < buf.len() {
                    state.set_stage(Stage::Header { total, have, buf });
                    record_read_failure(fd, &TransportError::WouldBlock);
                    return Err(TransportError::WouldBlock);
                }

                let header = Header::from_wire_bytes(&buf);
                if let Err(e) = validate_header(fd, &header) {
                    state.reset();
                    return Err(e);
                }
                let payload_len = header.payload_len as usize;
                if total as usize != Header::WIRE_SIZE + payload_len {
                    state.reset();
                    metrics::FRAMING.read_malformed.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "framing: fd {fd} sent malformed frame: length prefix {total} inconsistent with header payload_len {payload_len}"
                    );
                    return Err(TransportError::MalformedFrame);
                }
                if payload_len > payload_out.len() {
                    state.reset();
                    metrics::FRAMING.read_buffer_too_small.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "framing: fd {fd} payload of {payload_len} bytes does not fit caller buffer of {} bytes",
                        payload_out.len()
                    );
                    return Err(TransportError::BufferTooSmall {
                        needed: payload_len as u32,
                        have: payload_out.len(),
                    });
                }

                state.set_stage(Stage::Payload {
                    header,
                    have: 0,
                });
            }

            Stage::Payload { header, mut have } => {
                let payload_len = header.payload_len;
                let n = match io::read_some_nonblocking(
                    fd,
                    &mut payload_out[have as usize..payload_len as usize],
                ) {
                    Ok(n) => n,
                    Err(e) => {
                        state.reset();
                        record_read_failure(fd, &e);
                        return Err(e);
                    }
                };
                if n == 0 {
                    state.set_stage(Stage::Payload { header, have });
                    record_read_failure(fd, &TransportError::WouldBlock);
                    return Err(TransportError::WouldBlock);
                }
                have += n as u32;
                if have < payload_len {
                    state.set_stage(Stage::Payload { header, have });
                    record_read_failure(fd, &TransportError::WouldBlock);
                    return Err(TransportError::WouldBlock);
                }

                state.reset();
                metrics::record_read_ok((Header::WIRE_SIZE as u32 + payload_len) as u64);
                return Ok((header, payload_len as usize));
            }
        }
    }
}
