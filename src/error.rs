//! Error taxonomy for the transport core.
//!
//! One flat enum covers every failure kind the core can surface: ring
//! fullness/emptiness, pool exhaustion, and every framing/transport
//! failure. `Interrupted` is retried internally by the callers that can
//! see it (framing's read/write loops, the reactor's `wait`) and never
//! escapes to this type.

use std::fmt;
use std::io;

/// Failure kinds surfaced by the transport core.
#[derive(Debug)]
pub enum TransportError {
    /// Capacity not a power of two, `buf_size`/`max_payload` beyond the hard cap.
    InvalidArgument(&'static str),
    /// A non-blocking operation would have blocked and consumed no bytes.
    WouldBlock,
    /// Peer performed an orderly close mid-frame.
    PeerClosed,
    /// Declared or attempted payload exceeds the configured cap.
    MessageTooLarge { len: u32, max: u32 },
    /// Caller's buffer cannot hold the incoming payload.
    BufferTooSmall { needed: u32, have: usize },
    /// Length prefix smaller than the header size.
    MalformedFrame,
    /// Wire header version does not match `PROTOCOL_VERSION`.
    UnsupportedVersion(u16),
    /// Pool exhausted at acquire time, or a backing allocation failed.
    OutOfMemory,
    /// Underlying OS error; kind preserved for the caller.
    Io(io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            TransportError::WouldBlock => write!(f, "operation would block"),
            TransportError::PeerClosed => write!(f, "peer closed connection mid-frame"),
            TransportError::MessageTooLarge { len, max } => {
                write!(f, "payload of {len} bytes exceeds max_payload of {max}")
            }
            TransportError::BufferTooSmall { needed, have } => {
                write!(f, "caller buffer of {have} bytes cannot hold {needed} byte payload")
            }
            TransportError::MalformedFrame => write!(f, "length prefix smaller than header size"),
            TransportError::UnsupportedVersion(v) => {
                write!(f, "unsupported wire version 0x{v:04x}")
            }
            TransportError::OutOfMemory => write!(f, "pool exhausted or backing allocation failed"),
            TransportError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<TransportError> for io::Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::WouldBlock => io::Error::new(io::ErrorKind::WouldBlock, e.to_string()),
            TransportError::PeerClosed => {
                io::Error::new(io::ErrorKind::BrokenPipe, e.to_string())
            }
            TransportError::OutOfMemory => {
                io::Error::new(io::ErrorKind::OutOfMemory, e.to_string())
            }
            TransportError::InvalidArgument(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            TransportError::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

/// Failures specific to [`crate::ring::Ring`].
///
/// Emptiness is not a member of this enum: `Ring::dequeue` returns
/// `Option<T>` per spec, so an empty ring is `None`, never an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// The ring is at capacity; the caller should retry or drop.
    Full,
    /// Capacity was not a power of two.
    InvalidCapacity,
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::Full => write!(f, "ring is full"),
            RingError::InvalidCapacity => write!(f, "ring capacity must be a nonzero power of two"),
        }
    }
}

impl std::error::Error for RingError {}

impl From<RingError> for TransportError {
    fn from(e: RingError) -> Self {
        match e {
            RingError::InvalidCapacity => TransportError::InvalidArgument("capacity must be a power of two"),
            RingError::Full => TransportError::OutOfMemory,
        }
    }
}
