//! Per-connection cursor for the non-blocking atomic read contract.
//!
//! A caller driven by the [`crate::reactor::Reactor`] must never lose
//! bytes to `EAGAIN` mid-frame. Rather than retry-until-blocking-looks-
//! synchronous (the [`super::read_message_into`] contract), the atomic
//! contract keeps whatever partial progress a non-blocking read made
//! in this cursor and resumes from exactly that point on the next
//! call.

use super::header::Header;

#[derive(Debug, Clone, Copy)]
pub(super) enum Stage {
    /// Reading the 4-byte big-endian length prefix.
    Length { have: usize, buf: [u8; 4] },
    /// Length prefix decoded into `total`; reading the 8-byte header.
    Header {
        total: u32,
        have: usize,
        buf: [u8; Header::WIRE_SIZE],
    },
    /// Header decoded; reading `payload_len` bytes directly into the
    /// caller's buffer, offset by `have`.
    Payload { header: Header, have: u32 },
}

const INITIAL_STAGE: Stage = Stage::Length { have: 0, buf: [0; 4] };

/// Holds in-flight frame state across non-blocking `EAGAIN` returns.
pub struct PartialRead {
    stage: Stage,
}

impl Default for PartialRead {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialRead {
    pub fn new() -> Self {
        Self { stage: INITIAL_STAGE }
    }

    pub(super) fn stage_mut(&mut self) -> &mut Stage {
        &mut self.stage
    }

    pub(super) fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Discards in-flight progress, ready to read the next frame from
    /// its length prefix. Called after a completed frame or a fatal
    /// framing error (malformed/oversized/wrong version).
    pub fn reset(&mut self) {
        self.stage = INITIAL_STAGE;
    }
}
