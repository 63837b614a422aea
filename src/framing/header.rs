//! The 8-byte versioned wire header.
//!
//! All multi-byte fields are big-endian on the wire, encoded and
//! decoded by hand rather than through a `zerocopy` dependency.

/// Current and only supported wire version.
pub const PROTOCOL_VERSION: u16 = 0x0001;

/// Recognized flag bits. The core never interprets these; they pass
/// through unchanged end to end.
pub mod flags {
    pub const NONE: u8 = 0x00;
    pub const COMPRESSED: u8 = 0x01;
    pub const ENCRYPTED: u8 = 0x02;
    pub const URGENT: u8 = 0x04;
}

/// The 8-byte control block carried inside every frame, in host order
/// once decoded.
///
/// `repr(C)` pins the in-memory field order so the layout test below
/// stays meaningful across compiler versions; the wire encoding itself
/// never touches this layout directly (see [`Header::to_wire_bytes`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Header {
    pub version: u16,
    pub msg_type: u8,
    pub flags: u8,
    pub payload_len: u32,
}

impl Header {
    /// Size of the header on the wire, in bytes.
    pub const WIRE_SIZE: usize = 8;

    /// Builds a header for an outgoing frame using the current protocol version.
    pub fn new(msg_type: u8, flags: u8, payload_len: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type,
            flags,
            payload_len,
        }
    }

    /// Encodes into wire order (big-endian).
    pub fn to_wire_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..2].copy_from_slice(&self.version.to_be_bytes());
        buf[2] = self.msg_type;
        buf[3] = self.flags;
        buf[4..8].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Decodes from wire order (big-endian) into host order.
    pub fn from_wire_bytes(buf: &[u8; Self::WIRE_SIZE]) -> Self {
        Self {
            version: u16::from_be_bytes([buf[0], buf[1]]),
            msg_type: buf[2],
            flags: buf[3],
            payload_len: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoffset::offset_of;
    use std::mem::size_of;

    #[test]
    fn host_layout_matches_repr_c_field_order() {
        // Not the wire layout (that's `to_wire_bytes`/`from_wire_bytes`)
        // — this pins the in-memory field order so a future reordering
        // of `Header`'s fields doesn't silently change size/offsets.
        assert_eq!(size_of::<Header>(), Header::WIRE_SIZE);
        assert_eq!(offset_of!(Header, version), 0);
        assert_eq!(offset_of!(Header, msg_type), 2);
        assert_eq!(offset_of!(Header, flags), 3);
        assert_eq!(offset_of!(Header, payload_len), 4);
    }

    #[test]
    fn round_trips_through_wire_bytes() {
        let h = Header::new(0x34, flags::URGENT, 42);
        let bytes = h.to_wire_bytes();
        assert_eq!(bytes[0..2], PROTOCOL_VERSION.to_be_bytes());
        let decoded = Header::from_wire_bytes(&bytes);
        assert_eq!(decoded, h);
    }

    #[test]
    fn wire_layout_matches_spec_offsets() {
        let h = Header::new(0xAB, flags::COMPRESSED, 0x0102_0304);
        let bytes = h.to_wire_bytes();
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[1], 0x01); // version 0x0001
        assert_eq!(bytes[2], 0xAB); // msg_type
        assert_eq!(bytes[3], flags::COMPRESSED);
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]); // payload_len big-endian
    }
}
