//! HTTP/2 frame layout (RFC 9113 Section 4).
//!
//! Every frame starts with a fixed 9-byte header:
//!
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+---------------+
//! |R|                 Stream Identifier (31)      |
//! +-+---------------------------------------------+
//! |                   Frame Payload ...           |
//! +-----------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::error::FrameError;
use crate::byte_order::{
    STREAM_ID_MASK,
    read_network_u24,
    read_stream_id,
    write_network_u24,
    write_network_u32,
};

/// Frame header size in bytes.
pub const FRAME_HEADER_LEN: usize = 9;

/// Initial SETTINGS_MAX_FRAME_SIZE before any SETTINGS frame is observed.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest value SETTINGS_MAX_FRAME_SIZE may take.
pub const MAX_ALLOWED_FRAME_SIZE: u32 = (1 << 24) - 1;

/// Client connection preface preceding the first client frame.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame types defined by RFC 9113.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

impl FrameType {
    /// Map a wire type onto a known frame type.
    #[must_use]
    pub const fn from_u8(kind: u8) -> Option<Self> {
        Some(match kind {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            _ => return None,
        })
    }

    /// Whether frames of this type must be sent on stream zero.
    const fn is_connection_level(self) -> bool {
        matches!(self, Self::Settings | Self::Ping | Self::GoAway)
    }

    /// Whether frames of this type may be sent on stream zero.
    const fn allows_stream_zero(self) -> bool {
        self.is_connection_level() || matches!(self, Self::WindowUpdate)
    }
}

/// Frame flag bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    /// END_STREAM on DATA and HEADERS.
    pub const END_STREAM: Flags = Flags(0x1);
    /// ACK on SETTINGS and PING.
    pub const ACK: Flags = Flags(0x1);
    /// END_HEADERS on HEADERS, PUSH_PROMISE and CONTINUATION.
    pub const END_HEADERS: Flags = Flags(0x4);
    /// PADDED on DATA, HEADERS and PUSH_PROMISE.
    pub const PADDED: Flags = Flags(0x8);
    /// PRIORITY on HEADERS.
    pub const PRIORITY: Flags = Flags(0x20);

    /// Wrap raw flag bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self { Self(bits) }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u8 { self.0 }

    /// Whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Flags) -> bool { self.0 & other.0 == other.0 }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags { Flags(self.0 | rhs.0) }
}

/// Decoded 9-byte frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes.
    pub length: u32,
    /// Raw frame type.
    pub kind: u8,
    /// Flag bits.
    pub flags: Flags,
    /// Stream identifier with the reserved bit cleared.
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parse a header from the start of `buf`; `None` if fewer than
    /// [`FRAME_HEADER_LEN`] bytes are available.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let header = buf.get(..FRAME_HEADER_LEN)?;
        Some(Self {
            length: read_network_u24([header[0], header[1], header[2]]),
            kind: header[3],
            flags: Flags::from_bits(header[4]),
            stream_id: read_stream_id([header[5], header[6], header[7], header[8]]),
        })
    }

    /// Serialise the header.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let [l0, l1, l2] = write_network_u24(self.length);
        let [s0, s1, s2, s3] = write_network_u32(self.stream_id & STREAM_ID_MASK);
        [l0, l1, l2, self.kind, self.flags.bits(), s0, s1, s2, s3]
    }

    /// Known frame type, if any.
    #[must_use]
    pub fn frame_type(&self) -> Option<FrameType> { FrameType::from_u8(self.kind) }

    /// Check the stream-id and length rules that depend only on the header.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] when the header violates RFC 9113.
    pub fn validate(&self, frame: FrameType) -> Result<(), FrameError> {
        let zero = self.stream_id == 0;
        if (zero && !frame.allows_stream_zero()) || (!zero && frame.is_connection_level()) {
            return Err(FrameError::InvalidStreamId {
                frame,
                stream_id: self.stream_id,
            });
        }
        let length_ok = match frame {
            FrameType::Priority => self.length == 5,
            FrameType::RstStream | FrameType::WindowUpdate => self.length == 4,
            FrameType::Ping => self.length == 8,
            FrameType::GoAway => self.length >= 8,
            FrameType::Settings if self.flags.contains(Flags::ACK) => self.length == 0,
            FrameType::Settings => self.length % 6 == 0,
            FrameType::PushPromise => self.length >= 4,
            FrameType::Data
            | FrameType::Headers
            | FrameType::Continuation => true,
        };
        if length_ok {
            Ok(())
        } else {
            Err(FrameError::InvalidLength {
                frame,
                length: self.length,
            })
        }
    }
}

/// One complete frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame header.
    pub header: FrameHeader,
    /// Payload of exactly `header.length` bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame, deriving the length from `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::FrameTooLarge`] if `payload` exceeds
    /// [`MAX_ALLOWED_FRAME_SIZE`].
    pub fn new(
        kind: FrameType,
        flags: Flags,
        stream_id: u32,
        payload: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let payload = payload.into();
        let length = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_ALLOWED_FRAME_SIZE)
            .ok_or(FrameError::FrameTooLarge {
                length: u32::try_from(payload.len()).unwrap_or(u32::MAX),
                max: MAX_ALLOWED_FRAME_SIZE,
            })?;
        Ok(Self {
            header: FrameHeader {
                length,
                kind: kind as u8,
                flags,
                stream_id,
            },
            payload,
        })
    }

    /// Append the wire encoding of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(FRAME_HEADER_LEN + self.payload.len());
        dst.put_slice(&self.header.encode());
        dst.put_slice(&self.payload);
    }
}

/// Remove the pad-length byte and trailing padding from a PADDED payload.
///
/// # Errors
///
/// Returns [`FrameError::InvalidPadding`] when the padding does not fit.
pub fn strip_padding(flags: Flags, payload: Bytes) -> Result<Bytes, FrameError> {
    if !flags.contains(Flags::PADDED) {
        return Ok(payload);
    }
    let Some(&pad_len) = payload.first() else {
        return Err(FrameError::InvalidPadding {
            pad_len: 0,
            payload_len: 0,
        });
    };
    let pad_len = usize::from(pad_len);
    if pad_len >= payload.len() {
        return Err(FrameError::InvalidPadding {
            pad_len,
            payload_len: payload.len(),
        });
    }
    Ok(payload.slice(1..payload.len() - pad_len))
}
