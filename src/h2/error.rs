//! Error types raised while decoding HTTP/2 framing.
//!
//! [`FrameError`] describes a framing violation. Any of them makes the whole
//! connection unrecoverable because frame boundaries can no longer be
//! trusted. HPACK failures are reported separately through [`HpackError`]
//! and only poison the direction that produced them.

use thiserror::Error;

use super::frame::FrameType;

/// HTTP/2 error codes carried by RST_STREAM and GOAWAY (RFC 9113 Section 7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    /// A code outside the registry; receivers treat it as INTERNAL_ERROR.
    Unknown(u32),
}

impl ErrorCode {
    /// Map a wire value onto a known code.
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            other => Self::Unknown(other),
        }
    }
}

/// Framing violations observed on a connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The frame type is not defined by RFC 9113 and strict parsing is on.
    #[error("unknown frame type {kind:#04x}")]
    UnknownFrameType { kind: u8 },

    /// Declared payload length exceeds the negotiated maximum frame size.
    #[error("frame of {length} bytes exceeds max frame size {max}")]
    FrameTooLarge { length: u32, max: u32 },

    /// A fixed-size frame carries a payload of the wrong size.
    #[error("{frame:?} frame has invalid length {length}")]
    InvalidLength { frame: FrameType, length: u32 },

    /// The frame is on stream zero when it must not be, or vice versa.
    #[error("{frame:?} frame is not allowed on stream {stream_id}")]
    InvalidStreamId { frame: FrameType, stream_id: u32 },

    /// CONTINUATION arrived without an open header block on that stream.
    #[error("unexpected CONTINUATION on stream {stream_id}")]
    UnexpectedContinuation { stream_id: u32 },

    /// Another frame interrupted an open header block.
    #[error("header block on stream {open_stream} interrupted by frame type {kind:#04x} on stream {stream_id}")]
    InterruptedHeaderBlock {
        open_stream: u32,
        kind: u8,
        stream_id: u32,
    },

    /// Padding length is not smaller than the payload carrying it.
    #[error("padding of {pad_len} bytes exceeds payload of {payload_len} bytes")]
    InvalidPadding { pad_len: usize, payload_len: usize },

    /// An accumulated header block grew beyond the configured cap.
    #[error("header block on stream {stream_id} exceeds {max} bytes")]
    HeaderBlockTooLarge { stream_id: u32, max: usize },

    /// A SETTINGS parameter carries a value RFC 9113 forbids.
    #[error("invalid SETTINGS value {value} for parameter {id:#06x}")]
    InvalidSetting { id: u16, value: u32 },
}

/// Header-compression failures, scoped to one direction.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HpackError {
    /// The decoder rejected the header block.
    #[error("HPACK decode failed: {0}")]
    Decode(String),
    /// An earlier failure left the dynamic table in an unknown state.
    #[error("HPACK context poisoned by an earlier failure")]
    Poisoned,
}
