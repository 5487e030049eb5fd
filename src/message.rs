//! Reconstructed gRPC message events.
//!
//! A [`Message`] is the unit delivered to sinks. It is built once by the
//! assembler and never modified afterwards; later observations on the same
//! stream (trailers, for example) produce new messages instead.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use serde::{Serialize, Serializer};

use crate::{
    endpoint::{ConnectionKey, Direction},
    headers::HeaderMap,
};

/// Classification of a reconstructed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A decoded header block (initial headers or trailers).
    Header,
    /// A gRPC message sent by the client on a request stream.
    Request,
    /// A gRPC message sent by the server on a response stream.
    Response,
    /// A gRPC message whose stream direction could not be classified.
    Unknown,
}

impl MessageKind {
    /// Short label used in logs, metrics and output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::Header => "header",
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// One reconstructed message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Classification.
    pub kind: MessageKind,
    /// Connection the message was observed on.
    pub connection: ConnectionKey,
    /// HTTP/2 stream identifier.
    pub stream_id: u32,
    /// Direction of travel.
    pub direction: Direction,
    /// Capture time of the segment that completed the message.
    #[serde(rename = "timestamp_us", serialize_with = "serialize_micros")]
    pub timestamp: SystemTime,
    /// Method path of the owning stream, when known.
    pub path: Option<String>,
    /// Decoded header block for [`MessageKind::Header`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMap>,
    /// Whether a header block is a trailer block.
    pub trailers: bool,
    /// gRPC compressed flag.
    pub compressed: bool,
    /// gRPC payload without the length prefix; empty for header messages.
    #[serde(serialize_with = "serialize_hex")]
    pub payload: Bytes,
}

impl Message {
    /// Microseconds since the Unix epoch of [`Message::timestamp`].
    #[must_use]
    pub fn timestamp_micros(&self) -> u64 { unix_micros(self.timestamp) }

    /// Whether this message carries gRPC payload bytes.
    #[must_use]
    pub fn has_payload(&self) -> bool { self.kind != MessageKind::Header }
}

pub(crate) fn unix_micros(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX))
}

fn serialize_micros<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(unix_micros(*time))
}

fn serialize_hex<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex(payload))
}

/// Lower-case hexadecimal rendering of `bytes`.
#[must_use]
pub fn hex(bytes: &[u8]) -> String {
    use fmt::Write as _;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
