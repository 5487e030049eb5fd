//! Turning stream events into typed [`Message`]s.
//!
//! Classification is two explicit tables. [`classify_header_block`] decides,
//! when a header block completes, what that block makes of its stream
//! direction. [`message_kind`] then maps direction and header state onto
//! the kind of every gRPC message extracted afterwards. Neither table looks
//! at payload bytes.

use std::time::SystemTime;

use bytes::Bytes;

use crate::{
    endpoint::{ConnectionKey, Direction},
    headers::HeaderMap,
    message::{Message, MessageKind},
    metrics,
    stream::{HeaderState, StreamEvent},
};

/// Classify a decoded header block.
///
/// Returns the new header state for the direction and whether the block is
/// a trailer block. A block arriving after the direction was already
/// classified is a trailer block and leaves the classification unchanged.
#[must_use]
pub fn classify_header_block(
    direction: Direction,
    current: HeaderState,
    headers: &HeaderMap,
) -> (HeaderState, bool) {
    match (direction, current) {
        (Direction::ClientToServer, HeaderState::Awaiting) => {
            if headers.method() == Some("POST") {
                (HeaderState::Request, false)
            } else {
                (HeaderState::Unrecognized, false)
            }
        }
        (Direction::ServerToClient, HeaderState::Awaiting) => {
            if headers.status().is_some() {
                (HeaderState::Response, false)
            } else {
                (HeaderState::Unrecognized, false)
            }
        }
        (_, HeaderState::Undecodable) => (HeaderState::Undecodable, false),
        (_, classified) => (classified, true),
    }
}

/// Kind of a gRPC message given where it travelled and what the headers said.
#[must_use]
pub const fn message_kind(direction: Direction, state: HeaderState) -> MessageKind {
    match (direction, state) {
        (Direction::ClientToServer, HeaderState::Request) => MessageKind::Request,
        (Direction::ServerToClient, HeaderState::Response) => MessageKind::Response,
        _ => MessageKind::Unknown,
    }
}

/// Builds messages for one connection.
#[derive(Clone, Copy, Debug)]
pub struct MessageAssembler {
    connection: ConnectionKey,
}

impl MessageAssembler {
    #[must_use]
    pub const fn new(connection: ConnectionKey) -> Self { Self { connection } }

    /// Build the message for `event`, stamped with `timestamp`.
    #[must_use]
    pub fn assemble(&self, event: StreamEvent, timestamp: SystemTime) -> Message {
        let message = match event {
            StreamEvent::HeaderBlock {
                stream_id,
                direction,
                headers,
                trailers,
                path,
            } => Message {
                kind: MessageKind::Header,
                connection: self.connection,
                stream_id,
                direction,
                timestamp,
                path,
                headers: Some(headers),
                trailers,
                compressed: false,
                payload: Bytes::new(),
            },
            StreamEvent::GrpcMessage {
                stream_id,
                direction,
                header_state,
                frame,
                path,
            } => Message {
                kind: message_kind(direction, header_state),
                connection: self.connection,
                stream_id,
                direction,
                timestamp,
                path,
                headers: None,
                trailers: false,
                compressed: frame.compressed,
                payload: frame.payload,
            },
        };
        metrics::inc_messages(message.kind);
        message
    }
}
