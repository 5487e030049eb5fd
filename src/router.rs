//! Mapping segments onto connections.
//!
//! Both the synchronous [`Demultiplexer`](crate::demux::Demultiplexer) and
//! the async pipeline keep a map from [`ConnectionKey`] to per-connection
//! state. [`route`] decides, for one segment, which entry it belongs to and
//! in which direction it travels, and whether a new entry should be created.

use std::collections::HashMap;

use crate::{
    endpoint::{ConnectionKey, Direction},
    segment::Segment,
};

/// Where a segment goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Route {
    /// An already tracked connection.
    Existing(ConnectionKey, Direction),
    /// A connection seen for the first time.
    New(ConnectionKey, Direction),
    /// Not worth tracking: a bare ACK/FIN/RST for an unknown connection, or
    /// traffic not involving the service port.
    Ignore,
}

/// Route `segment` against the connections in `known`.
pub(crate) fn route<V>(
    known: &HashMap<ConnectionKey, V>,
    segment: &Segment,
    service_port: Option<u16>,
) -> Route {
    let forward = ConnectionKey::new(segment.src, segment.dst);
    if known.contains_key(&forward) {
        return Route::Existing(forward, Direction::ClientToServer);
    }
    let backward = ConnectionKey::new(segment.dst, segment.src);
    if known.contains_key(&backward) {
        return Route::Existing(backward, Direction::ServerToClient);
    }
    if segment.payload.is_empty() && !segment.flags.syn {
        return Route::Ignore;
    }
    match orient(segment, service_port) {
        Some(Direction::ClientToServer) => Route::New(forward, Direction::ClientToServer),
        Some(Direction::ServerToClient) => Route::New(backward, Direction::ServerToClient),
        None => Route::Ignore,
    }
}

/// Direction of the first segment of a new connection.
///
/// The endpoint bound to the service port is the server. Without a port the
/// SYN sender is the client (a SYN-ACK comes from the server), and failing
/// that the first sender is assumed to be the client.
fn orient(segment: &Segment, service_port: Option<u16>) -> Option<Direction> {
    if let Some(port) = service_port {
        return if segment.dst.port() == port {
            Some(Direction::ClientToServer)
        } else if segment.src.port() == port {
            Some(Direction::ServerToClient)
        } else {
            None
        };
    }
    if segment.flags.syn && segment.flags.ack {
        Some(Direction::ServerToClient)
    } else {
        Some(Direction::ClientToServer)
    }
}
