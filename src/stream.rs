//! Per-stream lifecycle tracking and gRPC message extraction.
//!
//! [`StreamTable`] holds every live HTTP/2 stream of one connection. It
//! applies frame events to stream state, classifies header blocks, and cuts
//! DATA payloads into complete gRPC messages. The table never builds
//! [`Message`](crate::message::Message)s itself; it reports
//! [`StreamEvent`]s for the assembler.

use std::collections::{HashMap, hash_map::Entry};

use tracing::{debug, warn};

use crate::{
    assembler::classify_header_block,
    endpoint::Direction,
    grpc::{GrpcBuffer, GrpcFrame},
    h2::HpackError,
    headers::HeaderMap,
};

/// Lifecycle of one stream, as seen from the client.
///
/// "Local" is the client (request) side and "remote" the server side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    /// The client has sent END_STREAM.
    HalfClosedLocal,
    /// The server has sent END_STREAM.
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    fn end_stream(self, direction: Direction) -> Self {
        match (self, direction) {
            (Self::Idle | Self::Open, Direction::ClientToServer) => Self::HalfClosedLocal,
            (Self::Idle | Self::Open, Direction::ServerToClient) => Self::HalfClosedRemote,
            (Self::HalfClosedRemote, Direction::ClientToServer)
            | (Self::HalfClosedLocal, Direction::ServerToClient)
            | (Self::Closed, _) => Self::Closed,
            (state, _) => state,
        }
    }
}

/// What the header blocks seen so far say about one stream direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderState {
    /// No header block has been decoded yet.
    Awaiting,
    /// Client headers of a gRPC request.
    Request,
    /// Server headers of a gRPC response.
    Response,
    /// Headers were decoded but do not describe gRPC traffic.
    Unrecognized,
    /// The header block could not be decompressed.
    Undecodable,
}

/// Output of the stream table, consumed by the assembler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// A header block finished decoding.
    HeaderBlock {
        stream_id: u32,
        direction: Direction,
        headers: HeaderMap,
        trailers: bool,
        path: Option<String>,
    },
    /// A complete gRPC message was extracted from DATA frames.
    GrpcMessage {
        stream_id: u32,
        direction: Direction,
        header_state: HeaderState,
        frame: GrpcFrame,
        path: Option<String>,
    },
}

#[derive(Debug)]
struct Half {
    headers: HeaderState,
    buffer: GrpcBuffer,
    ended: bool,
    overflowed: bool,
}

impl Half {
    fn new(max_message_size: usize) -> Self {
        Self {
            headers: HeaderState::Awaiting,
            buffer: GrpcBuffer::new(max_message_size),
            ended: false,
            overflowed: false,
        }
    }
}

/// One HTTP/2 stream.
#[derive(Debug)]
pub struct Stream {
    id: u32,
    state: StreamState,
    path: Option<String>,
    halves: [Half; 2],
}

impl Stream {
    fn new(id: u32, max_message_size: usize) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            path: None,
            halves: [Half::new(max_message_size), Half::new(max_message_size)],
        }
    }

    /// Stream identifier.
    #[must_use]
    pub fn id(&self) -> u32 { self.id }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StreamState { self.state }

    /// Method path recorded from the request headers.
    #[must_use]
    pub fn path(&self) -> Option<&str> { self.path.as_deref() }

    /// Header classification for `direction`.
    #[must_use]
    pub fn header_state(&self, direction: Direction) -> HeaderState {
        self.halves[direction.index()].headers
    }

    /// Partial gRPC bytes buffered for `direction`.
    #[must_use]
    pub fn buffered(&self, direction: Direction) -> usize {
        self.halves[direction.index()].buffer.len()
    }

    fn open(&mut self) {
        if self.state == StreamState::Idle {
            self.state = StreamState::Open;
        }
    }

    fn end(&mut self, direction: Direction) {
        let half = &mut self.halves[direction.index()];
        if !half.buffer.is_empty() {
            debug!(
                stream_id = self.id,
                %direction,
                discarded = half.buffer.len(),
                "discarding incomplete gRPC message at end of stream"
            );
        }
        half.buffer.clear();
        half.ended = true;
        self.state = self.state.end_stream(direction);
    }
}

/// Live streams of one connection.
#[derive(Debug)]
pub struct StreamTable {
    streams: HashMap<u32, Stream>,
    /// Highest client-initiated (odd) and server-initiated (even) ids seen.
    highest: [u32; 2],
    max_message_size: usize,
}

impl StreamTable {
    /// Create an empty table enforcing `max_message_size` per gRPC message.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            streams: HashMap::new(),
            highest: [0; 2],
            max_message_size,
        }
    }

    /// Look up a live stream.
    #[must_use]
    pub fn get(&self, stream_id: u32) -> Option<&Stream> { self.streams.get(&stream_id) }

    /// Number of live streams.
    #[must_use]
    pub fn len(&self) -> usize { self.streams.len() }

    /// Whether no stream is live.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.streams.is_empty() }

    fn parity(stream_id: u32) -> usize { usize::from(stream_id % 2 == 0) }

    fn note_opened(&mut self, stream_id: u32) {
        let slot = &mut self.highest[Self::parity(stream_id)];
        *slot = (*slot).max(stream_id);
    }

    /// The live stream `stream_id`, opening it if the id is new. Ids at or
    /// below the highest of their parity belong to closed streams.
    fn stream_for_headers(&mut self, stream_id: u32) -> Option<&mut Stream> {
        let max = self.max_message_size;
        match self.streams.entry(stream_id) {
            Entry::Occupied(entry) => Some(entry.into_mut()),
            Entry::Vacant(entry) => {
                let highest = &mut self.highest[Self::parity(stream_id)];
                if stream_id <= *highest {
                    return None;
                }
                *highest = stream_id;
                Some(entry.insert(Stream::new(stream_id, max)))
            }
        }
    }

    /// Apply a completed header block.
    pub fn on_headers(
        &mut self,
        direction: Direction,
        stream_id: u32,
        headers: Result<HeaderMap, HpackError>,
        end_stream: bool,
        out: &mut Vec<StreamEvent>,
    ) {
        let Some(stream) = self.stream_for_headers(stream_id) else {
            debug!(stream_id, %direction, "header block for closed stream dropped");
            return;
        };
        stream.open();
        let half = &mut stream.halves[direction.index()];
        match headers {
            Ok(headers) => {
                let (state, trailers) = classify_header_block(direction, half.headers, &headers);
                half.headers = state;
                if state == HeaderState::Request && !trailers {
                    stream.path = headers.path().map(str::to_owned);
                }
                out.push(StreamEvent::HeaderBlock {
                    stream_id,
                    direction,
                    headers,
                    trailers,
                    path: stream.path.clone(),
                });
            }
            Err(err) => {
                debug!(stream_id, %direction, error = %err, "header block undecodable");
                if half.headers == HeaderState::Awaiting {
                    half.headers = HeaderState::Undecodable;
                }
            }
        }
        if end_stream {
            stream.end(direction);
        }
        self.reap(stream_id);
    }

    /// Record a PUSH_PROMISE, reserving the promised stream.
    ///
    /// The promised request headers give the pushed stream its path; no
    /// message is produced for the promise itself.
    pub fn on_push_promise(
        &mut self,
        stream_id: u32,
        promised_stream_id: u32,
        headers: Result<HeaderMap, HpackError>,
    ) {
        let path = match headers {
            Ok(headers) => headers.path().map(str::to_owned),
            Err(err) => {
                debug!(stream_id, promised_stream_id, error = %err, "push promise undecodable");
                None
            }
        };
        let Some(promised) = self.stream_for_headers(promised_stream_id) else {
            debug!(stream_id, promised_stream_id, "push promise for used stream id dropped");
            return;
        };
        promised.path = path;
        // Pushed streams carry no client data.
        promised.halves[Direction::ClientToServer.index()].ended = true;
        promised.state = StreamState::HalfClosedLocal;
    }

    /// Apply a DATA payload, extracting every complete gRPC message.
    ///
    /// DATA for a stream that is not live opens it only when the id is above
    /// every id opened so far (a stream already in flight when capture
    /// began); otherwise the stream has closed and the payload is dropped.
    pub fn on_data(
        &mut self,
        direction: Direction,
        stream_id: u32,
        payload: &[u8],
        end_stream: bool,
        out: &mut Vec<StreamEvent>,
    ) {
        let max = self.max_message_size;
        let stream = match self.streams.entry(stream_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if stream_id <= self.highest[Self::parity(stream_id)] {
                    debug!(stream_id, %direction, "DATA for closed stream dropped");
                    return;
                }
                let slot = &mut self.highest[Self::parity(stream_id)];
                *slot = stream_id;
                entry.insert(Stream::new(stream_id, max))
            }
        };
        stream.open();

        let half = &mut stream.halves[direction.index()];
        if half.ended || half.overflowed {
            debug!(stream_id, %direction, "DATA after end of direction dropped");
        } else {
            half.buffer.push(payload);
            loop {
                match half.buffer.try_next() {
                    Ok(Some(frame)) => out.push(StreamEvent::GrpcMessage {
                        stream_id,
                        direction,
                        header_state: half.headers,
                        frame,
                        path: stream.path.clone(),
                    }),
                    Ok(None) => break,
                    Err(err) => {
                        warn!(stream_id, %direction, error = %err, "abandoning stream direction");
                        half.overflowed = true;
                        half.headers = HeaderState::Unrecognized;
                        break;
                    }
                }
            }
        }
        if end_stream {
            stream.end(direction);
        }
        self.reap(stream_id);
    }

    /// Terminate a stream after RST_STREAM, discarding buffered bytes.
    pub fn on_reset(&mut self, stream_id: u32) {
        self.note_opened(stream_id);
        if let Some(stream) = self.streams.remove(&stream_id) {
            debug!(
                stream_id,
                discarded = stream.halves.iter().map(|half| half.buffer.len()).sum::<usize>(),
                "stream reset"
            );
        }
    }

    /// Terminate streams a GOAWAY sent in `direction` declares unprocessed.
    ///
    /// GOAWAY names the last stream initiated by its receiver that the sender
    /// will process; higher ids of the receiver's parity are dropped.
    pub fn on_go_away(&mut self, direction: Direction, last_stream_id: u32) {
        let receiver_parity = match direction {
            Direction::ServerToClient => 1,
            Direction::ClientToServer => 0,
        };
        self.streams
            .retain(|id, _| id % 2 != receiver_parity || *id <= last_stream_id);
    }

    /// Drop every stream, returning how many were live.
    pub fn close_all(&mut self) -> usize {
        let live = self.streams.len();
        self.streams.clear();
        live
    }

    fn reap(&mut self, stream_id: u32) {
        if self
            .streams
            .get(&stream_id)
            .is_some_and(|stream| stream.state == StreamState::Closed)
        {
            self.streams.remove(&stream_id);
        }
    }
}
