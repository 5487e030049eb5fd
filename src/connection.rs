//! Per-connection reconstruction state.
//!
//! A [`Connection`] exclusively owns everything needed to turn the segments
//! of one TCP connection into messages: a reassembler per direction, the
//! HTTP/2 frame decoder with its two HPACK contexts, the stream table and
//! the message assembler. Nothing in it is shared with other connections.

use std::time::SystemTime;

use tracing::{debug, trace, warn};

use crate::{
    assembler::MessageAssembler,
    config::PipelineConfig,
    endpoint::{ConnectionKey, Direction},
    error::DecodeError,
    h2::{FrameDecoder, FrameEvent},
    message::Message,
    metrics,
    reassembly::StreamReassembler,
    segment::Segment,
    stream::{StreamEvent, StreamTable},
};

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Segments are decoded.
    Active,
    /// A framing error occurred; later segments are dropped.
    Unrecoverable,
    /// Torn down; nothing more is emitted.
    Closed,
}

/// Reconstruction state for one TCP connection.
#[derive(Debug)]
pub struct Connection {
    key: ConnectionKey,
    state: ConnectionState,
    reassemblers: [StreamReassembler; 2],
    decoder: FrameDecoder,
    streams: StreamTable,
    assembler: MessageAssembler,
    fin: [bool; 2],
    reset: bool,
}

impl Connection {
    /// Create state for `key` using the limits in `config`.
    #[must_use]
    pub fn new(key: ConnectionKey, config: &PipelineConfig) -> Self {
        Self {
            key,
            state: ConnectionState::Active,
            reassemblers: [
                StreamReassembler::new(config.reorder_window),
                StreamReassembler::new(config.reorder_window),
            ],
            decoder: FrameDecoder::new(config.decoder_limits()),
            streams: StreamTable::new(config.max_message_size),
            assembler: MessageAssembler::new(key),
            fin: [false; 2],
            reset: false,
        }
    }

    /// Identity of this connection.
    #[must_use]
    pub fn key(&self) -> ConnectionKey { self.key }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.state }

    /// Live streams.
    #[must_use]
    pub fn streams(&self) -> &StreamTable { &self.streams }

    /// The frame decoder, for inspection.
    #[must_use]
    pub fn decoder(&self) -> &FrameDecoder { &self.decoder }

    /// Whether the transport has finished: FIN seen both ways, or RST.
    #[must_use]
    pub fn is_finished(&self) -> bool { self.reset || self.fin.iter().all(|fin| *fin) }

    /// Feed one segment travelling in `direction`, appending every message
    /// it completes to `out`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the segment completes a malformed
    /// frame. The connection is then unrecoverable: its streams are dropped
    /// and later segments are ignored. Messages completed before the
    /// malformed frame remain in `out`.
    pub fn observe(
        &mut self,
        direction: Direction,
        segment: &Segment,
        out: &mut Vec<Message>,
    ) -> Result<(), DecodeError> {
        if segment.flags.fin {
            self.fin[direction.index()] = true;
        }
        if segment.flags.rst {
            self.reset = true;
        }
        if self.state != ConnectionState::Active {
            trace!(connection = %self.key, "segment for inactive connection dropped");
            return Ok(());
        }

        let reassembled = self.reassemblers[direction.index()].push(
            segment.seq,
            segment.flags.syn,
            segment.payload.clone(),
        );
        if reassembled.dropped {
            debug!(
                connection = %self.key,
                %direction,
                seq = segment.seq,
                len = segment.payload.len(),
                "segment outside reorder window dropped"
            );
            metrics::inc_dropped_segments();
        }
        if reassembled.ready.is_empty() {
            return Ok(());
        }
        for chunk in &reassembled.ready {
            self.decoder.feed(direction, chunk);
        }
        self.drain(direction, segment.timestamp, out)
    }

    fn drain(
        &mut self,
        direction: Direction,
        timestamp: SystemTime,
        out: &mut Vec<Message>,
    ) -> Result<(), DecodeError> {
        let mut events = Vec::new();
        loop {
            match self.decoder.next_event(direction) {
                Ok(Some(event)) => {
                    self.apply(direction, event, &mut events);
                    out.extend(
                        events
                            .drain(..)
                            .map(|event| self.assembler.assemble(event, timestamp)),
                    );
                }
                Ok(None) => return Ok(()),
                Err(source) => {
                    warn!(connection = %self.key, %direction, error = %source, "connection unrecoverable");
                    metrics::inc_decode_errors();
                    self.state = ConnectionState::Unrecoverable;
                    self.streams.close_all();
                    return Err(DecodeError {
                        connection: self.key,
                        source,
                    });
                }
            }
        }
    }

    fn apply(&mut self, direction: Direction, event: FrameEvent, out: &mut Vec<StreamEvent>) {
        match event {
            FrameEvent::Headers {
                stream_id,
                headers,
                end_stream,
            } => self
                .streams
                .on_headers(direction, stream_id, headers, end_stream, out),
            FrameEvent::PushPromise {
                stream_id,
                promised_stream_id,
                headers,
            } => self
                .streams
                .on_push_promise(stream_id, promised_stream_id, headers),
            FrameEvent::Data {
                stream_id,
                payload,
                end_stream,
            } => self
                .streams
                .on_data(direction, stream_id, &payload, end_stream, out),
            FrameEvent::Reset { stream_id, code } => {
                debug!(connection = %self.key, stream_id, ?code, "RST_STREAM");
                self.streams.on_reset(stream_id);
            }
            FrameEvent::GoAway {
                last_stream_id,
                code,
            } => {
                debug!(connection = %self.key, %direction, last_stream_id, ?code, "GOAWAY");
                self.streams.on_go_away(direction, last_stream_id);
            }
            FrameEvent::Settings { ack, settings } => {
                trace!(connection = %self.key, %direction, ack, count = settings.len(), "SETTINGS");
            }
            FrameEvent::Ignored { kind, stream_id } => {
                trace!(connection = %self.key, kind, stream_id, "unknown frame type skipped");
            }
            FrameEvent::Ping { .. }
            | FrameEvent::WindowUpdate { .. }
            | FrameEvent::Priority { .. } => {}
        }
    }

    /// Tear the connection down. Incomplete data is discarded and nothing is
    /// emitted afterwards.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let streams = self.streams.close_all();
        debug!(
            connection = %self.key,
            streams,
            client_buffered = self.decoder.buffered(Direction::ClientToServer),
            server_buffered = self.decoder.buffered(Direction::ServerToClient),
            "connection closed"
        );
        self.state = ConnectionState::Closed;
    }
}
