//! Stateful HTTP/2 frame decoder for one observed connection.
//!
//! [`FrameDecoder`] keeps an independent half per traffic direction: its own
//! byte buffer, its own open header block and its own HPACK context. Bytes
//! for a direction are appended with [`FrameDecoder::feed`] and frame events
//! are pulled with [`FrameDecoder::next_event`], which returns `Ok(None)`
//! whenever the buffer does not yet hold a complete frame. Nothing is ever
//! consumed speculatively: a partial frame stays buffered until the rest of
//! it arrives.

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use super::{
    error::{ErrorCode, FrameError, HpackError},
    frame::{
        CONNECTION_PREFACE,
        FRAME_HEADER_LEN,
        Flags,
        FrameHeader,
        FrameType,
        MAX_ALLOWED_FRAME_SIZE,
        strip_padding,
    },
    hpack::HeaderContext,
    settings::{self, PeerSettings, Setting},
};
use crate::{
    byte_order::{read_network_u32, read_stream_id},
    endpoint::Direction,
    headers::HeaderMap,
    metrics,
};

/// Limits applied while decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderLimits {
    /// Largest accumulated header block (HEADERS plus CONTINUATIONs).
    pub max_header_block: usize,
    /// Treat frame types unknown to RFC 9113 as malformed.
    pub strict_frame_types: bool,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_header_block: 256 * 1024,
            strict_frame_types: true,
        }
    }
}

/// Frame-level events produced by the decoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete header block (HEADERS plus any CONTINUATIONs).
    Headers {
        stream_id: u32,
        headers: Result<HeaderMap, HpackError>,
        end_stream: bool,
    },
    /// A complete PUSH_PROMISE header block.
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        headers: Result<HeaderMap, HpackError>,
    },
    /// DATA payload with padding removed.
    Data {
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
    },
    /// RST_STREAM.
    Reset { stream_id: u32, code: ErrorCode },
    /// SETTINGS or its acknowledgement.
    Settings { ack: bool, settings: Vec<Setting> },
    /// GOAWAY.
    GoAway { last_stream_id: u32, code: ErrorCode },
    /// PING or its acknowledgement.
    Ping { ack: bool },
    /// WINDOW_UPDATE.
    WindowUpdate { stream_id: u32, increment: u32 },
    /// PRIORITY.
    Priority { stream_id: u32 },
    /// A frame of unknown type, skipped because strict parsing is off.
    Ignored { kind: u8, stream_id: u32 },
}

#[derive(Debug)]
enum BlockKind {
    Headers { end_stream: bool },
    PushPromise { promised_stream_id: u32 },
}

#[derive(Debug)]
struct OpenBlock {
    stream_id: u32,
    kind: BlockKind,
    fragments: BytesMut,
}

#[derive(Debug)]
struct HalfDecoder {
    direction: Direction,
    buffer: BytesMut,
    awaiting_preface: bool,
    started: bool,
    open_block: Option<OpenBlock>,
    context: HeaderContext,
    max_frame_size: u32,
    /// Set once the peer's SETTINGS fixed `max_frame_size`.
    limit_announced: bool,
}

impl HalfDecoder {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            buffer: BytesMut::new(),
            awaiting_preface: direction == Direction::ClientToServer,
            started: false,
            open_block: None,
            context: HeaderContext::new(),
            max_frame_size: PeerSettings::default().max_frame_size,
            limit_announced: false,
        }
    }

    /// The capture began after the peers exchanged SETTINGS, so the frame
    /// size they agreed on is unknown.
    fn joined_mid_stream(&mut self) {
        trace!(direction = %self.direction, "no connection preface, decoding mid-stream");
        if !self.limit_announced {
            self.max_frame_size = MAX_ALLOWED_FRAME_SIZE;
        }
    }

    /// Consume the client preface if present. Returns `false` while the
    /// buffered bytes are still a strict prefix of it.
    fn skip_preface(&mut self) -> bool {
        if !self.awaiting_preface {
            return true;
        }
        if self.buffer.len() < CONNECTION_PREFACE.len() {
            if CONNECTION_PREFACE.starts_with(&self.buffer) {
                return false;
            }
        } else if self.buffer.starts_with(CONNECTION_PREFACE) {
            self.buffer.advance(CONNECTION_PREFACE.len());
            self.started = true;
        }
        self.awaiting_preface = false;
        true
    }

    fn next_event(&mut self, limits: DecoderLimits) -> Result<Option<FrameEvent>, FrameError> {
        loop {
            if !self.skip_preface() {
                return Ok(None);
            }
            let Some(header) = FrameHeader::parse(&self.buffer) else {
                return Ok(None);
            };
            if !self.started {
                // A server opens with SETTINGS; a client without the magic joined late.
                self.started = true;
                if self.direction == Direction::ClientToServer
                    || header.frame_type() != Some(FrameType::Settings)
                {
                    self.joined_mid_stream();
                }
            }
            let frame_type = self.check_header(&header, limits)?;
            let total = FRAME_HEADER_LEN + header.length as usize;
            if self.buffer.len() < total {
                return Ok(None);
            }
            self.buffer.advance(FRAME_HEADER_LEN);
            let payload = self.buffer.split_to(header.length as usize).freeze();
            metrics::inc_frames(self.direction);
            trace!(
                direction = %self.direction,
                kind = header.kind,
                stream_id = header.stream_id,
                length = header.length,
                "frame decoded"
            );

            let Some(frame_type) = frame_type else {
                return Ok(Some(FrameEvent::Ignored {
                    kind: header.kind,
                    stream_id: header.stream_id,
                }));
            };
            if let Some(event) = self.dispatch(frame_type, &header, payload, limits)? {
                return Ok(Some(event));
            }
        }
    }

    fn check_header(
        &self,
        header: &FrameHeader,
        limits: DecoderLimits,
    ) -> Result<Option<FrameType>, FrameError> {
        if header.length > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                length: header.length,
                max: self.max_frame_size,
            });
        }
        let frame_type = header.frame_type();
        if let Some(open) = &self.open_block {
            if frame_type == Some(FrameType::Continuation) && header.stream_id == open.stream_id {
                return Ok(frame_type);
            }
            return Err(FrameError::InterruptedHeaderBlock {
                open_stream: open.stream_id,
                kind: header.kind,
                stream_id: header.stream_id,
            });
        }
        match frame_type {
            Some(FrameType::Continuation) => Err(FrameError::UnexpectedContinuation {
                stream_id: header.stream_id,
            }),
            Some(known) => header.validate(known).map(|()| Some(known)),
            None if limits.strict_frame_types => {
                Err(FrameError::UnknownFrameType { kind: header.kind })
            }
            None => Ok(None),
        }
    }

    fn dispatch(
        &mut self,
        frame_type: FrameType,
        header: &FrameHeader,
        payload: Bytes,
        limits: DecoderLimits,
    ) -> Result<Option<FrameEvent>, FrameError> {
        let stream_id = header.stream_id;
        let flags = header.flags;
        let event = match frame_type {
            FrameType::Data => FrameEvent::Data {
                stream_id,
                payload: strip_padding(flags, payload)?,
                end_stream: flags.contains(Flags::END_STREAM),
            },
            FrameType::Headers => {
                let mut fragment = strip_padding(flags, payload)?;
                if flags.contains(Flags::PRIORITY) {
                    if fragment.len() < 5 {
                        return Err(FrameError::InvalidLength {
                            frame: frame_type,
                            length: header.length,
                        });
                    }
                    fragment.advance(5);
                }
                let kind = BlockKind::Headers {
                    end_stream: flags.contains(Flags::END_STREAM),
                };
                return self.open(stream_id, kind, &fragment, flags, limits);
            }
            FrameType::PushPromise => {
                let mut fragment = strip_padding(flags, payload)?;
                if fragment.len() < 4 {
                    return Err(FrameError::InvalidLength {
                        frame: frame_type,
                        length: header.length,
                    });
                }
                let promised_stream_id =
                    read_stream_id([fragment[0], fragment[1], fragment[2], fragment[3]]);
                fragment.advance(4);
                let kind = BlockKind::PushPromise { promised_stream_id };
                return self.open(stream_id, kind, &fragment, flags, limits);
            }
            FrameType::Continuation => return self.extend(&payload, flags, limits),
            FrameType::RstStream => FrameEvent::Reset {
                stream_id,
                code: ErrorCode::from_u32(read_u32(&payload, 0)),
            },
            FrameType::Settings => FrameEvent::Settings {
                ack: flags.contains(Flags::ACK),
                settings: settings::parse(&payload)?,
            },
            FrameType::Ping => FrameEvent::Ping {
                ack: flags.contains(Flags::ACK),
            },
            FrameType::GoAway => FrameEvent::GoAway {
                last_stream_id: read_u32(&payload, 0) & crate::byte_order::STREAM_ID_MASK,
                code: ErrorCode::from_u32(read_u32(&payload, 4)),
            },
            FrameType::WindowUpdate => FrameEvent::WindowUpdate {
                stream_id,
                increment: read_u32(&payload, 0) & crate::byte_order::STREAM_ID_MASK,
            },
            FrameType::Priority => FrameEvent::Priority { stream_id },
        };
        Ok(Some(event))
    }

    fn open(
        &mut self,
        stream_id: u32,
        kind: BlockKind,
        fragment: &[u8],
        flags: Flags,
        limits: DecoderLimits,
    ) -> Result<Option<FrameEvent>, FrameError> {
        self.open_block = Some(OpenBlock {
            stream_id,
            kind,
            fragments: BytesMut::new(),
        });
        self.extend(fragment, flags, limits)
    }

    fn extend(
        &mut self,
        fragment: &[u8],
        flags: Flags,
        limits: DecoderLimits,
    ) -> Result<Option<FrameEvent>, FrameError> {
        let Some(open) = self.open_block.as_mut() else {
            return Err(FrameError::UnexpectedContinuation { stream_id: 0 });
        };
        if open.fragments.len() + fragment.len() > limits.max_header_block {
            return Err(FrameError::HeaderBlockTooLarge {
                stream_id: open.stream_id,
                max: limits.max_header_block,
            });
        }
        open.fragments.extend_from_slice(fragment);
        if !flags.contains(Flags::END_HEADERS) {
            return Ok(None);
        }
        let Some(block) = self.open_block.take() else {
            return Ok(None);
        };
        let headers = self.context.decode(&block.fragments);
        Ok(Some(match block.kind {
            BlockKind::Headers { end_stream } => FrameEvent::Headers {
                stream_id: block.stream_id,
                headers,
                end_stream,
            },
            BlockKind::PushPromise { promised_stream_id } => FrameEvent::PushPromise {
                stream_id: block.stream_id,
                promised_stream_id,
                headers,
            },
        }))
    }
}

/// Read a big-endian `u32` at `offset`; callers validated the length.
fn read_u32(payload: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    if let Some(bytes) = payload.get(offset..offset + 4) {
        word.copy_from_slice(bytes);
    }
    read_network_u32(word)
}

/// HTTP/2 decoder for both directions of one connection.
#[derive(Debug)]
pub struct FrameDecoder {
    halves: [HalfDecoder; 2],
    announced: [PeerSettings; 2],
    limits: DecoderLimits,
}

impl FrameDecoder {
    /// Create a decoder expecting the client preface on the client half.
    #[must_use]
    pub fn new(limits: DecoderLimits) -> Self {
        Self {
            halves: [
                HalfDecoder::new(Direction::ClientToServer),
                HalfDecoder::new(Direction::ServerToClient),
            ],
            announced: [PeerSettings::default(); 2],
            limits,
        }
    }

    /// Append reassembled bytes travelling in `direction`.
    pub fn feed(&mut self, direction: Direction, bytes: &[u8]) {
        self.halves[direction.index()].buffer.extend_from_slice(bytes);
    }

    /// Decode the next complete frame travelling in `direction`.
    ///
    /// SETTINGS announced by one endpoint are applied to the frames the
    /// other endpoint sends.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] for malformed framing. The decoder must not be
    /// used for that connection afterwards.
    pub fn next_event(&mut self, direction: Direction) -> Result<Option<FrameEvent>, FrameError> {
        let event = self.halves[direction.index()].next_event(self.limits)?;
        if let Some(FrameEvent::Settings {
            ack: false,
            settings,
        }) = &event
        {
            let announced = &mut self.announced[direction.index()];
            announced.apply(settings);
            let receiving = &mut self.halves[direction.reverse().index()];
            receiving.max_frame_size = announced.max_frame_size;
            receiving.limit_announced = true;
            receiving.context.set_max_table_size(announced.header_table_size);
        }
        Ok(event)
    }

    /// Bytes buffered for `direction` that do not yet form a complete frame.
    #[must_use]
    pub fn buffered(&self, direction: Direction) -> usize {
        self.halves[direction.index()].buffer.len()
    }

    /// Settings announced by the endpoint sending in `direction`.
    #[must_use]
    pub fn announced_settings(&self, direction: Direction) -> PeerSettings {
        self.announced[direction.index()]
    }

    /// Whether the HPACK context for `direction` has been invalidated.
    #[must_use]
    pub fn is_context_poisoned(&self, direction: Direction) -> bool {
        self.halves[direction.index()].context.is_poisoned()
    }
}

#[cfg(test)]
mod tests;
