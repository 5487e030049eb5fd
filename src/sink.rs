//! Destinations for reconstructed messages.
//!
//! The pipeline hands every [`Message`] to a [`MessageSink`] in arrival
//! order. Sinks that render payloads consult a [`PayloadDecoder`], which
//! resolves the method schema through a [`SchemaResolver`] and, for messages
//! whose stream path was never seen, tries a list of candidate paths.

use std::{
    collections::HashSet,
    io::Write,
    sync::Arc,
};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    config::GuessPaths,
    endpoint::Direction,
    error::SinkError,
    message::{Message, MessageKind, hex},
    schema::{MessageSchema, ResolveError, SchemaResolver},
};

/// Receiver of reconstructed messages.
pub trait MessageSink: Send {
    /// Consume one message.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if the message cannot be rendered or written.
    /// The pipeline logs it and carries on with the next message.
    fn handle(&mut self, message: &Message) -> Result<(), SinkError>;

    /// Flush buffered output; called once after the last message.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if buffered output cannot be written.
    fn flush(&mut self) -> Result<(), SinkError> { Ok(()) }
}

impl<K: MessageSink + ?Sized> MessageSink for Box<K> {
    fn handle(&mut self, message: &Message) -> Result<(), SinkError> { (**self).handle(message) }

    fn flush(&mut self) -> Result<(), SinkError> { (**self).flush() }
}

/// A payload rendered against its schema.
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded {
    /// Method path whose schema matched.
    pub path: String,
    /// Whether `path` was guessed rather than observed on the stream.
    pub guessed: bool,
    /// The payload as JSON.
    pub value: Value,
}

/// Decodes gRPC payloads through a [`SchemaResolver`].
#[derive(Clone)]
pub struct PayloadDecoder {
    resolver: Arc<dyn SchemaResolver>,
    candidates: Vec<String>,
}

impl PayloadDecoder {
    /// Create a decoder. `guess` selects the candidate paths tried for
    /// messages whose stream path is unknown.
    #[must_use]
    pub fn new(resolver: Arc<dyn SchemaResolver>, guess: &GuessPaths) -> Self {
        let candidates = match guess {
            GuessPaths::All => Vec::new(),
            GuessPaths::Auto => resolver.known_paths(),
            GuessPaths::List(paths) => paths.clone(),
        };
        Self {
            resolver,
            candidates,
        }
    }

    /// The resolver backing this decoder.
    #[must_use]
    pub fn resolver(&self) -> &dyn SchemaResolver { &*self.resolver }

    /// Decode the payload of `message`, if it carries one that matches a
    /// known schema.
    #[must_use]
    pub fn decode(&self, message: &Message) -> Option<Decoded> {
        if !message.has_payload() || message.compressed {
            return None;
        }
        let request = message.kind == MessageKind::Request
            || (message.kind == MessageKind::Unknown
                && message.direction == Direction::ClientToServer);
        if let Some(path) = &message.path {
            return match self.decode_as(path, request, &message.payload) {
                Ok(value) => Some(Decoded {
                    path: path.clone(),
                    guessed: false,
                    value,
                }),
                Err(err) => {
                    debug!(stream_id = message.stream_id, path = %path, error = %err, "payload not decoded");
                    None
                }
            };
        }
        self.candidates.iter().find_map(|path| {
            self.decode_as(path, request, &message.payload)
                .ok()
                .map(|value| Decoded {
                    path: path.clone(),
                    guessed: true,
                    value,
                })
        })
    }

    fn decode_as(&self, path: &str, request: bool, payload: &[u8]) -> Result<Value, ResolveError> {
        let schema: MessageSchema = if request {
            self.resolver.resolve_request_schema(path)?
        } else {
            self.resolver.resolve_response_schema(path)?
        };
        self.resolver.decode(&schema, payload)
    }
}

/// Tab-separated, human-readable output.
///
/// Each line starts with the capture time, the connection and the stream id,
/// followed by the headers or the decoded payload.
pub struct TextSink<W> {
    out: W,
    decoder: Option<PayloadDecoder>,
    grpcurl: bool,
}

impl<W: Write + Send> TextSink<W> {
    /// Write to `out`, decoding payloads with `decoder` when present.
    #[must_use]
    pub fn new(out: W, decoder: Option<PayloadDecoder>) -> Self {
        Self {
            out,
            decoder,
            grpcurl: false,
        }
    }

    /// Also print a `grpcurl` command replaying each decoded request.
    #[must_use]
    pub fn with_grpcurl(mut self, enabled: bool) -> Self {
        self.grpcurl = enabled;
        self
    }

    /// Consume the sink, returning the writer.
    pub fn into_inner(self) -> W { self.out }

    fn replay_command(&self, message: &Message, decoded: &Decoded) -> Option<String> {
        let decoder = self.decoder.as_ref()?;
        let file = decoder.resolver().source_file(&decoded.path)?;
        Some(format!(
            "grpcurl -plaintext -proto {} -d '{}' {} {}",
            file.display(),
            decoded.value,
            message.connection.server(),
            decoded.path.trim_start_matches('/'),
        ))
    }
}

impl<W: Write + Send> MessageSink for TextSink<W> {
    fn handle(&mut self, message: &Message) -> Result<(), SinkError> {
        let micros = message.timestamp_micros();
        let prefix = format!(
            "{}.{:06}\t{}\tstreamid:{}",
            micros / 1_000_000,
            micros % 1_000_000,
            message.connection,
            message.stream_id
        );
        if let Some(headers) = &message.headers {
            let label = if message.trailers { "trailer" } else { "header" };
            writeln!(self.out, "{prefix}\t{label}:{headers}")?;
            return Ok(());
        }
        let decoded = self.decoder.as_ref().and_then(|d| d.decode(message));
        match &decoded {
            Some(decoded) if decoded.guessed => {
                writeln!(self.out, "{prefix}\tguess:{}\tdata:{}", decoded.path, decoded.value)?;
            }
            Some(decoded) => writeln!(self.out, "{prefix}\tdata:{}", decoded.value)?,
            None if message.kind == MessageKind::Unknown => {
                writeln!(self.out, "{prefix}\tunknown data frame")?;
            }
            None => writeln!(self.out, "{prefix}\traw:{}", hex(&message.payload))?,
        }
        if self.grpcurl
            && message.kind == MessageKind::Request
            && let Some(command) = decoded.and_then(|d| self.replay_command(message, &d))
        {
            writeln!(self.out, "{command}")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> { Ok(self.out.flush()?) }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    #[serde(flatten)]
    message: &'a Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    decoded: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guessed_path: Option<String>,
}

/// One JSON object per line.
pub struct JsonSink<W> {
    out: W,
    decoder: Option<PayloadDecoder>,
}

impl<W: Write + Send> JsonSink<W> {
    #[must_use]
    pub fn new(out: W, decoder: Option<PayloadDecoder>) -> Self { Self { out, decoder } }

    /// Consume the sink, returning the writer.
    pub fn into_inner(self) -> W { self.out }
}

impl<W: Write + Send> MessageSink for JsonSink<W> {
    fn handle(&mut self, message: &Message) -> Result<(), SinkError> {
        let decoded = self.decoder.as_ref().and_then(|d| d.decode(message));
        let guessed_path = decoded
            .as_ref()
            .filter(|d| d.guessed)
            .map(|d| d.path.clone());
        let record = JsonRecord {
            message,
            decoded: decoded.map(|d| d.value),
            guessed_path,
        };
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> { Ok(self.out.flush()?) }
}

/// Passes on messages whose path is in an allow-list, or is unknown.
pub struct FilteredSink<K> {
    inner: K,
    paths: HashSet<String>,
}

impl<K: MessageSink> FilteredSink<K> {
    #[must_use]
    pub fn new(inner: K, paths: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner,
            paths: paths.into_iter().collect(),
        }
    }

    /// Consume the filter, returning the wrapped sink.
    pub fn into_inner(self) -> K { self.inner }
}

impl<K: MessageSink> MessageSink for FilteredSink<K> {
    fn handle(&mut self, message: &Message) -> Result<(), SinkError> {
        match &message.path {
            Some(path) if !self.paths.contains(path) => Ok(()),
            _ => self.inner.handle(message),
        }
    }

    fn flush(&mut self) -> Result<(), SinkError> { self.inner.flush() }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Vec<Message>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Messages received so far, in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[Message] { &self.messages }

    #[must_use]
    pub fn into_messages(self) -> Vec<Message> { self.messages }
}

impl MessageSink for CollectingSink {
    fn handle(&mut self, message: &Message) -> Result<(), SinkError> {
        self.messages.push(message.clone());
        Ok(())
    }
}
