//! Shared utilities for integration tests.
//!
//! Builds HTTP/2 traffic for one or more connections between a client and a
//! gRPC service listening on [`SERVICE_PORT`].

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{
    net::SocketAddr,
    time::{Duration, SystemTime},
};

use bytes::{Bytes, BytesMut};
use grpcdump::{
    ConnectionKey,
    Demultiplexer,
    Message,
    PipelineConfig,
    Segment,
    TcpFlags,
    grpc::GrpcFrame,
    h2::{CONNECTION_PREFACE, Flags, Frame, FrameType},
};

/// Port the simulated service listens on.
pub const SERVICE_PORT: u16 = 2379;

/// Pipeline configuration oriented by [`SERVICE_PORT`].
#[must_use]
pub fn config() -> PipelineConfig { PipelineConfig::default().with_service_port(SERVICE_PORT) }

/// Key of the `n`th simulated client connection.
#[must_use]
pub fn key(n: u16) -> ConnectionKey {
    let client: SocketAddr = format!("10.0.0.1:{}", 50_000 + n).parse().expect("addr");
    let server: SocketAddr = format!("10.0.0.2:{SERVICE_PORT}").parse().expect("addr");
    ConnectionKey::new(client, server)
}

/// A client-to-server segment on `key`.
#[must_use]
pub fn to_server(key: ConnectionKey, bytes: &[u8]) -> Segment {
    Segment::new(key.client(), key.server(), Bytes::copy_from_slice(bytes), at(0))
}

/// A server-to-client segment on `key`.
#[must_use]
pub fn to_client(key: ConnectionKey, bytes: &[u8]) -> Segment {
    Segment::new(key.server(), key.client(), Bytes::copy_from_slice(bytes), at(0))
}

/// A capture timestamp `micros` after the epoch.
#[must_use]
pub fn at(micros: u64) -> SystemTime { SystemTime::UNIX_EPOCH + Duration::from_micros(micros) }

/// Flags of a reset segment.
#[must_use]
pub fn rst() -> TcpFlags {
    TcpFlags {
        rst: true,
        ..TcpFlags::default()
    }
}

/// Flags of an opening SYN segment.
#[must_use]
pub fn syn() -> TcpFlags {
    TcpFlags {
        syn: true,
        ..TcpFlags::default()
    }
}

/// Encode one HTTP/2 frame.
#[must_use]
pub fn frame(kind: FrameType, flags: Flags, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::new();
    Frame::new(kind, flags, stream_id, Bytes::copy_from_slice(payload))
        .expect("frame within limits")
        .encode(&mut out);
    out.to_vec()
}

/// HPACK-encode `fields` with a fresh encoder.
#[must_use]
pub fn header_block(fields: &[(&str, &str)]) -> Vec<u8> {
    let mut encoder = fluke_hpack::Encoder::new();
    encoder.encode(
        fields
            .iter()
            .map(|(name, value)| (name.as_bytes(), value.as_bytes())),
    )
}

/// Client preface followed by an empty SETTINGS frame.
#[must_use]
pub fn preface() -> Vec<u8> {
    let mut out = CONNECTION_PREFACE.to_vec();
    out.extend(frame(FrameType::Settings, Flags::default(), 0, &[]));
    out
}

/// A complete HEADERS frame opening a POST to `path`.
#[must_use]
pub fn request_headers(stream_id: u32, path: &str) -> Vec<u8> {
    let block = header_block(&[
        (":method", "POST"),
        (":scheme", "http"),
        (":path", path),
        ("content-type", "application/grpc"),
    ]);
    frame(FrameType::Headers, Flags::END_HEADERS, stream_id, &block)
}

/// A complete HEADERS frame answering with `:status 200`.
#[must_use]
pub fn response_headers(stream_id: u32) -> Vec<u8> {
    let block = header_block(&[(":status", "200"), ("content-type", "application/grpc")]);
    frame(FrameType::Headers, Flags::END_HEADERS, stream_id, &block)
}

/// Length-prefixed gRPC encoding of `payload`.
#[must_use]
pub fn grpc_body(payload: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::new();
    GrpcFrame {
        compressed: false,
        payload: Bytes::copy_from_slice(payload),
    }
    .encode(&mut out)
    .expect("payload within limits");
    out.to_vec()
}

/// A DATA frame carrying `body` verbatim.
#[must_use]
pub fn data(stream_id: u32, body: &[u8], end_stream: bool) -> Vec<u8> {
    let flags = if end_stream {
        Flags::END_STREAM
    } else {
        Flags::default()
    };
    frame(FrameType::Data, flags, stream_id, body)
}

/// Feed `segments` through a fresh demultiplexer, returning every message
/// and the number of failed observations.
#[must_use]
pub fn replay(segments: &[Segment]) -> (Vec<Message>, usize) {
    let mut demux = Demultiplexer::new(config());
    let mut out = Vec::new();
    let failures = segments
        .iter()
        .filter(|segment| demux.observe(segment, &mut out).is_err())
        .count();
    demux.finish();
    (out, failures)
}
