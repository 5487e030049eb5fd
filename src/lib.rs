#![doc(html_root_url = "https://docs.rs/grpcdump/latest")]
//! Passive reconstruction of gRPC calls from captured HTTP/2 traffic.
//!
//! Segments from a [`SegmentSource`] are demultiplexed per TCP connection,
//! reassembled into byte streams, decoded into HTTP/2 frames, tracked per
//! stream and turned into [`Message`]s that a [`MessageSink`] consumes.
//!
//! The synchronous [`Demultiplexer`] drives the same core without a runtime;
//! [`pipeline::run`] runs one task per connection on tokio.

pub mod assembler;
pub mod byte_order;
pub mod capture;
pub mod config;
pub mod connection;
pub mod demux;
pub mod endpoint;
pub mod error;
pub mod grpc;
pub mod h2;
pub mod headers;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod reassembly;
mod router;
pub mod schema;
pub mod segment;
pub mod sink;
pub mod stream;

pub use capture::CaptureError;
pub use config::{PipelineConfig, Settings};
pub use connection::{Connection, ConnectionState};
pub use demux::Demultiplexer;
pub use endpoint::{ConnectionKey, Direction};
pub use error::{DecodeError, Error, Result, SinkError};
pub use headers::HeaderMap;
pub use message::{Message, MessageKind};
pub use pipeline::{RunSummary, run};
pub use schema::{MessageSchema, ResolveError, SchemaRegistry, SchemaResolver};
pub use segment::{ChannelSource, Segment, SegmentSource, TcpFlags, VecSource};
pub use sink::{CollectingSink, FilteredSink, JsonSink, MessageSink, PayloadDecoder, TextSink};
