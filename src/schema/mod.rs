//! Resolving gRPC method paths to payload schemas.
//!
//! The reconstruction core never looks inside gRPC payloads. Sinks that want
//! to render them consult a [`SchemaResolver`], which maps a method path such
//! as `/pb.Core/Watch` onto the request and response message types and
//! decodes payload bytes against them.
//!
//! [`SchemaRegistry`] is the in-memory implementation. It is loaded at
//! start-up from `.proto` files, from a server's reflection service, or both.

mod declarations;
mod reflection;
mod registry;
mod well_known;

use std::{io, path::PathBuf};

use serde_json::Value;
use thiserror::Error;

pub use registry::SchemaRegistry;

/// A resolved message type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageSchema {
    /// Fully-qualified message name without a leading dot, e.g. `pb.Request`.
    pub name: String,
}

impl MessageSchema {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into() } }
}

/// Failures while loading schemas or decoding payloads.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid .proto sources: {0}")]
    Parse(String),
    #[error("no method registered for path {0}")]
    UnknownPath(String),
    #[error("unknown message type {0}")]
    UnknownType(String),
    #[error("payload does not match {schema}: {reason}")]
    Malformed { schema: String, reason: String },
    #[error("cannot reach reflection service at {endpoint}: {source}")]
    ReflectionConnect {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("server reflection failed: {0}")]
    Reflection(String),
}

/// Capability to resolve and decode gRPC payload schemas.
pub trait SchemaResolver: Send + Sync {
    /// Input message type of the method at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownPath`] when the method is not known.
    fn resolve_request_schema(&self, path: &str) -> Result<MessageSchema, ResolveError>;

    /// Output message type of the method at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownPath`] when the method is not known.
    fn resolve_response_schema(&self, path: &str) -> Result<MessageSchema, ResolveError>;

    /// Decode `bytes` as an instance of `schema`, rendered as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Malformed`] when the bytes are not a valid
    /// encoding of the message.
    fn decode(&self, schema: &MessageSchema, bytes: &[u8]) -> Result<Value, ResolveError>;

    /// Every method path the resolver knows, sorted.
    fn known_paths(&self) -> Vec<String>;

    /// The `.proto` file defining the method at `path`, if it came from one.
    fn source_file(&self, _path: &str) -> Option<PathBuf> { None }
}
