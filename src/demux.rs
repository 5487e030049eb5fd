//! Synchronous connection demultiplexer.
//!
//! [`Demultiplexer`] routes segments to per-connection state and returns the
//! messages they complete, in arrival order. It is the runtime-free
//! counterpart of [`pipeline::run`](crate::pipeline::run) and is convenient
//! for embedding and tests.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::{
    config::PipelineConfig,
    connection::Connection,
    endpoint::ConnectionKey,
    error::DecodeError,
    message::Message,
    metrics,
    router::{Route, route},
    segment::Segment,
};

/// Routes segments of many connections.
#[derive(Debug)]
pub struct Demultiplexer {
    config: PipelineConfig,
    connections: HashMap<ConnectionKey, Connection>,
}

impl Demultiplexer {
    /// Create an empty demultiplexer.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            connections: HashMap::new(),
        }
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn len(&self) -> usize { self.connections.len() }

    /// Whether no connection is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.connections.is_empty() }

    /// Look up a tracked connection.
    #[must_use]
    pub fn connection(&self, key: &ConnectionKey) -> Option<&Connection> {
        self.connections.get(key)
    }

    /// Feed one segment, appending completed messages to `out`.
    ///
    /// The addressed connection is created lazily and closed once its
    /// transport has finished.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the segment's connection hits a
    /// malformed frame. Only that connection is affected; the
    /// demultiplexer stays usable.
    pub fn observe(&mut self, segment: &Segment, out: &mut Vec<Message>) -> Result<(), DecodeError> {
        let (key, direction) = match route(&self.connections, segment, self.config.service_port) {
            Route::Existing(key, direction) => (key, direction),
            Route::New(key, direction) => {
                debug!(connection = %key, "new connection");
                metrics::inc_connections();
                self.connections
                    .insert(key, Connection::new(key, &self.config));
                (key, direction)
            }
            Route::Ignore => {
                trace!(src = %segment.src, dst = %segment.dst, "segment ignored");
                return Ok(());
            }
        };
        let Some(connection) = self.connections.get_mut(&key) else {
            return Ok(());
        };
        let result = connection.observe(direction, segment, out);
        if connection.is_finished() {
            self.close_connection(&key);
        }
        result
    }

    /// Tear down a connection; nothing more is emitted for it. Returns
    /// whether it was tracked.
    pub fn close_connection(&mut self, key: &ConnectionKey) -> bool {
        let Some(mut connection) = self.connections.remove(key) else {
            return false;
        };
        connection.close();
        metrics::dec_connections();
        true
    }

    /// Close every connection, in identity order.
    pub fn finish(&mut self) {
        let mut keys: Vec<_> = self.connections.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            self.close_connection(&key);
        }
    }
}

impl Drop for Demultiplexer {
    fn drop(&mut self) { self.finish(); }
}
