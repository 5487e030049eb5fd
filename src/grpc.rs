//! gRPC length-prefixed message framing.
//!
//! Every gRPC message carried in HTTP/2 DATA frames is prefixed with one
//! compressed-flag byte and a four-byte big-endian length. [`GrpcBuffer`]
//! accumulates DATA payloads for one stream direction and yields each message
//! once all of its bytes have arrived.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::byte_order::{read_network_u32, write_network_u32};

/// Length of the gRPC message prefix.
pub const GRPC_HEADER_LEN: usize = 5;

/// Default cap on a single declared message length.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Errors raised while extracting messages.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GrpcError {
    /// The prefix declares a message longer than the configured cap.
    #[error("declared gRPC message length {declared} exceeds {max} bytes")]
    MessageTooLarge { declared: usize, max: usize },
}

/// One complete gRPC message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrpcFrame {
    /// Whether the compressed flag was set.
    pub compressed: bool,
    /// Message bytes without the prefix.
    pub payload: Bytes,
}

impl GrpcFrame {
    /// Append the prefixed wire form of this message to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`GrpcError::MessageTooLarge`] if the payload length does not
    /// fit the four-byte prefix.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), GrpcError> {
        let len = u32::try_from(self.payload.len()).map_err(|_| GrpcError::MessageTooLarge {
            declared: self.payload.len(),
            max: u32::MAX as usize,
        })?;
        dst.reserve(GRPC_HEADER_LEN + self.payload.len());
        dst.put_u8(u8::from(self.compressed));
        dst.put_slice(&write_network_u32(len));
        dst.put_slice(&self.payload);
        Ok(())
    }
}

/// Reassembly buffer for one direction of one stream.
#[derive(Debug)]
pub struct GrpcBuffer {
    buf: BytesMut,
    max_message_size: usize,
}

impl GrpcBuffer {
    /// Create an empty buffer enforcing `max_message_size`.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_message_size,
        }
    }

    /// Append a DATA payload.
    pub fn push(&mut self, data: &[u8]) { self.buf.extend_from_slice(data); }

    /// Extract the next complete message, if one is fully buffered.
    ///
    /// # Errors
    ///
    /// Returns [`GrpcError::MessageTooLarge`] when the next prefix declares a
    /// length above the cap. The buffer is cleared because later bytes can no
    /// longer be aligned to message boundaries.
    pub fn try_next(&mut self) -> Result<Option<GrpcFrame>, GrpcError> {
        let Some(prefix) = self.buf.get(..GRPC_HEADER_LEN) else {
            return Ok(None);
        };
        let compressed = prefix[0] != 0;
        let declared = read_network_u32([prefix[1], prefix[2], prefix[3], prefix[4]]) as usize;
        if declared > self.max_message_size {
            self.buf.clear();
            return Err(GrpcError::MessageTooLarge {
                declared,
                max: self.max_message_size,
            });
        }
        if self.buf.len() < GRPC_HEADER_LEN + declared {
            return Ok(None);
        }
        self.buf.advance(GRPC_HEADER_LEN);
        let payload = self.buf.split_to(declared).freeze();
        Ok(Some(GrpcFrame {
            compressed,
            payload,
        }))
    }

    /// Discard any partial message.
    pub fn clear(&mut self) { self.buf.clear(); }

    /// Number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.buf.len() }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }
}
