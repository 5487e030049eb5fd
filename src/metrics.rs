//! Metric helpers for `grpcdump`.
//!
//! This module defines metric names and simple helper functions wrapping
//! the [`metrics`](https://docs.rs/metrics) crate. With the `metrics`
//! feature disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::{endpoint::Direction, message::MessageKind};

/// Name of the gauge tracking connections currently being decoded.
pub const CONNECTIONS_ACTIVE: &str = "grpcdump_connections_active";
/// Name of the counter tracking decoded HTTP/2 frames.
pub const FRAMES_DECODED: &str = "grpcdump_frames_decoded_total";
/// Name of the counter tracking emitted messages.
pub const MESSAGES_EMITTED: &str = "grpcdump_messages_emitted_total";
/// Name of the counter tracking connections abandoned after a decode error.
pub const DECODE_ERRORS: &str = "grpcdump_decode_errors_total";
/// Name of the counter tracking TCP segments dropped by reassembly.
pub const SEGMENTS_DROPPED: &str = "grpcdump_segments_dropped_total";

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a decoded frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_DECODED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record an emitted message of the given kind.
pub fn inc_messages(kind: MessageKind) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_EMITTED, "kind" => kind.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record a connection-scoped decode error.
pub fn inc_decode_errors() {
    #[cfg(feature = "metrics")]
    counter!(DECODE_ERRORS).increment(1);
}

/// Record a segment that could not be placed in the reorder window.
pub fn inc_dropped_segments() {
    #[cfg(feature = "metrics")]
    counter!(SEGMENTS_DROPPED).increment(1);
}
