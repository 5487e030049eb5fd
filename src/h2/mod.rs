//! Passive HTTP/2 framing support.
//!
//! The types here decode both directions of an observed connection without
//! ever taking part in it: no acknowledgements are generated and flow
//! control is not enforced.

pub mod decoder;
pub mod error;
pub mod frame;
pub mod hpack;
pub mod settings;

pub use decoder::{DecoderLimits, FrameDecoder, FrameEvent};
pub use error::{ErrorCode, FrameError, HpackError};
pub use frame::{CONNECTION_PREFACE, Flags, Frame, FrameHeader, FrameType};
pub use hpack::HeaderContext;
pub use settings::{PeerSettings, Setting};
