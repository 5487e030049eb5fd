//! Per-direction HPACK decompression context.
//!
//! HPACK keeps a dynamic table that both ends update with every header
//! block, so blocks must be decoded in order and none may be skipped. Once a
//! block fails to decode, the table is in an unknown state and every later
//! block in the same direction is reported as undecodable.

use std::panic::{AssertUnwindSafe, catch_unwind};

use fluke_hpack::Decoder;

use super::error::HpackError;
use crate::headers::HeaderMap;

/// HPACK decoder for one traffic direction of one connection.
pub struct HeaderContext {
    decoder: Decoder<'static>,
    poisoned: bool,
}

impl std::fmt::Debug for HeaderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderContext")
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl Default for HeaderContext {
    fn default() -> Self { Self::new() }
}

impl HeaderContext {
    /// Create a context with an empty dynamic table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoder: Decoder::new(),
            poisoned: false,
        }
    }

    /// Whether an earlier failure invalidated this context.
    #[must_use]
    pub fn is_poisoned(&self) -> bool { self.poisoned }

    /// Cap dynamic table size updates at the size the receiving endpoint
    /// announced through SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_max_table_size(&mut self, size: u32) {
        self.decoder
            .set_max_allowed_table_size(usize::try_from(size).unwrap_or(usize::MAX));
    }

    /// Decode one complete header block.
    ///
    /// Names and values that are not valid UTF-8 are converted lossily.
    ///
    /// # Errors
    ///
    /// Returns [`HpackError::Decode`] when the block is rejected (the context
    /// is poisoned from then on) and [`HpackError::Poisoned`] for any block
    /// after that.
    pub fn decode(&mut self, block: &[u8]) -> Result<HeaderMap, HpackError> {
        if self.poisoned {
            return Err(HpackError::Poisoned);
        }
        // Some truncated blocks panic inside the decoder instead of erroring.
        let decoded = catch_unwind(AssertUnwindSafe(|| self.decoder.decode(block)));
        match decoded {
            Ok(Ok(fields)) => Ok(fields
                .into_iter()
                .map(|(name, value)| {
                    (
                        String::from_utf8_lossy(&name).into_owned(),
                        String::from_utf8_lossy(&value).into_owned(),
                    )
                })
                .collect()),
            Ok(Err(err)) => {
                self.poisoned = true;
                Err(HpackError::Decode(format!("{err:?}")))
            }
            Err(_) => {
                self.poisoned = true;
                Err(HpackError::Decode("truncated header block".to_owned()))
            }
        }
    }
}
