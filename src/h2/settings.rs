//! SETTINGS parameters tracked by a passive observer (RFC 9113 Section 6.5).
//!
//! Each endpoint announces limits the *other* endpoint must respect. The
//! decoder only needs two of them: the maximum frame size, to validate frame
//! lengths, and the header table size, to bound HPACK table size updates.

use super::{
    error::FrameError,
    frame::{DEFAULT_MAX_FRAME_SIZE, MAX_ALLOWED_FRAME_SIZE},
};
use crate::byte_order::{read_network_u16, read_network_u32};

/// SETTINGS_HEADER_TABLE_SIZE identifier.
pub const HEADER_TABLE_SIZE: u16 = 0x1;
/// SETTINGS_ENABLE_PUSH identifier.
pub const ENABLE_PUSH: u16 = 0x2;
/// SETTINGS_MAX_FRAME_SIZE identifier.
pub const MAX_FRAME_SIZE: u16 = 0x5;

/// A single `(identifier, value)` pair from a SETTINGS payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Setting {
    pub id: u16,
    pub value: u32,
}

/// Parse a SETTINGS payload into its parameters.
///
/// The caller has already checked that the length is a multiple of six.
/// Values outside the ranges RFC 9113 permits are rejected.
///
/// # Errors
///
/// Returns [`FrameError::InvalidSetting`] for out-of-range values.
pub fn parse(payload: &[u8]) -> Result<Vec<Setting>, FrameError> {
    payload
        .chunks_exact(6)
        .map(|chunk| {
            let setting = Setting {
                id: read_network_u16([chunk[0], chunk[1]]),
                value: read_network_u32([chunk[2], chunk[3], chunk[4], chunk[5]]),
            };
            let valid = match setting.id {
                ENABLE_PUSH => setting.value <= 1,
                MAX_FRAME_SIZE => {
                    (DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&setting.value)
                }
                _ => true,
            };
            if valid {
                Ok(setting)
            } else {
                Err(FrameError::InvalidSetting {
                    id: setting.id,
                    value: setting.value,
                })
            }
        })
        .collect()
}

/// Limits one endpoint has announced for frames it receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerSettings {
    /// Largest frame payload the announcing endpoint accepts.
    pub max_frame_size: u32,
    /// HPACK dynamic table size the announcing endpoint decodes with.
    pub header_table_size: u32,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            header_table_size: 4096,
        }
    }
}

impl PeerSettings {
    /// Apply announced parameters; unknown identifiers are ignored.
    pub fn apply(&mut self, settings: &[Setting]) {
        for setting in settings {
            match setting.id {
                MAX_FRAME_SIZE => self.max_frame_size = setting.value,
                HEADER_TABLE_SIZE => self.header_table_size = setting.value,
                _ => {}
            }
        }
    }
}
