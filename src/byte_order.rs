//! Helpers for explicit network byte-order conversions.
//!
//! HTTP/2 frame headers carry a 24-bit length and a 31-bit stream identifier,
//! and gRPC prefixes every message with a 32-bit length. These helpers keep
//! Clippy expectations scoped to the conversion points so the parsers stay
//! explicit about wire endianness.

/// Mask clearing the reserved high bit of an HTTP/2 stream identifier.
pub const STREAM_ID_MASK: u32 = 0x7fff_ffff;

/// Parse a network-order `u16` from its on-wire representation.
///
/// # Examples
///
/// ```
/// use grpcdump::byte_order::read_network_u16;
///
/// assert_eq!(read_network_u16([0x01, 0xbb]), 443);
/// ```
#[must_use]
pub fn read_network_u16(bytes: [u8; 2]) -> u16 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u16::from_be_bytes(bytes)
}

/// Parse the 24-bit length field of an HTTP/2 frame header.
///
/// # Examples
///
/// ```
/// use grpcdump::byte_order::read_network_u24;
///
/// assert_eq!(read_network_u24([0x00, 0x40, 0x00]), 16_384);
/// ```
#[must_use]
pub fn read_network_u24(bytes: [u8; 3]) -> u32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

/// Serialise the low 24 bits of `value` in network byte order.
///
/// Higher bits are discarded; callers validate lengths beforehand.
#[must_use]
pub fn write_network_u24(value: u32) -> [u8; 3] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    let [_, a, b, c] = value.to_be_bytes();
    [a, b, c]
}

/// Parse a network-order `u32` from its on-wire representation.
///
/// # Examples
///
/// ```
/// use grpcdump::byte_order::read_network_u32;
///
/// assert_eq!(read_network_u32([0x00, 0x00, 0x01, 0x00]), 256);
/// ```
#[must_use]
pub fn read_network_u32(bytes: [u8; 4]) -> u32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u32::from_be_bytes(bytes)
}

/// Serialise a `u32` in network byte order (big-endian).
#[must_use]
pub fn write_network_u32(value: u32) -> [u8; 4] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a 31-bit stream identifier, ignoring the reserved bit.
///
/// # Examples
///
/// ```
/// use grpcdump::byte_order::read_stream_id;
///
/// assert_eq!(read_stream_id([0x80, 0x00, 0x00, 0x03]), 3);
/// ```
#[must_use]
pub fn read_stream_id(bytes: [u8; 4]) -> u32 { read_network_u32(bytes) & STREAM_ID_MASK }
