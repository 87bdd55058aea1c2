//! Hex parsing and formatting helpers.
//!
//! Appointment requests arrive with every hash, address and payload field as
//! a "0x"-prefixed hex string; log output wants the same representation.
//! Formatting goes through a thread-local buffer so hot-path tracing calls
//! do not allocate per call.

use std::{cell::RefCell, fmt::Write};

thread_local! {
    /// Reused buffer for hex formatting. 1KB covers hashes and typical
    /// response calldata without reallocation.
    static HEX_BUFFER: RefCell<String> = RefCell::new(String::with_capacity(1024));
}

/// Formats bytes as hex with "0x" prefix, returning an owned `String`.
#[must_use]
pub fn format_hex(bytes: &[u8]) -> String {
    HEX_BUFFER.with(|buffer| {
        let mut buf = buffer.borrow_mut();
        buf.clear();
        buf.push_str("0x");
        for byte in bytes {
            let _ = write!(&mut buf, "{byte:02x}");
        }
        buf.clone()
    })
}

/// Formats a 32-byte hash with "0x" prefix.
#[must_use]
pub fn format_hash32(hash: &[u8; 32]) -> String {
    format_hex(hash)
}

/// Formats a 20-byte address with "0x" prefix.
#[must_use]
pub fn format_address(address: &[u8; 20]) -> String {
    format_hex(address)
}

/// Parses a hex string to `u64`.
///
/// Accepts strings with or without "0x" prefix. Returns `None` on invalid
/// hex or overflow.
#[must_use]
pub fn parse_hex_u64(hex_str: &str) -> Option<u64> {
    let digits = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    u64::from_str_radix(digits, 16).ok()
}

/// Parses a hex string to bytes.
///
/// Accepts strings with or without "0x" prefix. An empty payload ("0x")
/// parses to an empty vector. Returns `None` on invalid hex or odd length.
#[must_use]
pub fn parse_hex_bytes(hex_str: &str) -> Option<Vec<u8>> {
    let digits = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(digits).ok()
}

/// Parses a hex string to a fixed-size byte array.
///
/// Returns `None` unless the digit count is exactly `N * 2`.
#[must_use]
pub fn parse_hex_array<const N: usize>(hex_str: &str) -> Option<[u8; N]> {
    let digits = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    if digits.len() != N * 2 {
        return None;
    }

    let bytes = digits.as_bytes();
    let mut array = [0u8; N];
    for (i, chunk) in bytes.chunks(2).enumerate() {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        array[i] = (high << 4) | low;
    }
    Some(array)
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
