//! Display-only boundary conversions between the internal numeric/byte types
//! and the `0x`-prefixed hex strings the JSON-RPC wire format uses.
//!
//! This is the `deepHexlify` equivalent used by ERC-4337 bundlers: a pure
//! display transform. Nothing in the core ever stores the hexlified form.

use alloy_primitives::U256;

/// Hex-encode a `U256`, stripping leading zeros; `0` encodes as `"0x0"`.
pub fn encode_u256(value: U256) -> String {
    if value.is_zero() {
        return "0x0".to_string();
    }
    let bytes = value.to_be_bytes::<32>();
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(31);
    let hex = hex_nibbles(&bytes[first_nonzero..]);
    format!("0x{}", hex.trim_start_matches('0'))
}

/// Hex-encode raw bytes with no leading-zero stripping (used for addresses,
/// hashes and opaque byte strings, which are fixed-width or already minimal).
pub fn encode_bytes(data: &[u8]) -> String {
    format!("0x{}", hex_nibbles(data))
}

fn hex_nibbles(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for byte in data {
        s.push_str(&format!("{byte:02x}"));
    }
    s
}

/// Parse a `0x`-prefixed hex string into a `U256`. Accepts `"0x0"` and `"0x"`
/// (treated as zero) for leniency with the wire format's mixed conventions.
pub fn decode_u256(s: &str) -> Result<U256, HexError> {
    let stripped = s.strip_prefix("0x").ok_or(HexError::MissingPrefix)?;
    if stripped.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(stripped, 16).map_err(|_| HexError::InvalidDigits)
}

#[derive(Debug, thiserror::Error)]
pub enum HexError {
    #[error("hex string missing 0x prefix")]
    MissingPrefix,
    #[error("invalid hex digits")]
    InvalidDigits,
}
