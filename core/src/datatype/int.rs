//! Fixed-width integer value types
//!
//! Both types clamp out-of-range input to the nearest bound instead of wrapping,
//! so a malformed platform value never turns a large positive into a negative.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Signed integer (32 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Int32(i32);

impl Int32 {
    pub const BIT_WIDTH: u32 = 32;
    pub const MIN: Int32 = Int32(i32::MIN);
    pub const MAX: Int32 = Int32(i32::MAX);

    /// Create from any signed value, clamping into range
    pub fn new(value: i64) -> Self {
        Self(value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
    }

    /// Decode from 4 little-endian bytes
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self(i32::from_le_bytes(bytes))
    }

    /// Decode the first 4 bytes of `data` as little-endian; `None` if too short
    pub fn from_le_slice(data: &[u8]) -> Option<Self> {
        let bytes: [u8; 4] = data.get(0..4)?.try_into().ok()?;
        Some(Self::from_le_bytes(bytes))
    }

    /// Encode as 4 little-endian bytes
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for Int32 {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Int32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unsigned integer (16 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UInt16(u16);

impl UInt16 {
    pub const BIT_WIDTH: u32 = 16;
    pub const MIN: UInt16 = UInt16(0);
    pub const MAX: UInt16 = UInt16(u16::MAX);

    /// Create from any signed value, clamping into 0..=65535
    pub fn new(value: i32) -> Self {
        Self(value.clamp(0, i32::from(u16::MAX)) as u16)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// Value as a slice index
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }
}

impl From<u16> for UInt16 {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for UInt16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_clamps_out_of_range() {
        assert_eq!(Int32::new(i64::MAX), Int32::MAX);
        assert_eq!(Int32::new(i64::MIN), Int32::MIN);
        assert_eq!(Int32::new(-55).value(), -55);
    }

    #[test]
    fn test_int32_little_endian_decode() {
        // -55 as little-endian two's complement
        let bytes = [0xC9, 0xFF, 0xFF, 0xFF];
        assert_eq!(Int32::from_le_bytes(bytes).value(), -55);
        assert_eq!(Int32::from(-55).to_le_bytes(), bytes);
    }

    #[test]
    fn test_int32_from_short_slice() {
        assert!(Int32::from_le_slice(&[0x01, 0x02, 0x03]).is_none());
        assert_eq!(
            Int32::from_le_slice(&[0x01, 0x00, 0x00, 0x00, 0xAA]).map(Int32::value),
            Some(1)
        );
    }

    #[test]
    fn test_uint16_clamps_out_of_range() {
        assert_eq!(UInt16::new(-1), UInt16::MIN);
        assert_eq!(UInt16::new(70_000), UInt16::MAX);
        assert_eq!(UInt16::new(22).as_usize(), 22);
    }

    #[test]
    fn test_display() {
        assert_eq!(Int32::new(-70).to_string(), "-70");
        assert_eq!(UInt16::new(512).to_string(), "512");
    }
}
