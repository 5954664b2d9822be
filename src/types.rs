use crate::errors::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A block height
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(u64);

impl BlockNumber {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Gets the inner value
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Creates a `BlockNumber` from a hex quantity such as `0x1b4`
    pub fn from_hex(hex: &str) -> Result<Self> {
        let cleaned = hex.strip_prefix("0x").unwrap_or(hex);
        let value = u64::from_str_radix(cleaned, 16).map_err(|e| {
            IngestError::invalid_format(
                "block_number",
                &format!("Invalid hex block number '{hex}': {e}"),
            )
        })?;
        Ok(Self(value))
    }

    /// Hex quantity encoding used as a JSON-RPC parameter
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{:x}", self.0)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<BlockNumber> for u64 {
    fn from(block_number: BlockNumber) -> Self {
        block_number.0
    }
}

impl FromStr for BlockNumber {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        let value = s.trim().parse::<u64>().map_err(|e| {
            IngestError::invalid_format(
                "block_number",
                &format!("Invalid block number '{s}': {e}"),
            )
        })?;
        Ok(Self(value))
    }
}

/// A block hash with hex validation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(String);

impl BlockHash {
    /// Creates a new `BlockHash` with validation
    pub fn new(value: String) -> Result<Self> {
        Self::validate_hex_hash(&value)?;
        Ok(Self(value))
    }

    /// Creates a `BlockHash` without validation (for trusted sources)
    #[must_use]
    pub const fn from_trusted(value: String) -> Self {
        Self(value)
    }

    /// Gets the inner value
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }

    /// Gets the inner value as owned String
    #[must_use]
    pub fn into_value(self) -> String {
        self.0
    }

    fn validate_hex_hash(value: &str) -> Result<()> {
        let cleaned = value.strip_prefix("0x").unwrap_or(value);

        if cleaned.len() != 64 {
            return Err(IngestError::invalid_format(
                "block_hash",
                &format!(
                    "Hash must be 64 hex characters (got {}): {}",
                    cleaned.len(),
                    value
                ),
            ));
        }

        if !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IngestError::invalid_format(
                "block_hash",
                &format!("Hash contains non-hex characters: {value}"),
            ));
        }

        Ok(())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<BlockHash> for String {
    fn from(block_hash: BlockHash) -> Self {
        block_hash.0
    }
}

impl FromStr for BlockHash {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_number_from_decimal_string() {
        let bn: BlockNumber = "46147".parse().unwrap();
        assert_eq!(bn.value(), 46147);
    }

    #[test]
    fn test_block_number_rejects_negative() {
        assert!("-1".parse::<BlockNumber>().is_err());
    }

    #[test]
    fn test_block_number_hex_round_trip() {
        let bn = BlockNumber::from_hex("0x1a").unwrap();
        assert_eq!(bn.value(), 26);
        assert_eq!(bn.to_hex(), "0x1a");
        assert_eq!(BlockNumber::new(0).to_hex(), "0x0");
    }

    #[test]
    fn test_block_hash_valid() {
        let hash = "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
        let bh = BlockHash::new(hash.to_string()).unwrap();
        assert_eq!(bh.value(), hash);
    }

    #[test]
    fn test_block_hash_invalid_length() {
        assert!(BlockHash::new("0x1234".to_string()).is_err());
    }

    #[test]
    fn test_block_hash_invalid_chars() {
        let hash = "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdeg";
        assert!(BlockHash::new(hash.to_string()).is_err());
    }
}
