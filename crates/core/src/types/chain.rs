//! EVM chain value types: wallet addresses and transaction hashes.
//!
//! Both wrap the `ethers` primitives so the storefront can hand them straight
//! to the RPC provider and the ABI encoder. Parsing is stricter than the
//! `ethers` `FromStr` impls: the `0x` prefix is required.

use core::fmt;
use core::str::FromStr;

use ethers::types::{Address, H256};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};

/// Errors produced when parsing chain values.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainValueError {
    #[error("address must be 0x followed by 40 hex characters")]
    InvalidAddress,
    #[error("transaction hash must be 0x followed by 64 hex characters")]
    InvalidTxHash,
}

/// Returns the hex digits after the `0x` prefix when there are exactly `digits` of them.
fn hex_body(s: &str, digits: usize) -> Option<&str> {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .filter(|hex| hex.len() == digits && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// A 20-byte EVM account address.
///
/// Displays in EIP-55 checksum form and serializes as lowercase `0x` hex.
/// Comparison is on the bytes, so casing never matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(Address);

impl WalletAddress {
    /// Parse a wallet address, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ChainValueError::InvalidAddress`] unless the input is `0x`
    /// followed by exactly 40 hex digits.
    pub fn parse(s: &str) -> Result<Self, ChainValueError> {
        let hex = hex_body(s.trim(), 40).ok_or(ChainValueError::InvalidAddress)?;
        Address::from_str(hex)
            .map(Self)
            .map_err(|_| ChainValueError::InvalidAddress)
    }

    #[must_use]
    pub const fn address(&self) -> Address {
        self.0
    }

    /// Lowercase `0x` hex, the form sent to the backend and the wallet.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("{:#x}", self.0)
    }

    /// Shortened `0x1234…abcd` form for compact display.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.to_string()
    }
}

impl From<Address> for WalletAddress {
    fn from(value: Address) -> Self {
        Self(value)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_checksum(&self.0, None))
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = ChainValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.to_hex()
    }
}

/// A 32-byte transaction hash, shown as lowercase `0x` hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(H256);

impl TxHash {
    /// Parse a transaction hash.
    ///
    /// # Errors
    ///
    /// Returns [`ChainValueError::InvalidTxHash`] unless the input is `0x`
    /// followed by exactly 64 hex digits.
    pub fn parse(s: &str) -> Result<Self, ChainValueError> {
        let hex = hex_body(s.trim(), 64).ok_or(ChainValueError::InvalidTxHash)?;
        H256::from_str(hex)
            .map(Self)
            .map_err(|_| ChainValueError::InvalidTxHash)
    }

    #[must_use]
    pub const fn hash(&self) -> H256 {
        self.0
    }
}

impl From<H256> for TxHash {
    fn from(value: H256) -> Self {
        Self(value)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl TryFrom<String> for TxHash {
    type Error = ChainValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TxHash> for String {
    fn from(value: TxHash) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ADDR: &str = "0x55d398326f99059fF775485246999027B3197955";

    #[test]
    fn test_address_parse() {
        let a = WalletAddress::parse(&format!(" {ADDR} ")).unwrap();
        assert_eq!(a.to_string(), ADDR);
        assert_eq!(a.to_hex(), ADDR.to_ascii_lowercase());
        assert_eq!(a.short(), "0x55d3…7955");
    }

    #[test]
    fn test_address_case_insensitive_eq() {
        let a = WalletAddress::parse(ADDR).unwrap();
        let b = WalletAddress::parse(&ADDR.to_ascii_lowercase()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!(WalletAddress::parse("55d398326f99059fF775485246999027B3197955").is_err());
        assert!(WalletAddress::parse("0x1234").is_err());
        assert!(WalletAddress::parse("0xZZd398326f99059fF775485246999027B3197955").is_err());
    }

    #[test]
    fn test_tx_hash() {
        let raw = format!("0x{}", "AB".repeat(32));
        let hash = TxHash::parse(&raw).unwrap();
        assert_eq!(hash.to_string(), format!("0x{}", "ab".repeat(32)));
        assert_eq!(hash.hash(), H256::repeat_byte(0xab));
        assert!(TxHash::parse("0xabc").is_err());
        assert!(TxHash::parse(&"ab".repeat(32)).is_err());
    }

    #[test]
    fn test_serde_forms() {
        let a = WalletAddress::parse(ADDR).unwrap();
        assert_eq!(
            serde_json::to_value(a).unwrap(),
            serde_json::json!(ADDR.to_ascii_lowercase())
        );
        let bad: Result<WalletAddress, _> = serde_json::from_str("\"0x12\"");
        assert!(bad.is_err());
    }
}
