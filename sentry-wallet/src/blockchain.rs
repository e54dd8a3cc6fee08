//! Core chain types for the wallet
//!
//! Addresses, ether amounts, transaction hashes and the legacy (EIP-155) transaction
//! the wallet signs for transfers and contract calls.
use crate::crypto::{keccak256, SigningKey};
use crate::errors::{WalletError, WalletResult};
use alloy_rlp::{Encodable, Header};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 20-byte EVM account address.
///
/// Parsing accepts `0x` followed by 40 hex characters. All-lowercase and all-uppercase
/// input is accepted as-is; mixed case must match the EIP-55 checksum.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; 20]);

impl Address {
    pub const LEN: usize = 20;

    pub const fn from_array(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Create an address from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> WalletResult<Self> {
        if bytes.len() != Self::LEN {
            return Err(WalletError::InvalidAddress(format!(
                "Invalid address length: expected 20 bytes, got {}",
                bytes.len()
            )));
        }
        let mut raw = [0u8; 20];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Parse a hex address (0x format)
    pub fn from_string(address: &str) -> WalletResult<Self> {
        let hex_part = address.strip_prefix("0x").ok_or_else(|| {
            WalletError::InvalidAddress("Address must start with '0x'".to_string())
        })?;

        if hex_part.len() != 40 {
            // "0x" (2) + 40 hex chars = 42 total
            return Err(WalletError::InvalidAddress(format!(
                "Invalid hex address length: expected 42 characters, got {}",
                address.len()
            )));
        }

        let bytes = hex::decode(hex_part)
            .map_err(|_| WalletError::InvalidAddress("Invalid hex in address".to_string()))?;
        let parsed = Self::from_bytes(&bytes)?;

        let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && parsed.checksummed()[2..] != *hex_part {
            return Err(WalletError::InvalidAddress(
                "Address checksum mismatch".to_string(),
            ));
        }

        Ok(parsed)
    }

    /// Cheap well-formedness check used by form validation.
    pub fn is_valid(address: &str) -> bool {
        Self::from_string(address).is_ok()
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_lower_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// EIP-55 mixed-case checksum encoding.
    pub fn checksummed(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Left-pad to a 32-byte ABI word.
    pub fn to_abi_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.checksummed())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.checksummed())
    }
}

impl FromStr for Address {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_string(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.checksummed())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::from_string(&raw).map_err(serde::de::Error::custom)
    }
}

/// An amount of the native coin, held in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount {
    wei: u128,
}

impl Amount {
    /// Number of decimal places of the native coin
    pub const DECIMALS: u8 = 18;
    /// Wei per whole coin (10^18)
    pub const WEI_PER_COIN: u128 = 1_000_000_000_000_000_000;

    pub const fn from_wei(wei: u128) -> Self {
        Self { wei }
    }

    pub const fn wei(&self) -> u128 {
        self.wei
    }

    pub const fn is_zero(&self) -> bool {
        self.wei == 0
    }

    /// Parse a decimal coin amount such as `1.25` into wei.
    pub fn parse_ether(amount_str: &str) -> WalletResult<Self> {
        let trimmed = amount_str.trim();
        if trimmed.is_empty() {
            return Err(WalletError::InvalidAmount(
                "Amount cannot be empty".to_string(),
            ));
        }

        let (whole_str, fractional_str) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (trimmed, ""),
        };

        if whole_str.is_empty() && fractional_str.is_empty() {
            return Err(WalletError::InvalidAmount(
                "Invalid number format".to_string(),
            ));
        }
        if !whole_str.chars().all(|c| c.is_ascii_digit())
            || !fractional_str.chars().all(|c| c.is_ascii_digit())
        {
            return Err(WalletError::InvalidAmount(
                "Invalid number format".to_string(),
            ));
        }
        if fractional_str.len() > Self::DECIMALS as usize {
            return Err(WalletError::InvalidAmount(
                "Too many decimal places".to_string(),
            ));
        }

        let whole: u128 = if whole_str.is_empty() {
            0
        } else {
            whole_str
                .parse()
                .map_err(|_| WalletError::InvalidAmount("Amount overflow".to_string()))?
        };

        // Pad with zeros to get full precision
        let fractional: u128 = if fractional_str.is_empty() {
            0
        } else {
            format!("{:0<18}", fractional_str)
                .parse()
                .map_err(|_| WalletError::InvalidAmount("Invalid fractional part".to_string()))?
        };

        let wei = whole
            .checked_mul(Self::WEI_PER_COIN)
            .and_then(|w| w.checked_add(fractional))
            .ok_or_else(|| WalletError::InvalidAmount("Amount overflow".to_string()))?;

        Ok(Self { wei })
    }

    /// Full-precision decimal rendering without trailing zeros.
    pub fn as_string(&self) -> String {
        let whole = self.wei / Self::WEI_PER_COIN;
        let fractional = self.wei % Self::WEI_PER_COIN;

        if fractional == 0 {
            whole.to_string()
        } else {
            let frac_str = format!("{:018}", fractional)
                .trim_end_matches('0')
                .to_string();
            format!("{}.{}", whole, frac_str)
        }
    }

    /// Decimal rendering cut (not rounded) to exactly `decimals` fraction digits.
    pub fn format_truncated(&self, decimals: u8) -> String {
        let decimals = decimals.min(Self::DECIMALS);
        let whole = self.wei / Self::WEI_PER_COIN;
        if decimals == 0 {
            return whole.to_string();
        }
        let fractional = self.wei % Self::WEI_PER_COIN;
        let digits = format!("{:018}", fractional);
        format!("{}.{}", whole, &digits[..decimals as usize])
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl FromStr for Amount {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse_ether(s)
    }
}

/// Hash of a submitted transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub const fn from_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

impl FromStr for TxHash {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|_| WalletError::InvalidResponse(format!("Invalid tx hash: {}", s)))?;
        if bytes.len() != 32 {
            return Err(WalletError::InvalidResponse(format!(
                "Invalid tx hash length: {}",
                bytes.len()
            )));
        }
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&bytes);
        Ok(Self(raw))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Pre-EIP-2718 transaction, signed with EIP-155 replay protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: TxHash,
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

impl LegacyTransaction {
    /// RLP payload hashed for signing: the six fields followed by `chain_id, 0, 0`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.encode_common_fields(&mut payload);
        self.chain_id.encode(&mut payload);
        0u8.encode(&mut payload);
        0u8.encode(&mut payload);
        wrap_list(payload)
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }

    pub fn sign(&self, key: &SigningKey) -> WalletResult<SignedTransaction> {
        let signature = key.sign_prehash(&self.signing_hash())?;
        let v = self
            .chain_id
            .checked_mul(2)
            .and_then(|c| c.checked_add(35 + signature.recovery_id as u64))
            .ok_or_else(|| WalletError::ValidationError("Chain id too large".to_string()))?;

        let mut payload = Vec::new();
        self.encode_common_fields(&mut payload);
        v.encode(&mut payload);
        <[u8] as Encodable>::encode(trim_leading_zeros(&signature.r), &mut payload);
        <[u8] as Encodable>::encode(trim_leading_zeros(&signature.s), &mut payload);

        let raw = wrap_list(payload);
        let hash = TxHash::from_array(keccak256(&raw));
        Ok(SignedTransaction { raw, hash })
    }

    fn encode_common_fields(&self, out: &mut Vec<u8>) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        <[u8] as Encodable>::encode(self.to.as_bytes(), out);
        self.value.encode(out);
        <[u8] as Encodable>::encode(&self.data, out);
    }
}

fn wrap_list(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}
