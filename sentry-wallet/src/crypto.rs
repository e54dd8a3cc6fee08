//! Signing key handling for the wallet
//!
//! A wallet in SentryWallet is a single secp256k1 key pair. The private half only
//! ever exists in process memory (it is zeroized on drop); what leaves the process is
//! the encrypted envelope produced by `storage::vault`.
use crate::blockchain::Address;
use crate::errors::{WalletError, WalletResult};
use k256::ecdsa::{RecoveryId, Signature, SigningKey as K256SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};
use std::fmt;
use zeroize::Zeroizing;

/// Length of a raw secp256k1 private key.
pub const PRIVATE_KEY_LEN: usize = 32;

/// Keccak-256 digest, as used for addresses, selectors and transaction hashes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let digest = Keccak256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// ECDSA signature over a 32-byte prehash, with the recovery id kept for EIP-155.
#[derive(Clone, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

impl RecoverableSignature {
    /// Recover the address that produced this signature.
    pub fn recover_address(&self, prehash: &[u8; 32]) -> WalletResult<Address> {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        let signature = Signature::from_slice(&bytes)
            .map_err(|e| WalletError::CryptoError(format!("Malformed signature: {e}")))?;
        let recovery_id = RecoveryId::from_byte(self.recovery_id)
            .ok_or_else(|| WalletError::CryptoError("Invalid recovery id".to_string()))?;
        let verifying = VerifyingKey::recover_from_prehash(prehash, &signature, recovery_id)
            .map_err(|e| WalletError::CryptoError(format!("Recovery failed: {e}")))?;
        Ok(address_of(&verifying))
    }
}

impl fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RecoverableSignature(r=0x{}, s=0x{}, v={})",
            hex::encode(self.r),
            hex::encode(self.s),
            self.recovery_id
        )
    }
}

/// The private/public key pair controlling a chain address.
#[derive(Clone)]
pub struct SigningKey {
    inner: K256SigningKey,
    address: Address,
}

impl SigningKey {
    /// Generate a fresh key from the operating system RNG.
    pub fn generate() -> Self {
        Self::from_inner(K256SigningKey::random(&mut OsRng))
    }

    /// Rebuild a key from raw private key bytes.
    pub fn from_bytes(bytes: &[u8]) -> WalletResult<Self> {
        if bytes.len() != PRIVATE_KEY_LEN {
            return Err(WalletError::InvalidKey(format!(
                "expected {} bytes, got {}",
                PRIVATE_KEY_LEN,
                bytes.len()
            )));
        }
        let inner = K256SigningKey::from_slice(bytes)
            .map_err(|_| WalletError::InvalidKey("not a valid secp256k1 scalar".to_string()))?;
        Ok(Self::from_inner(inner))
    }

    /// Rebuild a key from a hex string, with or without `0x`.
    pub fn from_hex(hex_key: &str) -> WalletResult<Self> {
        let trimmed = hex_key.trim();
        let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = Zeroizing::new(
            hex::decode(stripped)
                .map_err(|_| WalletError::InvalidKey("private key is not hex".to_string()))?,
        );
        Self::from_bytes(&bytes)
    }

    fn from_inner(inner: K256SigningKey) -> Self {
        let address = address_of(inner.verifying_key());
        Self { inner, address }
    }

    /// Address controlled by this key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Raw private key bytes. Callers must not let these outlive the returned buffer.
    pub fn to_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_LEN]> {
        let field_bytes = self.inner.to_bytes();
        let mut out = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);
        out.copy_from_slice(&field_bytes);
        out
    }

    /// Lowercase hex of the private key, for the local wallet records.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.to_bytes().as_ref()))
    }

    /// Uncompressed SEC1 public key (65 bytes, `0x04` prefix).
    pub fn public_key_uncompressed(&self) -> [u8; 65] {
        let point = self.inner.verifying_key().to_encoded_point(false);
        let mut out = [0u8; 65];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Sign a 32-byte hash (never the raw message).
    pub fn sign_prehash(&self, prehash: &[u8; 32]) -> WalletResult<RecoverableSignature> {
        let (signature, recovery_id) = self
            .inner
            .sign_prehash_recoverable(prehash)
            .map_err(|e| WalletError::CryptoError(format!("Signing failed: {e}")))?;
        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("address", &self.address)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl PartialEq for SigningKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes().as_ref() == other.to_bytes().as_ref()
    }
}

impl Eq for SigningKey {}

fn address_of(verifying: &VerifyingKey) -> Address {
    let point = verifying.to_encoded_point(false);
    // Skip the 0x04 prefix; the address is the last 20 bytes of the digest.
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    Address::from_array(bytes)
}
