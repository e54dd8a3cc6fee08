use argon2::{Algorithm, Argon2, Params, Version};
use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::blockchain::Address;
use crate::crypto::SigningKey;
use crate::errors::{WalletError, WalletResult};

const VAULT_MAGIC: &str = "SENTRYWL";
const VAULT_VERSION: u16 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Message shown for every unlock failure. Wrong password and corrupted ciphertext
/// are deliberately indistinguishable.
pub const UNLOCK_FAILURE_MESSAGE: &str = "Incorrect password or failed to decrypt wallet.";

/// Argon2id cost settings. The salt is generated per envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfProfile {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfProfile {
    fn default() -> Self {
        Self {
            m_cost_kib: 256 * 1024, // 256 MiB
            t_cost: 4,
            p_cost: 1,
        }
    }
}

impl KdfProfile {
    pub fn new(m_cost_kib: u32, t_cost: u32, p_cost: u32) -> WalletResult<Self> {
        let profile = Self {
            m_cost_kib,
            t_cost,
            p_cost,
        };
        profile.argon_params()?;
        Ok(profile)
    }

    fn argon_params(&self) -> WalletResult<Params> {
        Params::new(self.m_cost_kib, self.t_cost, self.p_cost, Some(KEY_LEN))
            .map_err(|e| WalletError::CryptoError(format!("Invalid Argon2 params: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParameters {
    #[serde(flatten)]
    pub profile: KdfProfile,
    #[serde(with = "hex")]
    pub salt: [u8; SALT_LEN],
}

/// Password-encrypted payload: Argon2id key derivation, AES-256-GCM, and a BLAKE3
/// checksum of the plaintext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedBox {
    magic: String,
    version: u16,
    kdf: KdfParameters,
    #[serde(with = "hex")]
    nonce: [u8; NONCE_LEN],
    #[serde(with = "hex")]
    checksum: [u8; 32],
    #[serde(with = "hex")]
    ciphertext: Vec<u8>,
}

impl SealedBox {
    /// Encrypt `plaintext` under a key derived from `password`.
    pub fn seal(
        password: &SecretString,
        profile: KdfProfile,
        plaintext: &[u8],
    ) -> WalletResult<Self> {
        let mut rng = OsRng;
        let mut salt = [0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce_bytes);

        let kdf = KdfParameters { profile, salt };
        let key = derive_key(password, &kdf)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);
        let checksum = blake3_checksum(plaintext);
        let ciphertext = encrypt_aes_gcm(&key, nonce, plaintext)?;

        Ok(Self {
            magic: VAULT_MAGIC.to_string(),
            version: VAULT_VERSION,
            kdf,
            nonce: nonce_bytes,
            checksum,
            ciphertext,
        })
    }

    /// Decrypt and verify. Errors carry the failure cause for logging; callers that
    /// face the user collapse them into one generic message.
    pub fn open(&self, password: &SecretString) -> WalletResult<Zeroizing<Vec<u8>>> {
        if self.magic != VAULT_MAGIC {
            return Err(WalletError::ValidationError(
                "Invalid vault magic marker".to_string(),
            ));
        }

        if self.version != VAULT_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported vault version: {}",
                self.version
            )));
        }

        let key = derive_key(password, &self.kdf)?;
        let nonce = Nonce::assume_unique_for_key(self.nonce);
        let plaintext = decrypt_aes_gcm(&key, nonce, &self.ciphertext)?;

        if blake3_checksum(&plaintext) != self.checksum {
            return Err(WalletError::ValidationError(
                "Sealed data integrity verification failed".to_string(),
            ));
        }

        Ok(plaintext)
    }

    pub fn kdf(&self) -> &KdfParameters {
        &self.kdf
    }
}

/// The value stored in `wallets.encrypted_wallet`: the sealed private key plus the
/// public address, so the address is readable without the password.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedWallet {
    pub address: Address,
    pub created_at: DateTime<Utc>,
    pub sealed: SealedBox,
}

impl EncryptedWallet {
    /// Encrypt the private key of `key` with `password`.
    pub fn seal(
        key: &SigningKey,
        password: &SecretString,
        profile: KdfProfile,
    ) -> WalletResult<Self> {
        let secret = key.to_bytes();
        let sealed = SealedBox::seal(password, profile, secret.as_ref())?;
        Ok(Self {
            address: key.address(),
            created_at: Utc::now(),
            sealed,
        })
    }

    /// Decrypt the signing key. Every failure becomes the same `AuthenticationError`.
    pub fn open(&self, password: &SecretString) -> WalletResult<SigningKey> {
        let result = self
            .sealed
            .open(password)
            .and_then(|plaintext| SigningKey::from_bytes(&plaintext))
            .and_then(|key| {
                if key.address() == self.address {
                    Ok(key)
                } else {
                    Err(WalletError::ValidationError(
                        "Decrypted key does not match stored address".to_string(),
                    ))
                }
            });

        result.map_err(|err| {
            log::debug!("Wallet decryption failed: {}", err);
            WalletError::AuthenticationError(UNLOCK_FAILURE_MESSAGE.to_string())
        })
    }

    pub fn to_json_string(&self) -> WalletResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored envelope. A malformed envelope is reported like a failed unlock.
    pub fn from_json_str(raw: &str) -> WalletResult<Self> {
        serde_json::from_str(raw).map_err(|err| {
            log::debug!("Stored wallet envelope is malformed: {}", err);
            WalletError::AuthenticationError(UNLOCK_FAILURE_MESSAGE.to_string())
        })
    }
}

fn derive_key(
    password: &SecretString,
    params: &KdfParameters,
) -> WalletResult<Zeroizing<[u8; KEY_LEN]>> {
    let argon_params = params.profile.argon_params()?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(
            password.expose_secret().as_bytes(),
            &params.salt,
            key.as_mut(),
        )
        .map_err(|e| WalletError::CryptoError(format!("KDF failed: {e}")))?;
    Ok(key)
}

fn encrypt_aes_gcm(
    key: &Zeroizing<[u8; KEY_LEN]>,
    nonce: Nonce,
    plaintext: &[u8],
) -> WalletResult<Vec<u8>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::CryptoError("Encryption failure".to_string()))?;
    Ok(in_out)
}

fn decrypt_aes_gcm(
    key: &Zeroizing<[u8; KEY_LEN]>,
    nonce: Nonce,
    ciphertext: &[u8],
) -> WalletResult<Zeroizing<Vec<u8>>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);

    if ciphertext.len() < aead::AES_256_GCM.tag_len() {
        return Err(WalletError::CryptoError(
            "Ciphertext shorter than authentication tag".to_string(),
        ));
    }

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::CryptoError("Decryption failure".to_string()))?;
    let plaintext_len = plaintext.len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

fn blake3_checksum(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake3::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    output
}

#[cfg(test)]
pub(crate) fn test_profile() -> KdfProfile {
    KdfProfile {
        m_cost_kib: 64,
        t_cost: 1,
        p_cost: 1,
    }
}
