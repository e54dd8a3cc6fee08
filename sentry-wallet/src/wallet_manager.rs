use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::blockchain::Address;
use crate::crypto::SigningKey;
use crate::errors::{WalletError, WalletResult};
use crate::storage::vault::{EncryptedWallet, KdfProfile};
use crate::store::DataStore;
use crate::validation::InputValidator;

/// Create and unlock the single encrypted signing key each user owns.
pub struct WalletLifecycleManager {
    store: Arc<dyn DataStore>,
    kdf: KdfProfile,
    validator: &'static InputValidator,
}

impl WalletLifecycleManager {
    pub fn new(store: Arc<dyn DataStore>, kdf: KdfProfile) -> WalletResult<Self> {
        Ok(Self {
            store,
            kdf,
            validator: InputValidator::shared()?,
        })
    }

    pub async fn has_encrypted_wallet(&self, user_id: &str) -> WalletResult<bool> {
        Ok(self.store.fetch_encrypted_wallet(user_id).await?.is_some())
    }

    /// Generate a key, store it encrypted under `password`, and return it unlocked.
    pub async fn create_wallet(
        &self,
        password: &SecretString,
        confirmation: &SecretString,
        user_id: &str,
    ) -> WalletResult<SigningKey> {
        self.validator
            .validate_new_password(password.expose_secret(), confirmation.expose_secret())?;

        if self.has_encrypted_wallet(user_id).await? {
            return Err(WalletError::AlreadyExists(
                "A wallet already exists for this account".to_string(),
            ));
        }

        let key = SigningKey::generate();
        let envelope = EncryptedWallet::seal(&key, password, self.kdf)?;
        let serialized = envelope.to_json_string()?;

        self.store
            .insert_encrypted_wallet(user_id, &serialized, None)
            .await
            .map_err(|err| match err {
                WalletError::PersistenceError(_) => err,
                other => WalletError::PersistenceError(other.to_string()),
            })?;

        log::info!("Created wallet {} for user {}", key.address(), user_id);
        Ok(key)
    }

    /// Decrypt the stored key. Every decryption failure reads the same to the caller.
    pub async fn unlock_wallet(
        &self,
        password: &SecretString,
        user_id: &str,
    ) -> WalletResult<SigningKey> {
        let envelope = self.fetch_envelope(user_id).await?;
        let key = envelope.open(password)?;
        log::info!("Unlocked wallet {} for user {}", key.address(), user_id);
        Ok(key)
    }

    /// Public address of the stored wallet, readable without the password.
    pub async fn wallet_address(&self, user_id: &str) -> WalletResult<Option<Address>> {
        match self.store.fetch_encrypted_wallet(user_id).await? {
            Some(raw) => Ok(EncryptedWallet::from_json_str(&raw).ok().map(|e| e.address)),
            None => Ok(None),
        }
    }

    async fn fetch_envelope(&self, user_id: &str) -> WalletResult<EncryptedWallet> {
        let raw = self
            .store
            .fetch_encrypted_wallet(user_id)
            .await?
            .ok_or_else(|| WalletError::NotFound("No wallet exists for this account".to_string()))?;
        EncryptedWallet::from_json_str(&raw)
    }
}
