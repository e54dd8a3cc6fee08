use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::paths::WalletPaths;
use super::vault::{KdfProfile, SealedBox};
use crate::auth::AuthSession;
use crate::blockchain::Address;
use crate::crypto::SigningKey;
use crate::errors::{WalletError, WalletResult};

pub const WALLETS_KEY: &str = "sentry_wallets";
pub const PASSWORD_HINT_KEY: &str = "sentry_password_hint";
pub const PREFERENCES_KEY: &str = "sentry_preferences";
pub const SESSION_KEY: &str = "sentry_session";

const BACKUPS_KEPT: usize = 5;

/// A wallet kept on this device only, outside the hosted store.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct LocalWalletRecord {
    #[zeroize(skip)]
    pub id: String,
    #[zeroize(skip)]
    pub name: String,
    #[zeroize(skip)]
    pub address: Address,
    private_key_hex: String,
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
}

impl LocalWalletRecord {
    pub fn from_key(name: impl Into<String>, key: &SigningKey) -> Self {
        Self {
            id: LocalStore::generate_wallet_id(),
            name: name.into(),
            address: key.address(),
            private_key_hex: key.to_hex().to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn signing_key(&self) -> WalletResult<SigningKey> {
        SigningKey::from_hex(&self.private_key_hex)
    }
}

impl fmt::Debug for LocalWalletRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalWalletRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("private_key_hex", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    pub default_wallet: Option<String>,
    pub currency: String,
    pub theme: String,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            default_wallet: None,
            currency: "USD".to_string(),
            theme: "light".to_string(),
        }
    }
}

/// File-backed key/value document with the browser local-storage keys.
pub struct LocalStore {
    paths: WalletPaths,
    kdf: KdfProfile,
    // Serializes read-modify-write of the document within this process.
    guard: Mutex<()>,
}

impl LocalStore {
    pub fn new(paths: WalletPaths, kdf: KdfProfile) -> Self {
        Self {
            paths,
            kdf,
            guard: Mutex::new(()),
        }
    }

    /// `wallet_<millis>_<9 random chars>`.
    pub fn generate_wallet_id() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();
        format!("wallet_{}_{}", Utc::now().timestamp_millis(), suffix)
    }

    pub fn save_wallets(
        &self,
        records: &[LocalWalletRecord],
        password: &SecretString,
    ) -> WalletResult<()> {
        let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(records)?);
        let sealed = SealedBox::seal(password, self.kdf, &plaintext)
            .map_err(|e| WalletError::StorageError(format!("Failed to save wallets: {}", e)))?;
        let encoded = serde_json::to_string(&sealed)?;

        self.update(|document| {
            if document.contains_key(WALLETS_KEY) {
                self.backup()?;
            }
            document.insert(WALLETS_KEY.to_string(), encoded);
            Ok(())
        })?;
        log::info!("Saved {} local wallet(s)", records.len());
        Ok(())
    }

    /// Empty when nothing is stored. A wrong password is `AuthenticationError`.
    pub fn load_wallets(&self, password: &SecretString) -> WalletResult<Vec<LocalWalletRecord>> {
        let Some(encoded) = self.get(WALLETS_KEY)? else {
            return Ok(Vec::new());
        };
        let sealed: SealedBox = serde_json::from_str(&encoded).map_err(|_| {
            WalletError::AuthenticationError(
                "Failed to load wallets or invalid password".to_string(),
            )
        })?;
        let plaintext = sealed
            .open(password)
            .map_err(|_| WalletError::AuthenticationError("Invalid password".to_string()))?;
        serde_json::from_slice(&plaintext).map_err(|_| {
            WalletError::AuthenticationError(
                "Failed to load wallets or invalid password".to_string(),
            )
        })
    }

    pub fn has_wallets(&self) -> WalletResult<bool> {
        Ok(self.get(WALLETS_KEY)?.is_some())
    }

    pub fn clear_wallets(&self) -> WalletResult<()> {
        self.update(|document| {
            if document.contains_key(WALLETS_KEY) {
                self.backup()?;
                document.remove(WALLETS_KEY);
            }
            Ok(())
        })
    }

    pub fn validate_password(&self, password: &SecretString) -> bool {
        self.load_wallets(password).is_ok()
    }

    pub fn save_password_hint(&self, hint: &str) -> WalletResult<()> {
        self.set(PASSWORD_HINT_KEY, hint.to_string())
    }

    pub fn password_hint(&self) -> WalletResult<Option<String>> {
        self.get(PASSWORD_HINT_KEY)
    }

    pub fn clear_password_hint(&self) -> WalletResult<()> {
        self.remove(PASSWORD_HINT_KEY)
    }

    pub fn save_preferences(&self, preferences: &UserPreferences) -> WalletResult<()> {
        self.set(PREFERENCES_KEY, serde_json::to_string(preferences)?)
    }

    /// Stored preferences, or the defaults when missing or unreadable.
    pub fn load_preferences(&self) -> UserPreferences {
        match self.get(PREFERENCES_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                log::warn!("Ignoring unreadable preferences: {}", err);
                UserPreferences::default()
            }),
            Ok(None) => UserPreferences::default(),
            Err(err) => {
                log::warn!("Could not read preferences: {}", err);
                UserPreferences::default()
            }
        }
    }

    pub fn save_session(&self, session: &AuthSession) -> WalletResult<()> {
        self.set(SESSION_KEY, serde_json::to_string(session)?)
    }

    /// The persisted session, if any and readable.
    pub fn load_session(&self) -> Option<AuthSession> {
        let raw = self.get(SESSION_KEY).ok().flatten()?;
        serde_json::from_str(&raw)
            .map_err(|err| log::warn!("Discarding unreadable session: {}", err))
            .ok()
    }

    pub fn clear_session(&self) -> WalletResult<()> {
        self.remove(SESSION_KEY)
    }

    fn get(&self, key: &str) -> WalletResult<Option<String>> {
        let _guard = self.guard.lock();
        Ok(read_document(self.paths.local_store_file())?.remove(key))
    }

    fn set(&self, key: &str, value: String) -> WalletResult<()> {
        self.update(|document| {
            document.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> WalletResult<()> {
        self.update(|document| {
            document.remove(key);
            Ok(())
        })
    }

    fn update<F>(&self, updater: F) -> WalletResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> WalletResult<()>,
    {
        let _guard = self.guard.lock();
        let path = self.paths.local_store_file();
        let mut document = read_document(path)?;
        updater(&mut document)?;
        write_document(path, &document)
    }

    fn backup(&self) -> WalletResult<()> {
        if let Some(path) = self.paths.backup_local_store()? {
            log::debug!("Backed up local store to {}", path.display());
            self.paths.prune_backups(BACKUPS_KEPT)?;
        }
        Ok(())
    }
}

fn read_document(path: &Path) -> WalletResult<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| WalletError::StorageError(format!("Corrupted local store: {}", e)))
}

fn write_document(path: &Path, document: &BTreeMap<String, String>) -> WalletResult<()> {
    let serialized = serde_json::to_vec_pretty(document)?;
    let dir = path
        .parent()
        .ok_or_else(|| WalletError::StorageError("Invalid local store path".to_string()))?;
    fs::create_dir_all(dir)?;
    let tmp_path = path.with_extension("new");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&serialized)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::vault::test_profile;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> LocalStore {
        let paths = WalletPaths::new(temp.path()).unwrap();
        paths.ensure_directories().unwrap();
        LocalStore::new(paths, test_profile())
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn wallet_ids_have_expected_shape() {
        let id = LocalStore::generate_wallet_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "wallet");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert_ne!(id, LocalStore::generate_wallet_id());
    }

    #[test]
    fn wallets_round_trip_and_reject_wrong_password() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        assert!(store.load_wallets(&secret("pw")).unwrap().is_empty());
        assert!(!store.has_wallets().unwrap());

        let key = SigningKey::generate();
        let record = LocalWalletRecord::from_key("Savings", &key);
        store.save_wallets(&[record], &secret("password1")).unwrap();

        let loaded = store.load_wallets(&secret("password1")).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].address, key.address());
        assert_eq!(loaded[0].signing_key().unwrap(), key);

        assert_eq!(
            store.load_wallets(&secret("password2")).unwrap_err(),
            WalletError::AuthenticationError("Invalid password".to_string())
        );
        assert!(store.validate_password(&secret("password1")));
        assert!(!store.validate_password(&secret("password2")));

        let raw = fs::read_to_string(temp.path().join("local_store.json")).unwrap();
        assert!(!raw.contains(key.to_hex().as_str()));
    }

    #[test]
    fn overwrite_and_clear_take_backups() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let record = LocalWalletRecord::from_key("A", &SigningKey::generate());

        store.save_wallets(&[record.clone()], &secret("pw-one-1")).unwrap();
        store.save_wallets(&[record], &secret("pw-one-1")).unwrap();
        store.clear_wallets().unwrap();

        assert!(!store.has_wallets().unwrap());
        assert_eq!(store.paths.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn hint_and_preferences() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        assert_eq!(store.password_hint().unwrap(), None);
        store.save_password_hint("first pet").unwrap();
        assert_eq!(store.password_hint().unwrap().as_deref(), Some("first pet"));
        store.clear_password_hint().unwrap();
        assert_eq!(store.password_hint().unwrap(), None);

        assert_eq!(store.load_preferences(), UserPreferences::default());
        let prefs = UserPreferences {
            default_wallet: Some("wallet_1_abc".to_string()),
            currency: "EUR".to_string(),
            theme: "dark".to_string(),
        };
        store.save_preferences(&prefs).unwrap();
        assert_eq!(store.load_preferences(), prefs);
    }

    #[test]
    fn unreadable_preferences_fall_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.set(PREFERENCES_KEY, "{not json".to_string()).unwrap();
        assert_eq!(store.load_preferences(), UserPreferences::default());
    }

    #[test]
    fn record_debug_is_redacted() {
        let key = SigningKey::generate();
        let record = LocalWalletRecord::from_key("A", &key);
        assert!(!format!("{:?}", record).contains(key.to_hex().as_str()));
    }
}
