use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blockchain::Address;
use crate::errors::{WalletError, WalletResult};
use crate::storage::vault::KdfProfile;
use crate::storage::WalletPaths;

const CONFIG_VERSION: u16 = 1;

pub const DEFAULT_RPC_URL: &str = "https://rpc.primordial.bdagscan.com";
pub const DEFAULT_GAS_LIMIT: u64 = 21_000;
pub const ENVIRONMENT_VAR: &str = "SENTRY_WALLET_ENV";

const ENV_BACKEND_URL: &str = "SENTRY_SUPABASE_URL";
const ENV_BACKEND_ANON_KEY: &str = "SENTRY_SUPABASE_ANON_KEY";
const ENV_RPC_URL: &str = "SENTRY_RPC_URL";
const ENV_CHAIN_ID: &str = "SENTRY_CHAIN_ID";
const ENV_INHERITANCE_CONTRACT: &str = "SENTRY_INHERITANCE_CONTRACT";
const ENV_ACTIVITY_CONTRACT: &str = "SENTRY_ACTIVITY_CONTRACT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub rpc_url: String,
    /// Queried with `eth_chainId` when unset.
    pub chain_id: Option<u64>,
    pub gas_limit: u64,
    pub confirmation_poll_ms: u64,
    pub max_confirmation_polls: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            chain_id: None,
            gas_limit: DEFAULT_GAS_LIMIT,
            confirmation_poll_ms: 2_000,
            max_confirmation_polls: 90,
        }
    }
}

/// Hosted auth/data provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContractsConfig {
    pub activity: Option<Address>,
    pub inheritance: Option<Address>,
    pub mirror_nominees_on_chain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub auto_lock_minutes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_lock_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SentryConfig {
    pub network: NetworkConfig,
    pub backend: BackendConfig,
    pub contracts: ContractsConfig,
    pub session: SessionConfig,
    pub kdf: KdfProfile,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl SentryConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            network: NetworkConfig::default(),
            backend: BackendConfig::default(),
            contracts: ContractsConfig::default(),
            session: SessionConfig::default(),
            kdf: KdfProfile::default(),
            environment: environment.into(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Overlay `SENTRY_*` variables from the process environment.
    pub fn apply_process_env(&mut self) -> WalletResult<()> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values returned by `lookup`. Empty values and values with control
    /// characters are skipped with a warning; unparsable ones are errors.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> WalletResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| -> Option<String> {
            let value = lookup(key)?;
            let trimmed = value.trim();
            if trimmed.is_empty() {
                log::warn!("Environment variable {} is empty", key);
                return None;
            }
            if trimmed.chars().any(|c| c.is_control()) {
                log::warn!(
                    "Environment variable {} contains control characters, ignoring",
                    key
                );
                return None;
            }
            log::debug!("Loaded configuration from environment variable {}", key);
            Some(trimmed.to_string())
        };

        if let Some(url) = read(ENV_BACKEND_URL) {
            self.backend.url = url;
        }
        if let Some(key) = read(ENV_BACKEND_ANON_KEY) {
            self.backend.anon_key = key;
        }
        if let Some(url) = read(ENV_RPC_URL) {
            self.network.rpc_url = url;
        }
        if let Some(raw) = read(ENV_CHAIN_ID) {
            let chain_id = raw.parse::<u64>().map_err(|_| {
                WalletError::ValidationError(format!(
                    "Invalid numeric value '{}' for {}",
                    raw, ENV_CHAIN_ID
                ))
            })?;
            self.network.chain_id = Some(chain_id);
        }
        if let Some(raw) = read(ENV_INHERITANCE_CONTRACT) {
            self.contracts.inheritance = Some(Address::from_string(&raw)?);
        }
        if let Some(raw) = read(ENV_ACTIVITY_CONTRACT) {
            self.contracts.activity = Some(Address::from_string(&raw)?);
        }
        Ok(())
    }

    /// Settings without which no intent against the hosted provider can work.
    pub fn validate(&self) -> WalletResult<()> {
        if self.backend.url.trim().is_empty() || self.backend.anon_key.trim().is_empty() {
            return Err(WalletError::ValidationError(format!(
                "Backend is not configured; set {} and {}",
                ENV_BACKEND_URL, ENV_BACKEND_ANON_KEY
            )));
        }
        url::Url::parse(&self.backend.url).map_err(|e| {
            WalletError::ValidationError(format!("Invalid backend URL: {}", e))
        })?;
        url::Url::parse(&self.network.rpc_url)
            .map_err(|e| WalletError::ValidationError(format!("Invalid RPC URL: {}", e)))?;
        if self.network.gas_limit == 0 {
            return Err(WalletError::ValidationError(
                "Gas limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Environment name from `SENTRY_WALLET_ENV`, defaulting to `development`.
pub fn environment_from_env() -> String {
    match std::env::var(ENVIRONMENT_VAR)
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "production" | "prod" => "production".to_string(),
        "test" | "testing" => "test".to_string(),
        _ => "development".to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: SentryConfig,
    modified_at_unix: i64,
}

/// Handles persistence of wallet configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_paths(paths: &WalletPaths) -> Self {
        Self {
            path: paths.config_file().to_path_buf(),
        }
    }

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load_or_default(&self, environment: impl Into<String>) -> WalletResult<SentryConfig> {
        if !self.path.exists() {
            let config = SentryConfig::new(environment);
            self.save(&config)?;
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(WalletError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    pub fn save(&self, config: &SentryConfig) -> WalletResult<()> {
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| WalletError::StorageError(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    pub fn update<F>(
        &self,
        environment: impl Into<String>,
        updater: F,
    ) -> WalletResult<SentryConfig>
    where
        F: FnOnce(&mut SentryConfig) -> WalletResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &SentryConfig) -> WalletResult<[u8; 32]> {
    let mut hasher = Blake3::new();
    hasher.update(&serde_json::to_vec(config)?);
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_public_network() {
        let config = SentryConfig::new("development");
        assert_eq!(config.network.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(config.network.gas_limit, 21_000);
        assert_eq!(config.session.auto_lock_minutes, 15);
        assert!(config.contracts.activity.is_none());
    }

    #[test]
    fn save_and_load_config_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("wallet.config"));

        let mut config = SentryConfig::new("development");
        config.network.rpc_url = "http://localhost:8545".into();
        config.network.chain_id = Some(1337);
        store.save(&config).unwrap();

        let loaded = store.load_or_default("development").unwrap();
        assert_eq!(loaded.network.rpc_url, "http://localhost:8545");
        assert_eq!(loaded.network.chain_id, Some(1337));
    }

    #[test]
    fn tampered_config_detected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wallet.config");
        let store = ConfigStore::new(&path);
        store.save(&SentryConfig::new("test")).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        fs::write(&path, raw.replace("rpc.primordial", "rpc.evil")).unwrap();

        let result = store.load_or_default("test");
        assert!(matches!(result, Err(WalletError::ValidationError(_))));
    }

    #[test]
    fn update_persists_changes() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("wallet.config"));
        store
            .update("test", |config| {
                config.session.auto_lock_minutes = 5;
                Ok(())
            })
            .unwrap();
        assert_eq!(
            store.load_or_default("test").unwrap().session.auto_lock_minutes,
            5
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = SentryConfig::new("test");
        config
            .apply_env_overrides(lookup(&[
                ("SENTRY_SUPABASE_URL", "https://project.supabase.co"),
                ("SENTRY_SUPABASE_ANON_KEY", "anon"),
                ("SENTRY_CHAIN_ID", "1043"),
                (
                    "SENTRY_ACTIVITY_CONTRACT",
                    "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
                ),
                ("SENTRY_RPC_URL", "   "),
            ]))
            .unwrap();

        assert_eq!(config.backend.url, "https://project.supabase.co");
        assert_eq!(config.network.chain_id, Some(1043));
        assert!(config.contracts.activity.is_some());
        assert_eq!(config.network.rpc_url, DEFAULT_RPC_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_env_values_are_rejected() {
        let mut config = SentryConfig::new("test");
        assert!(config
            .apply_env_overrides(lookup(&[("SENTRY_CHAIN_ID", "mainnet")]))
            .is_err());
        assert!(config
            .apply_env_overrides(lookup(&[("SENTRY_INHERITANCE_CONTRACT", "0x1234")]))
            .is_err());
    }

    #[test]
    fn missing_backend_fails_validation() {
        let config = SentryConfig::new("test");
        assert!(matches!(
            config.validate(),
            Err(WalletError::ValidationError(_))
        ));
    }
}
