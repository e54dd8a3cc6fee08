//! Hosted data store: the `wallets` and `profiles` tables
//!
//! `RestStore` speaks PostgREST; `MemoryStore` keeps the same rows in process for tests
//! and offline experiments. Nominee writes are compare-and-swap on `nominee_version`.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::errors::{WalletError, WalletResult};
use crate::nominee::NomineeRecord;

/// Row of the `profiles` table, as far as the wallet reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    #[serde(default)]
    pub nominee_data: Option<Value>,
    /// Legacy single-nominee column.
    #[serde(default)]
    pub nominee_email: Option<String>,
    #[serde(default)]
    pub nominee_version: i64,
}

/// A compare-and-swap write of the nominee list.
#[derive(Debug, Clone, PartialEq)]
pub struct NomineeWrite<'a> {
    pub records: &'a [NomineeRecord],
    /// Version the caller read; the write fails if the row has moved on.
    pub expected_version: i64,
    /// Also null out the legacy `nominee_email` column.
    pub clear_legacy_email: bool,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Act as the signed-in user, or anonymously with `None`.
    fn use_access_token(&self, _token: Option<String>) {}

    /// Ciphertext envelope for `user_id`, `None` when the user has no wallet.
    async fn fetch_encrypted_wallet(&self, user_id: &str) -> WalletResult<Option<String>>;

    async fn insert_encrypted_wallet(
        &self,
        user_id: &str,
        encrypted_wallet: &str,
        wallet_name: Option<&str>,
    ) -> WalletResult<()>;

    async fn fetch_profile(&self, user_id: &str) -> WalletResult<Option<ProfileRow>>;

    /// Returns the new version. A stale `expected_version` is `PersistenceError`.
    async fn write_nominees(&self, user_id: &str, write: NomineeWrite<'_>) -> WalletResult<i64>;
}

#[derive(Debug, Deserialize)]
struct WalletRow {
    encrypted_wallet: String,
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    message: Option<String>,
    details: Option<String>,
}

/// PostgREST client for the hosted project.
pub struct RestStore {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: RwLock<Option<String>>,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> WalletResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            access_token: RwLock::new(None),
        })
    }

    /// Requests run as the signed-in user once a token is set.
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    fn table_url(&self, table: &str, filters: &[(&str, String)]) -> WalletResult<Url> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, table))
            .map_err(|e| WalletError::ValidationError(format!("Invalid backend URL: {}", e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (column, filter) in filters {
                pairs.append_pair(column, filter);
            }
        }
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.anon_key.clone());
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn rows<T: for<'de> Deserialize<'de>>(
        &self,
        builder: RequestBuilder,
    ) -> WalletResult<Vec<T>> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WalletError::NetworkError(
                error_message(status, response.text().await.unwrap_or_default()),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| WalletError::InvalidResponse(format!("Failed to parse rows: {}", e)))
    }

    /// Send a write and return the affected rows (`Prefer: return=representation`).
    async fn write_rows(&self, builder: RequestBuilder) -> WalletResult<Vec<Value>> {
        let response = self
            .authorized(builder.header("Prefer", "return=representation"))
            .send()
            .await
            .map_err(|e| WalletError::PersistenceError(WalletError::from(e).to_string()))?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(WalletError::PersistenceError(
                "record was changed by another session; reload and try again".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(WalletError::PersistenceError(error_message(
                status,
                response.text().await.unwrap_or_default(),
            )));
        }
        response
            .json()
            .await
            .map_err(|e| WalletError::PersistenceError(format!("Unreadable write response: {}", e)))
    }
}

#[async_trait]
impl DataStore for RestStore {
    fn use_access_token(&self, token: Option<String>) {
        self.set_access_token(token);
    }

    async fn fetch_encrypted_wallet(&self, user_id: &str) -> WalletResult<Option<String>> {
        let url = self.table_url(
            "wallets",
            &[
                ("select", "encrypted_wallet".to_string()),
                ("user_id", format!("eq.{}", user_id)),
                ("limit", "1".to_string()),
            ],
        )?;
        let rows: Vec<WalletRow> = self.rows(self.client.get(url)).await?;
        Ok(rows.into_iter().next().map(|row| row.encrypted_wallet))
    }

    async fn insert_encrypted_wallet(
        &self,
        user_id: &str,
        encrypted_wallet: &str,
        wallet_name: Option<&str>,
    ) -> WalletResult<()> {
        let url = self.table_url("wallets", &[])?;
        let body = json!([{
            "user_id": user_id,
            "encrypted_wallet": encrypted_wallet,
            "wallet_name": wallet_name,
        }]);
        self.write_rows(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn fetch_profile(&self, user_id: &str) -> WalletResult<Option<ProfileRow>> {
        let url = self.table_url(
            "profiles",
            &[
                ("select", "id,nominee_data,nominee_email,nominee_version".to_string()),
                ("id", format!("eq.{}", user_id)),
            ],
        )?;
        let rows: Vec<ProfileRow> = self.rows(self.client.get(url)).await?;
        Ok(rows.into_iter().next())
    }

    async fn write_nominees(&self, user_id: &str, write: NomineeWrite<'_>) -> WalletResult<i64> {
        let next_version = write.expected_version + 1;
        let mut body = json!({
            "nominee_data": write.records,
            "nominee_version": next_version,
        });
        if write.clear_legacy_email {
            body["nominee_email"] = Value::Null;
        }

        let url = self.table_url(
            "profiles",
            &[
                ("id", format!("eq.{}", user_id)),
                ("nominee_version", format!("eq.{}", write.expected_version)),
            ],
        )?;
        let updated = self.write_rows(self.client.patch(url).json(&body)).await?;
        if !updated.is_empty() {
            return Ok(next_version);
        }

        // No row matched: either the profile does not exist yet or the version moved.
        if write.expected_version == 0 {
            body["id"] = json!(user_id);
            let url = self.table_url("profiles", &[])?;
            self.write_rows(self.client.post(url).json(&json!([body])))
                .await?;
            return Ok(next_version);
        }

        Err(WalletError::PersistenceError(
            "nominee list was changed by another session; reload and try again".to_string(),
        ))
    }
}

fn error_message(status: StatusCode, body: String) -> String {
    match serde_json::from_str::<PostgrestError>(&body) {
        Ok(PostgrestError {
            message: Some(message),
            details,
        }) => match details {
            Some(details) if !details.is_empty() => format!("{} ({})", message, details),
            _ => message,
        },
        _ if body.trim().is_empty() => format!("HTTP error: {}", status),
        _ => format!("HTTP error {}: {}", status, body.trim()),
    }
}

/// In-process store with the same semantics as `RestStore`.
#[derive(Default)]
pub struct MemoryStore {
    wallets: Mutex<HashMap<String, String>>,
    profiles: Mutex<HashMap<String, ProfileRow>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail as if the backend rejected it.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Replace a profile row directly, bypassing version checks.
    pub fn put_profile(&self, row: ProfileRow) {
        self.profiles.lock().insert(row.id.clone(), row);
    }

    pub fn profile(&self, user_id: &str) -> Option<ProfileRow> {
        self.profiles.lock().get(user_id).cloned()
    }

    fn check_writable(&self) -> WalletResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WalletError::PersistenceError(
                "backend rejected the write".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn fetch_encrypted_wallet(&self, user_id: &str) -> WalletResult<Option<String>> {
        Ok(self.wallets.lock().get(user_id).cloned())
    }

    async fn insert_encrypted_wallet(
        &self,
        user_id: &str,
        encrypted_wallet: &str,
        _wallet_name: Option<&str>,
    ) -> WalletResult<()> {
        self.check_writable()?;
        let mut wallets = self.wallets.lock();
        if wallets.contains_key(user_id) {
            return Err(WalletError::PersistenceError(
                "duplicate key value violates unique constraint".to_string(),
            ));
        }
        wallets.insert(user_id.to_string(), encrypted_wallet.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_profile(&self, user_id: &str) -> WalletResult<Option<ProfileRow>> {
        Ok(self.profiles.lock().get(user_id).cloned())
    }

    async fn write_nominees(&self, user_id: &str, write: NomineeWrite<'_>) -> WalletResult<i64> {
        self.check_writable()?;
        let mut profiles = self.profiles.lock();
        let current_version = profiles
            .get(user_id)
            .map(|row| row.nominee_version)
            .unwrap_or(0);
        if current_version != write.expected_version {
            return Err(WalletError::PersistenceError(
                "nominee list was changed by another session; reload and try again".to_string(),
            ));
        }
        let row = profiles.entry(user_id.to_string()).or_insert_with(|| ProfileRow {
            id: user_id.to_string(),
            ..ProfileRow::default()
        });
        row.nominee_data = Some(serde_json::to_value(write.records)?);
        if write.clear_legacy_email {
            row.nominee_email = None;
        }
        row.nominee_version += 1;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(row.nominee_version)
    }
}
