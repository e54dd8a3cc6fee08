//! Account sessions against the hosted auth provider (GoTrue REST API)
//!
//! Every session change is published as a `SessionEvent` on a broadcast channel; the
//! application controller drains that channel into its reducer.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use url::Url;

use crate::errors::{WalletError, WalletResult};

/// Refresh this many seconds before the provider's expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;
const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_metadata: Value,
}

impl User {
    pub fn full_name(&self) -> Option<&str> {
        self.user_metadata.get("full_name").and_then(Value::as_str)
    }

    pub fn display_name(&self) -> &str {
        self.full_name()
            .or(self.email.as_deref())
            .unwrap_or(self.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub token_type: String,
    pub user: User,
}

impl AuthSession {
    pub fn is_expired_at(&self, now_unix: i64) -> bool {
        now_unix + EXPIRY_MARGIN_SECS >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    InitialSession(Option<AuthSession>),
    SignedIn(AuthSession),
    TokenRefreshed(AuthSession),
    SignedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(AuthSession),
    /// The provider sent a confirmation link; no session yet.
    ConfirmationRequired { email: String },
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Seed the provider with a session persisted by a previous run.
    fn restore_session(&self, session: Option<AuthSession>);

    /// The live session, refreshed first when expired. `None` when signed out or
    /// when the refresh is refused.
    async fn current_session(&self) -> WalletResult<Option<AuthSession>>;

    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        full_name: &str,
    ) -> WalletResult<SignUpOutcome>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> WalletResult<AuthSession>;

    fn oauth_authorize_url(&self, provider: &str, redirect_to: &str) -> WalletResult<Url>;

    /// Finish an OAuth redirect from the callback URL or its `#fragment`.
    async fn complete_oauth(&self, callback: &str) -> WalletResult<AuthSession>;

    async fn sign_out(&self) -> WalletResult<()>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self, now_unix: i64) -> AuthSession {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| now_unix + self.expires_in.unwrap_or(3600));
        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            user: self.user,
        }
    }
}

/// Tokens carried in an OAuth redirect fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OAuthFragment {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    token_type: String,
}

fn parse_oauth_fragment(callback: &str) -> WalletResult<OAuthFragment> {
    let fragment = match callback.split_once('#') {
        Some((_, fragment)) => fragment,
        None => callback.trim_start_matches('?'),
    };

    let mut access_token = None;
    let mut refresh_token = None;
    let mut expires_in = 3600;
    let mut token_type = "bearer".to_string();
    let mut error = None;
    for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
        match key.as_ref() {
            "access_token" => access_token = Some(value.into_owned()),
            "refresh_token" => refresh_token = Some(value.into_owned()),
            "expires_in" => {
                expires_in = value.parse().map_err(|_| {
                    WalletError::AuthenticationError("Invalid OAuth callback".to_string())
                })?
            }
            "token_type" => token_type = value.into_owned(),
            "error_description" => error = Some(value.into_owned()),
            "error" if error.is_none() => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(message) = error {
        return Err(WalletError::AuthenticationError(message));
    }
    match (access_token, refresh_token) {
        (Some(access_token), Some(refresh_token)) => Ok(OAuthFragment {
            access_token,
            refresh_token,
            expires_in,
            token_type,
        }),
        _ => Err(WalletError::AuthenticationError(
            "OAuth callback did not contain a session".to_string(),
        )),
    }
}

/// Pull the human-readable message out of a GoTrue error body.
fn provider_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// GoTrue client for a hosted project.
pub struct SupabaseAuth {
    client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SupabaseAuth {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> WalletResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            session: RwLock::new(None),
            events,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        builder: RequestBuilder,
    ) -> WalletResult<T> {
        let response = builder
            .header("apikey", &self.anon_key)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message =
                provider_message(&body).unwrap_or_else(|| format!("HTTP error: {}", status));
            return Err(if status.is_server_error() {
                WalletError::NetworkError(message)
            } else {
                WalletError::AuthenticationError(message)
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| WalletError::InvalidResponse(format!("Unexpected auth response: {}", e)))
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> WalletResult<AuthSession> {
        let url = format!("{}?grant_type={}", self.endpoint("token"), grant_type);
        let response: TokenResponse = self
            .send_json(self.client.post(url).json(&body))
            .await?;
        Ok(response.into_session(Utc::now().timestamp()))
    }

    async fn fetch_user(&self, access_token: &str) -> WalletResult<User> {
        self.send_json(
            self.client
                .get(self.endpoint("user"))
                .bearer_auth(access_token),
        )
        .await
    }

    fn store_session(&self, session: Option<AuthSession>) {
        *self.session.write() = session;
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuth {
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn restore_session(&self, session: Option<AuthSession>) {
        self.store_session(session);
    }

    async fn current_session(&self) -> WalletResult<Option<AuthSession>> {
        let existing = self.session.read().clone();
        let Some(session) = existing else {
            self.emit(SessionEvent::InitialSession(None));
            return Ok(None);
        };

        if !session.is_expired() {
            self.emit(SessionEvent::InitialSession(Some(session.clone())));
            return Ok(Some(session));
        }

        log::debug!("Session for {} expired; refreshing", session.user.id);
        match self
            .token_grant(
                "refresh_token",
                json!({ "refresh_token": session.refresh_token }),
            )
            .await
        {
            Ok(refreshed) => {
                self.store_session(Some(refreshed.clone()));
                self.emit(SessionEvent::TokenRefreshed(refreshed.clone()));
                Ok(Some(refreshed))
            }
            Err(WalletError::AuthenticationError(message)) => {
                log::warn!("Session refresh refused: {}", message);
                self.store_session(None);
                self.emit(SessionEvent::SignedOut);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        full_name: &str,
    ) -> WalletResult<SignUpOutcome> {
        let body = json!({
            "email": email,
            "password": password.expose_secret(),
            "data": { "full_name": full_name },
        });
        let response: Value = self
            .send_json(self.client.post(self.endpoint("signup")).json(&body))
            .await?;

        if response.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(response).map_err(|e| {
                WalletError::InvalidResponse(format!("Unexpected sign-up response: {}", e))
            })?;
            let session = token.into_session(Utc::now().timestamp());
            self.store_session(Some(session.clone()));
            self.emit(SessionEvent::SignedIn(session.clone()));
            return Ok(SignUpOutcome::SignedIn(session));
        }

        log::info!("Sign-up for {} awaits email confirmation", email);
        Ok(SignUpOutcome::ConfirmationRequired {
            email: email.to_string(),
        })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> WalletResult<AuthSession> {
        let session = self
            .token_grant(
                "password",
                json!({ "email": email, "password": password.expose_secret() }),
            )
            .await?;
        self.store_session(Some(session.clone()));
        self.emit(SessionEvent::SignedIn(session.clone()));
        log::info!("Signed in as {}", session.user.id);
        Ok(session)
    }

    fn oauth_authorize_url(&self, provider: &str, redirect_to: &str) -> WalletResult<Url> {
        Url::parse_with_params(
            &self.endpoint("authorize"),
            &[("provider", provider), ("redirect_to", redirect_to)],
        )
        .map_err(|e| WalletError::ValidationError(format!("Invalid backend URL: {}", e)))
    }

    async fn complete_oauth(&self, callback: &str) -> WalletResult<AuthSession> {
        let fragment = parse_oauth_fragment(callback)?;
        let user = self.fetch_user(&fragment.access_token).await?;
        let session = AuthSession {
            expires_at: Utc::now().timestamp() + fragment.expires_in,
            access_token: fragment.access_token,
            refresh_token: fragment.refresh_token,
            token_type: fragment.token_type,
            user,
        };
        self.store_session(Some(session.clone()));
        self.emit(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> WalletResult<()> {
        let existing = self.session.read().clone();
        if let Some(session) = existing {
            let response = self
                .client
                .post(self.endpoint("logout"))
                .header("apikey", &self.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await
                .map_err(|e| {
                    log::warn!("Logout request failed: {}", e);
                    WalletError::NetworkError(
                        "Network error during logout. Please check your connection.".to_string(),
                    )
                })?;
            // An already revoked token still counts as signed out.
            if !response.status().is_success() && response.status().as_u16() != 401 {
                return Err(WalletError::NetworkError(
                    "Failed to logout. Please try again.".to_string(),
                ));
            }
        }
        self.store_session(None);
        self.emit(SessionEvent::SignedOut);
        Ok(())
    }
}
