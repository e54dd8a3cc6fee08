use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio::sync::broadcast;
use url::Url;

use sentry_wallet_lib::app_state::{AppState, NoticeLevel, Route, WalletStatus};
use sentry_wallet_lib::auth::{AuthProvider, AuthSession, SessionEvent, SignUpOutcome, User};
use sentry_wallet_lib::blockchain::{Address, Amount, TxHash};
use sentry_wallet_lib::blockchain_client::{CallRequest, ChainProvider, TxReceipt};
use sentry_wallet_lib::config_store::SentryConfig;
use sentry_wallet_lib::controller::{Collaborators, Controller, Intent};
use sentry_wallet_lib::crypto::keccak256;
use sentry_wallet_lib::errors::{WalletError, WalletResult};
use sentry_wallet_lib::nominee::NomineeDraft;
use sentry_wallet_lib::storage::vault::{KdfProfile, UNLOCK_FAILURE_MESSAGE};
use sentry_wallet_lib::api::types::DashboardResponse;
use sentry_wallet_lib::store::{MemoryStore, ProfileRow};
use sentry_wallet_lib::transfer::BALANCE_FETCH_FAILED;

const ACCOUNT_PASSWORD: &str = "correct-horse";
const WALLET_PASSWORD: &str = "wallet-password-1";
const RECIPIENT: &str = "0x00000000000000000000000000000000000000aa";
const HEIR: &str = "0x00000000000000000000000000000000000000bb";

struct FakeAuth {
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<SessionEvent>,
}

impl FakeAuth {
    fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            session: RwLock::new(None),
            events,
        }
    }

    fn session_for(email: &str) -> AuthSession {
        AuthSession {
            access_token: format!("token-{}", email),
            refresh_token: "refresh".to_string(),
            expires_at: i64::MAX / 2,
            token_type: "bearer".to_string(),
            user: User {
                id: format!("user-{}", email),
                email: Some(email.to_string()),
                email_confirmed_at: None,
                user_metadata: json!({ "full_name": "Test Owner" }),
            },
        }
    }

    /// The provider dropping the session on its own, e.g. a refused refresh.
    fn revoke(&self) {
        *self.session.write() = None;
        let _ = self.events.send(SessionEvent::SignedOut);
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn restore_session(&self, session: Option<AuthSession>) {
        *self.session.write() = session;
    }

    async fn current_session(&self) -> WalletResult<Option<AuthSession>> {
        let session = self.session.read().clone();
        let _ = self
            .events
            .send(SessionEvent::InitialSession(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &SecretString,
        _full_name: &str,
    ) -> WalletResult<SignUpOutcome> {
        Ok(SignUpOutcome::ConfirmationRequired {
            email: email.to_string(),
        })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> WalletResult<AuthSession> {
        if password.expose_secret() != ACCOUNT_PASSWORD {
            return Err(WalletError::AuthenticationError(
                "Invalid login credentials".to_string(),
            ));
        }
        let session = Self::session_for(email);
        *self.session.write() = Some(session.clone());
        let _ = self.events.send(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    fn oauth_authorize_url(&self, provider: &str, redirect_to: &str) -> WalletResult<Url> {
        Url::parse_with_params(
            "https://auth.example.com/auth/v1/authorize",
            &[("provider", provider), ("redirect_to", redirect_to)],
        )
        .map_err(|e| WalletError::ValidationError(e.to_string()))
    }

    async fn complete_oauth(&self, _callback: &str) -> WalletResult<AuthSession> {
        Err(WalletError::AuthenticationError(
            "OAuth callback did not contain a session".to_string(),
        ))
    }

    async fn sign_out(&self) -> WalletResult<()> {
        self.revoke();
        Ok(())
    }
}

#[derive(Default)]
struct FakeChain {
    calls: Mutex<Vec<&'static str>>,
    balance_wei: Mutex<Option<u128>>,
    sent: Mutex<Vec<Vec<u8>>>,
    fail_sends_after: Mutex<Option<usize>>,
    /// What the inheritance contract reports for `nominees(owner)`.
    on_chain_share: Mutex<u8>,
}

impl FakeChain {
    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl ChainProvider for FakeChain {
    async fn chain_id(&self) -> WalletResult<u64> {
        self.calls.lock().push("eth_chainId");
        Ok(1043)
    }

    async fn balance(&self, _address: &Address) -> WalletResult<Amount> {
        self.calls.lock().push("eth_getBalance");
        match *self.balance_wei.lock() {
            Some(wei) => Ok(Amount::from_wei(wei)),
            None => Err(WalletError::NetworkError("connection refused".to_string())),
        }
    }

    async fn transaction_count(&self, _address: &Address) -> WalletResult<u64> {
        self.calls.lock().push("eth_getTransactionCount");
        Ok(self.sent.lock().len() as u64)
    }

    async fn gas_price(&self) -> WalletResult<u128> {
        self.calls.lock().push("eth_gasPrice");
        Ok(1_000_000_000)
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> WalletResult<u64> {
        self.calls.lock().push("eth_estimateGas");
        Ok(60_000)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> WalletResult<TxHash> {
        self.calls.lock().push("eth_sendRawTransaction");
        let mut sent = self.sent.lock();
        if let Some(limit) = *self.fail_sends_after.lock() {
            if sent.len() >= limit {
                return Err(WalletError::NetworkError(
                    "RPC error -32000: insufficient funds".to_string(),
                ));
            }
        }
        sent.push(raw.to_vec());
        Ok(TxHash::from_array(keccak256(raw)))
    }

    async fn transaction_receipt(&self, _hash: &TxHash) -> WalletResult<Option<TxReceipt>> {
        self.calls.lock().push("eth_getTransactionReceipt");
        Ok(Some(TxReceipt {
            success: true,
            block_number: Some(7),
        }))
    }

    async fn call(&self, _call: &CallRequest) -> WalletResult<Vec<u8>> {
        self.calls.lock().push("eth_call");
        let mut word = vec![0u8; 32];
        word[31] = *self.on_chain_share.lock();
        Ok(word)
    }
}

struct Harness {
    auth: Arc<FakeAuth>,
    store: Arc<MemoryStore>,
    chain: Arc<FakeChain>,
    controller: Controller,
}

fn config() -> SentryConfig {
    let mut config = SentryConfig::new("test");
    config.network.chain_id = Some(1043);
    config.network.confirmation_poll_ms = 1;
    config.network.max_confirmation_polls = 3;
    config.kdf = KdfProfile::new(64, 1, 1).expect("test kdf profile");
    config.contracts.activity = Some(Address::from_array([0x11; 20]));
    config.contracts.inheritance = Some(Address::from_array([0x22; 20]));
    config.contracts.mirror_nominees_on_chain = true;
    config
}

fn harness() -> Harness {
    let auth = Arc::new(FakeAuth::new());
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(FakeChain::default());
    *chain.balance_wei.lock() = Some(1_500_000_000_000_000_000);

    let controller = Controller::new(
        Collaborators {
            auth: auth.clone(),
            store: store.clone(),
            chain: chain.clone(),
        },
        &config(),
    )
    .expect("controller");
    Harness {
        auth,
        store,
        chain,
        controller,
    }
}

fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

fn error_messages(state: &mut AppState) -> Vec<String> {
    state
        .take_notices()
        .into_iter()
        .filter(|notice| notice.level == NoticeLevel::Error)
        .map(|notice| notice.message)
        .collect()
}

impl Harness {
    async fn sign_in(&mut self) {
        self.controller.dispatch(Intent::Start).await;
        self.controller
            .dispatch(Intent::SignIn {
                email: "owner@example.com".to_string(),
                password: secret(ACCOUNT_PASSWORD),
            })
            .await;
        assert_eq!(self.controller.state().route, Route::Dashboard);
    }

    async fn create_wallet(&mut self) {
        self.controller
            .dispatch(Intent::CreateWallet {
                password: secret(WALLET_PASSWORD),
                confirmation: secret(WALLET_PASSWORD),
            })
            .await;
        assert_eq!(self.controller.state().wallet, WalletStatus::Unlocked);
        self.controller.state_mut().take_notices();
    }

    async fn add_nominee(&mut self, share: &str) -> Vec<String> {
        self.controller
            .dispatch(Intent::AddNominee(NomineeDraft {
                email: "heir@example.com".to_string(),
                address: HEIR.to_string(),
                share: share.to_string(),
            }))
            .await;
        error_messages(self.controller.state_mut())
    }
}

#[tokio::test]
async fn visitor_without_session_lands_on_login() {
    let mut h = harness();
    h.controller.dispatch(Intent::Start).await;
    assert_eq!(h.controller.state().route, Route::Login);

    h.controller.dispatch(Intent::RefreshBalance).await;
    assert_eq!(
        error_messages(h.controller.state_mut()),
        vec!["Please sign in to continue.".to_string()]
    );
    assert_eq!(h.chain.call_count(), 0);
}

#[tokio::test]
async fn provider_sign_in_error_is_shown_verbatim() {
    let mut h = harness();
    h.controller.dispatch(Intent::Start).await;
    h.controller
        .dispatch(Intent::SignIn {
            email: "owner@example.com".to_string(),
            password: secret("wrong"),
        })
        .await;
    assert_eq!(h.controller.state().route, Route::Login);
    assert_eq!(
        error_messages(h.controller.state_mut()),
        vec!["Invalid login credentials".to_string()]
    );
}

#[tokio::test]
async fn create_wallet_then_unlock_with_same_and_wrong_password() {
    let mut h = harness();
    h.sign_in().await;
    assert_eq!(h.controller.state().wallet, WalletStatus::Missing);

    h.create_wallet().await;
    let address = h.controller.state().address.expect("address");
    assert_eq!(h.controller.state().balance.as_deref(), Some("1.5000"));

    h.controller.dispatch(Intent::LockWallet).await;
    assert_eq!(h.controller.state().wallet, WalletStatus::Locked);

    h.controller
        .dispatch(Intent::UnlockWallet {
            password: secret("not-the-password"),
        })
        .await;
    assert_eq!(
        error_messages(h.controller.state_mut()),
        vec![UNLOCK_FAILURE_MESSAGE.to_string()]
    );
    assert_eq!(h.controller.state().wallet, WalletStatus::Locked);

    h.controller
        .dispatch(Intent::UnlockWallet {
            password: secret(WALLET_PASSWORD),
        })
        .await;
    assert_eq!(h.controller.state().wallet, WalletStatus::Unlocked);
    assert_eq!(h.controller.state().address, Some(address));
}

#[tokio::test]
async fn transfer_reports_hash_and_pings_activity() {
    let mut h = harness();
    h.sign_in().await;
    h.create_wallet().await;

    h.controller
        .dispatch(Intent::SendTransfer {
            to: RECIPIENT.to_string(),
            amount: "0.25".to_string(),
        })
        .await;

    let state = h.controller.state_mut();
    assert!(state.last_transaction.is_some());
    assert!(error_messages(state).is_empty());
    // Transfer plus the activity update.
    assert_eq!(h.chain.sent_count(), 2);
}

#[tokio::test]
async fn activity_failure_does_not_change_transfer_result() {
    let mut h = harness();
    h.sign_in().await;
    h.create_wallet().await;
    *h.chain.fail_sends_after.lock() = Some(1);

    h.controller
        .dispatch(Intent::SendTransfer {
            to: RECIPIENT.to_string(),
            amount: "0.25".to_string(),
        })
        .await;

    let state = h.controller.state_mut();
    let hash = state.last_transaction.expect("transfer hash");
    assert!(error_messages(state).is_empty());
    assert_eq!(h.chain.sent_count(), 1);
    assert_eq!(
        hash,
        TxHash::from_array(keccak256(&h.chain.sent.lock()[0]))
    );
}

#[tokio::test]
async fn invalid_recipient_never_reaches_the_chain() {
    let mut h = harness();
    h.sign_in().await;
    h.create_wallet().await;
    let calls_before = h.chain.call_count();

    h.controller
        .dispatch(Intent::SendTransfer {
            to: "not_an_address".to_string(),
            amount: "1".to_string(),
        })
        .await;

    assert_eq!(
        error_messages(h.controller.state_mut()),
        vec!["Invalid recipient address.".to_string()]
    );
    assert_eq!(h.chain.call_count(), calls_before);
    assert!(h.controller.state().last_transaction.is_none());
}

#[tokio::test]
async fn failed_balance_refresh_keeps_displayed_value() {
    let mut h = harness();
    h.sign_in().await;
    h.create_wallet().await;
    assert_eq!(h.controller.state().balance.as_deref(), Some("1.5000"));

    *h.chain.balance_wei.lock() = None;
    h.controller.dispatch(Intent::RefreshBalance).await;

    assert_eq!(h.controller.state().balance.as_deref(), Some("1.5000"));
    assert_eq!(
        error_messages(h.controller.state_mut()),
        vec![BALANCE_FETCH_FAILED.to_string()]
    );
}

#[tokio::test]
async fn nominee_over_capacity_leaves_list_unchanged() {
    let mut h = harness();
    h.sign_in().await;
    h.create_wallet().await;

    assert!(h.add_nominee("60").await.is_empty());
    // The unlocked key also mirrors the nominee on-chain.
    assert_eq!(h.chain.sent_count(), 1);

    let errors = h.add_nominee("50").await;
    assert_eq!(errors.len(), 1);
    assert_eq!(h.controller.state().nominees.len(), 1);
    assert_eq!(h.controller.state().nominees[0].share, 60);

    let user_id = h.controller.state().user_id().expect("user").to_string();
    let stored = h.store.profile(&user_id).expect("profile row");
    assert_eq!(stored.nominee_version, 1);
}

#[tokio::test]
async fn nominee_list_shows_on_chain_share() {
    let mut h = harness();
    h.sign_in().await;
    h.create_wallet().await;
    *h.chain.on_chain_share.lock() = 40;

    h.controller.dispatch(Intent::LoadNominees).await;

    assert!(error_messages(h.controller.state_mut()).is_empty());
    assert_eq!(h.controller.state().on_chain_share, Some(40));
    let view = DashboardResponse::from(h.controller.state());
    assert_eq!(view.on_chain_share, Some(40));
}

#[tokio::test]
async fn on_chain_share_needs_a_wallet_address() {
    let mut h = harness();
    h.sign_in().await;
    *h.chain.on_chain_share.lock() = 40;

    h.controller.dispatch(Intent::LoadNominees).await;

    assert!(h.controller.state().on_chain_share.is_none());
    assert_eq!(h.chain.call_count(), 0);
}

#[tokio::test]
async fn legacy_email_nominee_is_shown_until_completed() {
    let mut h = harness();
    h.sign_in().await;
    let user_id = h.controller.state().user_id().expect("user").to_string();
    h.store.put_profile(ProfileRow {
        id: user_id.clone(),
        nominee_data: None,
        nominee_email: Some("heir@example.com".to_string()),
        nominee_version: 0,
    });

    h.controller.dispatch(Intent::MigrateNominees).await;
    assert_eq!(
        h.controller.state().pending_nominee.as_deref(),
        Some("heir@example.com")
    );
    assert!(h.controller.state().nominees.is_empty());
    assert_eq!(h.store.write_count(), 0);

    h.controller.dispatch(Intent::LoadNominees).await;
    assert!(h.add_nominee("30").await.is_empty());
    assert!(h.controller.state().pending_nominee.is_none());
    assert_eq!(h.controller.state().nominees[0].share, 30);
    assert!(h.store.profile(&user_id).expect("row").nominee_email.is_none());
}

#[tokio::test]
async fn invalid_share_writes_nothing() {
    let mut h = harness();
    h.sign_in().await;

    for share in ["0", "101", "abc"] {
        let errors = h.add_nominee(share).await;
        assert_eq!(
            errors,
            vec!["Share percentage must be a number between 1 and 100.".to_string()]
        );
    }
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn remove_nominee_by_position() {
    let mut h = harness();
    h.sign_in().await;
    assert!(h.add_nominee("25").await.is_empty());
    assert!(h.add_nominee("25").await.is_empty());

    h.controller
        .dispatch(Intent::RemoveNominee { index: 0 })
        .await;
    assert_eq!(h.controller.state().nominees.len(), 1);

    h.controller
        .dispatch(Intent::RemoveNominee { index: 5 })
        .await;
    assert_eq!(error_messages(h.controller.state_mut()).len(), 1);
    assert_eq!(h.controller.state().nominees.len(), 1);
}

#[tokio::test]
async fn sign_out_routes_to_login_and_drops_key() {
    let mut h = harness();
    h.sign_in().await;
    h.create_wallet().await;

    h.controller.dispatch(Intent::SignOut).await;
    assert_eq!(h.controller.state().route, Route::Login);
    assert!(h.controller.state().address.is_none());

    h.sign_in().await;
    assert_eq!(h.controller.state().wallet, WalletStatus::Locked);

    h.controller
        .dispatch(Intent::SendTransfer {
            to: RECIPIENT.to_string(),
            amount: "0.1".to_string(),
        })
        .await;
    assert_eq!(
        error_messages(h.controller.state_mut()),
        vec!["Permission denied: Wallet is locked".to_string()]
    );
}

#[tokio::test]
async fn provider_side_sign_out_is_applied_before_next_intent() {
    let mut h = harness();
    h.sign_in().await;
    h.create_wallet().await;

    h.auth.revoke();
    h.controller.dispatch(Intent::LoadNominees).await;

    assert_eq!(h.controller.state().route, Route::Login);
    assert_eq!(h.controller.state().wallet, WalletStatus::Unknown);
    assert_eq!(
        error_messages(h.controller.state_mut()),
        vec!["Please sign in to continue.".to_string()]
    );
}

#[tokio::test]
async fn sign_up_awaiting_confirmation_stays_on_login() {
    let mut h = harness();
    h.controller.dispatch(Intent::Start).await;
    h.controller
        .dispatch(Intent::SignUp {
            email: "new@example.com".to_string(),
            password: secret(ACCOUNT_PASSWORD),
            full_name: "New Owner".to_string(),
        })
        .await;

    let state = h.controller.state_mut();
    assert_eq!(state.route, Route::Login);
    let notices = state.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Info);
    assert!(notices[0].message.contains("new@example.com"));
}
