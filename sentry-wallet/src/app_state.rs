use std::path::Path;
use std::sync::Arc;

use crate::auth::{AuthProvider, AuthSession, SessionEvent, SupabaseAuth, User};
use crate::blockchain::{Address, TxHash};
use crate::blockchain_client::RpcChainClient;
use crate::config_store::{environment_from_env, ConfigStore, SentryConfig};
use crate::controller::{Collaborators, Controller};
use crate::errors::{WalletError, WalletResult};
use crate::nominee::NomineeRecord;
use crate::storage::{LocalStore, WalletPaths};
use crate::store::RestStore;
use crate::transfer::BALANCE_FETCH_FAILED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Route {
    #[default]
    Loading,
    Login,
    Dashboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalletStatus {
    #[default]
    Unknown,
    /// The user has not created a wallet yet.
    Missing,
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// An inline message rendered beside the current view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Everything the views render. Only `reduce` changes it.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub route: Route,
    pub session: Option<AuthSession>,
    pub wallet: WalletStatus,
    pub address: Option<Address>,
    /// Last balance fetched; kept when a refresh fails.
    pub balance: Option<String>,
    pub nominees: Vec<NomineeRecord>,
    /// Legacy nominee known only by email, awaiting address and share.
    pub pending_nominee: Option<String>,
    /// Share the inheritance contract holds for this wallet.
    pub on_chain_share: Option<u32>,
    pub last_transaction: Option<TxHash>,
    pub notices: Vec<Notice>,
}

impl AppState {
    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|session| &session.user)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user().map(|user| user.id.as_str())
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}

#[derive(Debug)]
pub enum Action {
    Session(SessionEvent),
    WalletMissing,
    WalletLocked { address: Option<Address> },
    WalletUnlocked { address: Address },
    BalanceLoaded(String),
    BalanceFailed,
    NomineesLoaded(Vec<NomineeRecord>),
    PendingNomineeLoaded(Option<String>),
    OnChainShareLoaded(u32),
    TransferSent(TxHash),
    Notify(Notice),
    Failed(WalletError),
}

pub fn reduce(mut state: AppState, action: Action) -> AppState {
    match action {
        Action::Session(event) => match event {
            SessionEvent::InitialSession(Some(session))
            | SessionEvent::SignedIn(session)
            | SessionEvent::TokenRefreshed(session) => {
                let switched_user = state.user_id() != Some(session.user.id.as_str());
                if switched_user {
                    state = signed_out(state);
                }
                state.session = Some(session);
                state.route = Route::Dashboard;
            }
            SessionEvent::InitialSession(None) | SessionEvent::SignedOut => {
                state = signed_out(state);
                state.route = Route::Login;
            }
        },
        Action::WalletMissing => {
            state.wallet = WalletStatus::Missing;
            state.address = None;
            state.balance = None;
            state.on_chain_share = None;
        }
        Action::WalletLocked { address } => {
            state.wallet = WalletStatus::Locked;
            if address.is_some() {
                state.address = address;
            }
        }
        Action::WalletUnlocked { address } => {
            state.wallet = WalletStatus::Unlocked;
            state.address = Some(address);
        }
        Action::BalanceLoaded(balance) => state.balance = Some(balance),
        Action::BalanceFailed => state.notices.push(Notice::error(BALANCE_FETCH_FAILED)),
        Action::NomineesLoaded(nominees) => state.nominees = nominees,
        Action::PendingNomineeLoaded(email) => state.pending_nominee = email,
        Action::OnChainShareLoaded(share) => state.on_chain_share = Some(share),
        Action::TransferSent(hash) => {
            state.last_transaction = Some(hash);
            state
                .notices
                .push(Notice::info(format!("Transaction sent: {}", hash)));
        }
        Action::Notify(notice) => state.notices.push(notice),
        Action::Failed(err) => {
            if matches!(err, WalletError::PermissionDenied(_))
                && state.wallet == WalletStatus::Unlocked
            {
                state.wallet = WalletStatus::Locked;
            }
            state.notices.push(Notice::error(err.to_string()));
        }
    }
    state
}

fn signed_out(state: AppState) -> AppState {
    AppState {
        notices: state.notices,
        ..AppState::default()
    }
}

/// Process-wide setup: data directory, configuration and the local store.
pub struct SentryContext {
    paths: WalletPaths,
    config_store: ConfigStore,
    config: SentryConfig,
    local_store: Arc<LocalStore>,
    environment: String,
}

impl SentryContext {
    pub fn initialize(root_dir: impl AsRef<Path>) -> WalletResult<Self> {
        let environment = environment_from_env();
        let paths = WalletPaths::new(root_dir)?;
        paths.ensure_directories()?;

        let config_store = ConfigStore::from_paths(&paths);
        let mut config = config_store.load_or_default(environment.clone())?;
        config.apply_process_env()?;
        let local_store = Arc::new(LocalStore::new(paths.clone(), config.kdf));

        log::debug!(
            "Initialized {} context in {}",
            environment,
            paths.root_dir().display()
        );
        Ok(Self {
            paths,
            config_store,
            config,
            local_store,
            environment,
        })
    }

    pub fn paths(&self) -> &WalletPaths {
        &self.paths
    }

    pub fn config(&self) -> &SentryConfig {
        &self.config
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn local_store(&self) -> &Arc<LocalStore> {
        &self.local_store
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Persist a change and keep environment overrides on top of it.
    pub fn update_config<F>(&mut self, updater: F) -> WalletResult<&SentryConfig>
    where
        F: FnOnce(&mut SentryConfig) -> WalletResult<()>,
    {
        let mut updated = self
            .config_store
            .update(self.environment.clone(), updater)?;
        updated.apply_process_env()?;
        self.config = updated;
        Ok(&self.config)
    }

    /// Wire the hosted collaborators from configuration, seeding auth with the
    /// session a previous run persisted.
    pub fn connect(&self) -> WalletResult<Controller> {
        self.config.validate()?;
        let backend = &self.config.backend;

        let auth = SupabaseAuth::new(&backend.url, &backend.anon_key)?;
        auth.restore_session(self.local_store.load_session());
        let store = RestStore::new(&backend.url, &backend.anon_key)?;
        let chain = RpcChainClient::new(&self.config.network.rpc_url)?;

        Controller::new(
            Collaborators {
                auth: Arc::new(auth),
                store: Arc::new(store),
                chain: Arc::new(chain),
            },
            &self.config,
        )
    }

    /// Mirror the auth session of `state` into the local store.
    pub fn persist_session(&self, state: &AppState) -> WalletResult<()> {
        match &state.session {
            Some(session) => self.local_store.save_session(session),
            None => self.local_store.clear_session(),
        }
    }
}
