//! Executes user intents against the collaborators
//!
//! Each intent first drains pending session events into the reducer, runs its
//! calls in sequence, and turns every error into an inline notice.
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::broadcast::{self, error::TryRecvError};
use url::Url;

use crate::app_state::{reduce, Action, AppState, Notice, Route};
use crate::auth::{AuthProvider, SessionEvent, SignUpOutcome};
use crate::blockchain::Address;
use crate::blockchain_client::ChainProvider;
use crate::config_store::SentryConfig;
use crate::errors::{WalletError, WalletResult};
use crate::nominee::{InheritanceRegistry, MigrationOutcome, NomineeDraft, NomineeManager};
use crate::session::WalletSession;
use crate::store::DataStore;
use crate::transfer::{TransactionSubmitter, TransferService, TxSettings};
use crate::validation::InputValidator;
use crate::wallet_manager::WalletLifecycleManager;

const SIGN_IN_REQUIRED: &str = "Please sign in to continue.";

/// The hosted services a controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn AuthProvider>,
    pub store: Arc<dyn DataStore>,
    pub chain: Arc<dyn ChainProvider>,
}

#[derive(Debug)]
pub enum Intent {
    /// Resolve the current session, then the wallet status.
    Start,
    SignUp {
        email: String,
        password: SecretString,
        full_name: String,
    },
    SignIn {
        email: String,
        password: SecretString,
    },
    CompleteOAuth {
        callback: String,
    },
    SignOut,
    RefreshWallet,
    CreateWallet {
        password: SecretString,
        confirmation: SecretString,
    },
    UnlockWallet {
        password: SecretString,
    },
    LockWallet,
    RefreshBalance,
    SendTransfer {
        to: String,
        amount: String,
    },
    LoadNominees,
    AddNominee(NomineeDraft),
    RemoveNominee {
        index: usize,
    },
    MigrateNominees,
}

impl Intent {
    fn requires_session(&self) -> bool {
        !matches!(
            self,
            Intent::Start
                | Intent::SignUp { .. }
                | Intent::SignIn { .. }
                | Intent::CompleteOAuth { .. }
                | Intent::SignOut
        )
    }
}

pub struct Controller {
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn DataStore>,
    events: broadcast::Receiver<SessionEvent>,
    wallets: WalletLifecycleManager,
    nominees: NomineeManager,
    transfers: TransferService,
    registry: Option<InheritanceRegistry>,
    mirror_on_chain: bool,
    key_session: WalletSession,
    validator: &'static InputValidator,
    state: AppState,
}

impl Controller {
    pub fn new(collaborators: Collaborators, config: &SentryConfig) -> WalletResult<Self> {
        let Collaborators { auth, store, chain } = collaborators;
        let submitter = TransactionSubmitter::new(chain, TxSettings::from(&config.network));
        let registry = config
            .contracts
            .inheritance
            .map(|contract| InheritanceRegistry::new(submitter.clone(), contract));

        Ok(Self {
            events: auth.subscribe(),
            wallets: WalletLifecycleManager::new(store.clone(), config.kdf)?,
            nominees: NomineeManager::new(store.clone())?,
            transfers: TransferService::new(submitter, config.contracts.activity)?,
            registry,
            mirror_on_chain: config.contracts.mirror_nominees_on_chain,
            key_session: WalletSession::from_minutes(config.session.auto_lock_minutes.max(1)),
            validator: InputValidator::shared()?,
            state: AppState::default(),
            auth,
            store,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AppState {
        &mut self.state
    }

    pub fn oauth_url(&self, provider: &str, redirect_to: &str) -> WalletResult<Url> {
        self.auth.oauth_authorize_url(provider, redirect_to)
    }

    pub async fn dispatch(&mut self, intent: Intent) -> &AppState {
        self.drain_session_events();

        if intent.requires_session() && self.state.route != Route::Dashboard {
            self.apply(Action::Notify(Notice::error(SIGN_IN_REQUIRED)));
            return &self.state;
        }

        log::debug!("Dispatching {:?}", intent);
        if let Err(err) = self.execute(intent).await {
            log::warn!("Intent failed: {}", err);
            self.apply(Action::Failed(err));
        }
        self.drain_session_events();
        &self.state
    }

    fn apply(&mut self, action: Action) {
        let state = std::mem::take(&mut self.state);
        self.state = reduce(state, action);
    }

    fn drain_session_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply_session_event(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!("Missed {} session event(s)", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    fn apply_session_event(&mut self, event: SessionEvent) {
        let previous_user = self.state.user_id().map(str::to_string);
        self.apply(Action::Session(event));

        if self.state.user_id().map(str::to_string) != previous_user {
            self.key_session.lock();
        }
        self.store.use_access_token(
            self.state
                .session
                .as_ref()
                .map(|session| session.access_token.clone()),
        );
    }

    fn user_id(&self) -> WalletResult<String> {
        self.state
            .user_id()
            .map(str::to_string)
            .ok_or_else(|| WalletError::AuthenticationError(SIGN_IN_REQUIRED.to_string()))
    }

    async fn execute(&mut self, intent: Intent) -> WalletResult<()> {
        match intent {
            Intent::Start => {
                self.auth.current_session().await?;
                self.after_sign_in().await
            }
            Intent::SignUp {
                email,
                password,
                full_name,
            } => {
                self.validator.require_fields(
                    &[email.as_str(), full_name.as_str()],
                    "Please fill in all fields.",
                )?;
                self.validator.validate_email(&email)?;
                match self.auth.sign_up(email.trim(), &password, &full_name).await? {
                    SignUpOutcome::SignedIn(_) => self.after_sign_in().await,
                    SignUpOutcome::ConfirmationRequired { email } => {
                        self.apply(Action::Notify(Notice::info(format!(
                            "Check {} for a confirmation link, then sign in.",
                            email
                        ))));
                        Ok(())
                    }
                }
            }
            Intent::SignIn { email, password } => {
                self.validator
                    .require_fields(&[email.as_str()], "Please fill in all fields.")?;
                self.auth
                    .sign_in_with_password(email.trim(), &password)
                    .await?;
                self.after_sign_in().await
            }
            Intent::CompleteOAuth { callback } => {
                self.auth.complete_oauth(&callback).await?;
                self.after_sign_in().await
            }
            Intent::SignOut => {
                self.key_session.lock();
                self.auth.sign_out().await
            }
            Intent::RefreshWallet => self.refresh_wallet().await,
            Intent::CreateWallet {
                password,
                confirmation,
            } => {
                let user_id = self.user_id()?;
                let key = self
                    .wallets
                    .create_wallet(&password, &confirmation, &user_id)
                    .await?;
                let address = key.address();
                self.key_session.unlock(&user_id, key);
                self.apply(Action::WalletUnlocked { address });
                self.apply(Action::Notify(Notice::info("Wallet created successfully.")));
                self.refresh_balance().await
            }
            Intent::UnlockWallet { password } => {
                let user_id = self.user_id()?;
                let key = self.wallets.unlock_wallet(&password, &user_id).await?;
                let address = key.address();
                self.key_session.unlock(&user_id, key);
                self.apply(Action::WalletUnlocked { address });
                self.refresh_balance().await
            }
            Intent::LockWallet => {
                self.key_session.lock();
                let address = self.state.address;
                self.apply(Action::WalletLocked { address });
                Ok(())
            }
            Intent::RefreshBalance => self.refresh_balance().await,
            Intent::SendTransfer { to, amount } => {
                let user_id = self.user_id()?;
                let key = self.key_session.signing_key(&user_id)?;
                let hash = self.transfers.send_transfer(&key, &to, &amount).await?;
                self.apply(Action::TransferSent(hash));
                self.refresh_balance().await
            }
            Intent::LoadNominees => {
                let user_id = self.user_id()?;
                let book = self.nominees.load_nominees(&user_id).await?;
                self.apply(Action::NomineesLoaded(book.records));
                self.apply(Action::PendingNomineeLoaded(book.pending_email));
                self.refresh_on_chain_share().await;
                Ok(())
            }
            Intent::AddNominee(draft) => {
                let user_id = self.user_id()?;
                let record = self.nominees.add_nominee(&user_id, &draft).await?;
                self.reload_nominees(&user_id).await?;
                self.apply(Action::Notify(Notice::info("Nominee added successfully.")));
                self.mirror_nominee(&user_id, &record.address, record.share)
                    .await;
                Ok(())
            }
            Intent::RemoveNominee { index } => {
                let user_id = self.user_id()?;
                let result = self.nominees.remove_nominee(&user_id, index).await;
                // A conflict drops the cached list; show the fresh one either way.
                self.reload_nominees(&user_id).await?;
                let removed = result?;
                self.apply(Action::Notify(Notice::info(format!(
                    "Removed nominee {}.",
                    removed.email
                ))));
                Ok(())
            }
            Intent::MigrateNominees => {
                let user_id = self.user_id()?;
                let message = match self.nominees.migrate_legacy(&user_id).await? {
                    MigrationOutcome::Migrated { records } => {
                        format!("Migrated {} legacy nominee record(s).", records)
                    }
                    MigrationOutcome::AlreadyCanonical | MigrationOutcome::NothingToMigrate => {
                        "Nominee data is already up to date.".to_string()
                    }
                    MigrationOutcome::AwaitingDetails => {
                        "The legacy nominee has no address or share on record. Add them again \
                         with both to complete it."
                            .to_string()
                    }
                };
                self.reload_nominees(&user_id).await?;
                self.apply(Action::Notify(Notice::info(message)));
                Ok(())
            }
        }
    }

    async fn after_sign_in(&mut self) -> WalletResult<()> {
        self.drain_session_events();
        if self.state.route == Route::Dashboard {
            self.refresh_wallet().await?;
        }
        Ok(())
    }

    async fn refresh_wallet(&mut self) -> WalletResult<()> {
        let user_id = self.user_id()?;
        if let Ok(key) = self.key_session.signing_key(&user_id) {
            self.apply(Action::WalletUnlocked {
                address: key.address(),
            });
            return self.refresh_balance().await;
        }

        match self.wallets.wallet_address(&user_id).await? {
            Some(address) => {
                self.apply(Action::WalletLocked {
                    address: Some(address),
                });
                self.refresh_balance().await
            }
            None if self.wallets.has_encrypted_wallet(&user_id).await? => {
                self.apply(Action::WalletLocked { address: None });
                Ok(())
            }
            None => {
                self.apply(Action::WalletMissing);
                Ok(())
            }
        }
    }

    /// Failure keeps the shown balance and adds a notice; it is not an error.
    async fn refresh_balance(&mut self) -> WalletResult<()> {
        let Some(address) = self.state.address else {
            return Ok(());
        };
        match self.transfers.fetch_balance(&address).await {
            Ok(balance) => self.apply(Action::BalanceLoaded(balance)),
            Err(err) => {
                log::warn!("Balance fetch for {} failed: {}", address, err);
                self.apply(Action::BalanceFailed);
            }
        }
        Ok(())
    }

    async fn reload_nominees(&mut self, user_id: &str) -> WalletResult<()> {
        let book = match self.nominees.cached_book(user_id) {
            Some(cached) => cached,
            None => self.nominees.load_nominees(user_id).await?,
        };
        self.apply(Action::NomineesLoaded(book.records));
        self.apply(Action::PendingNomineeLoaded(book.pending_email));
        Ok(())
    }

    /// Read what the inheritance contract holds for the wallet. Best effort.
    async fn refresh_on_chain_share(&mut self) {
        let result = match (&self.registry, self.state.address) {
            (Some(registry), Some(owner)) => registry.nominee_share(&owner).await,
            _ => return,
        };
        match result {
            Ok(share) => self.apply(Action::OnChainShareLoaded(share)),
            Err(err) => log::warn!("On-chain nominee lookup failed: {}", err),
        }
    }

    /// The off-chain list is authoritative; an on-chain failure only adds a notice.
    async fn mirror_nominee(&mut self, user_id: &str, address: &str, share: u32) {
        if !self.mirror_on_chain {
            return;
        }
        if self.registry.is_none() {
            log::debug!("No inheritance contract configured; skipping on-chain mirror");
            return;
        }
        let key = match self.key_session.signing_key(user_id) {
            Ok(key) => key,
            Err(_) => {
                self.apply(Action::Notify(Notice::info(
                    "Nominee saved. Unlock the wallet to also record it on-chain.",
                )));
                return;
            }
        };

        let outcome = match (&self.registry, Address::from_string(address)) {
            (Some(registry), Ok(nominee)) => registry.set_nominee(&key, &nominee, share).await,
            (_, Err(err)) => Err(err),
            (None, Ok(_)) => return,
        };
        let recorded = outcome.is_ok();
        let notice = match outcome {
            Ok(hash) => Notice::info(format!("Nominee recorded on-chain: {}", hash)),
            Err(err) => {
                log::warn!("On-chain nominee update failed: {}", err);
                Notice::error(format!(
                    "Nominee saved, but the on-chain update failed: {}",
                    err
                ))
            }
        };
        self.apply(Action::Notify(notice));
        if recorded {
            self.refresh_on_chain_share().await;
        }
    }
}
