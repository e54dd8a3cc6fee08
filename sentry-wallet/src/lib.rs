// lib.rs - Core library for the SentryWallet client

pub mod api;
pub mod app_state;
pub mod auth;
pub mod blockchain;
pub mod blockchain_client;
pub mod config_store;
pub mod contract;
pub mod controller;
pub mod crypto;
pub mod errors;
pub mod nominee;
pub mod session;
pub mod storage;
pub mod store;
pub mod transfer;
pub mod validation;
pub mod wallet_manager;

// Re-export common types
pub use api::types::{DashboardResponse, LocalWalletSummary, LocalWalletsResponse};
pub use app_state::{reduce, Action, AppState, Notice, NoticeLevel, Route, SentryContext, WalletStatus};
pub use auth::{AuthProvider, AuthSession, SessionEvent, SignUpOutcome, SupabaseAuth, User};
pub use blockchain::{Address, Amount, TxHash};
pub use blockchain_client::{ChainProvider, RpcChainClient};
pub use config_store::{ConfigStore, NetworkConfig, SentryConfig, SessionConfig};
pub use controller::{Collaborators, Controller, Intent};
pub use crypto::SigningKey;
pub use errors::{WalletError, WalletResult};
pub use nominee::{InheritanceRegistry, NomineeDraft, NomineeManager, NomineeRecord};
pub use session::WalletSession;
pub use storage::{LocalStore, WalletPaths};
pub use store::{DataStore, MemoryStore, RestStore};
pub use transfer::{TransactionSubmitter, TransferService};
pub use validation::InputValidator;
pub use wallet_manager::WalletLifecycleManager;
