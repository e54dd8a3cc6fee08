pub mod local;
pub mod paths;
pub mod vault;

pub use local::{LocalStore, LocalWalletRecord, UserPreferences};
pub use paths::WalletPaths;
pub use vault::{EncryptedWallet, KdfProfile, SealedBox};
