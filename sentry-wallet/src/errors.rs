use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WalletError {
    // Input errors, raised before any external call
    ValidationError(String),
    InvalidAddress(String),
    InvalidAmount(String),

    // Login or decryption failure. Messages stay generic on purpose.
    AuthenticationError(String),

    // Nominee share total would pass 100
    CapacityExceeded { current_total: u32, requested: u32 },

    // Hosted store rejected a write, or a concurrent writer won
    PersistenceError(String),

    // Network errors
    NetworkError(String),
    ConnectionTimeout,
    InvalidResponse(String),
    TransactionFailed(String),

    // Cryptographic errors
    CryptoError(String),
    InvalidKey(String),

    // Local storage errors
    StorageError(String),
    FileNotFound(String),
    PermissionDenied(String),

    // Application errors
    AlreadyExists(String),
    NotFound(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::ValidationError(msg) => write!(f, "{}", msg),
            WalletError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            WalletError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),

            WalletError::AuthenticationError(msg) => write!(f, "{}", msg),

            WalletError::CapacityExceeded {
                current_total,
                requested,
            } => write!(
                f,
                "Total share cannot exceed 100% (currently {}%, requested {}%)",
                current_total, requested
            ),

            WalletError::PersistenceError(msg) => write!(f, "Failed to save: {}", msg),

            WalletError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            WalletError::ConnectionTimeout => write!(f, "Connection timeout"),
            WalletError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            WalletError::TransactionFailed(msg) => write!(f, "Transaction failed: {}", msg),

            WalletError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            WalletError::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),

            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            WalletError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            WalletError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),

            WalletError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            WalletError::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

impl WalletError {
    /// Whether the error was raised by local input checks, before any
    /// collaborator was contacted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WalletError::ValidationError(_)
                | WalletError::InvalidAddress(_)
                | WalletError::InvalidAmount(_)
        )
    }
}

pub type WalletResult<T> = Result<T, WalletError>;

// Conversion helpers
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => WalletError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                WalletError::PermissionDenied(error.to_string())
            }
            _ => WalletError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::ValidationError(format!("JSON error: {}", error))
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            WalletError::ConnectionTimeout
        } else if error.is_decode() {
            WalletError::InvalidResponse(error.to_string())
        } else {
            WalletError::NetworkError(error.to_string())
        }
    }
}
