use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::crypto::SigningKey;
use crate::errors::{WalletError, WalletResult};

#[derive(Debug)]
struct UnlockedSession {
    user_id: String,
    key: SigningKey,
    expires_at: Instant,
}

impl UnlockedSession {
    fn touch(&mut self, timeout: Duration) {
        self.expires_at = Instant::now() + timeout;
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Holds the unlocked signing key in memory and locks it after a period of disuse.
#[derive(Debug, Clone)]
pub struct WalletSession {
    state: Arc<RwLock<Option<UnlockedSession>>>,
    timeout: Duration,
}

impl WalletSession {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(None)),
            timeout,
        }
    }

    pub fn from_minutes(minutes: u32) -> Self {
        Self::new(Duration::from_secs(u64::from(minutes) * 60))
    }

    pub fn unlock(&self, user_id: &str, key: SigningKey) {
        *self.state.write() = Some(UnlockedSession {
            user_id: user_id.to_string(),
            key,
            expires_at: Instant::now() + self.timeout,
        });
    }

    /// Drop the key; it is zeroized with the session.
    pub fn lock(&self) {
        if self.state.write().take().is_some() {
            log::info!("Wallet locked");
        }
    }

    /// Run `operation` with the key of `user_id`, refreshing the timeout.
    pub fn with_unlocked<F, T>(&self, user_id: &str, operation: F) -> WalletResult<T>
    where
        F: FnOnce(&SigningKey) -> WalletResult<T>,
    {
        let mut state = self.state.write();
        let session = state
            .as_mut()
            .ok_or_else(|| WalletError::PermissionDenied("Wallet is locked".to_string()))?;

        if session.user_id != user_id {
            return Err(WalletError::PermissionDenied(
                "Wallet is locked".to_string(),
            ));
        }

        if session.is_expired() {
            *state = None;
            log::info!("Wallet session expired");
            return Err(WalletError::PermissionDenied(
                "Wallet session expired".to_string(),
            ));
        }

        session.touch(self.timeout);
        operation(&session.key)
    }

    /// A copy of the key for work that spans awaits.
    pub fn signing_key(&self, user_id: &str) -> WalletResult<SigningKey> {
        self.with_unlocked(user_id, |key| Ok(key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn unlock_and_access() {
        let session = WalletSession::from_minutes(15);
        assert_eq!(
            session.signing_key("u1").unwrap_err(),
            WalletError::PermissionDenied("Wallet is locked".to_string())
        );

        let key = SigningKey::generate();
        let address = key.address();
        session.unlock("u1", key);

        assert_eq!(session.signing_key("u1").unwrap().address(), address);
    }

    #[test]
    fn other_user_cannot_use_key() {
        let session = WalletSession::from_minutes(15);
        session.unlock("u1", SigningKey::generate());
        assert!(matches!(
            session.signing_key("u2"),
            Err(WalletError::PermissionDenied(_))
        ));
    }

    #[test]
    fn expired_session_locks_itself() {
        let session = WalletSession::new(Duration::from_millis(10));
        session.unlock("u1", SigningKey::generate());
        thread::sleep(Duration::from_millis(30));

        assert_eq!(
            session.signing_key("u1").unwrap_err(),
            WalletError::PermissionDenied("Wallet session expired".to_string())
        );
        assert_eq!(
            session.signing_key("u1").unwrap_err(),
            WalletError::PermissionDenied("Wallet is locked".to_string())
        );
    }

    #[test]
    fn access_refreshes_timeout() {
        let session = WalletSession::new(Duration::from_millis(80));
        session.unlock("u1", SigningKey::generate());
        for _ in 0..4 {
            thread::sleep(Duration::from_millis(30));
            assert!(session.signing_key("u1").is_ok());
        }
    }

    #[test]
    fn explicit_lock() {
        let session = WalletSession::from_minutes(15);
        session.unlock("u1", SigningKey::generate());
        session.lock();
        assert!(session.signing_key("u1").is_err());
    }
}
