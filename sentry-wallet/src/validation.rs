use crate::blockchain::{Address, Amount};
use crate::errors::{WalletError, WalletResult};
use once_cell::sync::OnceCell;
use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_SHARE: u32 = 100;

/// Input validation for the credential, wallet, transfer and nominee forms.
///
/// Messages are the ones shown to the user verbatim.
pub struct InputValidator {
    email_pattern: Regex,
    share_pattern: Regex,
    wallet_name_pattern: Regex,

    // Markup that never belongs in a form field
    malicious_patterns: Vec<Regex>,
}

static SHARED: OnceCell<InputValidator> = OnceCell::new();

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        let email_pattern = compile(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")?;
        let share_pattern = compile(r"^\d{1,3}$")?;
        let wallet_name_pattern = compile(r"^[a-zA-Z0-9\s\-_]+$")?;

        let malicious_patterns = [
            r"(?i)<script",
            r"(?i)javascript:",
            r"(?i)data:text/html",
            r"(?i)onerror=",
        ]
        .iter()
        .map(|pattern| compile(pattern))
        .collect::<WalletResult<Vec<_>>>()?;

        Ok(InputValidator {
            email_pattern,
            share_pattern,
            wallet_name_pattern,
            malicious_patterns,
        })
    }

    /// Process-wide validator, compiled on first use.
    pub fn shared() -> WalletResult<&'static InputValidator> {
        SHARED.get_or_try_init(InputValidator::new)
    }

    /// Every field must be non-blank.
    pub fn require_fields(&self, fields: &[&str], message: &str) -> WalletResult<()> {
        if fields.iter().any(|field| field.trim().is_empty()) {
            return Err(WalletError::ValidationError(message.to_string()));
        }
        Ok(())
    }

    pub fn validate_email(&self, email: &str) -> WalletResult<()> {
        self.check_basic_security(email)?;
        if !self.email_pattern.is_match(email.trim()) {
            return Err(WalletError::ValidationError(
                "Please enter a valid email address.".to_string(),
            ));
        }
        Ok(())
    }

    /// Wallet password rules: at least 8 characters and a matching confirmation.
    pub fn validate_new_password(&self, password: &str, confirmation: &str) -> WalletResult<()> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(WalletError::ValidationError(format!(
                "Password must be at least {} characters long.",
                MIN_PASSWORD_LEN
            )));
        }
        if password != confirmation {
            return Err(WalletError::ValidationError(
                "Passwords do not match.".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a chain address typed by the user. `label` names the field in the
    /// error ("recipient", "nominee BlockDAG").
    pub fn parse_address(&self, address: &str, label: &str) -> WalletResult<Address> {
        let trimmed = address.trim();
        self.check_basic_security(trimmed)?;
        Address::from_string(trimmed).map_err(|err| {
            log::debug!("Rejected {} address: {}", label, err);
            WalletError::ValidationError(format!("Invalid {} address.", label))
        })
    }

    /// Parse a positive decimal coin amount with at most 18 fraction digits.
    pub fn parse_amount(&self, amount: &str) -> WalletResult<Amount> {
        let parsed = Amount::parse_ether(amount)?;
        if parsed.is_zero() {
            return Err(WalletError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }
        Ok(parsed)
    }

    /// Parse a nominee share: an integer percentage in 1..=100.
    pub fn parse_share(&self, share: &str) -> WalletResult<u32> {
        let invalid = || {
            WalletError::ValidationError(
                "Share percentage must be a number between 1 and 100.".to_string(),
            )
        };
        let trimmed = share.trim();
        if !self.share_pattern.is_match(trimmed) {
            return Err(invalid());
        }
        let value: u32 = trimmed.parse().map_err(|_| invalid())?;
        if !(1..=MAX_SHARE).contains(&value) {
            return Err(invalid());
        }
        Ok(value)
    }

    /// Names for locally stored wallets.
    pub fn validate_wallet_name(&self, name: &str) -> WalletResult<()> {
        self.check_basic_security(name)?;

        if name.trim().is_empty() {
            return Err(WalletError::ValidationError(
                "Wallet name cannot be empty".to_string(),
            ));
        }
        if name.len() > 50 {
            return Err(WalletError::ValidationError(
                "Wallet name too long (max 50 characters)".to_string(),
            ));
        }
        if !self.wallet_name_pattern.is_match(name) {
            return Err(WalletError::ValidationError(
                "Wallet name contains invalid characters".to_string(),
            ));
        }
        Ok(())
    }

    fn check_basic_security(&self, input: &str) -> WalletResult<()> {
        if input.chars().any(|c| c.is_control()) {
            return Err(WalletError::ValidationError(
                "Input contains control characters".to_string(),
            ));
        }
        if self.malicious_patterns.iter().any(|p| p.is_match(input)) {
            return Err(WalletError::ValidationError(
                "Input contains potentially malicious content".to_string(),
            ));
        }
        Ok(())
    }
}

fn compile(pattern: &str) -> WalletResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| WalletError::ValidationError(format!("Invalid regex {}: {}", pattern, e)))
}
