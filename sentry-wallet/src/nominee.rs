//! Inheritance nominees
//!
//! Each user owns an ordered list of nominees whose shares sum to at most 100. The list
//! lives in `profiles.nominee_data`; every write is a compare-and-swap on
//! `profiles.nominee_version`, so two sessions editing the same list cannot silently
//! overwrite each other.
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::blockchain::{Address, TxHash};
use crate::blockchain_client::CallRequest;
use crate::contract;
use crate::crypto::SigningKey;
use crate::errors::{WalletError, WalletResult};
use crate::store::{DataStore, NomineeWrite, ProfileRow};
use crate::transfer::{GasLimit, TransactionSubmitter};
use crate::validation::{InputValidator, MAX_SHARE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NomineeRecord {
    pub email: String,
    pub address: String,
    /// Older rows store this as `shareAmount`, sometimes as text.
    #[serde(alias = "shareAmount", default, deserialize_with = "lenient_share")]
    pub share: u32,
}

/// Raw form input for a new nominee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NomineeDraft {
    pub email: String,
    pub address: String,
    pub share: String,
}

/// The list together with the version it was read at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NomineeBook {
    pub records: Vec<NomineeRecord>,
    pub version: i64,
    /// Email from a legacy `nominee_email`-only row. It has no address or share, so it
    /// stays out of `records` until the user adds a nominee with this email.
    pub pending_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationOutcome {
    /// `nominee_data` already holds a list.
    AlreadyCanonical,
    /// No nominee data of any shape.
    NothingToMigrate,
    Migrated { records: usize },
    /// Only a legacy email is stored; the nominee must be re-added with address and share.
    AwaitingDetails,
}

/// Saturates instead of wrapping, so a corrupted row can only make the list look full.
pub fn total_share(records: &[NomineeRecord]) -> u32 {
    records
        .iter()
        .fold(0u32, |total, record| total.saturating_add(record.share))
}

/// Shape of the stored nominee data before normalization.
enum StoredShape {
    List(Vec<NomineeRecord>),
    SingleObject(NomineeRecord),
    EmailOnly(String),
    Empty,
}

fn classify(row: Option<&ProfileRow>) -> WalletResult<StoredShape> {
    let Some(row) = row else {
        return Ok(StoredShape::Empty);
    };
    match &row.nominee_data {
        Some(Value::Array(items)) => {
            let records = items
                .iter()
                .cloned()
                .map(serde_json::from_value)
                .collect::<Result<Vec<NomineeRecord>, _>>()
                .map_err(|e| {
                    WalletError::InvalidResponse(format!("Malformed nominee data: {}", e))
                })?;
            Ok(StoredShape::List(records))
        }
        Some(value @ Value::Object(_)) => {
            let record = serde_json::from_value(value.clone()).map_err(|e| {
                WalletError::InvalidResponse(format!("Malformed nominee data: {}", e))
            })?;
            Ok(StoredShape::SingleObject(record))
        }
        Some(Value::Null) | None => match row.nominee_email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => Ok(StoredShape::EmailOnly(email.to_string())),
            _ => Ok(StoredShape::Empty),
        },
        Some(other) => Err(WalletError::InvalidResponse(format!(
            "Unexpected nominee data: {}",
            other
        ))),
    }
}

/// Reads a profile row into the list the user sees.
fn book_from_row(row: Option<&ProfileRow>) -> WalletResult<NomineeBook> {
    let version = row.map(|r| r.nominee_version).unwrap_or(0);
    let (records, pending_email) = match classify(row)? {
        StoredShape::List(records) => (records, None),
        StoredShape::SingleObject(record) => (vec![record], None),
        StoredShape::EmailOnly(email) => (Vec::new(), Some(email)),
        StoredShape::Empty => (Vec::new(), None),
    };
    Ok(NomineeBook {
        records,
        version,
        pending_email,
    })
}

pub struct NomineeManager {
    store: Arc<dyn DataStore>,
    validator: &'static InputValidator,
    // Last list shown per user; `remove_nominee` indexes into it.
    cache: Mutex<HashMap<String, NomineeBook>>,
}

impl NomineeManager {
    pub fn new(store: Arc<dyn DataStore>) -> WalletResult<Self> {
        Ok(Self {
            store,
            validator: InputValidator::shared()?,
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn load_book(&self, user_id: &str) -> WalletResult<NomineeBook> {
        let row = self.store.fetch_profile(user_id).await?;
        book_from_row(row.as_ref())
    }

    /// Current list, in stored order.
    pub async fn list_nominees(&self, user_id: &str) -> WalletResult<Vec<NomineeRecord>> {
        Ok(self.load_nominees(user_id).await?.records)
    }

    /// Current list plus any legacy nominee still awaiting details.
    pub async fn load_nominees(&self, user_id: &str) -> WalletResult<NomineeBook> {
        let book = self.load_book(user_id).await?;
        self.cache.lock().insert(user_id.to_string(), book.clone());
        Ok(book)
    }

    /// The list as last shown, without a round trip.
    pub fn cached_nominees(&self, user_id: &str) -> Option<Vec<NomineeRecord>> {
        self.cached_book(user_id).map(|book| book.records)
    }

    pub fn cached_book(&self, user_id: &str) -> Option<NomineeBook> {
        self.cache.lock().get(user_id).cloned()
    }

    /// Validate the draft, check capacity against the freshly read list, append.
    pub async fn add_nominee(
        &self,
        user_id: &str,
        draft: &NomineeDraft,
    ) -> WalletResult<NomineeRecord> {
        let record = self.validate_draft(draft)?;

        let mut book = self.load_book(user_id).await?;
        let current_total = total_share(&book.records);
        if current_total.saturating_add(record.share) > MAX_SHARE {
            self.cache.lock().insert(user_id.to_string(), book);
            return Err(WalletError::CapacityExceeded {
                current_total,
                requested: record.share,
            });
        }

        // Re-adding the legacy nominee with full details completes it.
        let completes_pending = book
            .pending_email
            .as_deref()
            .is_some_and(|email| email.eq_ignore_ascii_case(&record.email));
        book.records.push(record.clone());
        let version = self
            .store
            .write_nominees(
                user_id,
                NomineeWrite {
                    records: &book.records,
                    expected_version: book.version,
                    clear_legacy_email: completes_pending,
                },
            )
            .await?;
        book.version = version;
        if completes_pending {
            book.pending_email = None;
        }
        log::info!(
            "Added nominee for user {} ({} of {}%)",
            user_id,
            record.share,
            total_share(&book.records)
        );
        self.cache.lock().insert(user_id.to_string(), book);
        Ok(record)
    }

    /// Remove by position in the list last shown to the user.
    pub async fn remove_nominee(&self, user_id: &str, index: usize) -> WalletResult<NomineeRecord> {
        let cached = self.cache.lock().get(user_id).cloned();
        let mut book = match cached {
            Some(book) => book,
            None => self.load_book(user_id).await?,
        };

        if index >= book.records.len() {
            return Err(WalletError::ValidationError(format!(
                "No nominee at position {}",
                index + 1
            )));
        }
        let removed = book.records.remove(index);

        let result = self
            .store
            .write_nominees(
                user_id,
                NomineeWrite {
                    records: &book.records,
                    expected_version: book.version,
                    clear_legacy_email: false,
                },
            )
            .await;
        match result {
            Ok(version) => {
                book.version = version;
                self.cache.lock().insert(user_id.to_string(), book);
                log::info!("Removed nominee {} for user {}", index, user_id);
                Ok(removed)
            }
            Err(err) => {
                self.cache.lock().remove(user_id);
                Err(err)
            }
        }
    }

    /// Rewrite legacy shapes into the canonical list. Safe to call repeatedly.
    ///
    /// An email-only row cannot become a complete record (its address and share lived
    /// on-chain, keyed by the owner), so it is left as a pending nominee.
    pub async fn migrate_legacy(&self, user_id: &str) -> WalletResult<MigrationOutcome> {
        let row = self.store.fetch_profile(user_id).await?;
        let version = row.as_ref().map(|r| r.nominee_version).unwrap_or(0);

        let records = match classify(row.as_ref())? {
            StoredShape::List(_) => return Ok(MigrationOutcome::AlreadyCanonical),
            StoredShape::Empty => return Ok(MigrationOutcome::NothingToMigrate),
            StoredShape::EmailOnly(_) => return Ok(MigrationOutcome::AwaitingDetails),
            StoredShape::SingleObject(record) => vec![record],
        };

        let new_version = self
            .store
            .write_nominees(
                user_id,
                NomineeWrite {
                    records: &records,
                    expected_version: version,
                    clear_legacy_email: true,
                },
            )
            .await?;
        log::info!(
            "Migrated legacy nominee data for user {} ({} record(s))",
            user_id,
            records.len()
        );
        let count = records.len();
        self.cache.lock().insert(
            user_id.to_string(),
            NomineeBook {
                records,
                version: new_version,
                pending_email: None,
            },
        );
        Ok(MigrationOutcome::Migrated { records: count })
    }

    fn validate_draft(&self, draft: &NomineeDraft) -> WalletResult<NomineeRecord> {
        self.validator.require_fields(
            &[draft.email.as_str(), draft.address.as_str(), draft.share.as_str()],
            "All fields are required.",
        )?;
        self.validator.validate_email(&draft.email)?;
        let address = self
            .validator
            .parse_address(&draft.address, "nominee BlockDAG")?;
        let share = self.validator.parse_share(&draft.share)?;
        Ok(NomineeRecord {
            email: draft.email.trim().to_string(),
            address: address.to_string(),
            share,
        })
    }
}

/// On-chain inheritance contract: `setNominee(address,uint256)` and `nominees(address)`.
pub struct InheritanceRegistry {
    submitter: TransactionSubmitter,
    contract: Address,
}

impl InheritanceRegistry {
    pub fn new(submitter: TransactionSubmitter, contract: Address) -> Self {
        Self {
            submitter,
            contract,
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Record the nominee on-chain and wait for one confirmation.
    pub async fn set_nominee(
        &self,
        key: &SigningKey,
        nominee: &Address,
        share: u32,
    ) -> WalletResult<TxHash> {
        self.submitter
            .submit_and_confirm(
                key,
                self.contract,
                0,
                contract::set_nominee_calldata(nominee, share),
                GasLimit::Estimate,
            )
            .await
    }

    /// Share the contract holds for `owner`; zero when none is set.
    pub async fn nominee_share(&self, owner: &Address) -> WalletResult<u32> {
        let output = self
            .submitter
            .chain()
            .call(&CallRequest::new(
                self.contract,
                contract::nominees_calldata(owner),
            ))
            .await?;
        let share = contract::decode_uint(&output)?;
        u32::try_from(share)
            .map_err(|_| WalletError::InvalidResponse(format!("Share out of range: {}", share)))
    }
}

fn lenient_share<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let share = match Value::deserialize(deserializer)? {
        Value::Null => 0,
        Value::Number(number) => number
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid share {}", number)))?,
        Value::String(text) => text
            .trim()
            .parse::<u32>()
            .map_err(|_| serde::de::Error::custom(format!("invalid share {:?}", text)))?,
        other => return Err(serde::de::Error::custom(format!("invalid share {}", other))),
    };
    if share > MAX_SHARE {
        return Err(serde::de::Error::custom(format!(
            "share {} exceeds {}%",
            share, MAX_SHARE
        )));
    }
    Ok(share)
}
