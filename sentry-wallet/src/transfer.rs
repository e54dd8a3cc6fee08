//! Balance display and value transfers
//!
//! `TransactionSubmitter` owns the sign/send/confirm sequence shared by transfers and
//! contract calls. `TransferService` adds the form validation and the follow-up
//! activity ping.
use std::sync::Arc;
use std::time::Duration;

use crate::blockchain::{Address, LegacyTransaction, TxHash};
use crate::blockchain_client::{CallRequest, ChainProvider, TxReceipt};
use crate::config_store::NetworkConfig;
use crate::contract;
use crate::crypto::SigningKey;
use crate::errors::{WalletError, WalletResult};
use crate::validation::InputValidator;

/// Fraction digits shown for balances.
pub const BALANCE_DECIMALS: u8 = 4;
pub const BALANCE_FETCH_FAILED: &str = "Could not fetch balance. Please try again.";

#[derive(Debug, Clone)]
pub struct TxSettings {
    pub gas_limit: u64,
    pub chain_id: Option<u64>,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl From<&NetworkConfig> for TxSettings {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            gas_limit: network.gas_limit,
            chain_id: network.chain_id,
            poll_interval: Duration::from_millis(network.confirmation_poll_ms),
            max_polls: network.max_confirmation_polls,
        }
    }
}

/// Gas limit for a submission: fixed for plain transfers, estimated for contract calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasLimit {
    Fixed(u64),
    Estimate,
}

/// Builds, signs and submits legacy transactions, then waits for one confirmation.
#[derive(Clone)]
pub struct TransactionSubmitter {
    chain: Arc<dyn ChainProvider>,
    settings: TxSettings,
}

impl TransactionSubmitter {
    pub fn new(chain: Arc<dyn ChainProvider>, settings: TxSettings) -> Self {
        Self { chain, settings }
    }

    pub fn chain(&self) -> &Arc<dyn ChainProvider> {
        &self.chain
    }

    pub fn settings(&self) -> &TxSettings {
        &self.settings
    }

    /// Sign and broadcast. Returns as soon as the node accepts the transaction.
    pub async fn submit(
        &self,
        key: &SigningKey,
        to: Address,
        value: u128,
        data: Vec<u8>,
        gas: GasLimit,
    ) -> WalletResult<TxHash> {
        let from = key.address();
        let nonce = self.chain.transaction_count(&from).await?;
        let gas_price = self.chain.gas_price().await?;
        let chain_id = match self.settings.chain_id {
            Some(id) => id,
            None => self.chain.chain_id().await?,
        };
        let gas_limit = match gas {
            GasLimit::Fixed(limit) => limit,
            GasLimit::Estimate => {
                let mut call = CallRequest::new(to, data.clone()).with_from(from);
                call.value = value;
                self.chain.estimate_gas(&call).await?
            }
        };

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit,
            to,
            value,
            data,
            chain_id,
        };
        let signed = tx.sign(key)?;

        let hash = self
            .chain
            .send_raw_transaction(&signed.raw)
            .await
            .map_err(|err| match err {
                WalletError::NetworkError(msg) | WalletError::InvalidResponse(msg) => {
                    WalletError::TransactionFailed(msg)
                }
                other => other,
            })?;

        if hash != signed.hash {
            log::warn!(
                "Node reported hash {} for transaction {}",
                hash,
                signed.hash
            );
        }
        log::info!("Submitted transaction {} (nonce {})", hash, nonce);
        Ok(hash)
    }

    /// Poll for the receipt. A reverted transaction is `TransactionFailed`.
    ///
    /// The transaction is already broadcast, so a failed poll is retried rather than
    /// reported; giving up names the hash.
    pub async fn wait_for_confirmation(&self, hash: &TxHash) -> WalletResult<TxReceipt> {
        for attempt in 0..self.settings.max_polls {
            let polled = match self.chain.transaction_receipt(hash).await {
                Ok(polled) => polled,
                Err(err) => {
                    log::warn!("Receipt poll {} for {} failed: {}", attempt + 1, hash, err);
                    None
                }
            };
            if let Some(receipt) = polled {
                if !receipt.success {
                    return Err(WalletError::TransactionFailed(format!(
                        "Transaction {} reverted",
                        hash
                    )));
                }
                log::info!(
                    "Transaction {} confirmed in block {:?}",
                    hash,
                    receipt.block_number
                );
                return Ok(receipt);
            }
            if attempt + 1 < self.settings.max_polls {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }
        Err(WalletError::TransactionFailed(format!(
            "Transaction {} was not confirmed after {} polls",
            hash, self.settings.max_polls
        )))
    }

    pub async fn submit_and_confirm(
        &self,
        key: &SigningKey,
        to: Address,
        value: u128,
        data: Vec<u8>,
        gas: GasLimit,
    ) -> WalletResult<TxHash> {
        let hash = self.submit(key, to, value, data, gas).await?;
        self.wait_for_confirmation(&hash).await?;
        Ok(hash)
    }
}

pub struct TransferService {
    submitter: TransactionSubmitter,
    activity_contract: Option<Address>,
    validator: &'static InputValidator,
}

impl TransferService {
    pub fn new(
        submitter: TransactionSubmitter,
        activity_contract: Option<Address>,
    ) -> WalletResult<Self> {
        Ok(Self {
            submitter,
            activity_contract,
            validator: InputValidator::shared()?,
        })
    }

    /// Balance of `address` in whole coins, cut to four decimals.
    pub async fn fetch_balance(&self, address: &Address) -> WalletResult<String> {
        let balance = self.submitter.chain().balance(address).await?;
        Ok(balance.format_truncated(BALANCE_DECIMALS))
    }

    /// Validate the form, send `amount` to `to`, wait for one confirmation, then ping
    /// the activity contract. Nothing touches the network until the input is valid.
    pub async fn send_transfer(
        &self,
        key: &SigningKey,
        to: &str,
        amount: &str,
    ) -> WalletResult<TxHash> {
        self.validator
            .require_fields(&[to, amount], "Please fill in both fields.")?;
        let recipient = self.validator.parse_address(to, "recipient")?;
        let value = self.validator.parse_amount(amount)?;

        let gas_limit = self.submitter.settings().gas_limit;
        let hash = self
            .submitter
            .submit_and_confirm(
                key,
                recipient,
                value.wei(),
                Vec::new(),
                GasLimit::Fixed(gas_limit),
            )
            .await?;
        log::info!("Transferred {} to {}: {}", value, recipient, hash);

        self.record_activity(key).await;
        Ok(hash)
    }

    /// Best effort: a failure here never affects the transfer result.
    async fn record_activity(&self, key: &SigningKey) {
        let Some(contract_address) = self.activity_contract else {
            log::debug!("No activity contract configured; skipping updateActivity");
            return;
        };

        match self
            .submitter
            .submit(
                key,
                contract_address,
                0,
                contract::update_activity_calldata(),
                GasLimit::Estimate,
            )
            .await
        {
            Ok(hash) => log::info!("Activity update submitted: {}", hash),
            Err(err) => log::warn!("Activity update failed (non-critical): {}", err),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    const RECIPIENT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn service(chain: Arc<ScriptedChain>, activity: Option<Address>) -> TransferService {
        let submitter = TransactionSubmitter::new(chain, fast_settings());
        TransferService::new(submitter, activity).unwrap()
    }

    #[tokio::test]
    async fn balance_is_truncated_to_four_decimals() {
        let chain = Arc::new(ScriptedChain::default());
        *chain.balance.lock() = Some(Ok(1_234_567_890_000_000_000));
        let svc = service(chain, None);
        let balance = svc
            .fetch_balance(&Address::from_array([1; 20]))
            .await
            .unwrap();
        assert_eq!(balance, "1.2345");
    }

    #[tokio::test]
    async fn invalid_input_makes_no_rpc_call() {
        let chain = Arc::new(ScriptedChain::default());
        let svc = service(chain.clone(), None);
        let key = SigningKey::generate();

        for (to, amount) in [
            ("not_an_address", "1"),
            ("", "1"),
            (RECIPIENT, ""),
            (RECIPIENT, "abc"),
            (RECIPIENT, "0"),
        ] {
            let err = svc.send_transfer(&key, to, amount).await.unwrap_err();
            assert!(err.is_validation(), "{to}/{amount}: {err:?}");
        }
        assert_eq!(chain.call_count(), 0);
    }

    #[tokio::test]
    async fn transfer_signs_and_confirms() {
        let chain = Arc::new(ScriptedChain::default());
        let svc = service(chain.clone(), None);
        let key = SigningKey::generate();

        let hash = svc.send_transfer(&key, RECIPIENT, "0.5").await.unwrap();

        let sent = chain.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(hash, TxHash::from_array(crate::crypto::keccak256(&sent[0])));
        let calls = chain.calls.lock().clone();
        assert!(calls.contains(&"eth_getTransactionReceipt".to_string()));
        assert!(!calls.contains(&"eth_chainId".to_string()));
    }

    #[tokio::test]
    async fn reverted_transfer_fails() {
        let chain = Arc::new(ScriptedChain::default());
        chain.receipts.lock().push_back(None);
        chain.receipts.lock().push_back(Some(TxReceipt {
            success: false,
            block_number: Some(7),
        }));
        let svc = service(chain, None);
        let err = svc
            .send_transfer(&SigningKey::generate(), RECIPIENT, "1")
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::TransactionFailed(_)));
    }

    #[tokio::test]
    async fn receipt_poll_errors_are_retried() {
        let chain = Arc::new(ScriptedChain::default());
        *chain.receipt_errors.lock() = 1;
        let svc = service(chain.clone(), None);

        let hash = svc
            .send_transfer(&SigningKey::generate(), RECIPIENT, "1")
            .await
            .unwrap();

        let sent = chain.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(hash, TxHash::from_array(crate::crypto::keccak256(&sent[0])));
        let polls = chain
            .calls
            .lock()
            .iter()
            .filter(|call| call.as_str() == "eth_getTransactionReceipt")
            .count();
        assert_eq!(polls, 2);
    }

    #[tokio::test]
    async fn unreachable_receipts_fail_with_the_hash() {
        let chain = Arc::new(ScriptedChain::default());
        *chain.receipt_errors.lock() = 3;
        let svc = service(chain.clone(), None);

        let err = svc
            .send_transfer(&SigningKey::generate(), RECIPIENT, "1")
            .await
            .unwrap_err();

        let hash = TxHash::from_array(crate::crypto::keccak256(&chain.sent.lock()[0]));
        match err {
            WalletError::TransactionFailed(message) => {
                assert!(message.contains(&hash.to_string()), "{message}")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn unconfirmed_transfer_times_out() {
        let chain = Arc::new(ScriptedChain::default());
        for _ in 0..3 {
            chain.receipts.lock().push_back(None);
        }
        let svc = service(chain, None);
        let err = svc
            .send_transfer(&SigningKey::generate(), RECIPIENT, "1")
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::TransactionFailed(_)));
    }

    #[tokio::test]
    async fn activity_failure_does_not_mask_transfer() {
        let chain = Arc::new(ScriptedChain::default());
        *chain.fail_sends_after.lock() = Some(1);
        let activity = Address::from_array([0xac; 20]);
        let svc = service(chain.clone(), Some(activity));

        let hash = svc
            .send_transfer(&SigningKey::generate(), RECIPIENT, "1")
            .await
            .unwrap();

        let sent = chain.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(hash, TxHash::from_array(crate::crypto::keccak256(&sent[0])));
        assert!(chain
            .calls
            .lock()
            .contains(&"eth_estimateGas".to_string()));
    }

    #[tokio::test]
    async fn activity_update_is_sent_when_configured() {
        let chain = Arc::new(ScriptedChain::default());
        let svc = service(chain.clone(), Some(Address::from_array([0xac; 20])));
        svc.send_transfer(&SigningKey::generate(), RECIPIENT, "1")
            .await
            .unwrap();
        assert_eq!(chain.sent.lock().len(), 2);
    }
}
