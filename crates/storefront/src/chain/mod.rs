//! EVM JSON-RPC client used to verify wallet payments.
//!
//! The storefront only reads: it polls for the receipt of the hash the
//! wallet reported, decodes the payment token's `Transfer` events and checks
//! that one of them pays the order's address, from the connected wallet, for
//! at least the order amount. One successful receipt is enough.

use std::sync::Arc;
use std::time::Duration;

use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::{H256, TransactionReceipt, U64};
use moka::future::Cache;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use epochmine_core::erc20::{ExpectedPayment, PaymentMismatch, Token, TokenTransfer};
use epochmine_core::{OrderId, TxHash, WalletAddress};

use crate::config::ChainConfig;

/// How long a verified hash stays bound to the order it paid.
const CLAIM_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Provider(#[from] ProviderError),

    /// The transaction was mined but reverted.
    #[error("transaction reverted")]
    Reverted,

    /// The transaction did not call the payment token.
    #[error("transaction was sent to {actual}, not the payment token")]
    WrongContract { actual: String },

    /// The token transfers in the receipt do not pay this order.
    #[error(transparent)]
    Mismatch(#[from] PaymentMismatch),

    /// The transaction already settled a different order.
    #[error("transaction already settled order {order_id}")]
    AlreadyClaimed { order_id: OrderId },

    /// No receipt appeared before the deadline.
    #[error("no receipt after {0:?}")]
    Timeout(Duration),
}

/// Connection failures are worth another poll; node-reported errors are not.
fn is_transient(error: &ProviderError) -> bool {
    error.as_error_response().is_none() && error.as_serde_error().is_none()
}

/// The ERC-20 `Transfer` events in a receipt.
#[must_use]
pub fn token_transfers(receipt: &TransactionReceipt) -> Vec<TokenTransfer> {
    receipt
        .logs
        .iter()
        .filter_map(TokenTransfer::from_log)
        .collect()
}

/// Check a mined receipt settles `expected`.
///
/// # Errors
///
/// Returns [`ChainError::Reverted`], [`ChainError::WrongContract`] or
/// [`ChainError::Mismatch`].
pub fn verify_receipt(
    receipt: &TransactionReceipt,
    expected: &ExpectedPayment,
) -> Result<TokenTransfer, ChainError> {
    if receipt.status != Some(U64::one()) {
        return Err(ChainError::Reverted);
    }
    if receipt.to != Some(expected.token.address()) {
        return Err(ChainError::WrongContract {
            actual: receipt.to.map_or_else(
                || "a contract creation".to_string(),
                |to| WalletAddress::from(to).to_string(),
            ),
        });
    }
    Ok(expected.settle(&token_transfers(receipt))?)
}

/// JSON-RPC client for one chain.
#[derive(Clone)]
pub struct ChainClient {
    inner: Arc<ChainClientInner>,
}

struct ChainClientInner {
    provider: Provider<Http>,
    token: Token,
    receipt_timeout: Duration,
    poll_interval: Duration,
    /// Verified transaction hashes and the order each one paid.
    claimed: Cache<H256, OrderId>,
}

impl ChainClient {
    #[must_use]
    pub fn new(config: &ChainConfig) -> Self {
        let claimed = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(CLAIM_TTL)
            .build();

        Self {
            inner: Arc::new(ChainClientInner {
                provider: Provider::new(Http::new(config.rpc_url.clone())),
                token: config.token.clone(),
                receipt_timeout: config.receipt_timeout,
                poll_interval: config.receipt_poll_interval,
                claimed,
            }),
        }
    }

    /// The payment token this client verifies against.
    #[must_use]
    pub fn token(&self) -> &Token {
        &self.inner.token
    }

    /// Fetch a receipt; `None` while the transaction is pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC call fails.
    #[instrument(skip(self), fields(tx = %hash))]
    pub async fn transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(self
            .inner
            .provider
            .get_transaction_receipt(hash.hash())
            .await?)
    }

    /// Poll until the transaction is mined or the timeout passes.
    ///
    /// Connection errors while polling are logged and retried. Dropping the
    /// returned future stops polling.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Timeout`] if no receipt appears in time, or an
    /// RPC error reported by the node.
    #[instrument(skip(self), fields(tx = %hash))]
    pub async fn wait_for_receipt(&self, hash: &TxHash) -> Result<TransactionReceipt, ChainError> {
        let timeout = self.inner.receipt_timeout;
        let poll = async {
            loop {
                match self.transaction_receipt(hash).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => debug!("Receipt not available yet"),
                    Err(ChainError::Provider(e)) if is_transient(&e) => {
                        warn!(error = %e, "Receipt poll failed, retrying");
                    }
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(self.inner.poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| ChainError::Timeout(timeout))?
    }

    async fn ensure_unclaimed(&self, hash: H256, order_id: &OrderId) -> Result<(), ChainError> {
        match self.inner.claimed.get(&hash).await {
            Some(owner) if owner != *order_id => Err(ChainError::AlreadyClaimed { order_id: owner }),
            _ => Ok(()),
        }
    }

    /// Wait for the receipt and check it pays `order_id` as `expected`.
    ///
    /// A verified hash is bound to its order, so the same transaction cannot
    /// settle a second order while this process remembers it.
    ///
    /// # Errors
    ///
    /// Any [`ChainError`] from waiting or verification, or
    /// [`ChainError::AlreadyClaimed`] if the hash paid another order.
    #[instrument(skip(self, expected), fields(tx = %hash, order_id = %order_id))]
    pub async fn verify_payment(
        &self,
        hash: &TxHash,
        expected: &ExpectedPayment,
        order_id: &OrderId,
    ) -> Result<TokenTransfer, ChainError> {
        self.ensure_unclaimed(hash.hash(), order_id).await?;

        let receipt = self.wait_for_receipt(hash).await?;
        let transfer = verify_receipt(&receipt, expected)?;
        debug!(block = ?receipt.block_number, value = %transfer.value, "Transfer matches order");

        let owner = self
            .inner
            .claimed
            .entry(hash.hash())
            .or_insert(order_id.clone())
            .await
            .into_value();
        if owner != *order_id {
            return Err(ChainError::AlreadyClaimed { order_id: owner });
        }
        Ok(transfer)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ethers::types::{Address, Bytes, Log, U256};
    use ethers::utils::keccak256;

    use super::*;

    const TOKEN: &str = "0x55d398326f99059fF775485246999027B3197955";
    const PAYEE: &str = "0x2222222222222222222222222222222222222222";
    const PAYER: &str = "0x3333333333333333333333333333333333333333";

    fn addr(s: &str) -> Address {
        WalletAddress::parse(s).unwrap().address()
    }

    fn expected() -> ExpectedPayment {
        ExpectedPayment {
            token: WalletAddress::parse(TOKEN).unwrap(),
            payee: WalletAddress::parse(PAYEE).unwrap(),
            payer: WalletAddress::parse(PAYER).unwrap(),
            units: U256::from(1000),
        }
    }

    fn transfer_log(to: Address, value: u64) -> Log {
        let mut data = [0_u8; 32];
        U256::from(value).to_big_endian(&mut data);
        Log {
            address: addr(TOKEN),
            topics: vec![
                H256::from(keccak256("Transfer(address,address,uint256)")),
                H256::from(addr(PAYER)),
                H256::from(to),
            ],
            data: Bytes::from(data.to_vec()),
            ..Log::default()
        }
    }

    fn receipt(status: u64, to: Address, logs: Vec<Log>) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: H256::repeat_byte(0xab),
            status: Some(U64::from(status)),
            to: Some(to),
            logs,
            ..TransactionReceipt::default()
        }
    }

    #[test]
    fn test_transfer_to_payee_verifies() {
        let r = receipt(1, addr(TOKEN), vec![transfer_log(addr(PAYEE), 1000)]);
        let transfer = verify_receipt(&r, &expected()).unwrap();
        assert_eq!(transfer.to, addr(PAYEE));
        assert_eq!(transfer.from, addr(PAYER));
    }

    #[test]
    fn test_transfer_to_stranger_is_rejected() {
        let stranger = addr("0x000000000000000000000000000000000000dead");
        let r = receipt(1, addr(TOKEN), vec![transfer_log(stranger, 1)]);
        assert!(matches!(
            verify_receipt(&r, &expected()),
            Err(ChainError::Mismatch(PaymentMismatch::NoTransferToPayee))
        ));
    }

    #[test]
    fn test_underpayment_is_rejected() {
        let r = receipt(1, addr(TOKEN), vec![transfer_log(addr(PAYEE), 999)]);
        assert!(matches!(
            verify_receipt(&r, &expected()),
            Err(ChainError::Mismatch(PaymentMismatch::Underpaid { .. }))
        ));
    }

    #[test]
    fn test_successful_call_without_transfer_is_rejected() {
        let r = receipt(1, addr(TOKEN), Vec::new());
        assert!(matches!(
            verify_receipt(&r, &expected()),
            Err(ChainError::Mismatch(PaymentMismatch::NoTransferToPayee))
        ));
    }

    #[test]
    fn test_reverted() {
        let r = receipt(0, addr(TOKEN), vec![transfer_log(addr(PAYEE), 1000)]);
        assert!(matches!(verify_receipt(&r, &expected()), Err(ChainError::Reverted)));
    }

    #[test]
    fn test_wrong_contract() {
        let other = addr("0x1111111111111111111111111111111111111111");
        let r = receipt(1, other, vec![transfer_log(addr(PAYEE), 1000)]);
        assert!(matches!(
            verify_receipt(&r, &expected()),
            Err(ChainError::WrongContract { .. })
        ));
    }

    #[test]
    fn test_node_errors_are_not_retried() {
        let node_error: ProviderError =
            serde_json::from_str::<serde_json::Value>("not json").unwrap_err().into();
        assert!(!is_transient(&node_error));
    }
}
