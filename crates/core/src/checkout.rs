//! Checkout wizard state machine.
//!
//! ```text
//! ProductSelected -> PoolSelected -> OrderCreated -> PaymentPending -> PaymentConfirmed
//! ```
//!
//! Each visitor's wizard lives in their session as a [`CheckoutState`].
//! Transitions consume user actions and successful backend responses; an
//! action that does not apply to the current state is rejected with
//! [`CheckoutError::InvalidTransition`] and leaves the state untouched.
//!
//! The wallet payment branch may need to connect a wallet before it can
//! transfer. That deferred transfer is held in a single slot on
//! `PaymentPending` and released by [`CheckoutState::wallet_connected`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::erc20::{AmountError, Erc20Transfer, ExpectedPayment, Token, to_base_units};
use crate::types::{MinerId, OrderId, PoolId, TxHash, WalletAddress};

/// Errors from wizard transitions.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("cannot {action} while checkout is at {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },
    #[error("quantity must be at least {min}")]
    QuantityBelowMinimum { min: u32 },
    #[error("wallet payments need a transaction hash")]
    MissingTxHash,
    #[error("manual payments do not carry a transaction hash")]
    UnexpectedTxHash,
    #[error("no wallet transfer was prepared for this order")]
    NoPreparedTransfer,
    #[error(transparent)]
    Amount(#[from] AmountError),
}

/// The miner being bought.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductChoice {
    pub id: MinerId,
    pub title: String,
    pub unit_price: Decimal,
    pub min_quantity: u32,
}

/// The pool the miner will be pointed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolChoice {
    pub id: PoolId,
    pub name: String,
}

/// Product and pool chosen in the first two steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub product: ProductChoice,
    pub quantity: u32,
    pub pool: PoolChoice,
}

/// Where and how much to pay, as returned by order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTarget {
    pub order_id: OrderId,
    pub order_code: String,
    pub payment_address: WalletAddress,
    pub amount: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A transfer requested before any wallet was connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredTransfer {
    pub recipient: WalletAddress,
    pub amount: Decimal,
}

/// How the visitor is paying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentBranch {
    /// Injected browser wallet; payment is a verified on-chain transfer.
    Wallet,
    /// Address and QR code; the visitor reports completion themselves.
    Manual,
}

/// What the wallet script must do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransferStep {
    /// Open the wallet connect prompt; the transfer waits in the slot.
    Connect,
    /// Submit this call through the connected wallet.
    Transfer { tx: Erc20Transfer },
}

/// Body of the backend's confirm-payment call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentConfirmation {
    pub id: OrderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<TxHash>,
}

/// Wizard state held in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckoutState {
    ProductSelected {
        product: ProductChoice,
        quantity: u32,
    },
    PoolSelected(Selection),
    OrderCreated {
        selection: Selection,
        target: PaymentTarget,
    },
    PaymentPending {
        /// `None` when paying an existing order from the order list.
        selection: Option<Selection>,
        target: PaymentTarget,
        deferred: Option<DeferredTransfer>,
        /// Account the last prepared transfer was built for.
        #[serde(default)]
        payer: Option<WalletAddress>,
    },
    PaymentConfirmed {
        target: PaymentTarget,
        tx_hash: Option<TxHash>,
    },
}

impl CheckoutState {
    /// Begin a new checkout, discarding whatever came before.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::QuantityBelowMinimum`] if `quantity` is below
    /// the product's minimum (or zero).
    pub fn start(product: ProductChoice, quantity: u32) -> Result<Self, CheckoutError> {
        let min = product.min_quantity.max(1);
        if quantity < min {
            return Err(CheckoutError::QuantityBelowMinimum { min });
        }
        Ok(Self::ProductSelected { product, quantity })
    }

    /// Enter the payment step for an order that already exists.
    #[must_use]
    pub const fn resume(target: PaymentTarget) -> Self {
        Self::PaymentPending {
            selection: None,
            target,
            deferred: None,
            payer: None,
        }
    }

    /// Stable name of the current state.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ProductSelected { .. } => "product_selected",
            Self::PoolSelected(_) => "pool_selected",
            Self::OrderCreated { .. } => "order_created",
            Self::PaymentPending { .. } => "payment_pending",
            Self::PaymentConfirmed { .. } => "payment_confirmed",
        }
    }

    /// 1-based wizard step shown in the step indicator (pool, address, payment).
    #[must_use]
    pub const fn step(&self) -> u8 {
        match self {
            Self::ProductSelected { .. } => 1,
            Self::PoolSelected(_) => 2,
            Self::OrderCreated { .. } | Self::PaymentPending { .. } | Self::PaymentConfirmed { .. } => 3,
        }
    }

    const fn invalid(&self, action: &'static str) -> CheckoutError {
        CheckoutError::InvalidTransition {
            from: self.name(),
            action,
        }
    }

    #[must_use]
    pub const fn product(&self) -> Option<&ProductChoice> {
        match self {
            Self::ProductSelected { product, .. } => Some(product),
            Self::PoolSelected(sel) | Self::OrderCreated { selection: sel, .. } => Some(&sel.product),
            Self::PaymentPending {
                selection: Some(sel),
                ..
            } => Some(&sel.product),
            Self::PaymentPending { selection: None, .. } | Self::PaymentConfirmed { .. } => None,
        }
    }

    #[must_use]
    pub const fn selection(&self) -> Option<&Selection> {
        match self {
            Self::PoolSelected(sel) | Self::OrderCreated { selection: sel, .. } => Some(sel),
            Self::PaymentPending { selection, .. } => selection.as_ref(),
            Self::ProductSelected { .. } | Self::PaymentConfirmed { .. } => None,
        }
    }

    #[must_use]
    pub const fn target(&self) -> Option<&PaymentTarget> {
        match self {
            Self::OrderCreated { target, .. }
            | Self::PaymentPending { target, .. }
            | Self::PaymentConfirmed { target, .. } => Some(target),
            Self::ProductSelected { .. } | Self::PoolSelected(_) => None,
        }
    }

    /// Whether a transfer is waiting for a wallet connection.
    #[must_use]
    pub const fn has_deferred_transfer(&self) -> bool {
        matches!(self, Self::PaymentPending { deferred: Some(_), .. })
    }

    /// Choose (or re-choose) the mining pool.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidTransition`] once an order exists.
    pub fn select_pool(&mut self, pool: PoolChoice) -> Result<(), CheckoutError> {
        let next = match &*self {
            Self::ProductSelected { product, quantity } => Self::PoolSelected(Selection {
                product: product.clone(),
                quantity: *quantity,
                pool,
            }),
            Self::PoolSelected(sel) => Self::PoolSelected(Selection {
                pool,
                ..sel.clone()
            }),
            _ => return Err(self.invalid("select a pool")),
        };
        *self = next;
        Ok(())
    }

    /// Record the order the backend just created.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidTransition`] unless a pool is selected.
    pub fn order_created(&mut self, target: PaymentTarget) -> Result<(), CheckoutError> {
        let Self::PoolSelected(selection) = self else {
            return Err(self.invalid("create an order"));
        };
        *self = Self::OrderCreated {
            selection: selection.clone(),
            target,
        };
        Ok(())
    }

    /// Move from order creation into the payment step.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidTransition`] unless an order was just created.
    pub fn open_payment(&mut self) -> Result<(), CheckoutError> {
        let Self::OrderCreated { selection, target } = self else {
            return Err(self.invalid("open payment"));
        };
        *self = Self::PaymentPending {
            selection: Some(selection.clone()),
            target: target.clone(),
            deferred: None,
            payer: None,
        };
        Ok(())
    }

    /// Ask to pay through the wallet branch.
    ///
    /// Without a connected `account` the transfer is parked in the pending
    /// slot and the caller is told to connect. With one, the transfer call
    /// is built immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidTransition`] outside `PaymentPending`,
    /// or [`CheckoutError::Amount`] if the order amount cannot be encoded.
    pub fn request_transfer(
        &mut self,
        account: Option<WalletAddress>,
        token: &Token,
    ) -> Result<TransferStep, CheckoutError> {
        let invalid = self.invalid("request a transfer");
        let Self::PaymentPending {
            target,
            deferred,
            payer,
            ..
        } = self
        else {
            return Err(invalid);
        };

        match account {
            None => {
                *deferred = Some(DeferredTransfer {
                    recipient: target.payment_address,
                    amount: target.amount,
                });
                Ok(TransferStep::Connect)
            }
            Some(from) => {
                let tx = Erc20Transfer::new(token, from, &target.payment_address, target.amount)?;
                *deferred = None;
                *payer = Some(from);
                Ok(TransferStep::Transfer { tx })
            }
        }
    }

    /// A wallet finished connecting. Releases the deferred transfer, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidTransition`] outside `PaymentPending`,
    /// or [`CheckoutError::Amount`] if the deferred amount cannot be encoded.
    pub fn wallet_connected(
        &mut self,
        account: WalletAddress,
        token: &Token,
    ) -> Result<Option<Erc20Transfer>, CheckoutError> {
        let invalid = self.invalid("connect a wallet");
        let Self::PaymentPending {
            deferred, payer, ..
        } = self
        else {
            return Err(invalid);
        };
        let Some(pending) = deferred.take() else {
            return Ok(None);
        };
        match Erc20Transfer::new(token, account, &pending.recipient, pending.amount) {
            Ok(tx) => {
                *payer = Some(account);
                Ok(Some(tx))
            }
            Err(e) => {
                *deferred = Some(pending);
                Err(e.into())
            }
        }
    }

    /// Build the confirm-payment request for the chosen branch.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidTransition`] outside `PaymentPending`,
    /// [`CheckoutError::MissingTxHash`] for a wallet payment without a hash,
    /// and [`CheckoutError::UnexpectedTxHash`] for a manual payment with one.
    pub fn confirmation(
        &self,
        branch: PaymentBranch,
        tx_hash: Option<TxHash>,
    ) -> Result<PaymentConfirmation, CheckoutError> {
        let Self::PaymentPending { target, .. } = self else {
            return Err(self.invalid("confirm payment"));
        };
        match (branch, &tx_hash) {
            (PaymentBranch::Wallet, None) => Err(CheckoutError::MissingTxHash),
            (PaymentBranch::Manual, Some(_)) => Err(CheckoutError::UnexpectedTxHash),
            _ => Ok(PaymentConfirmation {
                id: target.order_id.clone(),
                transaction_hash: tx_hash,
            }),
        }
    }

    /// The on-chain transfer that would settle this order.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidTransition`] outside `PaymentPending`,
    /// [`CheckoutError::NoPreparedTransfer`] if no wallet transfer was
    /// prepared, or [`CheckoutError::Amount`] if the amount cannot be encoded.
    pub fn expected_payment(&self, token: &Token) -> Result<ExpectedPayment, CheckoutError> {
        let Self::PaymentPending { target, payer, .. } = self else {
            return Err(self.invalid("verify payment"));
        };
        let payer = payer.ok_or(CheckoutError::NoPreparedTransfer)?;
        Ok(ExpectedPayment {
            token: token.contract,
            payee: target.payment_address,
            payer,
            units: to_base_units(target.amount, token.decimals)?,
        })
    }

    /// The backend accepted the payment confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidTransition`] outside `PaymentPending`.
    pub fn payment_confirmed(&mut self, tx_hash: Option<TxHash>) -> Result<(), CheckoutError> {
        let Self::PaymentPending { target, .. } = self else {
            return Err(self.invalid("finish payment"));
        };
        *self = Self::PaymentConfirmed {
            target: target.clone(),
            tx_hash,
        };
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ethers::types::U256;

    use super::*;

    fn product() -> ProductChoice {
        ProductChoice {
            id: MinerId::new("m1"),
            title: "EM-1 Miner".into(),
            unit_price: Decimal::from(1200),
            min_quantity: 2,
        }
    }

    fn pool(name: &str) -> PoolChoice {
        PoolChoice {
            id: PoolId::new(name),
            name: name.into(),
        }
    }

    fn target() -> PaymentTarget {
        PaymentTarget {
            order_id: OrderId::new("41"),
            order_code: "EM2024001".into(),
            payment_address: WalletAddress::parse("0x2222222222222222222222222222222222222222")
                .unwrap(),
            amount: Decimal::from(2400),
            expires_at: None,
        }
    }

    fn token() -> Token {
        Token {
            contract: WalletAddress::parse("0x55d398326f99059fF775485246999027B3197955").unwrap(),
            decimals: 18,
        }
    }

    fn account() -> WalletAddress {
        WalletAddress::parse("0x1111111111111111111111111111111111111111").unwrap()
    }

    fn hash() -> TxHash {
        TxHash::parse(&format!("0x{}", "ab".repeat(32))).unwrap()
    }

    fn pending() -> CheckoutState {
        let mut state = CheckoutState::start(product(), 2).unwrap();
        state.select_pool(pool("alpha")).unwrap();
        state.order_created(target()).unwrap();
        state.open_payment().unwrap();
        state
    }

    #[test]
    fn test_happy_path() {
        let mut state = CheckoutState::start(product(), 3).unwrap();
        assert_eq!(state.step(), 1);
        state.select_pool(pool("alpha")).unwrap();
        assert_eq!(state.name(), "pool_selected");
        state.order_created(target()).unwrap();
        state.open_payment().unwrap();
        assert_eq!(state.selection().unwrap().quantity, 3);

        let confirmation = state.confirmation(PaymentBranch::Manual, None).unwrap();
        assert_eq!(confirmation.id, OrderId::new("41"));
        state.payment_confirmed(None).unwrap();
        assert_eq!(state.name(), "payment_confirmed");
    }

    #[test]
    fn test_quantity_minimum() {
        assert_eq!(
            CheckoutState::start(product(), 1),
            Err(CheckoutError::QuantityBelowMinimum { min: 2 })
        );
        let p = ProductChoice {
            min_quantity: 0,
            ..product()
        };
        assert!(CheckoutState::start(p, 0).is_err());
    }

    #[test]
    fn test_reselecting_pool_replaces_it() {
        let mut state = CheckoutState::start(product(), 2).unwrap();
        state.select_pool(pool("alpha")).unwrap();
        state.select_pool(pool("beta")).unwrap();
        assert_eq!(state.selection().unwrap().pool.name, "beta");
    }

    #[test]
    fn test_invalid_transitions_keep_state() {
        let mut state = CheckoutState::start(product(), 2).unwrap();
        let before = state.clone();
        let err = state.order_created(target()).unwrap_err();
        assert_eq!(
            err,
            CheckoutError::InvalidTransition {
                from: "product_selected",
                action: "create an order"
            }
        );
        assert!(state.open_payment().is_err());
        assert!(state.payment_confirmed(None).is_err());
        assert!(state.request_transfer(None, &token()).is_err());
        assert_eq!(state, before);

        let mut state = pending();
        assert!(state.select_pool(pool("gamma")).is_err());
        assert_eq!(state.name(), "payment_pending");
    }

    #[test]
    fn test_transfer_is_deferred_until_wallet_connects() {
        let mut state = pending();
        assert_eq!(
            state.request_transfer(None, &token()).unwrap(),
            TransferStep::Connect
        );
        assert!(state.has_deferred_transfer());

        let tx = state.wallet_connected(account(), &token()).unwrap().unwrap();
        assert_eq!(tx.from, account());
        assert_eq!(tx.to, token().contract);
        assert!(!state.has_deferred_transfer());

        // The slot is single-use.
        assert_eq!(state.wallet_connected(account(), &token()).unwrap(), None);
    }

    #[test]
    fn test_transfer_with_connected_wallet() {
        let mut state = pending();
        let step = state.request_transfer(Some(account()), &token()).unwrap();
        let TransferStep::Transfer { tx } = step else {
            panic!("expected a transfer");
        };
        assert!(tx.data.to_string().starts_with("0xa9059cbb"));
        assert!(!state.has_deferred_transfer());
    }

    #[test]
    fn test_transfer_step_json() {
        let json = serde_json::to_value(TransferStep::Connect).unwrap();
        assert_eq!(json, serde_json::json!({"action": "connect"}));
    }

    #[test]
    fn test_confirmation_rules() {
        let state = pending();
        assert_eq!(
            state.confirmation(PaymentBranch::Wallet, None),
            Err(CheckoutError::MissingTxHash)
        );
        assert_eq!(
            state.confirmation(PaymentBranch::Manual, Some(hash())),
            Err(CheckoutError::UnexpectedTxHash)
        );
        let c = state
            .confirmation(PaymentBranch::Wallet, Some(hash()))
            .unwrap();
        let body = serde_json::to_value(&c).unwrap();
        assert_eq!(body["id"], "41");
        assert_eq!(body["transaction_hash"], hash().to_string());
    }

    #[test]
    fn test_expected_payment_follows_prepared_transfer() {
        let mut state = pending();
        assert_eq!(
            state.expected_payment(&token()),
            Err(CheckoutError::NoPreparedTransfer)
        );

        state.request_transfer(Some(account()), &token()).unwrap();
        let expected = state.expected_payment(&token()).unwrap();
        assert_eq!(expected.payer, account());
        assert_eq!(expected.payee, target().payment_address);
        assert_eq!(expected.token, token().contract);
        assert_eq!(expected.units, U256::from(2400) * U256::exp10(18));
    }

    #[test]
    fn test_deferred_transfer_records_connected_payer() {
        let mut state = pending();
        state.request_transfer(None, &token()).unwrap();
        let other = WalletAddress::parse("0x4444444444444444444444444444444444444444").unwrap();
        state.wallet_connected(other, &token()).unwrap();
        assert_eq!(state.expected_payment(&token()).unwrap().payer, other);
    }

    #[test]
    fn test_resume_existing_order() {
        let mut state = CheckoutState::resume(target());
        assert!(state.selection().is_none());
        assert!(state.product().is_none());
        state.payment_confirmed(Some(hash())).unwrap();
        assert!(state.target().is_some());
    }

    #[test]
    fn test_session_round_trip() {
        let state = pending();
        let json = serde_json::to_string(&state).unwrap();
        let back: CheckoutState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
