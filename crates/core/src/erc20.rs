//! ERC-20 `transfer(address,uint256)` calls and `Transfer` events.
//!
//! The storefront never signs anything. It prepares the call, the visitor's
//! wallet submits it, and the mined receipt's `Transfer` log is checked
//! against what the order asked for.

use std::sync::LazyLock;

use ethers::abi::{self, Token as AbiToken};
use ethers::types::{Address, Bytes, H256, Log, U256};
use ethers::utils::{id, keccak256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::WalletAddress;

/// Signature of the token transfer function.
pub const TRANSFER_FUNCTION: &str = "transfer(address,uint256)";

/// Signature of the event every compliant token emits on transfer.
pub const TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";

static TRANSFER_TOPIC: LazyLock<H256> = LazyLock::new(|| H256::from(keccak256(TRANSFER_EVENT)));

/// Errors converting a display amount to token base units.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount must be positive")]
    NotPositive,
    #[error("amount has more than {decimals} decimal places")]
    TooPrecise { decimals: u32 },
    #[error("amount is too large")]
    Overflow,
}

/// The payment token: contract address and decimal places.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub contract: WalletAddress,
    pub decimals: u32,
}

/// Convert a decimal amount to integer base units (`amount * 10^decimals`).
///
/// # Errors
///
/// Fails when the amount is zero or negative, has more fractional digits
/// than the token supports, or does not fit in a `U256`.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<U256, AmountError> {
    if amount <= Decimal::ZERO {
        return Err(AmountError::NotPositive);
    }
    let amount = amount.normalize();
    let scale = amount.scale();
    if scale > decimals {
        return Err(AmountError::TooPrecise { decimals });
    }
    let mantissa = u128::try_from(amount.mantissa()).map_err(|_| AmountError::NotPositive)?;
    U256::from(10_u8)
        .checked_pow(U256::from(decimals - scale))
        .and_then(|factor| U256::from(mantissa).checked_mul(factor))
        .ok_or(AmountError::Overflow)
}

/// Convert a decimal string of base units back to a token amount.
///
/// Returns `None` for malformed input or values too large for a `Decimal`.
#[must_use]
pub fn from_base_units(units: &str, decimals: u32) -> Option<Decimal> {
    let units = units.trim();
    if units.is_empty() {
        return None;
    }
    let units = U256::from_dec_str(units).ok()?;
    if units > U256::from(u128::MAX) {
        return None;
    }
    let units = i128::try_from(units.as_u128()).ok()?;
    Decimal::try_from_i128_with_scale(units, decimals)
        .ok()
        .map(|d| d.normalize())
}

/// A prepared `transfer` call, ready to hand to an injected wallet.
///
/// Serializes to the transaction request shape wallets accept
/// (`from`, `to`, `data`, `value`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc20Transfer {
    pub from: WalletAddress,
    /// The token contract, not the payee.
    pub to: WalletAddress,
    pub data: Bytes,
    pub value: U256,
}

impl Erc20Transfer {
    /// Build a transfer of `amount` tokens from `from` to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns an [`AmountError`] if the amount cannot be expressed in base units.
    pub fn new(
        token: &Token,
        from: WalletAddress,
        recipient: &WalletAddress,
        amount: Decimal,
    ) -> Result<Self, AmountError> {
        let units = to_base_units(amount, token.decimals)?;
        Ok(Self {
            from,
            to: token.contract,
            data: encode_transfer(recipient, units),
            value: U256::zero(),
        })
    }
}

/// ABI-encode `transfer(recipient, units)` as calldata.
#[must_use]
pub fn encode_transfer(recipient: &WalletAddress, units: U256) -> Bytes {
    let mut data = id(TRANSFER_FUNCTION).to_vec();
    data.extend(abi::encode(&[
        AbiToken::Address(recipient.address()),
        AbiToken::Uint(units),
    ]));
    Bytes::from(data)
}

/// A decoded `Transfer(from, to, value)` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTransfer {
    /// Contract that emitted the event.
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

impl TokenTransfer {
    /// Decode a log, or `None` if it is not an ERC-20 `Transfer`.
    ///
    /// ERC-721 also emits `Transfer` with the same topic but indexes the
    /// token id, so a log with a fourth topic or no data is skipped.
    #[must_use]
    pub fn from_log(log: &Log) -> Option<Self> {
        let [topic, from, to] = log.topics.as_slice() else {
            return None;
        };
        if *topic != *TRANSFER_TOPIC || log.data.len() != 32 {
            return None;
        }
        Some(Self {
            token: log.address,
            from: Address::from(*from),
            to: Address::from(*to),
            value: U256::from_big_endian(&log.data),
        })
    }
}

/// Why a set of transfers does not settle an order.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentMismatch {
    #[error("no token transfer to the payment address")]
    NoTransferToPayee,
    #[error("transfer was sent from {actual}, not the connected wallet")]
    WrongPayer { actual: WalletAddress },
    #[error("transferred {actual} base units, expected at least {expected}")]
    Underpaid { expected: U256, actual: U256 },
}

/// What a wallet payment for one order must look like on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedPayment {
    pub token: WalletAddress,
    pub payee: WalletAddress,
    pub payer: WalletAddress,
    /// Minimum amount in base units.
    pub units: U256,
}

impl ExpectedPayment {
    /// Find the transfer that settles this payment.
    ///
    /// Only events emitted by the payment token count. Among transfers to the
    /// payee, one from the payer for at least the order amount wins; otherwise
    /// the closest miss is reported.
    ///
    /// # Errors
    ///
    /// Returns the [`PaymentMismatch`] describing the closest miss.
    pub fn settle(&self, transfers: &[TokenTransfer]) -> Result<TokenTransfer, PaymentMismatch> {
        let to_payee: Vec<&TokenTransfer> = transfers
            .iter()
            .filter(|t| t.token == self.token.address() && t.to == self.payee.address())
            .collect();

        let from_payer: Vec<&TokenTransfer> = to_payee
            .iter()
            .copied()
            .filter(|t| t.from == self.payer.address())
            .collect();

        if let Some(paid) = from_payer.iter().find(|t| t.value >= self.units) {
            return Ok(**paid);
        }
        if let Some(short) = from_payer.iter().max_by_key(|t| t.value) {
            return Err(PaymentMismatch::Underpaid {
                expected: self.units,
                actual: short.value,
            });
        }
        match to_payee.first() {
            Some(other) => Err(PaymentMismatch::WrongPayer {
                actual: other.from.into(),
            }),
            None => Err(PaymentMismatch::NoTransferToPayee),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn addr(s: &str) -> WalletAddress {
        WalletAddress::parse(s).unwrap()
    }

    fn token() -> Token {
        Token {
            contract: addr("0x55d398326f99059fF775485246999027B3197955"),
            decimals: 18,
        }
    }

    fn payee() -> WalletAddress {
        addr("0x2222222222222222222222222222222222222222")
    }

    fn payer() -> WalletAddress {
        addr("0x1111111111111111111111111111111111111111")
    }

    fn transfer_log(emitter: Address, from: Address, to: Address, value: U256) -> Log {
        let mut data = [0_u8; 32];
        value.to_big_endian(&mut data);
        Log {
            address: emitter,
            topics: vec![*TRANSFER_TOPIC, H256::from(from), H256::from(to)],
            data: Bytes::from(data.to_vec()),
            ..Log::default()
        }
    }

    fn expected(units: u64) -> ExpectedPayment {
        ExpectedPayment {
            token: token().contract,
            payee: payee(),
            payer: payer(),
            units: U256::from(units),
        }
    }

    fn transfer(from: WalletAddress, to: WalletAddress, value: u64) -> TokenTransfer {
        TokenTransfer {
            token: token().contract.address(),
            from: from.address(),
            to: to.address(),
            value: U256::from(value),
        }
    }

    #[test]
    fn test_base_units() {
        let d = |s: &str| Decimal::from_str(s).unwrap();
        assert_eq!(to_base_units(d("1"), 18).unwrap(), U256::exp10(18));
        assert_eq!(to_base_units(d("12.50"), 6).unwrap(), U256::from(12_500_000));
        assert_eq!(to_base_units(d("0.000001"), 6).unwrap(), U256::one());
        assert_eq!(
            to_base_units(d("0.0000001"), 6),
            Err(AmountError::TooPrecise { decimals: 6 })
        );
        assert_eq!(to_base_units(d("0"), 18), Err(AmountError::NotPositive));
        assert_eq!(to_base_units(d("-3"), 18), Err(AmountError::NotPositive));
    }

    #[test]
    fn test_from_base_units() {
        assert_eq!(
            from_base_units("1500000000000000000", 18),
            Some(Decimal::from_str("1.5").unwrap())
        );
        assert_eq!(from_base_units("0", 18), Some(Decimal::ZERO));
        assert_eq!(from_base_units("", 18), None);
        assert_eq!(from_base_units("-1", 18), None);
    }

    #[test]
    fn test_overflow() {
        let big = Decimal::from_str("79228162514264337593543950335").unwrap();
        assert!(to_base_units(big, 18).is_ok());
        assert_eq!(to_base_units(big, 60), Err(AmountError::Overflow));
    }

    #[test]
    fn test_calldata_layout() {
        let recipient = addr("0x00000000000000000000000000000000000000ff");
        let data = encode_transfer(&recipient, U256::one());
        assert_eq!(data.len(), 4 + 32 + 32);
        assert_eq!(data.get(..4), Some([0xa9, 0x05, 0x9c, 0xbb].as_slice()));
        assert_eq!(data.get(35), Some(&0xff));
        assert_eq!(data.get(67), Some(&1));
        assert!(data.to_string().starts_with("0xa9059cbb"));
    }

    #[test]
    fn test_transfer_targets_token_contract() {
        let tx = Erc20Transfer::new(&token(), payer(), &payee(), Decimal::from(250)).unwrap();
        assert_eq!(tx.to, token().contract);
        assert_eq!(tx.from, payer());
        assert_eq!(tx.value, U256::zero());

        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["value"], "0x0");
        assert_eq!(json["to"], "0x55d398326f99059ff775485246999027b3197955");
        let data = json["data"].as_str().unwrap();
        assert!(data.contains("2222222222222222222222222222222222222222"));
        let amount = U256::from(250) * U256::exp10(18);
        assert_eq!(data, encode_transfer(&payee(), amount).to_string());
    }

    #[test]
    fn test_decode_transfer_log() {
        let log = transfer_log(
            token().contract.address(),
            payer().address(),
            payee().address(),
            U256::from(7),
        );
        let decoded = TokenTransfer::from_log(&log).unwrap();
        assert_eq!(decoded.from, payer().address());
        assert_eq!(decoded.to, payee().address());
        assert_eq!(decoded.value, U256::from(7));

        let mut nft = log.clone();
        nft.topics.push(H256::from_low_u64_be(7));
        nft.data = Bytes::default();
        assert_eq!(TokenTransfer::from_log(&nft), None);

        let other_event = Log {
            topics: vec![H256::zero(), H256::zero(), H256::zero()],
            ..log
        };
        assert_eq!(TokenTransfer::from_log(&other_event), None);
    }

    #[test]
    fn test_settle_exact_and_over_payment() {
        let paid = expected(100).settle(&[transfer(payer(), payee(), 100)]).unwrap();
        assert_eq!(paid.value, U256::from(100));
        assert!(expected(100).settle(&[transfer(payer(), payee(), 150)]).is_ok());
    }

    #[test]
    fn test_settle_rejects_payment_to_stranger() {
        let stranger = addr("0x000000000000000000000000000000000000dead");
        assert_eq!(
            expected(100).settle(&[transfer(payer(), stranger, 1)]),
            Err(PaymentMismatch::NoTransferToPayee)
        );
        assert_eq!(expected(100).settle(&[]), Err(PaymentMismatch::NoTransferToPayee));
    }

    #[test]
    fn test_settle_rejects_underpayment() {
        assert_eq!(
            expected(100).settle(&[transfer(payer(), payee(), 99)]),
            Err(PaymentMismatch::Underpaid {
                expected: U256::from(100),
                actual: U256::from(99),
            })
        );
    }

    #[test]
    fn test_settle_rejects_someone_elses_transfer() {
        let other = addr("0x4444444444444444444444444444444444444444");
        assert_eq!(
            expected(100).settle(&[transfer(other, payee(), 100)]),
            Err(PaymentMismatch::WrongPayer { actual: other })
        );
    }

    #[test]
    fn test_settle_ignores_other_tokens() {
        let fake = TokenTransfer {
            token: Address::repeat_byte(0x99),
            ..transfer(payer(), payee(), 100)
        };
        assert_eq!(
            expected(100).settle(&[fake]),
            Err(PaymentMismatch::NoTransferToPayee)
        );
    }
}
