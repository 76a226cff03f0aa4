//! Wire types for the backend REST API.

use chrono::{DateTime, Utc};
use epochmine_core::{
    AccountStatus, ActivationStatus, MinerId, NodeId, NodeStatus, OrderId, OrderStatus, PoolId,
    ShippingAddress, TxHash, UserId, WalletAddress,
    checkout::{PaymentConfirmation, PaymentTarget, PoolChoice, ProductChoice},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Success code in the response envelope.
pub const SUCCESS_CODE: i64 = 200;

/// Every backend response is wrapped in this envelope.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    pub data: Option<T>,
}

/// One page of a list endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListPage<T> {
    #[serde(default = "Vec::new")]
    pub records: Vec<T>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total: u64,
}

impl<T> Default for ListPage<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            total: 0,
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// A miner listed for sale.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Miner {
    pub id: MinerId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "one", alias = "min_buy")]
    pub min_quantity: u32,
}

const fn one() -> u32 {
    1
}

impl Miner {
    #[must_use]
    pub fn choice(&self) -> ProductChoice {
        ProductChoice {
            id: self.id.clone(),
            title: self.title.clone(),
            unit_price: self.price,
            min_quantity: self.min_quantity,
        }
    }
}

/// A mining pool offered at checkout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pool {
    pub id: PoolId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub logo: Option<String>,
}

impl Pool {
    #[must_use]
    pub fn choice(&self) -> PoolChoice {
        PoolChoice {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Body of `POST /orders/create`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    pub machine_id: MinerId,
    pub pool_id: PoolId,
    pub quantity: u32,
    pub shipping_info: ShippingAddress,
}

/// Response of `POST /orders/create`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedOrder {
    pub id: OrderId,
    #[serde(default)]
    pub order_id: String,
    pub payment_address: WalletAddress,
    pub amount: Decimal,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
}

impl From<CreatedOrder> for PaymentTarget {
    fn from(order: CreatedOrder) -> Self {
        Self {
            order_id: order.id,
            order_code: order.order_id,
            payment_address: order.payment_address,
            amount: order.amount,
            expires_at: order.expired_at,
        }
    }
}

/// Miner snapshot embedded in an order.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MachineInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// Pool snapshot embedded in an order.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PoolInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub logo: Option<String>,
}

/// An order as returned by list and detail endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Order {
    pub id: OrderId,
    /// Human-facing order code.
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub machine_info: MachineInfo,
    #[serde(default)]
    pub pool_info: Option<PoolInfo>,
    #[serde(default = "one")]
    pub quantity: u32,
    pub amount: Decimal,
    pub status: OrderStatus,
    #[serde(default, deserialize_with = "lenient_address")]
    pub payment_address: Option<WalletAddress>,
    #[serde(default, deserialize_with = "lenient_hash")]
    pub transaction_hash: Option<TxHash>,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub shipping_info: Option<ShippingAddress>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pay_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remark: Option<String>,
}

impl Order {
    /// Payment target for paying this order again, if it has an address.
    #[must_use]
    pub fn payment_target(&self) -> Option<PaymentTarget> {
        Some(PaymentTarget {
            order_id: self.id.clone(),
            order_code: self.order_id.clone(),
            payment_address: self.payment_address?,
            amount: self.amount,
            expires_at: self.expired_at,
        })
    }
}

/// Body of `POST /orders/cancel/`.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRef<'a> {
    pub id: &'a OrderId,
}

/// Body of `POST /orders/update-status`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateStatusRequest<'a> {
    pub id: &'a OrderId,
    pub status: OrderStatus,
}

/// Body of `POST /orders/confirm-payment`.
pub type ConfirmPaymentRequest = PaymentConfirmation;

// =============================================================================
// Users
// =============================================================================

/// Backend user record.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserRecord {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_address")]
    pub wallet_address: Option<WalletAddress>,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default)]
    pub role: i32,
}

impl UserRecord {
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.role == epochmine_core::ADMIN_ROLE
    }
}

/// Latest activation request for a not-yet-active user.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActiveRecord {
    pub status: ActivationStatus,
}

/// Response of `GET /user/{id}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserInfo {
    pub user: UserRecord,
    #[serde(default)]
    pub active_record: Option<ActiveRecord>,
}

/// Body of `POST /user/active`.
#[derive(Debug, Clone, Serialize)]
pub struct ActivateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_id: Option<String>,
}

/// Body of `POST /user/bind-wallet`.
#[derive(Debug, Clone, Serialize)]
pub struct BindWalletRequest<'a> {
    pub wallet_address: &'a WalletAddress,
}

// =============================================================================
// Miner nodes
// =============================================================================

/// A running miner registered to the user.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MinerNode {
    pub id: NodeId,
    pub node_key: String,
    #[serde(default)]
    pub mac_addr: Option<String>,
    #[serde(default)]
    pub last_ip: Option<String>,
    pub status: NodeStatus,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub online_time: u64,
    /// Yesterday's earnings in token base units.
    #[serde(default, rename = "y_earn")]
    pub yesterday_earnings: Option<String>,
    /// Lifetime earnings in token base units.
    #[serde(default, rename = "t_earn")]
    pub total_earnings: Option<String>,
}

/// One row of `POST /miner-nodes/online-time`.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeOnlineTime {
    pub node_key: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub online_time: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnlineTimeRequest<'a> {
    pub node_keys: Vec<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddNodeRequest<'a> {
    pub mac_addr: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferNodeRequest<'a> {
    pub node_key: &'a str,
    pub email: &'a str,
}

// =============================================================================
// Lenient field decoding
// =============================================================================

/// Accepts a number, a numeric string, or null (as 0).
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Float(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Raw::Int(n)) => Ok(n),
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(Raw::Float(f)) => Ok(f.max(0.0) as u64),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(0),
        Some(Raw::Text(s)) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Empty strings and malformed addresses decode as `None`.
fn lenient_address<'de, D>(deserializer: D) -> Result<Option<WalletAddress>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| WalletAddress::parse(&s).ok()))
}

fn lenient_hash<'de, D>(deserializer: D) -> Result<Option<TxHash>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| TxHash::parse(&s).ok()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_order_decodes_backend_shape() {
        let json = serde_json::json!({
            "id": 12,
            "order_id": "EM202405010001",
            "machine_info": {"title": "EM-1", "image": null},
            "pool_info": null,
            "quantity": 2,
            "amount": "2400.00",
            "status": 0,
            "payment_address": "0x2222222222222222222222222222222222222222",
            "transaction_hash": "",
            "created_at": "2024-05-01T08:00:00Z",
            "expired_at": "2024-05-02T08:00:00Z"
        });
        let order: Order = serde_json::from_value(json).unwrap();
        assert_eq!(order.id.as_str(), "12");
        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert!(order.transaction_hash.is_none());
        assert_eq!(order.payment_target().unwrap().order_code, "EM202405010001");
    }

    #[test]
    fn test_node_online_time_as_string() {
        let json = serde_json::json!({
            "id": "n1", "node_key": "abc", "status": 1, "online_time": "3725"
        });
        let node: MinerNode = serde_json::from_value(json).unwrap();
        assert_eq!(node.online_time, 3725);
        assert_eq!(node.status, NodeStatus::Online);
    }

    #[test]
    fn test_user_without_wallet() {
        let json = serde_json::json!({
            "user": {"id": 7, "email": "a@b.co", "wallet_address": "", "status": 0, "role": 2},
            "active_record": {"status": 2}
        });
        let info: UserInfo = serde_json::from_value(json).unwrap();
        assert!(info.user.wallet_address.is_none());
        assert!(info.user.is_admin());
        assert_eq!(info.user.status, AccountStatus::NotActivated);
        assert_eq!(
            info.active_record.unwrap().status,
            ActivationStatus::Failed
        );
    }

    #[test]
    fn test_miner_defaults_min_quantity() {
        let json = serde_json::json!({"id": 1, "title": "EM-1", "price": 1200});
        let miner: Miner = serde_json::from_value(json).unwrap();
        assert_eq!(miner.min_quantity, 1);
        assert_eq!(miner.choice().unit_price, Decimal::from(1200));
    }
}
