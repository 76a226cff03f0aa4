//! Status enums for various entities.
//!
//! The backend encodes every status as a small integer. Each enum converts
//! from and into `i32` so it round-trips through JSON unchanged, including
//! codes this storefront does not know about yet.

use serde::{Deserialize, Serialize};

/// Order lifecycle status.
///
/// Codes 0-5 cover payment; 6-10 cover fulfillment after payment and are
/// set by administrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Cancelled,
    PaymentTimeout,
    PaymentFailed,
    PendingVerification,
    Preparing,
    Shipped,
    Delivered,
    AwaitingHosting,
    Hosted,
    Unknown(i32),
}

/// An action offered on an order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    Repay,
    Cancel,
    Refresh,
}

impl OrderAction {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Repay => "Pay again",
            Self::Cancel => "Cancel order",
            Self::Refresh => "Refresh",
        }
    }
}

impl OrderStatus {
    /// Fulfillment statuses an administrator may move an order to.
    pub const FULFILLMENT: [Self; 5] = [
        Self::Preparing,
        Self::Shipped,
        Self::Delivered,
        Self::AwaitingHosting,
        Self::Hosted,
    ];

    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::PendingPayment => 0,
            Self::Paid => 1,
            Self::Cancelled => 2,
            Self::PaymentTimeout => 3,
            Self::PaymentFailed => 4,
            Self::PendingVerification => 5,
            Self::Preparing => 6,
            Self::Shipped => 7,
            Self::Delivered => 8,
            Self::AwaitingHosting => 9,
            Self::Hosted => 10,
            Self::Unknown(code) => code,
        }
    }

    /// User-facing label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PendingPayment => "Pending payment",
            Self::Paid => "Paid",
            Self::Cancelled => "Cancelled",
            Self::PaymentTimeout => "Payment timed out",
            Self::PaymentFailed => "Payment failed",
            Self::PendingVerification => "Pending verification",
            Self::Preparing => "Preparing machine",
            Self::Shipped => "Shipped",
            Self::Delivered => "Delivered",
            Self::AwaitingHosting => "Awaiting hosting",
            Self::Hosted => "Hosted",
            Self::Unknown(_) => "Unknown status",
        }
    }

    /// Tone used to color the status badge.
    #[must_use]
    pub const fn tone(self) -> &'static str {
        match self {
            Self::PendingPayment | Self::PendingVerification => "pending",
            Self::Paid
            | Self::Preparing
            | Self::Shipped
            | Self::Delivered
            | Self::AwaitingHosting
            | Self::Hosted => "success",
            Self::Cancelled | Self::PaymentTimeout | Self::PaymentFailed => "failure",
            Self::Unknown(_) => "neutral",
        }
    }

    /// Actions offered on an order row in this status.
    #[must_use]
    pub const fn actions(self) -> &'static [OrderAction] {
        match self {
            Self::PendingPayment => &[OrderAction::Repay, OrderAction::Cancel],
            Self::PendingVerification => &[OrderAction::Refresh],
            _ => &[],
        }
    }

    /// Whether the order has been paid (including all fulfillment stages).
    #[must_use]
    pub const fn is_paid(self) -> bool {
        matches!(self.code(), 1 | 6..=10)
    }

    /// Whether an administrator may move this order to `target`.
    ///
    /// Only paid or fulfilling orders move, only to a fulfillment status,
    /// and never to the status they already have.
    #[must_use]
    pub fn can_move_to(self, target: Self) -> bool {
        self.is_paid() && Self::FULFILLMENT.contains(&target) && self != target
    }
}

impl From<i32> for OrderStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::PendingPayment,
            1 => Self::Paid,
            2 => Self::Cancelled,
            3 => Self::PaymentTimeout,
            4 => Self::PaymentFailed,
            5 => Self::PendingVerification,
            6 => Self::Preparing,
            7 => Self::Shipped,
            8 => Self::Delivered,
            9 => Self::AwaitingHosting,
            10 => Self::Hosted,
            other => Self::Unknown(other),
        }
    }
}

impl From<OrderStatus> for i32 {
    fn from(status: OrderStatus) -> Self {
        status.code()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Miner node connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum NodeStatus {
    Offline,
    Online,
    Invalid,
    Unknown(i32),
}

impl NodeStatus {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "Offline",
            Self::Online => "Online",
            Self::Invalid => "Invalid",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl From<i32> for NodeStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Offline,
            1 => Self::Online,
            2 => Self::Invalid,
            other => Self::Unknown(other),
        }
    }
}

impl From<NodeStatus> for i32 {
    fn from(status: NodeStatus) -> Self {
        match status {
            NodeStatus::Offline => 0,
            NodeStatus::Online => 1,
            NodeStatus::Invalid => 2,
            NodeStatus::Unknown(code) => code,
        }
    }
}

/// Account activation state on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "i32", into = "i32")]
pub enum AccountStatus {
    #[default]
    NotActivated,
    Active,
}

impl From<i32> for AccountStatus {
    fn from(code: i32) -> Self {
        if code == 0 {
            Self::NotActivated
        } else {
            Self::Active
        }
    }
}

impl From<AccountStatus> for i32 {
    fn from(status: AccountStatus) -> Self {
        match status {
            AccountStatus::NotActivated => 0,
            AccountStatus::Active => 1,
        }
    }
}

/// Progress of a pending activation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ActivationStatus {
    Verifying,
    Done,
    Failed,
}

impl From<i32> for ActivationStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Verifying,
            2 => Self::Failed,
            _ => Self::Done,
        }
    }
}

impl From<ActivationStatus> for i32 {
    fn from(status: ActivationStatus) -> Self {
        match status {
            ActivationStatus::Verifying => 0,
            ActivationStatus::Done => 1,
            ActivationStatus::Failed => 2,
        }
    }
}

/// Role code the backend assigns to administrators.
pub const ADMIN_ROLE: i32 = 2;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_round_trips_codes() {
        for code in -1..=12 {
            assert_eq!(OrderStatus::from(code).code(), code);
        }
    }

    #[test]
    fn test_unknown_status_label() {
        let status: OrderStatus = serde_json::from_str("42").unwrap();
        assert_eq!(status, OrderStatus::Unknown(42));
        assert_eq!(status.label(), "Unknown status");
        assert!(status.actions().is_empty());
    }

    #[test]
    fn test_row_actions() {
        assert_eq!(
            OrderStatus::PendingPayment.actions(),
            &[OrderAction::Repay, OrderAction::Cancel]
        );
        assert_eq!(
            OrderStatus::PendingVerification.actions(),
            &[OrderAction::Refresh]
        );
        for status in [
            OrderStatus::Paid,
            OrderStatus::Cancelled,
            OrderStatus::PaymentTimeout,
            OrderStatus::PaymentFailed,
            OrderStatus::Shipped,
        ] {
            assert!(status.actions().is_empty(), "{status:?}");
        }
    }

    #[test]
    fn test_fulfillment_moves() {
        assert!(OrderStatus::Paid.can_move_to(OrderStatus::Preparing));
        assert!(OrderStatus::Shipped.can_move_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Shipped.can_move_to(OrderStatus::Shipped));
        assert!(!OrderStatus::PendingPayment.can_move_to(OrderStatus::Preparing));
        assert!(!OrderStatus::Paid.can_move_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_node_and_activation_codes() {
        assert_eq!(NodeStatus::from(1), NodeStatus::Online);
        assert_eq!(NodeStatus::from(7).label(), "Unknown");
        assert_eq!(ActivationStatus::from(2), ActivationStatus::Failed);
        assert_eq!(AccountStatus::from(0), AccountStatus::NotActivated);
    }
}
