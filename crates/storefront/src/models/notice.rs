//! One-shot banners carried in a `notice` query parameter.
//!
//! Page handlers never fail hard on upstream errors. They redirect back to
//! a page with `?notice=<code>` and the page renders the banner once.

use axum::response::Redirect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

impl NoticeLevel {
    /// CSS modifier for the banner.
    #[must_use]
    pub const fn class(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

macro_rules! notices {
    ($( $variant:ident => ($code:literal, $level:ident, $message:literal), )+) => {
        /// A banner message identified by a stable code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Notice {
            $( $variant, )+
        }

        impl Notice {
            /// Query-string code.
            #[must_use]
            pub const fn code(self) -> &'static str {
                match self {
                    $( Self::$variant => $code, )+
                }
            }

            #[must_use]
            pub const fn level(self) -> NoticeLevel {
                match self {
                    $( Self::$variant => NoticeLevel::$level, )+
                }
            }

            #[must_use]
            pub const fn message(self) -> &'static str {
                match self {
                    $( Self::$variant => $message, )+
                }
            }

            /// Parse a query-string code. Unknown codes are ignored.
            #[must_use]
            pub fn from_code(code: &str) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

notices! {
    SignedOut => ("signed_out", Info, "You have been signed out."),
    CodeSent => ("code_sent", Info, "We emailed you a sign-in code."),
    CodeFailed => ("code_failed", Error, "We could not send a sign-in code. Please try again."),
    InvalidCode => ("invalid_code", Error, "That code is invalid or has expired."),
    LoginFailed => ("login_failed", Error, "Sign-in failed. Please try again."),
    SessionExpired => ("session_expired", Info, "Your session expired. Please sign in again."),
    ActivationFailed => ("activation_failed", Error, "Activation could not be started. Please try again."),
    CatalogUnavailable => ("catalog_unavailable", Error, "The catalog is unavailable right now."),
    CheckoutExpired => ("checkout_expired", Info, "Your checkout was reset. Please start again."),
    QuantityTooLow => ("quantity_too_low", Error, "That quantity is below the minimum for this miner."),
    OrderFailed => ("order_failed", Error, "Your order could not be created. Please try again."),
    PaymentConfirmed => ("payment_confirmed", Success, "Payment submitted. We will update your order once it is verified."),
    ConfirmFailed => ("confirm_failed", Error, "We could not confirm your payment. Your order is still pending."),
    OrderCancelled => ("order_cancelled", Success, "Your order was cancelled."),
    CancelFailed => ("cancel_failed", Error, "The order could not be cancelled."),
    InProgress => ("in_progress", Info, "That request is already being processed."),
    OrderNotPayable => ("order_not_payable", Error, "This order can no longer be paid."),
    StatusUpdated => ("status_updated", Success, "Order status updated."),
    StatusUpdateFailed => ("status_update_failed", Error, "The order status could not be updated."),
    WalletBound => ("wallet_bound", Success, "Wallet address bound to your account."),
    WalletBindFailed => ("wallet_bind_failed", Error, "The wallet address could not be bound."),
    NodeAdded => ("node_added", Success, "Miner added."),
    NodeAddFailed => ("node_add_failed", Error, "The miner could not be added."),
    NodeTransferred => ("node_transferred", Success, "Miner transferred."),
    NodeTransferFailed => ("node_transfer_failed", Error, "The miner could not be transferred."),
    LoadFailed => ("load_failed", Error, "Some data could not be loaded. Please refresh."),
}

impl Notice {
    /// Redirect to `path` with this notice attached.
    #[must_use]
    pub fn redirect(self, path: &str) -> Redirect {
        Redirect::to(&self.attach(path))
    }

    /// Append `notice=<code>` to `path`.
    #[must_use]
    pub fn attach(self, path: &str) -> String {
        let sep = if path.contains('?') { '&' } else { '?' };
        format!("{path}{sep}notice={}", self.code())
    }

    /// Resolve an optional query value.
    #[must_use]
    pub fn from_query(code: Option<&str>) -> Option<Self> {
        code.and_then(Self::from_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for notice in [Notice::OrderFailed, Notice::WalletBound, Notice::InProgress] {
            assert_eq!(Notice::from_code(notice.code()), Some(notice));
        }
        assert_eq!(Notice::from_code("nonsense"), None);
        assert_eq!(Notice::from_query(None), None);
    }

    #[test]
    fn test_attach() {
        assert_eq!(
            Notice::OrderCancelled.attach("/orders"),
            "/orders?notice=order_cancelled"
        );
        assert_eq!(
            Notice::OrderCancelled.attach("/orders?page=2"),
            "/orders?page=2&notice=order_cancelled"
        );
    }

    #[test]
    fn test_levels() {
        assert_eq!(Notice::OrderFailed.level().class(), "error");
        assert_eq!(Notice::PaymentConfirmed.level(), NoticeLevel::Success);
    }
}
