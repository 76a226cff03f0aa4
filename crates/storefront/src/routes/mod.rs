//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /                               - Miner catalog (+ wallet binding prompt)
//!
//! # Checkout wizard (session-backed)
//! POST /checkout/start                 - Pick a miner and quantity
//! GET  /checkout/pool                  - Pool step
//! POST /checkout/pool                  - Choose a pool
//! GET  /checkout/address               - Shipping address step
//! POST /checkout/address               - Validate address and create the order
//! GET  /checkout/payment               - Payment step (wallet and manual branches)
//! POST /checkout/payment/transfer      - JSON: prepare an ERC-20 transfer
//! POST /checkout/payment/transaction   - JSON: verify a wallet transaction and confirm
//! POST /checkout/payment/confirm       - Manual branch: confirm payment
//! GET  /checkout/complete              - Confirmation page
//! POST /checkout/cancel                - Discard the wizard
//!
//! # Orders
//! GET  /orders                         - Order list (?page=&order_id=)
//! GET  /orders/{id}                    - Order detail
//! GET  /orders/{id}/pay                - Resume payment for a pending order
//! GET  /orders/{id}/cancel             - Cancel confirmation
//! POST /orders/{id}/cancel             - Cancel action
//! POST /orders/{id}/status             - Fulfillment status (administrators)
//!
//! # Machines
//! GET  /machines                       - Miner node list (?page=&q=)
//! POST /machines                       - Add a node by MAC address
//! POST /machines/{node_key}/transfer   - Transfer a node by email
//!
//! # Wallet
//! POST /wallet/connected               - JSON: release a deferred transfer
//! POST /wallet/bind                    - JSON: bind the connected wallet
//! POST /wallet/dismiss                 - Hide the binding prompt
//! GET  /settings                       - Email and wallet address
//! POST /settings/wallet                - Bind a typed-in wallet address
//!
//! # Auth
//! GET  /auth/login                     - Login page
//! POST /auth/otp                       - Email a one-time code
//! GET  /auth/verify                    - Code entry page
//! POST /auth/verify                    - Verify the code
//! GET  /auth/oauth                     - Start OAuth (PKCE)
//! GET  /auth/callback                  - OAuth callback
//! GET  /auth/activate                  - Activation status
//! POST /auth/activate                  - Request activation
//! POST /auth/logout                    - Sign out
//! ```

pub mod auth;
pub mod checkout;
pub mod home;
pub mod machines;
pub mod orders;
pub mod wallet;

use axum::{
    Router,
    routing::{get, post},
};
use serde::Deserialize;

use epochmine_core::{PageItem, PageWindow};

use crate::middleware::{api_rate_limiter, auth_rate_limiter};
use crate::models::{CurrentUser, Notice};
use crate::state::AppState;

// =============================================================================
// Shared page context
// =============================================================================

/// Header and banner data every page renders.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub user_name: Option<String>,
    pub avatar: Option<String>,
    pub notice: Option<Notice>,
    /// Nav entry to highlight.
    pub active: &'static str,
}

impl Page {
    #[must_use]
    pub fn signed_in(user: &CurrentUser, notice: Option<Notice>, active: &'static str) -> Self {
        Self {
            user_name: Some(user.name.clone()),
            avatar: user.avatar.clone(),
            notice,
            active,
        }
    }

    #[must_use]
    pub const fn anonymous(notice: Option<Notice>) -> Self {
        Self {
            user_name: None,
            avatar: None,
            notice,
            active: "",
        }
    }
}

/// `?notice=` query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct NoticeQuery {
    pub notice: Option<String>,
}

impl NoticeQuery {
    #[must_use]
    pub fn notice(&self) -> Option<Notice> {
        Notice::from_query(self.notice.as_deref())
    }
}

/// Treat a blank form or query value as absent.
#[must_use]
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// One page button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerLink {
    pub label: String,
    /// `None` for an ellipsis.
    pub href: Option<String>,
    pub current: bool,
}

/// Pagination controls ready for rendering.
#[derive(Debug, Clone, Default)]
pub struct Pager {
    pub links: Vec<PagerLink>,
    pub previous: Option<String>,
    pub next: Option<String>,
}

impl Pager {
    /// Build the controls for `window`, using `href` to link each page.
    pub fn new(window: &PageWindow, href: impl Fn(u32) -> String) -> Self {
        let links = window
            .items()
            .iter()
            .map(|item| match *item {
                PageItem::Page(n) => PagerLink {
                    label: n.to_string(),
                    href: Some(href(n)),
                    current: n == window.current(),
                },
                PageItem::Ellipsis => PagerLink {
                    label: "…".to_string(),
                    href: None,
                    current: false,
                },
            })
            .collect();

        Self {
            links,
            previous: window.has_previous().then(|| href(window.previous())),
            next: window.has_next().then(|| href(window.next())),
        }
    }

    /// Whether there is more than one page.
    #[must_use]
    pub fn is_paged(&self) -> bool {
        self.links.len() > 1
    }
}

/// `{path}?page=N` plus any non-empty extra parameters.
#[must_use]
pub fn page_href(path: &str, page: u32, extra: &[(&str, &str)]) -> String {
    let mut href = format!("{path}?page={page}");
    for (key, value) in extra.iter().filter(|(_, v)| !v.is_empty()) {
        href.push('&');
        href.push_str(key);
        href.push('=');
        href.push_str(&urlencoding::encode(value));
    }
    href
}

// =============================================================================
// Routers
// =============================================================================

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    let one_time_code = Router::new()
        .route("/otp", post(auth::send_code))
        .route("/verify", get(auth::verify_page).post(auth::verify_code))
        .layer(auth_rate_limiter());

    Router::new()
        .route("/login", get(auth::login_page))
        .route("/oauth", get(auth::oauth_start))
        .route("/callback", get(auth::oauth_callback))
        .route(
            "/activate",
            get(auth::activate_page).post(auth::activate),
        )
        .route("/logout", post(auth::logout))
        .merge(one_time_code)
}

/// Create the checkout wizard router.
pub fn checkout_routes() -> Router<AppState> {
    let wallet_json = Router::new()
        .route("/payment/transfer", post(checkout::request_transfer))
        .route("/payment/transaction", post(checkout::submit_transaction))
        .layer(api_rate_limiter());

    Router::new()
        .route("/start", post(checkout::start))
        .route("/pool", get(checkout::pool_page).post(checkout::select_pool))
        .route(
            "/address",
            get(checkout::address_page).post(checkout::submit_address),
        )
        .route("/payment", get(checkout::payment_page))
        .route("/payment/confirm", post(checkout::confirm_manual))
        .route("/complete", get(checkout::complete_page))
        .route("/cancel", post(checkout::cancel))
        .merge(wallet_json)
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(orders::index))
        .route("/{id}", get(orders::show))
        .route("/{id}/pay", get(orders::pay))
        .route(
            "/{id}/cancel",
            get(orders::cancel_page).post(orders::cancel),
        )
        .route("/{id}/status", post(orders::update_status))
}

/// Create the machine routes router.
pub fn machine_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(machines::index).post(machines::add))
        .route("/{node_key}/transfer", post(machines::transfer))
}

/// Create the wallet routes router.
pub fn wallet_routes() -> Router<AppState> {
    Router::new()
        .route("/connected", post(wallet::connected))
        .route("/bind", post(wallet::bind_json))
        .layer(api_rate_limiter())
        .route("/dismiss", post(wallet::dismiss))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        // Catalog
        .route("/", get(home::index))
        // Checkout wizard
        .nest("/checkout", checkout_routes())
        // Orders
        .nest("/orders", order_routes())
        // Machines
        .nest("/machines", machine_routes())
        // Wallet
        .nest("/wallet", wallet_routes())
        .route("/settings", get(wallet::settings))
        .route("/settings/wallet", post(wallet::bind_form))
        // Auth routes
        .nest("/auth", auth_routes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  x ".into())), Some("x".into()));
        assert_eq!(non_empty(Some("   ".into())), None);
        assert_eq!(non_empty(None), None);
    }

    #[test]
    fn test_page_href() {
        assert_eq!(page_href("/orders", 2, &[]), "/orders?page=2");
        assert_eq!(
            page_href("/orders", 3, &[("order_id", "EM 7"), ("q", "")]),
            "/orders?page=3&order_id=EM%207"
        );
    }

    #[test]
    fn test_pager() {
        let window = PageWindow::new(1, 25, 10);
        let pager = Pager::new(&window, |p| page_href("/machines", p, &[]));
        let labels: Vec<&str> = pager.links.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, ["1", "2", "3"]);
        assert!(pager.links.first().unwrap().current);
        assert_eq!(pager.previous, None);
        assert_eq!(pager.next.as_deref(), Some("/machines?page=2"));
        assert!(pager.is_paged());

        let single = Pager::new(&PageWindow::new(1, 0, 10), |p| page_href("/", p, &[]));
        assert!(!single.is_paged());
    }

    #[test]
    fn test_notice_query() {
        let q = NoticeQuery {
            notice: Some("order_failed".into()),
        };
        assert_eq!(q.notice(), Some(Notice::OrderFailed));
        assert_eq!(NoticeQuery::default().notice(), None);
    }
}
