//! Checkout wizard route handlers.
//!
//! The wizard state (`CheckoutState`) lives in the session. Page steps
//! redirect back with a notice when something upstream fails, so the wizard
//! always stays at its last good state. The wallet branch of the payment
//! step is driven by `static/js/wallet.js` through small JSON endpoints.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form, Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use qrcode::QrCode;
use qrcode::render::svg;
use serde::Deserialize;
use serde_json::json;
use tower_sessions::Session;
use tracing::{error, info, instrument, warn};

use epochmine_core::checkout::Selection;
use epochmine_core::{
    CheckoutState, Countdown, Field, FieldErrors, MinerId, PaymentBranch,
    PaymentTarget, PoolId, ShippingForm, TransferStep, TxHash, WalletAddress,
};

use crate::api::types::{CreateOrderRequest, Pool};
use crate::error::{AppError, Result, add_breadcrumb};
use crate::filters;
use crate::middleware::{AuthContext, RequireAuth};
use crate::models::{Notice, session_keys};
use crate::routes::{NoticeQuery, Page, non_empty};
use crate::state::AppState;

// =============================================================================
// Session Helpers
// =============================================================================

/// Load the wizard from the session.
pub async fn load_checkout(session: &Session) -> Option<CheckoutState> {
    session
        .get::<CheckoutState>(session_keys::CHECKOUT)
        .await
        .ok()
        .flatten()
}

/// Store the wizard in the session.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn save_checkout(
    session: &Session,
    checkout: &CheckoutState,
) -> std::result::Result<(), tower_sessions::session::Error> {
    session.insert(session_keys::CHECKOUT, checkout).await
}

async fn clear_checkout(session: &Session) {
    if let Err(e) = session
        .remove::<CheckoutState>(session_keys::CHECKOUT)
        .await
    {
        warn!(error = %e, "Failed to clear checkout");
    }
}

/// The page that shows the wizard's current step.
#[must_use]
pub const fn step_path(checkout: Option<&CheckoutState>) -> &'static str {
    match checkout {
        None => "/",
        Some(CheckoutState::ProductSelected { .. }) => "/checkout/pool",
        Some(CheckoutState::PoolSelected(_)) => "/checkout/address",
        Some(CheckoutState::OrderCreated { .. } | CheckoutState::PaymentPending { .. }) => {
            "/checkout/payment"
        }
        Some(CheckoutState::PaymentConfirmed { .. }) => "/checkout/complete",
    }
}

/// Send the visitor back to wherever the wizard actually is.
fn back_to_step(checkout: Option<&CheckoutState>) -> Response {
    match checkout {
        None => Notice::CheckoutExpired.redirect("/").into_response(),
        Some(_) => Redirect::to(step_path(checkout)).into_response(),
    }
}

/// Render the payment address as an SVG QR code.
fn payment_qr_svg(address: &WalletAddress) -> Option<String> {
    let code = QrCode::new(address.to_string().as_bytes()).ok()?;
    Some(
        code.render::<svg::Color<'_>>()
            .min_dimensions(200, 200)
            .dark_color(svg::Color("#111827"))
            .light_color(svg::Color("#ffffff"))
            .build(),
    )
}

fn order_key(target: &PaymentTarget) -> String {
    format!("order:{}", target.order_id)
}

// =============================================================================
// Form Types
// =============================================================================

/// Buy button on the catalog.
#[derive(Debug, Deserialize)]
pub struct StartForm {
    pub miner_id: String,
    pub quantity: Option<u32>,
}

/// Pool step form.
#[derive(Debug, Deserialize)]
pub struct PoolForm {
    pub pool_id: Option<String>,
}

/// Wallet branch: ask for the next transfer step.
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    /// Connected wallet account, if any.
    pub account: Option<String>,
}

/// Wallet branch: report the submitted transaction.
#[derive(Debug, Deserialize)]
pub struct TransactionRequest {
    pub tx_hash: String,
}

// =============================================================================
// Templates
// =============================================================================

/// Pool step template.
#[derive(Template, WebTemplate)]
#[template(path = "checkout/pool.html")]
pub struct PoolTemplate {
    pub page: Page,
    pub title: String,
    pub quantity: u32,
    pub pools: Vec<Pool>,
    pub selected: Option<PoolId>,
    pub error: Option<String>,
}

impl PoolTemplate {
    #[must_use]
    pub fn is_selected(&self, pool: &Pool) -> bool {
        self.selected.as_ref() == Some(&pool.id)
    }
}

/// Address step template.
#[derive(Template, WebTemplate)]
#[template(path = "checkout/address.html")]
pub struct AddressTemplate {
    pub page: Page,
    pub selection: Selection,
    pub form: ShippingForm,
    pub errors: FieldErrors,
}

impl AddressTemplate {
    /// Inline error for a form field.
    #[must_use]
    pub fn error(&self, field: &str) -> Option<&str> {
        self.errors.by_name(field)
    }
}

/// Payment step template.
#[derive(Template, WebTemplate)]
#[template(path = "checkout/payment.html")]
pub struct PaymentTemplate {
    pub page: Page,
    /// `None` when paying an existing order; hides the step indicator.
    pub selection: Option<Selection>,
    pub target: PaymentTarget,
    pub qr_svg: String,
    pub countdown: Countdown,
    pub token_contract: String,
    pub chain_id: String,
}

/// Confirmation template.
#[derive(Template, WebTemplate)]
#[template(path = "checkout/complete.html")]
pub struct CompleteTemplate {
    pub page: Page,
    pub target: PaymentTarget,
    pub explorer_url: Option<String>,
}

// =============================================================================
// Step 1: product
// =============================================================================

/// Start a checkout for a miner.
#[instrument(skip(state, session, auth, form), fields(user_id = %auth.user.id))]
pub async fn start(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
    Form(form): Form<StartForm>,
) -> Response {
    let miner_id = MinerId::new(form.miner_id.trim());
    let miner = match state.api().find_miner(auth.caller(), &miner_id).await {
        Ok(miner) => miner,
        Err(e) => {
            warn!(miner_id = %miner_id, error = %e, "Failed to load miner for checkout");
            return Notice::CatalogUnavailable.redirect("/").into_response();
        }
    };

    let quantity = form.quantity.unwrap_or(miner.min_quantity);
    let checkout = match CheckoutState::start(miner.choice(), quantity) {
        Ok(checkout) => checkout,
        Err(e) => {
            info!(quantity, error = %e, "Checkout quantity rejected");
            return Notice::QuantityTooLow.redirect("/").into_response();
        }
    };

    if let Err(e) = save_checkout(&session, &checkout).await {
        error!(error = %e, "Failed to store checkout");
        return Notice::OrderFailed.redirect("/").into_response();
    }
    add_breadcrumb("checkout", "Checkout started", Some(&[("miner_id", miner_id.as_str())]));

    Redirect::to("/checkout/pool").into_response()
}

// =============================================================================
// Step 2: pool
// =============================================================================

async fn render_pool_step(
    state: &AppState,
    auth: &AuthContext,
    checkout: &CheckoutState,
    notice: Option<Notice>,
    error: Option<String>,
) -> Response {
    let Some(product) = checkout.product() else {
        return back_to_step(Some(checkout));
    };
    let (quantity, selected) = match checkout {
        CheckoutState::ProductSelected { quantity, .. } => (*quantity, None),
        CheckoutState::PoolSelected(sel) => (sel.quantity, Some(sel.pool.id.clone())),
        _ => return back_to_step(Some(checkout)),
    };

    let mut notice = notice;
    let pools = match state.api().list_pools(auth.caller()).await {
        Ok(list) => list.records,
        Err(e) => {
            warn!(error = %e, "Failed to load pools");
            notice = notice.or(Some(Notice::LoadFailed));
            Vec::new()
        }
    };

    PoolTemplate {
        page: Page::signed_in(&auth.user, notice, "shop"),
        title: product.title.clone(),
        quantity,
        pools,
        selected,
        error,
    }
    .into_response()
}

/// Display the pool step.
#[instrument(skip(state, session, auth, query), fields(user_id = %auth.user.id))]
pub async fn pool_page(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<NoticeQuery>,
) -> Response {
    let Some(checkout) = load_checkout(&session).await else {
        return back_to_step(None);
    };
    render_pool_step(&state, &auth, &checkout, query.notice(), None).await
}

/// Choose a pool.
#[instrument(skip(state, session, auth, form), fields(user_id = %auth.user.id))]
pub async fn select_pool(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
    Form(form): Form<PoolForm>,
) -> Response {
    let Some(mut checkout) = load_checkout(&session).await else {
        return back_to_step(None);
    };

    let Some(pool_id) = non_empty(form.pool_id).map(PoolId::new) else {
        let message = "Select a mining pool".to_string();
        return render_pool_step(&state, &auth, &checkout, None, Some(message)).await;
    };

    let pool = match state.api().find_pool(auth.caller(), &pool_id).await {
        Ok(pool) => pool,
        Err(e) => {
            warn!(pool_id = %pool_id, error = %e, "Failed to load selected pool");
            return Notice::LoadFailed.redirect("/checkout/pool").into_response();
        }
    };

    if let Err(e) = checkout.select_pool(pool.choice()) {
        info!(error = %e, "Pool selection rejected");
        return back_to_step(Some(&checkout));
    }
    if let Err(e) = save_checkout(&session, &checkout).await {
        error!(error = %e, "Failed to store checkout");
        return Notice::LoadFailed.redirect("/checkout/pool").into_response();
    }

    Redirect::to("/checkout/address").into_response()
}

// =============================================================================
// Step 3: address and order creation
// =============================================================================

/// Display the address step.
#[instrument(skip(session, auth, query), fields(user_id = %auth.user.id))]
pub async fn address_page(
    session: Session,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<NoticeQuery>,
) -> Response {
    let checkout = load_checkout(&session).await;
    let Some(CheckoutState::PoolSelected(selection)) = checkout else {
        return back_to_step(checkout.as_ref());
    };

    AddressTemplate {
        page: Page::signed_in(&auth.user, query.notice(), "shop"),
        selection,
        form: ShippingForm::blank(),
        errors: FieldErrors::new(),
    }
    .into_response()
}

/// Validate the address and create the order.
#[instrument(skip(state, session, auth, form), fields(user_id = %auth.user.id))]
pub async fn submit_address(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
    Form(form): Form<ShippingForm>,
) -> Response {
    let Some(mut checkout) = load_checkout(&session).await else {
        return back_to_step(None);
    };
    let CheckoutState::PoolSelected(selection) = &checkout else {
        return back_to_step(Some(&checkout));
    };
    let selection = selection.clone();

    let rerender = |form: ShippingForm, errors: FieldErrors, notice: Option<Notice>| {
        AddressTemplate {
            page: Page::signed_in(&auth.user, notice, "shop"),
            selection: selection.clone(),
            form,
            errors,
        }
        .into_response()
    };

    let shipping_info = match form.validate() {
        Ok(address) => address,
        Err(errors) => return rerender(form, errors, None),
    };

    let Some(_guard) = state
        .inflight()
        .try_begin(format!("create:{}", auth.user.id))
    else {
        return rerender(form, FieldErrors::new(), Some(Notice::InProgress));
    };

    let request = CreateOrderRequest {
        machine_id: selection.product.id.clone(),
        pool_id: selection.pool.id.clone(),
        quantity: selection.quantity,
        shipping_info,
    };
    let created = match state.api().create_order(auth.caller(), &request).await {
        Ok(created) => created,
        Err(e) => {
            warn!(error = %e, "Order creation failed");
            return rerender(form, FieldErrors::new(), Some(Notice::OrderFailed));
        }
    };

    let target = PaymentTarget::from(created);
    info!(order_id = %target.order_id, order_code = %target.order_code, "Order created");
    add_breadcrumb(
        "checkout",
        "Order created",
        Some(&[("order_id", target.order_id.as_str())]),
    );

    if let Err(e) = checkout
        .order_created(target)
        .and_then(|()| checkout.open_payment())
    {
        error!(error = %e, "Checkout rejected a created order");
        return back_to_step(Some(&checkout));
    }
    if let Err(e) = save_checkout(&session, &checkout).await {
        error!(error = %e, "Failed to store checkout");
        return Notice::LoadFailed.redirect("/orders").into_response();
    }

    Redirect::to("/checkout/payment").into_response()
}

// =============================================================================
// Step 4: payment
// =============================================================================

/// Display the payment step.
#[instrument(skip(state, session, auth, query), fields(user_id = %auth.user.id))]
pub async fn payment_page(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<NoticeQuery>,
) -> Response {
    let Some(mut checkout) = load_checkout(&session).await else {
        return back_to_step(None);
    };

    // A created order that was never displayed opens its payment step now
    if matches!(checkout, CheckoutState::OrderCreated { .. }) {
        if let Err(e) = checkout.open_payment() {
            error!(error = %e, "Failed to open payment");
        } else if let Err(e) = save_checkout(&session, &checkout).await {
            error!(error = %e, "Failed to store checkout");
        }
    }

    let CheckoutState::PaymentPending {
        selection, target, ..
    } = checkout
    else {
        return back_to_step(Some(&checkout));
    };

    let chain = &state.config().chain;
    PaymentTemplate {
        page: Page::signed_in(&auth.user, query.notice(), "shop"),
        qr_svg: payment_qr_svg(&target.payment_address).unwrap_or_default(),
        countdown: Countdown::until(target.expires_at, Utc::now()),
        token_contract: chain.token.contract.to_string(),
        chain_id: chain.chain_id_hex(),
        selection,
        target,
    }
    .into_response()
}

/// Wallet branch: prepare the transfer, or ask the script to connect first.
#[instrument(skip(state, session, auth, body), fields(user_id = %auth.user.id))]
pub async fn request_transfer(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
    Json(body): Json<TransferRequest>,
) -> Result<Json<TransferStep>> {
    let account = match non_empty(body.account) {
        Some(raw) => Some(WalletAddress::parse(&raw).map_err(|e| {
            let mut errors = FieldErrors::new();
            errors.add(Field::WalletAddress, e.to_string());
            AppError::from(errors)
        })?),
        None => None,
    };

    let mut checkout = load_checkout(&session)
        .await
        .ok_or_else(|| AppError::Conflict("No checkout in progress".to_string()))?;
    let step = checkout.request_transfer(account, state.chain().token())?;
    save_checkout(&session, &checkout).await?;

    Ok(Json(step))
}

/// Wallet branch: verify the mined transaction, then confirm payment.
///
/// The receipt must carry a token transfer from the wallet the transfer was
/// prepared for, to the order's payment address, for at least the order
/// amount. Verification failures leave the order pending so the visitor can
/// retry.
#[instrument(skip(state, session, auth, body), fields(user_id = %auth.user.id))]
pub async fn submit_transaction(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
    Json(body): Json<TransactionRequest>,
) -> Result<Json<serde_json::Value>> {
    let tx_hash = TxHash::parse(&body.tx_hash).map_err(|e| {
        let mut errors = FieldErrors::new();
        errors.add(Field::TxHash, e.to_string());
        AppError::from(errors)
    })?;

    let mut checkout = load_checkout(&session)
        .await
        .ok_or_else(|| AppError::Conflict("No checkout in progress".to_string()))?;
    let confirmation = checkout.confirmation(PaymentBranch::Wallet, Some(tx_hash))?;
    let expected = checkout.expected_payment(state.chain().token())?;
    let target = checkout
        .target()
        .cloned()
        .ok_or_else(|| AppError::Conflict("No order to pay".to_string()))?;

    let Some(_guard) = state.inflight().try_begin(order_key(&target)) else {
        return Err(AppError::Conflict(Notice::InProgress.message().to_string()));
    };

    let transfer = state
        .chain()
        .verify_payment(&tx_hash, &expected, &target.order_id)
        .await?;
    info!(
        order_id = %target.order_id,
        tx_hash = %tx_hash,
        payer = %WalletAddress::from(transfer.from),
        value = %transfer.value,
        "Payment transaction verified"
    );

    state
        .api()
        .confirm_payment(auth.caller(), &confirmation)
        .await?;

    checkout.payment_confirmed(Some(tx_hash))?;
    save_checkout(&session, &checkout).await?;
    add_breadcrumb(
        "checkout",
        "Payment confirmed",
        Some(&[("order_id", target.order_id.as_str())]),
    );

    Ok(Json(json!({
        "status": "confirmed",
        "redirect": "/checkout/complete",
    })))
}

/// Manual branch: the visitor reports that they paid.
#[instrument(skip(state, session, auth), fields(user_id = %auth.user.id))]
pub async fn confirm_manual(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
) -> Response {
    let Some(mut checkout) = load_checkout(&session).await else {
        return back_to_step(None);
    };
    let confirmation = match checkout.confirmation(PaymentBranch::Manual, None) {
        Ok(confirmation) => confirmation,
        Err(e) => {
            info!(error = %e, "Manual confirmation rejected");
            return back_to_step(Some(&checkout));
        }
    };
    let Some(target) = checkout.target().cloned() else {
        return back_to_step(Some(&checkout));
    };

    let Some(_guard) = state.inflight().try_begin(order_key(&target)) else {
        return Notice::InProgress
            .redirect("/checkout/payment")
            .into_response();
    };

    if let Err(e) = state
        .api()
        .confirm_payment(auth.caller(), &confirmation)
        .await
    {
        warn!(order_id = %target.order_id, error = %e, "Payment confirmation failed");
        return Notice::ConfirmFailed
            .redirect("/checkout/payment")
            .into_response();
    }
    info!(order_id = %target.order_id, "Manual payment confirmed");

    if let Err(e) = checkout.payment_confirmed(None) {
        error!(error = %e, "Checkout rejected payment confirmation");
        return back_to_step(Some(&checkout));
    }
    if let Err(e) = save_checkout(&session, &checkout).await {
        error!(error = %e, "Failed to store checkout");
        return Notice::PaymentConfirmed.redirect("/orders").into_response();
    }

    Redirect::to("/checkout/complete").into_response()
}

// =============================================================================
// Completion and cancel
// =============================================================================

/// Display the confirmation page.
#[instrument(skip(state, session, auth), fields(user_id = %auth.user.id))]
pub async fn complete_page(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
) -> Response {
    let checkout = load_checkout(&session).await;
    let Some(CheckoutState::PaymentConfirmed { target, tx_hash }) = checkout else {
        return back_to_step(checkout.as_ref());
    };

    CompleteTemplate {
        page: Page::signed_in(&auth.user, Some(Notice::PaymentConfirmed), "orders"),
        explorer_url: tx_hash.map(|hash| state.config().chain.explorer_link(&hash)),
        target,
    }
    .into_response()
}

/// Discard the wizard.
pub async fn cancel(session: Session, RequireAuth(_auth): RequireAuth) -> Redirect {
    clear_checkout(&session).await;
    Redirect::to("/")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use epochmine_core::OrderId;
    use epochmine_core::checkout::ProductChoice;
    use rust_decimal::Decimal;

    use super::*;

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

    #[test]
    fn test_step_path() {
        let product = ProductChoice {
            id: MinerId::new("m1"),
            title: "EM-1".into(),
            unit_price: Decimal::from(1200),
            min_quantity: 1,
        };
        let started = CheckoutState::start(product, 1).unwrap();
        assert_eq!(step_path(None), "/");
        assert_eq!(step_path(Some(&started)), "/checkout/pool");
        assert_eq!(
            step_path(Some(&CheckoutState::resume(target()))),
            "/checkout/payment"
        );
    }

    #[test]
    fn test_back_to_step_without_checkout() {
        let response = back_to_step(None);
        assert_eq!(
            response.headers().get("location").unwrap(),
            "/?notice=checkout_expired"
        );
    }

    #[test]
    fn test_payment_qr_svg() {
        let svg = payment_qr_svg(&target().payment_address).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn test_order_key() {
        assert_eq!(order_key(&target()), "order:41");
    }
}
