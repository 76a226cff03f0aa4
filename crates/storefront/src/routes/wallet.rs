//! Wallet binding and settings handlers.
//!
//! A user binds one wallet address to their account, either from the
//! connected browser wallet (JSON) or by typing it on the settings page.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form, Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;
use tower_sessions::Session;
use tracing::{info, instrument, warn};

use epochmine_core::{CheckoutState, Field, FieldErrors, WalletAddress};

use crate::error::{AppError, Result};
use crate::filters;
use crate::middleware::{AuthContext, RequireAuth};
use crate::models::{Notice, session_keys};
use crate::routes::checkout::{load_checkout, save_checkout};
use crate::routes::{NoticeQuery, Page};
use crate::state::AppState;

/// Wallet address sent by the page script.
#[derive(Debug, Deserialize)]
pub struct AddressBody {
    pub address: String,
}

/// Settings page wallet form.
#[derive(Debug, Deserialize)]
pub struct WalletForm {
    pub wallet_address: String,
}

/// Settings page template.
#[derive(Template, WebTemplate)]
#[template(path = "settings.html")]
pub struct SettingsTemplate {
    pub page: Page,
    pub email: String,
    pub wallet_address: Option<WalletAddress>,
    pub input: String,
    pub error: Option<String>,
}

fn parse_address(raw: &str) -> Result<WalletAddress> {
    WalletAddress::parse(raw).map_err(|e| {
        let mut errors = FieldErrors::new();
        errors.add(Field::WalletAddress, e.to_string());
        AppError::from(errors)
    })
}

/// Bind `raw` to the account unless an address is already bound.
async fn bind(state: &AppState, auth: &AuthContext, raw: &str) -> Result<WalletAddress> {
    let address = parse_address(raw)?;

    let info = state.api().user_info(auth.caller(), &auth.user.id).await?;
    if info.user.wallet_address.is_some() {
        return Err(AppError::Conflict(
            "A wallet address is already bound to this account".to_string(),
        ));
    }

    state.api().bind_wallet(auth.caller(), &address).await?;
    info!(wallet = %address.short(), "Wallet address bound");
    Ok(address)
}

/// The page script connected a wallet. Releases a deferred transfer, if any.
#[instrument(skip(state, session, auth, body), fields(user_id = %auth.user.id))]
pub async fn connected(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
    Json(body): Json<AddressBody>,
) -> Result<Json<serde_json::Value>> {
    let account = parse_address(&body.address)?;

    let Some(mut checkout) = load_checkout(&session).await else {
        return Ok(Json(json!({ "action": "none" })));
    };
    if !matches!(checkout, CheckoutState::PaymentPending { .. }) {
        return Ok(Json(json!({ "action": "none" })));
    }

    let released = checkout.wallet_connected(account, state.chain().token())?;
    save_checkout(&session, &checkout).await?;

    Ok(Json(match released {
        Some(tx) => json!({ "action": "transfer", "tx": tx }),
        None => json!({ "action": "none" }),
    }))
}

/// Bind the connected wallet (JSON).
#[instrument(skip(state, auth, body), fields(user_id = %auth.user.id))]
pub async fn bind_json(
    State(state): State<AppState>,
    RequireAuth(auth): RequireAuth,
    Json(body): Json<AddressBody>,
) -> Result<Json<serde_json::Value>> {
    let address = bind(&state, &auth, &body.address).await?;
    Ok(Json(json!({ "wallet_address": address })))
}

/// Bind a typed-in address from the settings page.
#[instrument(skip(state, auth, form), fields(user_id = %auth.user.id))]
pub async fn bind_form(
    State(state): State<AppState>,
    RequireAuth(auth): RequireAuth,
    Form(form): Form<WalletForm>,
) -> Response {
    match bind(&state, &auth, &form.wallet_address).await {
        Ok(_) => Notice::WalletBound.redirect("/settings").into_response(),
        Err(AppError::Validation(errors)) => SettingsTemplate {
            page: Page::signed_in(&auth.user, None, "settings"),
            email: auth.user.email.clone().unwrap_or_default(),
            wallet_address: None,
            input: form.wallet_address,
            error: errors.get(Field::WalletAddress).map(str::to_string),
        }
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Wallet binding failed");
            Notice::WalletBindFailed
                .redirect("/settings")
                .into_response()
        }
    }
}

/// Hide the binding prompt for the rest of the session.
pub async fn dismiss(session: Session, RequireAuth(_auth): RequireAuth) -> Redirect {
    if let Err(e) = session
        .insert(session_keys::WALLET_PROMPT_DISMISSED, true)
        .await
    {
        warn!(error = %e, "Failed to store wallet prompt dismissal");
    }
    Redirect::to("/")
}

/// Display account settings.
#[instrument(skip(state, auth, query), fields(user_id = %auth.user.id))]
pub async fn settings(
    State(state): State<AppState>,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<NoticeQuery>,
) -> Response {
    let mut notice = query.notice();
    let (email, wallet_address) = match state.api().user_info(auth.caller(), &auth.user.id).await {
        Ok(info) => (
            info.user.email.or_else(|| auth.user.email.clone()),
            info.user.wallet_address,
        ),
        Err(e) => {
            warn!(error = %e, "Failed to load user info");
            notice = notice.or(Some(Notice::LoadFailed));
            (auth.user.email.clone(), None)
        }
    };

    SettingsTemplate {
        page: Page::signed_in(&auth.user, notice, "settings"),
        email: email.unwrap_or_default(),
        wallet_address,
        input: String::new(),
        error: None,
    }
    .into_response()
}
