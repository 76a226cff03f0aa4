//! Authentication route handlers.
//!
//! Sign-in goes through the identity provider, either with an emailed
//! one-time code or an OAuth redirect (PKCE). Once signed in, accounts the
//! backend has not activated yet land on the activation page.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Extension, Form,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::Utc;
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use epochmine_core::{AccountStatus, ActivationStatus, Email};

use crate::error::{clear_sentry_user, set_sentry_user};
use crate::filters;
use crate::identity::{AuthSession, IdentityError, Pkce, random_state};
use crate::middleware::{OptionalAuth, RequestId, RequireAuth, set_current_user};
use crate::models::{CurrentUser, Notice, session_keys};
use crate::routes::{Page, non_empty};
use crate::state::AppState;

/// Where the activation flow sends users to follow the official account.
const FOLLOW_INTENT_URL: &str = "https://x.com/intent/follow";

// =============================================================================
// Form and Query Types
// =============================================================================

/// Query parameters accepted by the login and OAuth entry points.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    pub notice: Option<String>,
    /// Base64-encoded referral id from an invite link.
    pub referral_id: Option<String>,
}

/// Email form for requesting a one-time code.
#[derive(Debug, Deserialize)]
pub struct EmailForm {
    pub email: String,
}

/// One-time code form.
#[derive(Debug, Deserialize)]
pub struct CodeForm {
    pub code: String,
}

/// OAuth callback parameters.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

// =============================================================================
// Templates
// =============================================================================

/// Login page template.
#[derive(Template, WebTemplate)]
#[template(path = "auth/login.html")]
pub struct LoginTemplate {
    pub page: Page,
    pub provider: String,
    pub email: String,
    pub error: Option<String>,
}

/// One-time code entry template.
#[derive(Template, WebTemplate)]
#[template(path = "auth/verify.html")]
pub struct VerifyTemplate {
    pub page: Page,
    pub email: String,
    pub error: Option<String>,
}

/// Activation status template.
#[derive(Template, WebTemplate)]
#[template(path = "auth/activate.html")]
pub struct ActivateTemplate {
    pub page: Page,
    /// Progress of the last activation request, if there was one.
    pub activation: Option<ActivationStatus>,
}

impl ActivateTemplate {
    /// Whether a request is still being verified and the button is disabled.
    #[must_use]
    pub fn verifying(&self) -> bool {
        self.activation == Some(ActivationStatus::Verifying)
    }

    #[must_use]
    pub fn button_label(&self) -> &'static str {
        match self.activation {
            Some(ActivationStatus::Verifying) => "Verifying…",
            Some(ActivationStatus::Failed) => "Retry Activation",
            _ => "Follow Official Account",
        }
    }

    /// Browsing stays possible while a request is pending or after it failed.
    #[must_use]
    pub fn can_skip(&self) -> bool {
        matches!(
            self.activation,
            Some(ActivationStatus::Verifying | ActivationStatus::Failed)
        )
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Decode a base64 referral id. Both padded and URL-safe encodings are accepted.
fn decode_referral(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let bytes = STANDARD
        .decode(raw)
        .or_else(|_| URL_SAFE_NO_PAD.decode(raw.trim_end_matches('=')))
        .ok()?;
    String::from_utf8(bytes)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

async fn remember_referral(session: &Session, raw: Option<&str>) {
    let Some(raw) = raw else { return };
    match decode_referral(raw) {
        Some(referral_id) => {
            if let Err(e) = session.insert(session_keys::REFERRAL_ID, &referral_id).await {
                warn!(error = %e, "Failed to store referral id");
            }
        }
        None => debug!("Ignoring malformed referral id"),
    }
}

/// Follow-intent URL for the screen name returned by activation.
fn follow_url(screen_name: &str) -> Option<String> {
    let mut url = Url::parse(FOLLOW_INTENT_URL).ok()?;
    url.query_pairs_mut().append_pair("screen_name", screen_name);
    Some(url.into())
}

/// Store the signed-in user and pick the landing page.
async fn complete_sign_in(
    state: &AppState,
    session: &Session,
    auth: AuthSession,
    request_id: Option<&str>,
) -> Response {
    // New identity, new session id
    if let Err(e) = session.cycle_id().await {
        error!(error = %e, "Failed to cycle session id");
        return Notice::LoginFailed.redirect("/auth/login").into_response();
    }

    let user = CurrentUser::from_auth(auth, Utc::now());
    if let Err(e) = set_current_user(session, &user).await {
        error!(error = %e, "Failed to store user in session");
        return Notice::LoginFailed.redirect("/auth/login").into_response();
    }
    set_sentry_user(&user.id, user.email.as_deref());
    info!(user_id = %user.id, "User signed in");

    match state.api().user_info(user.caller(request_id), &user.id).await {
        Ok(info) if info.user.status == AccountStatus::NotActivated => {
            Redirect::to("/auth/activate").into_response()
        }
        Ok(_) => Redirect::to("/").into_response(),
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "Failed to load user info after sign-in");
            Redirect::to("/").into_response()
        }
    }
}

fn request_id(ext: Option<&Extension<RequestId>>) -> Option<&str> {
    ext.map(|Extension(id)| id.as_str())
}

// =============================================================================
// Login
// =============================================================================

/// Display the login page.
#[instrument(skip(state, session, user))]
pub async fn login_page(
    State(state): State<AppState>,
    session: Session,
    OptionalAuth(user): OptionalAuth,
    Query(query): Query<LoginQuery>,
) -> Response {
    remember_referral(&session, query.referral_id.as_deref()).await;

    if user.is_some() {
        return Redirect::to("/").into_response();
    }

    let email = session
        .get::<String>(session_keys::OTP_EMAIL)
        .await
        .ok()
        .flatten()
        .unwrap_or_default();

    LoginTemplate {
        page: Page::anonymous(Notice::from_query(query.notice.as_deref())),
        provider: state.identity().provider().to_string(),
        email,
        error: None,
    }
    .into_response()
}

/// Email a one-time code.
#[instrument(skip(state, session, form))]
pub async fn send_code(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<EmailForm>,
) -> Response {
    let email = match Email::parse(&form.email) {
        Ok(email) => email,
        Err(e) => {
            return LoginTemplate {
                page: Page::anonymous(None),
                provider: state.identity().provider().to_string(),
                email: form.email,
                error: Some(e.to_string()),
            }
            .into_response();
        }
    };

    if let Err(e) = state.identity().send_otp(&email).await {
        warn!(domain = %email.domain(), error = %e, "Failed to send sign-in code");
        return Notice::CodeFailed.redirect("/auth/login").into_response();
    }

    if let Err(e) = session.insert(session_keys::OTP_EMAIL, email.as_str()).await {
        error!(error = %e, "Failed to store sign-in email");
        return Notice::CodeFailed.redirect("/auth/login").into_response();
    }

    Notice::CodeSent.redirect("/auth/verify").into_response()
}

/// Display the code entry page.
pub async fn verify_page(session: Session, Query(query): Query<LoginQuery>) -> Response {
    let Some(email) = session
        .get::<String>(session_keys::OTP_EMAIL)
        .await
        .ok()
        .flatten()
    else {
        return Redirect::to("/auth/login").into_response();
    };

    VerifyTemplate {
        page: Page::anonymous(Notice::from_query(query.notice.as_deref())),
        email,
        error: None,
    }
    .into_response()
}

/// Verify a one-time code and sign in.
#[instrument(skip_all)]
pub async fn verify_code(
    State(state): State<AppState>,
    session: Session,
    request_id_ext: Option<Extension<RequestId>>,
    Form(form): Form<CodeForm>,
) -> Response {
    let Some(email) = session
        .get::<String>(session_keys::OTP_EMAIL)
        .await
        .ok()
        .flatten()
        .and_then(|e| Email::parse(&e).ok())
    else {
        return Redirect::to("/auth/login").into_response();
    };

    let code = form.code.trim();
    if code.is_empty() {
        return VerifyTemplate {
            page: Page::anonymous(None),
            email: email.as_str().to_string(),
            error: Some("Enter the code from your email".to_string()),
        }
        .into_response();
    }

    match state.identity().verify_otp(&email, code).await {
        Ok(auth) => {
            if let Err(e) = session.remove::<String>(session_keys::OTP_EMAIL).await {
                warn!(error = %e, "Failed to clear sign-in email");
            }
            complete_sign_in(&state, &session, auth, request_id(request_id_ext.as_ref())).await
        }
        Err(IdentityError::InvalidCredentials(message)) => {
            debug!(%message, "Sign-in code rejected");
            Notice::InvalidCode.redirect("/auth/verify").into_response()
        }
        Err(e) => {
            warn!(error = %e, "Sign-in code verification failed");
            Notice::LoginFailed.redirect("/auth/verify").into_response()
        }
    }
}

// =============================================================================
// OAuth
// =============================================================================

/// Start the OAuth flow.
#[instrument(skip(state, session, query))]
pub async fn oauth_start(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<LoginQuery>,
) -> Response {
    remember_referral(&session, query.referral_id.as_deref()).await;

    let pkce = Pkce::generate();
    let csrf_state = random_state(32);

    if let Err(e) = session.insert(session_keys::OAUTH_STATE, &csrf_state).await {
        error!(error = %e, "Failed to store OAuth state");
        return Notice::LoginFailed.redirect("/auth/login").into_response();
    }
    if let Err(e) = session.insert(session_keys::OAUTH_VERIFIER, &pkce.verifier).await {
        error!(error = %e, "Failed to store PKCE verifier");
        return Notice::LoginFailed.redirect("/auth/login").into_response();
    }

    let redirect_to = format!(
        "{}/auth/callback?state={csrf_state}",
        state.config().base_url
    );
    match state.identity().authorize_url(&redirect_to, &pkce) {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to build authorize URL");
            Notice::LoginFailed.redirect("/auth/login").into_response()
        }
    }
}

/// Handle the OAuth callback.
#[instrument(skip_all)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    session: Session,
    request_id_ext: Option<Extension<RequestId>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(err) = query.error {
        warn!(
            error = %err,
            description = ?query.error_description,
            "OAuth provider returned an error"
        );
        return Notice::LoginFailed.redirect("/auth/login").into_response();
    }

    let expected: Option<String> = session
        .remove(session_keys::OAUTH_STATE)
        .await
        .ok()
        .flatten();
    let verifier: Option<String> = session
        .remove(session_keys::OAUTH_VERIFIER)
        .await
        .ok()
        .flatten();

    let (Some(code), Some(verifier)) = (non_empty(query.code), verifier) else {
        warn!("OAuth callback without code or verifier");
        return Notice::LoginFailed.redirect("/auth/login").into_response();
    };
    if expected.is_none() || expected != query.state {
        warn!("OAuth state mismatch");
        return Notice::LoginFailed.redirect("/auth/login").into_response();
    }

    match state.identity().exchange_code(&code, &verifier).await {
        Ok(auth) => {
            complete_sign_in(&state, &session, auth, request_id(request_id_ext.as_ref())).await
        }
        Err(e) => {
            warn!(error = %e, "OAuth code exchange failed");
            Notice::LoginFailed.redirect("/auth/login").into_response()
        }
    }
}

// =============================================================================
// Activation
// =============================================================================

/// Display activation status.
#[instrument(skip(state, auth, query), fields(user_id = %auth.user.id))]
pub async fn activate_page(
    State(state): State<AppState>,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<LoginQuery>,
) -> Response {
    let notice = Notice::from_query(query.notice.as_deref());
    let activation = match state.api().user_info(auth.caller(), &auth.user.id).await {
        Ok(info) if info.user.status == AccountStatus::Active => {
            return Redirect::to("/").into_response();
        }
        Ok(info) => info.active_record.map(|r| r.status),
        Err(e) => {
            warn!(error = %e, "Failed to load activation status");
            None
        }
    };

    ActivateTemplate {
        page: Page::signed_in(&auth.user, notice, ""),
        activation,
    }
    .into_response()
}

/// Request activation and send the user to the follow intent.
#[instrument(skip(state, session, auth), fields(user_id = %auth.user.id))]
pub async fn activate(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(auth): RequireAuth,
) -> Response {
    let referral_id: Option<String> = session
        .get(session_keys::REFERRAL_ID)
        .await
        .ok()
        .flatten();

    match state.api().activate(auth.caller(), referral_id).await {
        Ok(screen_name) => {
            if let Err(e) = session.remove::<String>(session_keys::REFERRAL_ID).await {
                warn!(error = %e, "Failed to clear referral id");
            }
            match follow_url(&screen_name) {
                Some(url) => Redirect::to(&url).into_response(),
                None => Redirect::to("/auth/activate").into_response(),
            }
        }
        Err(e) => {
            warn!(error = %e, "Activation request failed");
            Notice::ActivationFailed
                .redirect("/auth/activate")
                .into_response()
        }
    }
}

// =============================================================================
// Logout
// =============================================================================

/// Sign out.
#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    session: Session,
    OptionalAuth(user): OptionalAuth,
) -> impl IntoResponse {
    if let Some(user) = user {
        if let Err(e) = state.identity().logout(&user.access_token).await {
            debug!(error = %e, "Provider logout failed");
        }
        info!(user_id = %user.id, "User signed out");
    }

    if let Err(e) = session.flush().await {
        error!(error = %e, "Failed to flush session");
    }
    clear_sentry_user();

    Notice::SignedOut.redirect("/auth/login")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_referral() {
        assert_eq!(decode_referral("dXNlci00Mg=="), Some("user-42".into()));
        assert_eq!(decode_referral("dXNlci00Mg"), Some("user-42".into()));
        assert_eq!(decode_referral("not base64!"), None);
        assert_eq!(decode_referral("ICA="), None);
    }

    #[test]
    fn test_follow_url() {
        assert_eq!(
            follow_url("epoch_mine").as_deref(),
            Some("https://x.com/intent/follow?screen_name=epoch_mine")
        );
    }

    #[test]
    fn test_activate_labels() {
        let page = |activation| ActivateTemplate {
            page: Page::default(),
            activation,
        };
        assert_eq!(page(None).button_label(), "Follow Official Account");
        assert!(!page(None).can_skip());

        let verifying = page(Some(ActivationStatus::Verifying));
        assert!(verifying.verifying());
        assert!(verifying.can_skip());

        let failed = page(Some(ActivationStatus::Failed));
        assert_eq!(failed.button_label(), "Retry Activation");
        assert!(!failed.verifying());
    }
}
