//! Authentication extractors.
//!
//! Every page except sign-in needs a user. `RequireAuth` reads the
//! session-cached profile and, when the access token has expired, refreshes
//! it once at the identity provider before giving up.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use tower_sessions::Session;
use tracing::{info, warn};

use crate::api::Caller;
use crate::middleware::request_id::RequestId;
use crate::models::{CurrentUser, Notice, session_keys};
use crate::state::AppState;

/// The signed-in user plus the request id to forward upstream.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: CurrentUser,
    pub request_id: Option<String>,
}

impl AuthContext {
    /// Credentials for a backend call.
    #[must_use]
    pub fn caller(&self) -> Caller<'_> {
        self.user.caller(self.request_id.as_deref())
    }
}

/// Extractor that requires a signed-in user.
///
/// # Example
///
/// ```rust,ignore
/// async fn orders(RequireAuth(auth): RequireAuth, State(state): State<AppState>) -> Response {
///     let page = state.api().list_orders(auth.caller(), 1, 20, None).await;
///     // ...
/// }
/// ```
pub struct RequireAuth(pub AuthContext);

/// Error returned when authentication is required but the user is not signed in.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthRejection {
    /// Redirect to login page (for HTML requests).
    RedirectToLogin { expired: bool },
    /// Unauthorized response (for JSON requests).
    Unauthorized,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::RedirectToLogin { expired: false } => Redirect::to("/auth/login").into_response(),
            Self::RedirectToLogin { expired: true } => Notice::SessionExpired
                .redirect("/auth/login")
                .into_response(),
            Self::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
        }
    }
}

/// Whether the client expects JSON rather than a page.
fn wants_json(parts: &Parts) -> bool {
    let header_has_json = |name: header::HeaderName| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"))
    };
    parts.uri.path().starts_with("/api/")
        || header_has_json(header::ACCEPT)
        || header_has_json(header::CONTENT_TYPE)
}

fn request_id(parts: &Parts) -> Option<String> {
    parts
        .extensions
        .get::<RequestId>()
        .map(|id| id.as_str().to_owned())
}

impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let json = wants_json(parts);
        let reject = |expired| {
            if json {
                AuthRejection::Unauthorized
            } else {
                AuthRejection::RedirectToLogin { expired }
            }
        };

        // Get the session from extensions (set by SessionManagerLayer)
        let session = parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or(AuthRejection::Unauthorized)?;

        let user: CurrentUser = session
            .get(session_keys::CURRENT_USER)
            .await
            .ok()
            .flatten()
            .ok_or_else(|| reject(false))?;

        let user = if user.is_expired(Utc::now()) {
            refresh(&session, state, user).await.ok_or_else(|| reject(true))?
        } else {
            user
        };

        Ok(Self(AuthContext {
            user,
            request_id: request_id(parts),
        }))
    }
}

/// Trade the refresh token for new tokens, or sign the user out.
async fn refresh(session: &Session, state: &AppState, user: CurrentUser) -> Option<CurrentUser> {
    match state.identity().refresh(&user.refresh_token).await {
        Ok(auth) => {
            let refreshed = CurrentUser::from_auth(auth, Utc::now());
            if let Err(e) = set_current_user(session, &refreshed).await {
                warn!(error = %e, "Failed to store refreshed tokens");
            }
            info!(user_id = %refreshed.id, "Access token refreshed");
            Some(refreshed)
        }
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "Token refresh failed, signing out");
            if let Err(e) = clear_current_user(session).await {
                warn!(error = %e, "Failed to clear expired user");
            }
            None
        }
    }
}

/// Extractor that optionally gets the current user.
///
/// Unlike `RequireAuth`, this never rejects and never refreshes.
pub struct OptionalAuth(pub Option<CurrentUser>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = match parts.extensions.get::<Session>() {
            Some(session) => session
                .get::<CurrentUser>(session_keys::CURRENT_USER)
                .await
                .ok()
                .flatten(),
            None => None,
        };

        Ok(Self(user))
    }
}

/// Helper to set the current user in the session.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_current_user(
    session: &Session,
    user: &CurrentUser,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(session_keys::CURRENT_USER, user).await
}

/// Helper to clear the current user from the session (logout).
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn clear_current_user(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session
        .remove::<CurrentUser>(session_keys::CURRENT_USER)
        .await?;
    Ok(())
}
