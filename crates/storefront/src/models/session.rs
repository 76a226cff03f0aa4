//! Session-related types.
//!
//! Types stored in the session for authentication state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use epochmine_core::UserId;

use crate::api::Caller;
use crate::identity::AuthSession;

/// Refresh this long before the provider's expiry.
const EXPIRY_LEEWAY_SECS: i64 = 30;

/// Session-stored user identity and tokens.
///
/// A shortcut copy of the provider profile so pages can render the header
/// without a round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: Option<String>,
    pub name: String,
    pub avatar: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CurrentUser {
    /// Build from a fresh provider session.
    #[must_use]
    pub fn from_auth(auth: AuthSession, now: DateTime<Utc>) -> Self {
        let expires_at = auth
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(|| now + Duration::seconds(auth.expires_in.max(0)));

        Self {
            name: auth.user.display_name(),
            id: auth.user.id,
            email: auth.user.email,
            avatar: auth.user.user_metadata.avatar_url,
            access_token: auth.access_token,
            refresh_token: auth.refresh_token,
            expires_at,
        }
    }

    /// Whether the access token should be refreshed before use.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_LEEWAY_SECS) >= self.expires_at
    }

    /// Credentials for a backend call.
    #[must_use]
    pub fn caller<'a>(&'a self, request_id: Option<&'a str>) -> Caller<'a> {
        Caller::new(&self.access_token, request_id)
    }
}

/// Session keys.
pub mod session_keys {
    /// The signed-in user.
    pub const CURRENT_USER: &str = "current_user";

    /// Checkout wizard state.
    pub const CHECKOUT: &str = "checkout";

    /// OAuth state (CSRF protection).
    pub const OAUTH_STATE: &str = "oauth_state";

    /// PKCE code verifier for the pending OAuth sign-in.
    pub const OAUTH_VERIFIER: &str = "oauth_verifier";

    /// Referral id captured at sign-in, used on activation.
    pub const REFERRAL_ID: &str = "referral_id";

    /// Wallet binding prompt was dismissed.
    pub const WALLET_PROMPT_DISMISSED: &str = "wallet_prompt_dismissed";

    /// Email awaiting a one-time code.
    pub const OTP_EMAIL: &str = "otp_email";
}
