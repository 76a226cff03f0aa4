//! Identity provider client.
//!
//! Talks to a GoTrue-compatible auth service: email one-time codes, OAuth
//! with PKCE, token refresh, and sign-out. The provider's user id is also
//! the backend user id.

mod pkce;

pub use pkce::{Pkce, random_state};

use std::sync::Arc;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use url::Url;

use epochmine_core::{Email, UserId};

use crate::config::IdentityConfig;

/// Errors from the identity provider.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The code, token, or grant was rejected.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("identity provider rate limit reached")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Profile metadata the OAuth provider attaches to the user.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// The signed-in user as the provider sees it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

impl IdentityUser {
    /// Best available display name, falling back to the email address.
    #[must_use]
    pub fn display_name(&self) -> String {
        let meta = &self.user_metadata;
        [&meta.full_name, &meta.name, &meta.preferred_username, &self.email]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .cloned()
            .unwrap_or_default()
    }
}

/// Tokens issued on sign-in or refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: i64,
    /// Unix timestamp, when the provider sends one.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: IdentityUser,
}

#[derive(Serialize)]
struct OtpRequest<'a> {
    email: &'a str,
    create_user: bool,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    email: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
struct PkceGrant<'a> {
    auth_code: &'a str,
    code_verifier: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

/// Client for the identity provider.
#[derive(Clone)]
pub struct IdentityClient {
    inner: Arc<IdentityClientInner>,
}

struct IdentityClientInner {
    client: reqwest::Client,
    /// `{url}/auth/v1`
    base: String,
    api_key: SecretString,
    provider: String,
}

impl IdentityClient {
    #[must_use]
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            inner: Arc::new(IdentityClientInner {
                client: reqwest::Client::new(),
                base: format!("{}/auth/v1", config.url),
                api_key: config.api_key.clone(),
                provider: config.oauth_provider.clone(),
            }),
        }
    }

    /// Name of the OAuth provider offered on the login page.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.inner.provider
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.inner
            .client
            .post(format!("{}{path}", self.inner.base))
            .header("apikey", self.inner.api_key.expose_secret())
    }

    /// Send a request and decode the body, mapping provider error statuses.
    async fn send<T: DeserializeOwned>(
        builder: reqwest::RequestBuilder,
    ) -> Result<T, IdentityError> {
        let body = Self::send_raw(builder).await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %body.chars().take(500).collect::<String>(),
                "Failed to parse identity provider response"
            );
            IdentityError::Parse(e)
        })
    }

    async fn send_raw(builder: reqwest::RequestBuilder) -> Result<String, IdentityError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return Ok(body);
        }

        let snippet: String = body.chars().take(200).collect();
        match status {
            StatusCode::BAD_REQUEST
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::NOT_FOUND
            | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(IdentityError::InvalidCredentials(provider_message(&body)))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(IdentityError::RateLimited),
            _ => {
                tracing::error!(
                    status = %status,
                    body = %body.chars().take(500).collect::<String>(),
                    "Identity provider returned non-success status"
                );
                Err(IdentityError::Status {
                    status: status.as_u16(),
                    body: snippet,
                })
            }
        }
    }

    /// Email a one-time sign-in code.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider refuses to send the code.
    #[instrument(skip(self, email), fields(domain = %email.domain()))]
    pub async fn send_otp(&self, email: &Email) -> Result<(), IdentityError> {
        let builder = self.post("/otp").json(&OtpRequest {
            email: email.as_str(),
            create_user: true,
        });
        Self::send_raw(builder).await.map(|_| ())
    }

    /// Exchange an emailed code for a session.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidCredentials`] for a wrong or expired code.
    #[instrument(skip(self, email, token), fields(domain = %email.domain()))]
    pub async fn verify_otp(&self, email: &Email, token: &str) -> Result<AuthSession, IdentityError> {
        let builder = self.post("/verify").json(&VerifyRequest {
            kind: "email",
            email: email.as_str(),
            token,
        });
        Self::send(builder).await
    }

    /// Build the provider's OAuth authorize URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured identity URL is malformed.
    pub fn authorize_url(&self, redirect_to: &str, pkce: &Pkce) -> Result<String, IdentityError> {
        let mut url = Url::parse(&format!("{}/authorize", self.inner.base))?;
        url.query_pairs_mut()
            .append_pair("provider", &self.inner.provider)
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "s256");
        Ok(url.into())
    }

    /// Exchange an OAuth authorization code.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidCredentials`] if the code or verifier
    /// does not match.
    #[instrument(skip_all)]
    pub async fn exchange_code(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> Result<AuthSession, IdentityError> {
        let builder = self.post("/token?grant_type=pkce").json(&PkceGrant {
            auth_code,
            code_verifier,
        });
        Self::send(builder).await
    }

    /// Trade a refresh token for a new session.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidCredentials`] once the refresh token
    /// is revoked or used up.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, IdentityError> {
        let builder = self
            .post("/token?grant_type=refresh_token")
            .json(&RefreshGrant { refresh_token });
        Self::send(builder).await
    }

    /// Fetch the user behind an access token.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidCredentials`] for an invalid token.
    #[instrument(skip_all)]
    pub async fn user(&self, access_token: &str) -> Result<IdentityUser, IdentityError> {
        let builder = self
            .inner
            .client
            .get(format!("{}/user", self.inner.base))
            .header("apikey", self.inner.api_key.expose_secret())
            .bearer_auth(access_token);
        Self::send(builder).await
    }

    /// Revoke the session at the provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip_all)]
    pub async fn logout(&self, access_token: &str) -> Result<(), IdentityError> {
        let builder = self.post("/logout").bearer_auth(access_token);
        Self::send_raw(builder).await.map(|_| ())
    }
}

/// Pull a human-readable message out of a provider error body.
fn provider_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        msg: Option<String>,
        message: Option<String>,
        error_description: Option<String>,
        error: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|e| e.msg.or(e.message).or(e.error_description).or(e.error))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallbacks() {
        let mut user: IdentityUser = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "email": "miner@example.com",
            "user_metadata": {"full_name": "", "preferred_username": "digger"}
        }))
        .unwrap();
        assert_eq!(user.display_name(), "digger");

        user.user_metadata = UserMetadata::default();
        assert_eq!(user.display_name(), "miner@example.com");
    }

    #[test]
    fn test_provider_message() {
        assert_eq!(
            provider_message(r#"{"msg":"Token has expired or is invalid"}"#),
            "Token has expired or is invalid"
        );
        assert_eq!(provider_message("plain failure"), "plain failure");
    }
}
