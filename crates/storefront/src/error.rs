//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. Handlers that answer the wallet script return
//! `Result<T, AppError>` directly; page handlers mostly turn failures into a
//! redirect with a notice instead.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use epochmine_core::erc20::PaymentMismatch;
use epochmine_core::{CheckoutError, FieldErrors};

use crate::api::ApiError;
use crate::chain::ChainError;
use crate::identity::IdentityError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Backend API call failed.
    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    /// Identity provider call failed.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Payment verification on chain failed.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Checkout step not allowed from the current state.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Form input failed validation.
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    /// Session store failure.
    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Signed in but not allowed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request conflicts with current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<FieldErrors> for AppError {
    fn from(errors: FieldErrors) -> Self {
        Self::Validation(errors)
    }
}

impl AppError {
    /// Whether this error is our fault (or an upstream's) and worth reporting.
    const fn is_server_error(&self) -> bool {
        match self {
            Self::Api(err) => !matches!(
                err,
                ApiError::Unauthorized | ApiError::NotFound(_) | ApiError::Rejected { .. }
            ),
            Self::Identity(err) => !matches!(
                err,
                IdentityError::InvalidCredentials(_) | IdentityError::RateLimited
            ),
            Self::Chain(err) => matches!(err, ChainError::Provider(_)),
            Self::Session(_) | Self::Internal(_) => true,
            _ => false,
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Api(err) => match err {
                ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
                ApiError::NotFound(_) => StatusCode::NOT_FOUND,
                ApiError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Identity(err) => match err {
                IdentityError::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
                IdentityError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Chain(err) => match err {
                ChainError::Provider(_) => StatusCode::BAD_GATEWAY,
                ChainError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                ChainError::Reverted
                | ChainError::WrongContract { .. }
                | ChainError::Mismatch(_)
                | ChainError::AlreadyClaimed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            },
            Self::Checkout(
                CheckoutError::InvalidTransition { .. } | CheckoutError::NoPreparedTransfer,
            )
            | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Checkout(_) | Self::Validation(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Session(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show the visitor.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Session(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Api(ApiError::Rejected { message, .. }) if !message.is_empty() => {
                message.clone()
            }
            Self::Api(ApiError::Unauthorized) | Self::Identity(IdentityError::InvalidCredentials(_)) => {
                "Please sign in again".to_string()
            }
            Self::Api(_) | Self::Identity(_) => "External service error".to_string(),
            Self::Chain(ChainError::Reverted) => "The transaction failed on chain".to_string(),
            Self::Chain(ChainError::WrongContract { .. }) => {
                "The transaction did not pay with the expected token".to_string()
            }
            Self::Chain(ChainError::Mismatch(PaymentMismatch::NoTransferToPayee)) => {
                "The transaction did not pay this order's address".to_string()
            }
            Self::Chain(ChainError::Mismatch(PaymentMismatch::Underpaid { .. })) => {
                "The transaction paid less than the order amount".to_string()
            }
            Self::Chain(ChainError::Mismatch(PaymentMismatch::WrongPayer { .. })) => {
                "The transaction was sent from a different wallet".to_string()
            }
            Self::Chain(ChainError::AlreadyClaimed { .. }) => {
                "This transaction was already used to pay another order".to_string()
            }
            Self::Chain(ChainError::Timeout(_)) => {
                "The transaction was not confirmed in time. Your order stays pending.".to_string()
            }
            Self::Chain(_) => "Could not reach the blockchain node".to_string(),
            Self::Checkout(err) => err.to_string(),
            Self::Validation(_) => "Please correct the highlighted fields".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if self.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = self.status();

        // Don't expose internal error details to clients
        let body = match &self {
            Self::Validation(fields) => json!({
                "error": self.public_message(),
                "fields": fields,
            }),
            _ => json!({ "error": self.public_message() }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of checkout
/// steps leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("checkout", "Pool selected", Some(&[("pool_id", "3")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use epochmine_core::Field;

    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("order 12".to_string());
        assert_eq!(err.to_string(), "Not found: order 12");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        fn get_status(err: AppError) -> StatusCode {
            err.into_response().status()
        }

        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Conflict("bound".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(AppError::Api(ApiError::MissingData)),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            get_status(AppError::Chain(ChainError::Timeout(Duration::from_secs(1)))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            get_status(AppError::Chain(ChainError::Mismatch(
                PaymentMismatch::NoTransferToPayee
            ))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            get_status(AppError::Checkout(CheckoutError::InvalidTransition {
                from: "pool_selected",
                action: "open payment",
            })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(AppError::RateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = AppError::Internal("db password leaked".to_string());
        assert_eq!(err.public_message(), "Internal server error");

        let err = AppError::Api(ApiError::Status {
            status: 500,
            body: "stack trace".to_string(),
        });
        assert_eq!(err.public_message(), "External service error");
    }

    #[test]
    fn test_backend_rejection_message_shown() {
        let err = AppError::Api(ApiError::Rejected {
            code: 4001,
            message: "Order already paid".to_string(),
        });
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.public_message(), "Order already paid");
    }

    #[test]
    fn test_validation_error_from_fields() {
        let mut fields = FieldErrors::new();
        fields.add(Field::WalletAddress, "Invalid wallet address");
        let err = AppError::from(fields);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
