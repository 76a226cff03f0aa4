//! EpochMine storefront library.
//!
//! The storefront is a thin server-rendered front end: catalog, checkout
//! wizard, orders and machines all live behind the backend REST API, the
//! identity provider handles sign-in, and payments are verified against an
//! EVM chain over JSON-RPC. This crate exposes the router so it can be
//! driven in tests without binding a socket.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod filters;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Router, routing::get};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::{Span, warn};

use crate::state::AppState;

/// Directory static assets are served from, relative to the workspace root.
pub const STATIC_DIR: &str = "crates/storefront/static";

/// Build the full application router.
///
/// Layer order (outermost first): Sentry hub and transaction, request
/// tracing, request id, security headers, session.
pub fn app(state: AppState) -> Router {
    let session_layer = middleware::create_session_layer(state.config());

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(routes::routes())
        .nest_service("/static", ServeDir::new(STATIC_DIR))
        .layer(session_layer)
        .layer(axum::middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the backend API is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.api().health().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Backend readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
