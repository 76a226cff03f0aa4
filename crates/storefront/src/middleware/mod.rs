//! HTTP middleware stack for storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP transaction)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. Security headers (CSP, frame and isolation headers)
//! 5. Session layer (tower-sessions with in-memory store)
//! 6. Rate limiting (governor, on the one-time code and wallet routes)

pub mod auth;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;
pub mod session;

pub use auth::{AuthContext, OptionalAuth, RequireAuth, clear_current_user, set_current_user};
pub use rate_limit::{api_rate_limiter, auth_rate_limiter};
pub use request_id::{RequestId, request_id_middleware};
pub use security_headers::security_headers_middleware;
pub use session::create_session_layer;
