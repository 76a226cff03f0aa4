//! Request-spanning services for the storefront.
//!
//! - `inflight` - per-order guard against duplicate concurrent submissions

pub mod inflight;

pub use inflight::{InFlight, InFlightGuard};
