//! EpochMine Core - Shared types and checkout rules.
//!
//! This crate provides the types and pure rules used by the storefront:
//! - `types` - Newtype IDs, emails, chain addresses, statuses
//! - `validate` / `address` - Presentation-layer form validation
//! - `pagination` - Page button window for list views
//! - `countdown` - Time remaining until an order expires
//! - `erc20` - Token transfer calldata and `Transfer` log matching for the
//!   wallet payment branch, on `ethers` types
//! - `checkout` - The checkout wizard state machine
//!
//! # Architecture
//!
//! The core crate contains only types and rules - no I/O, no HTTP clients,
//! no session handling. Everything here is deterministic and unit tested.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod address;
pub mod checkout;
pub mod countdown;
pub mod erc20;
pub mod pagination;
pub mod types;
pub mod validate;

pub use address::{ShippingAddress, ShippingForm};
pub use checkout::{CheckoutError, CheckoutState, PaymentBranch, PaymentTarget, TransferStep};
pub use countdown::Countdown;
pub use erc20::{AmountError, Erc20Transfer};
pub use pagination::{PageItem, PageWindow};
pub use types::*;
pub use validate::{Field, FieldErrors};
