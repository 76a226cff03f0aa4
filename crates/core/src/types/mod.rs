//! Core types for EpochMine.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod chain;
pub mod email;
pub mod id;
pub mod status;

pub use chain::{ChainValueError, TxHash, WalletAddress};
pub use email::{Email, EmailError};
pub use id::*;
pub use status::*;
