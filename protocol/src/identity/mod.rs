//! # Identity
//!
//! Accounts are named by the key that owns them. See [`account_id`] for the
//! derivation and address format.

pub mod account_id;

pub use account_id::{AccountId, AccountIdError, Curve};
