//! # Ledger
//!
//! Account snapshots, the stores that hold them and the per-account lock
//! cache that keeps concurrent transfers from touching the same account.

pub mod account;
pub mod locks;
pub mod store;

pub use account::{Account, LedgerError};
pub use locks::{AccountLockCache, AccountLockGuard};
pub use store::{
    AccountStore, InMemoryAccountStore, InMemoryTransferStore, TransferOutcome, TransferStore,
};
