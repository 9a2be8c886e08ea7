//! # Stores
//!
//! Persistence is somebody else's problem. The engine talks to two narrow
//! traits and ships in-memory implementations that are good enough for the
//! devnet harness and every test in the crate.
//!
//! - [`AccountStore`] holds the node's account snapshots.
//! - [`TransferStore`] remembers every transfer id that reached a terminal
//!   state. It is the replay guard: an id recorded here is never processed
//!   again.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::account::Account;
use crate::identity::AccountId;
use crate::transfer::{ErrorCode, TransferId};

/// Key-value store of account snapshots by account id.
pub trait AccountStore: Send + Sync {
    fn find(&self, id: &AccountId) -> Option<Account>;
    fn save(&self, account: Account);
}

/// How a transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferOutcome {
    Settled,
    Failed(ErrorCode),
}

/// Terminal transfer ids and their outcome.
pub trait TransferStore: Send + Sync {
    fn outcome(&self, id: &TransferId) -> Option<TransferOutcome>;

    /// Record a terminal outcome. Returns `false` and leaves the existing
    /// entry alone if the id was already terminal.
    fn record(&self, id: TransferId, outcome: TransferOutcome) -> bool;

    fn contains(&self, id: &TransferId) -> bool {
        self.outcome(id).is_some()
    }
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: DashMap<AccountId, Account>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with genesis balances.
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let store = Self::new();
        for account in accounts {
            store.save(account);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn find(&self, id: &AccountId) -> Option<Account> {
        self.accounts.get(id).map(|entry| entry.value().clone())
    }

    fn save(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTransferStore {
    outcomes: DashMap<TransferId, TransferOutcome>,
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl TransferStore for InMemoryTransferStore {
    fn outcome(&self, id: &TransferId) -> Option<TransferOutcome> {
        self.outcomes.get(id).map(|entry| *entry.value())
    }

    fn record(&self, id: TransferId, outcome: TransferOutcome) -> bool {
        match self.outcomes.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(outcome);
                true
            }
        }
    }
}
