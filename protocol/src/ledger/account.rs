//! # Accounts
//!
//! An [`Account`] is a snapshot: balance, height and chain hash as one node
//! sees them. Snapshots are values. Mutation helpers return the successor
//! snapshot and leave the original untouched, so the consensus engine can
//! compute both post-transfer accounts before anything is written.
//!
//! Every applied transfer moves an account forward by exactly one height and
//! folds the transfer signature into the chain hash:
//!
//! ```text
//! height'     = height + 1
//! chain_hash' = BLAKE3(chain_hash || transfer_signature)
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{GENESIS_CHAIN_HASH, GENESIS_HEIGHT, HASH_OUTPUT_LENGTH};
use crate::crypto::hash::next_chain_hash;
use crate::identity::{AccountId, Curve};
use crate::transfer::TransferId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("account {account} holds {balance}, needs {required}")]
    InsufficientFunds {
        account: AccountId,
        balance: Decimal,
        required: Decimal,
    },

    #[error("balance overflow on account {0}")]
    Overflow(AccountId),

    #[error("height overflow on account {0}")]
    HeightOverflow(AccountId),
}

/// One node's view of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Decimal,
    pub height: u64,
    pub chain_hash: [u8; HASH_OUTPUT_LENGTH],
    pub curve: Curve,
}

impl Account {
    /// A fresh account at genesis holding `balance`.
    pub fn new(id: AccountId, balance: Decimal) -> Self {
        Self {
            curve: id.curve(),
            id,
            balance,
            height: GENESIS_HEIGHT,
            chain_hash: GENESIS_CHAIN_HASH,
        }
    }

    /// The empty account a first incoming transfer creates.
    pub fn genesis(id: AccountId) -> Self {
        Self::new(id, Decimal::ZERO)
    }

    /// Successor snapshot with `balance` after applying `transfer`.
    fn advance(&self, balance: Decimal, transfer: &TransferId) -> Result<Self, LedgerError> {
        let height = self
            .height
            .checked_add(1)
            .ok_or(LedgerError::HeightOverflow(self.id))?;
        Ok(Self {
            id: self.id,
            balance,
            height,
            chain_hash: next_chain_hash(&self.chain_hash, transfer.as_bytes()),
            curve: self.curve,
        })
    }

    /// Successor snapshot after paying `total` out. Never goes negative.
    pub fn debit(&self, total: Decimal, transfer: &TransferId) -> Result<Self, LedgerError> {
        if self.balance < total {
            return Err(LedgerError::InsufficientFunds {
                account: self.id,
                balance: self.balance,
                required: total,
            });
        }
        let balance = self
            .balance
            .checked_sub(total)
            .ok_or(LedgerError::Overflow(self.id))?;
        self.advance(balance, transfer)
    }

    /// Successor snapshot after receiving `amount`.
    pub fn credit(&self, amount: Decimal, transfer: &TransferId) -> Result<Self, LedgerError> {
        let balance = self
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(self.id))?;
        self.advance(balance, transfer)
    }

    /// Whether this snapshot is exactly what applying `transfer` to
    /// `previous` would produce, as far as height and chain hash go.
    pub fn follows(&self, previous: &Account, transfer: &TransferId) -> bool {
        self.id == previous.id
            && previous.height.checked_add(1) == Some(self.height)
            && self.chain_hash == next_chain_hash(&previous.chain_hash, transfer.as_bytes())
    }

    pub fn chain_hash_hex(&self) -> String {
        hex::encode(self.chain_hash)
    }
}
