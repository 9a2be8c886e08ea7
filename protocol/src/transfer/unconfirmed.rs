//! # Unconfirmed Transfers
//!
//! A transfer between local validation and its terminal outcome. It gathers
//! one [`Confirmation`] per peer and walks a small state machine:
//!
//! ```text
//! VALIDATING -> PREPARING -> COLLECTING_CONFIRMATIONS -> SETTLED
//!      \_____________\_______________\_______________-> FAILED
//! ```
//!
//! A client request is received and checked by the transfer validator before
//! it becomes an [`UnconfirmedTransfer`], so the machine starts at
//! `Validating`. Requests rejected there never get one and never leave the
//! node. `Settled` and `Failed` are terminal and immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ErrorCode;
use super::request::{Transfer, TransferId};
use crate::ledger::Account;
use crate::network::NodeId;

// ---------------------------------------------------------------------------
// Confirmations
// ---------------------------------------------------------------------------

/// One peer's verdict on a transfer.
///
/// `Ok` carries whatever snapshots the peer holds; either side may be
/// absent when the peer has never seen that account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationStatus {
    Ok {
        from: Option<Account>,
        to: Option<Account>,
    },
    AccountLocked,
    ReplayDetected,
    Unauthorized,
}

impl ConfirmationStatus {
    /// Veto statuses fail the transfer no matter how many peers said OK.
    pub fn is_veto(&self) -> bool {
        !matches!(self, ConfirmationStatus::Ok { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub node: NodeId,
    pub status: ConfirmationStatus,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Validating,
    Preparing,
    CollectingConfirmations,
    Settled,
    Failed(ErrorCode),
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Settled | TransferState::Failed(_))
    }

    /// Whether moving to `next` is a legal step.
    pub fn can_advance_to(&self, next: &TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (Validating, Preparing)
            | (Preparing, CollectingConfirmations)
            | (CollectingConfirmations, Settled) => true,
            (current, Failed(_)) => !current.is_terminal(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// UnconfirmedTransfer
// ---------------------------------------------------------------------------

/// A validated transfer awaiting quorum agreement.
#[derive(Debug, Clone)]
pub struct UnconfirmedTransfer {
    transfer: Transfer,
    confirmations: Vec<Confirmation>,
    state: TransferState,
    created_at: DateTime<Utc>,
}

impl UnconfirmedTransfer {
    /// Created the moment local validation succeeds. `created_at` marks
    /// that moment.
    pub fn new(transfer: Transfer) -> Self {
        Self {
            transfer,
            confirmations: Vec::new(),
            state: TransferState::Validating,
            created_at: Utc::now(),
        }
    }

    pub fn transfer(&self) -> &Transfer {
        &self.transfer
    }

    pub fn id(&self) -> &TransferId {
        &self.transfer.id
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn confirmations(&self) -> &[Confirmation] {
        &self.confirmations
    }

    /// Move to `next` if the step is legal. Terminal states never change.
    pub fn advance(&mut self, next: TransferState) -> bool {
        if self.state.can_advance_to(&next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    /// Append a peer's confirmation. A second confirmation from the same
    /// peer, or any confirmation after the collecting phase, is ignored.
    pub fn add_confirmation(&mut self, confirmation: Confirmation) -> bool {
        if self.state != TransferState::CollectingConfirmations {
            return false;
        }
        if self
            .confirmations
            .iter()
            .any(|existing| existing.node == confirmation.node)
        {
            return false;
        }
        self.confirmations.push(confirmation);
        true
    }
}
