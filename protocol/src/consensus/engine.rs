//! # Consensus Engine
//!
//! Turns a set of peer confirmations into a settle or fail decision.
//!
//! ## Decision rules
//!
//! 1. **Quorum gate.** Fewer than `peer_count / 2` confirmations (integer
//!    division) fails the transfer as not confirmed. With 4 peers, 2 answers
//!    pass; with 3 peers, 1 answer passes.
//! 2. **Vetoes.** The first `AccountLocked`, `ReplayDetected` or
//!    `Unauthorized` confirmation fails the transfer, however many peers said
//!    OK.
//! 3. **Reconciliation.** For sender and recipient independently, the
//!    snapshot with the highest height among OK confirmations wins, provided
//!    its id is the expected one. No sender snapshot means an invalid sender;
//!    no recipient snapshot means a first transfer to a fresh account.
//! 4. **Mutation.** Sender pays amount plus fee, recipient receives amount,
//!    both advance one height and fold the transfer signature into their
//!    chain hash.
//!
//! [`decide`] is pure. [`ConsensusEngine`] runs it at most once per transfer
//! and hands the signed outcome to the settlement broadcaster.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use tracing::{error, info, warn};

use super::settlement::SettlementBroadcaster;
use super::NodeContext;
use crate::identity::AccountId;
use crate::ledger::{Account, LedgerError};
use crate::network::messages::SettlementRecord;
use crate::transfer::{
    Confirmation, ConfirmationStatus, TransferError, TransferId, TransferState,
    UnconfirmedTransfer,
};

/// Outcome of reconciling peer confirmations.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Post-transfer snapshots of sender and recipient.
    Settle { from: Account, to: Account },
    Fail(TransferError),
}

/// Decide the fate of `unconfirmed` given `peer_count` peers in the topology.
pub fn decide(unconfirmed: &UnconfirmedTransfer, peer_count: usize) -> Decision {
    let transfer = unconfirmed.transfer();
    let confirmations = unconfirmed.confirmations();

    if confirmations.len() < peer_count / 2 {
        return Decision::Fail(TransferError::NotConfirmed);
    }

    for confirmation in confirmations {
        match &confirmation.status {
            ConfirmationStatus::Ok { .. } => {}
            ConfirmationStatus::AccountLocked => {
                return Decision::Fail(TransferError::AccountLocked)
            }
            ConfirmationStatus::ReplayDetected => return Decision::Fail(TransferError::Replay),
            ConfirmationStatus::Unauthorized => {
                return Decision::Fail(TransferError::system(format!(
                    "node {} could not authenticate the request",
                    confirmation.node
                )))
            }
        }
    }

    let Some(sender) = freshest(reported_from(confirmations), &transfer.from) else {
        return Decision::Fail(TransferError::InvalidFromAccount);
    };
    let recipient = freshest(reported_to(confirmations), &transfer.to)
        .cloned()
        .unwrap_or_else(|| Account::genesis(transfer.to));

    let Some(total) = transfer.total_debit() else {
        return Decision::Fail(TransferError::InvalidAmount);
    };

    let from = match sender.debit(total, &transfer.id) {
        Ok(account) => account,
        Err(LedgerError::InsufficientFunds { .. }) => {
            return Decision::Fail(TransferError::InsufficientFunds)
        }
        Err(e) => return Decision::Fail(TransferError::system(e)),
    };
    let to = match recipient.credit(transfer.amount, &transfer.id) {
        Ok(account) => account,
        Err(e) => return Decision::Fail(TransferError::system(e)),
    };

    Decision::Settle { from, to }
}

fn reported_from(confirmations: &[Confirmation]) -> impl Iterator<Item = &Account> {
    confirmations.iter().filter_map(|c| match &c.status {
        ConfirmationStatus::Ok { from, .. } => from.as_ref(),
        _ => None,
    })
}

fn reported_to(confirmations: &[Confirmation]) -> impl Iterator<Item = &Account> {
    confirmations.iter().filter_map(|c| match &c.status {
        ConfirmationStatus::Ok { to, .. } => to.as_ref(),
        _ => None,
    })
}

/// Highest-height snapshot of `id`. Snapshots of any other account are
/// ignored.
fn freshest<'a>(
    snapshots: impl Iterator<Item = &'a Account>,
    id: &AccountId,
) -> Option<&'a Account> {
    snapshots
        .filter(|snapshot| snapshot.id == *id)
        .max_by_key(|snapshot| snapshot.height)
}

// ---------------------------------------------------------------------------
// ConsensusEngine
// ---------------------------------------------------------------------------

pub struct ConsensusEngine {
    ctx: Arc<NodeContext>,
    broadcaster: Arc<SettlementBroadcaster>,
    in_consensus: DashSet<TransferId>,
}

impl ConsensusEngine {
    pub fn new(ctx: Arc<NodeContext>, broadcaster: Arc<SettlementBroadcaster>) -> Self {
        Self {
            ctx,
            broadcaster,
            in_consensus: DashSet::new(),
        }
    }

    /// Decide `unconfirmed`, then broadcast and apply the outcome.
    ///
    /// A transfer already being decided here, or already terminal, is a
    /// replay.
    pub async fn conclude(
        &self,
        unconfirmed: &mut UnconfirmedTransfer,
    ) -> Result<SettlementRecord, TransferError> {
        let id = unconfirmed.id().clone();
        if self.ctx.transfers.contains(&id) || !self.in_consensus.insert(id.clone()) {
            return Err(TransferError::Replay);
        }
        let result = self.run(unconfirmed).await;
        self.in_consensus.remove(&id);
        result
    }

    async fn run(
        &self,
        unconfirmed: &mut UnconfirmedTransfer,
    ) -> Result<SettlementRecord, TransferError> {
        let peers = self.ctx.topology.peer_count();
        let transfer = unconfirmed.transfer().clone();
        let decided_in_ms = (Utc::now() - unconfirmed.created_at()).num_milliseconds();

        let (from, to) = match decide(unconfirmed, peers) {
            Decision::Settle { from, to } => (from, to),
            Decision::Fail(err) => {
                warn!(
                    transfer = %transfer.id,
                    code = %err.code(),
                    confirmations = unconfirmed.confirmations().len(),
                    peers,
                    decided_in_ms,
                    "transfer rejected by consensus"
                );
                return Err(self.fail(unconfirmed, err).await);
            }
        };

        let record = SettlementRecord {
            transfer,
            from,
            to,
            settled_at_ms: Utc::now().timestamp_millis(),
        };
        let signed = match self.ctx.seal(record) {
            Ok(signed) => signed,
            Err(e) => {
                error!(transfer = %unconfirmed.id(), error = %e, "failed to sign settlement");
                return Err(self.fail(unconfirmed, TransferError::system(e)).await);
            }
        };

        let record = signed.body.clone();
        if let Err(err) = self.broadcaster.settle(signed).await {
            unconfirmed.advance(TransferState::Failed(err.code()));
            return Err(err);
        }
        unconfirmed.advance(TransferState::Settled);
        info!(
            transfer = %record.transfer.id,
            from_height = record.from.height,
            to_height = record.to.height,
            decided_in_ms,
            "transfer settled"
        );
        Ok(record)
    }

    async fn fail(&self, unconfirmed: &mut UnconfirmedTransfer, err: TransferError) -> TransferError {
        self.broadcaster.fail(unconfirmed.transfer(), &err).await;
        unconfirmed.advance(TransferState::Failed(err.code()));
        err
    }
}
