//! # Settlement Broadcaster
//!
//! Publishes a transfer's final outcome to every peer and applies it to the
//! local ledger. Peers run the same apply path when the record arrives.
//!
//! Applying a settlement:
//!
//! 1. record the transfer as settled; an already-terminal id is ignored
//! 2. for each of the two snapshots, compare with the local copy:
//!    - none on file, or local copy more than one height behind: save
//!    - exactly one height behind: save only if the snapshot's chain hash
//!      follows from the local one
//!    - same height or newer locally: keep the local copy
//! 3. release every lock the transfer holds here
//!
//! Applying a failure records the code and releases the transfer's locks.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::NodeContext;
use crate::ledger::{Account, TransferOutcome};
use crate::network::bus::Topic;
use crate::network::messages::{FailureRecord, Message, SettlementRecord, Signed};
use crate::transfer::{ErrorCode, Transfer, TransferError, TransferId};

pub struct SettlementBroadcaster {
    ctx: Arc<NodeContext>,
}

impl SettlementBroadcaster {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Publish a signed settlement, then apply it here.
    ///
    /// If the publish fails the transfer is failed instead.
    pub async fn settle(&self, record: Signed<SettlementRecord>) -> Result<(), TransferError> {
        let transfer = record.body.transfer.clone();
        if let Err(e) = self
            .ctx
            .bus
            .publish(Topic::Settlement, Message::Settlement(record.clone()))
            .await
        {
            error!(transfer = %transfer.id, error = %e, "failed to publish settlement");
            let err = TransferError::system(e);
            self.fail(&transfer, &err).await;
            return Err(err);
        }

        if !self.apply_settlement(&record.body) {
            warn!(transfer = %transfer.id, "transfer reached an outcome elsewhere first");
            return Err(TransferError::Replay);
        }
        Ok(())
    }

    /// Publish a signed failure for `transfer`, then apply it here. The local
    /// apply happens even if signing or publishing fails, so locks are freed.
    pub async fn fail(&self, transfer: &Transfer, err: &TransferError) {
        let code = err.code();
        let record = FailureRecord {
            transfer: transfer.clone(),
            code,
            failed_at_ms: Utc::now().timestamp_millis(),
        };
        match self.ctx.seal(record) {
            Ok(signed) => {
                if let Err(e) = self
                    .ctx
                    .bus
                    .publish(Topic::Failure, Message::Failure(signed))
                    .await
                {
                    error!(transfer = %transfer.id, error = %e, "failed to publish failure record");
                }
            }
            Err(e) => error!(transfer = %transfer.id, error = %e, "failed to sign failure record"),
        }

        self.apply_failure(transfer, code);
        info!(transfer = %transfer.id, code = %code, "transfer failed");
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    pub fn handle_settlement(&self, record: &Signed<SettlementRecord>) {
        if let Err(e) = self.ctx.authenticate(record) {
            warn!(signer = %record.signer, error = %e, "dropping unauthenticated settlement");
            return;
        }
        self.apply_settlement(&record.body);
    }

    pub fn handle_failure(&self, record: &Signed<FailureRecord>) {
        if let Err(e) = self.ctx.authenticate(record) {
            warn!(signer = %record.signer, error = %e, "dropping unauthenticated failure record");
            return;
        }
        self.apply_failure(&record.body.transfer, record.body.code);
    }

    // -----------------------------------------------------------------------
    // Local apply
    // -----------------------------------------------------------------------

    /// Apply a settlement to this node's ledger. Returns `false` if the
    /// record was malformed or the transfer was already terminal.
    pub fn apply_settlement(&self, record: &SettlementRecord) -> bool {
        let transfer = &record.transfer;
        if record.from.id != transfer.from || record.to.id != transfer.to {
            warn!(transfer = %transfer.id, "settlement snapshots do not match the transfer");
            return false;
        }

        if !self.ctx.transfers.record(transfer.id.clone(), TransferOutcome::Settled) {
            debug!(transfer = %transfer.id, "settlement for a finished transfer ignored");
            self.ctx.release_transfer_locks(transfer);
            return false;
        }

        self.apply_snapshot(&record.from, &transfer.id);
        self.apply_snapshot(&record.to, &transfer.id);
        self.ctx.release_transfer_locks(transfer);

        debug!(
            transfer = %transfer.id,
            from = %record.from.id,
            to = %record.to.id,
            "settlement applied"
        );
        true
    }

    /// Record a failed transfer and free its locks. Returns `false` if the
    /// transfer was already terminal.
    pub fn apply_failure(&self, transfer: &Transfer, code: ErrorCode) -> bool {
        let recorded = self
            .ctx
            .transfers
            .record(transfer.id.clone(), TransferOutcome::Failed(code));
        self.ctx.release_transfer_locks(transfer);
        recorded
    }

    fn apply_snapshot(&self, snapshot: &Account, transfer: &TransferId) {
        let accounts = &self.ctx.accounts;
        match accounts.find(&snapshot.id) {
            None => accounts.save(snapshot.clone()),
            Some(local) if snapshot.height <= local.height => {
                debug!(
                    account = %snapshot.id,
                    local_height = local.height,
                    height = snapshot.height,
                    "local snapshot already as fresh"
                );
            }
            Some(local) if snapshot.height == local.height + 1 => {
                if snapshot.follows(&local, transfer) {
                    accounts.save(snapshot.clone());
                } else {
                    warn!(
                        account = %snapshot.id,
                        transfer = %transfer,
                        local_chain = %local.chain_hash_hex(),
                        "settled snapshot does not follow local chain, skipping"
                    );
                }
            }
            // This node missed earlier transfers on the account.
            Some(_) => accounts.save(snapshot.clone()),
        }
    }
}
