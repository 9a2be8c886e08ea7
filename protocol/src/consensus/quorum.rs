//! # Quorum Collector
//!
//! Asks every peer for its view of both accounts a transfer touches and
//! records the answers on the [`UnconfirmedTransfer`].
//!
//! A peer answers with one of:
//!
//! - `Ok { from, to }`: both accounts now locked for this transfer, with
//!   whatever snapshots the peer holds;
//! - `AccountLocked`: another transfer holds one of the accounts;
//! - `ReplayDetected`: the transfer already reached an outcome here;
//! - `Unauthorized`: the request did not authenticate.
//!
//! Collection ends when every peer answered or the confirmation timeout
//! passed. Replies after that are dropped by the reply router.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::NodeContext;
use crate::network::bus::{deadline_after, Topic};
use crate::network::messages::{AccountsRequest, AccountsResponse, Message, Signed};
use crate::transfer::{Confirmation, ConfirmationStatus, TransferError, UnconfirmedTransfer};

pub struct QuorumCollector {
    ctx: Arc<NodeContext>,
}

impl QuorumCollector {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    // -----------------------------------------------------------------------
    // Peer side
    // -----------------------------------------------------------------------

    /// This node's confirmation for an accounts request. Locks both accounts
    /// on `Ok`.
    pub fn evaluate(&self, request: &Signed<AccountsRequest>) -> ConfirmationStatus {
        if let Err(e) = self.ctx.authenticate(request) {
            warn!(signer = %request.signer, error = %e, "rejecting unauthenticated accounts request");
            return ConfirmationStatus::Unauthorized;
        }

        let transfer = &request.body.transfer;
        if self.ctx.transfers.contains(&transfer.id) {
            return ConfirmationStatus::ReplayDetected;
        }

        let locks = &self.ctx.locks;
        if transfer
            .accounts()
            .into_iter()
            .any(|account| locks.is_locked_by_other(account, &transfer.id))
        {
            return ConfirmationStatus::AccountLocked;
        }
        // Lost a race between the check and the lock. Whatever was taken
        // stays with this transfer until its outcome or the stale sweep.
        for account in transfer.accounts() {
            if !locks.try_lock(account, &transfer.id) {
                return ConfirmationStatus::AccountLocked;
            }
        }

        ConfirmationStatus::Ok {
            from: self.ctx.accounts.find(&transfer.from),
            to: self.ctx.accounts.find(&transfer.to),
        }
    }

    pub async fn handle_request(&self, request: Signed<AccountsRequest>) {
        let status = self.evaluate(&request);
        debug!(
            transfer = %request.body.transfer.id,
            coordinator = %request.signer,
            veto = status.is_veto(),
            "accounts request evaluated"
        );

        let reply = AccountsResponse {
            correlation: request.body.correlation,
            transfer_id: request.body.transfer.id.clone(),
            status,
        };
        let reply = match self.ctx.seal(reply) {
            Ok(signed) => signed,
            Err(e) => {
                error!(error = %e, "failed to sign accounts response");
                return;
            }
        };
        if let Err(e) = self
            .ctx
            .bus
            .send_to(&request.signer, Message::AccountsReply(reply))
            .await
        {
            warn!(to = %request.signer, error = %e, "failed to deliver accounts response");
        }
    }

    // -----------------------------------------------------------------------
    // Coordinator side
    // -----------------------------------------------------------------------

    /// Broadcast the transfer and gather peer confirmations into `unconfirmed`.
    pub async fn collect(&self, unconfirmed: &mut UnconfirmedTransfer) -> Result<(), TransferError> {
        let mut waiting: HashSet<_> = self.ctx.topology.peer_ids().into_iter().collect();
        if waiting.is_empty() {
            return Ok(());
        }

        let correlation = Uuid::new_v4();
        let mut replies = self.ctx.replies.subscribe(correlation);
        let request = self
            .ctx
            .seal(AccountsRequest {
                correlation,
                transfer: unconfirmed.transfer().clone(),
            })
            .map_err(TransferError::system)?;
        self.ctx
            .bus
            .publish(Topic::TransferRequest, Message::Accounts(request))
            .await
            .map_err(TransferError::system)?;

        let expected = waiting.len();
        let deadline = deadline_after(self.ctx.config.confirmation_timeout());
        while !waiting.is_empty() {
            let Some(message) = replies.recv_until(deadline).await else {
                break;
            };
            let Message::AccountsReply(reply) = message else {
                continue;
            };
            if reply.body.transfer_id != *unconfirmed.id() || !waiting.contains(&reply.signer) {
                continue;
            }
            if let Err(e) = self.ctx.authenticate(&reply) {
                warn!(transfer = %unconfirmed.id(), error = %e, "dropping unauthenticated confirmation");
                continue;
            }
            waiting.remove(&reply.signer);
            unconfirmed.add_confirmation(Confirmation {
                node: reply.signer,
                status: reply.body.status,
            });
        }

        info!(
            transfer = %unconfirmed.id(),
            confirmations = unconfirmed.confirmations().len(),
            expected,
            "confirmation window closed"
        );
        Ok(())
    }
}
