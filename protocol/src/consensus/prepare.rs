//! # Prepare Coordinator
//!
//! Before a transfer is put to the quorum, every peer is asked to lock the
//! sender account for it. This keeps two conflicting transfers from the same
//! sender from being confirmed concurrently through different coordinators.
//!
//! Peer side, in order:
//!
//! 1. authenticate the requesting node, else `RejectedRequestNotValid`
//! 2. transfer already terminal here, else `RejectedTransferReplay`
//! 3. sender locked by another transfer, else `RejectedAccountInProgress`
//! 4. sender unknown here: `ApprovedNoAccountOnFile` (no opinion, no lock)
//! 5. lock the sender, reply `Approved` with its balance, height and chain hash
//!
//! Every reply is signed by the responding node.
//!
//! Coordinator side: broadcast, collect until every peer answered or the
//! prepare timeout passed, then [`aggregate_prepare`]. Silence is not a
//! rejection; whether enough peers took part is judged by the quorum gate.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use super::NodeContext;
use crate::network::bus::{deadline_after, Topic};
use crate::network::messages::{Message, PrepareRequest, PrepareResponse, PrepareStatus, Signed};
use crate::transfer::{Transfer, TransferError};

/// Fold peer prepare statuses into go / no-go.
///
/// Any in-progress rejection means the sender is busy elsewhere; any replay
/// rejection means a peer already finished this transfer; an invalid-request
/// rejection means peers could not authenticate us.
pub fn aggregate_prepare(statuses: &[PrepareStatus]) -> Result<(), TransferError> {
    if statuses
        .iter()
        .any(|s| matches!(s, PrepareStatus::RejectedAccountInProgress))
    {
        return Err(TransferError::AccountLocked);
    }
    if statuses
        .iter()
        .any(|s| matches!(s, PrepareStatus::RejectedTransferReplay))
    {
        return Err(TransferError::Replay);
    }
    if statuses
        .iter()
        .any(|s| matches!(s, PrepareStatus::RejectedRequestNotValid))
    {
        return Err(TransferError::system("peer rejected prepare request as not valid"));
    }
    Ok(())
}

pub struct PrepareCoordinator {
    ctx: Arc<NodeContext>,
}

impl PrepareCoordinator {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    // -----------------------------------------------------------------------
    // Peer side
    // -----------------------------------------------------------------------

    /// Decide how to answer a prepare request. Locks the sender on approval.
    pub fn evaluate(&self, request: &Signed<PrepareRequest>) -> PrepareStatus {
        if let Err(e) = self.ctx.authenticate(request) {
            warn!(signer = %request.signer, error = %e, "rejecting unauthenticated prepare request");
            return PrepareStatus::RejectedRequestNotValid;
        }

        let transfer = &request.body.transfer;
        if self.ctx.transfers.contains(&transfer.id) {
            return PrepareStatus::RejectedTransferReplay;
        }
        if self.ctx.locks.is_locked_by_other(&transfer.from, &transfer.id) {
            return PrepareStatus::RejectedAccountInProgress;
        }

        let Some(sender) = self.ctx.accounts.find(&transfer.from) else {
            return PrepareStatus::ApprovedNoAccountOnFile;
        };
        if !self.ctx.locks.try_lock(&transfer.from, &transfer.id) {
            return PrepareStatus::RejectedAccountInProgress;
        }

        PrepareStatus::Approved {
            balance: sender.balance,
            height: sender.height,
            chain_hash: sender.chain_hash,
        }
    }

    /// Answer a prepare request on the requester's reply channel.
    pub async fn handle_request(&self, request: Signed<PrepareRequest>) {
        let status = self.evaluate(&request);
        debug!(
            transfer = %request.body.transfer.id,
            coordinator = %request.signer,
            status = ?status,
            "prepare evaluated"
        );

        let reply = PrepareResponse {
            correlation: request.body.correlation,
            transfer_id: request.body.transfer.id.clone(),
            status,
        };
        let reply = match self.ctx.seal(reply) {
            Ok(signed) => signed,
            Err(e) => {
                error!(error = %e, "failed to sign prepare response");
                return;
            }
        };
        if let Err(e) = self
            .ctx
            .bus
            .send_to(&request.signer, Message::PrepareReply(reply))
            .await
        {
            warn!(to = %request.signer, error = %e, "failed to deliver prepare response");
        }
    }

    // -----------------------------------------------------------------------
    // Coordinator side
    // -----------------------------------------------------------------------

    /// Run the prepare round for `transfer`. Returns how many peers answered.
    pub async fn prepare(&self, transfer: &Transfer) -> Result<usize, TransferError> {
        let mut waiting: HashSet<_> = self.ctx.topology.peer_ids().into_iter().collect();
        if waiting.is_empty() {
            return Ok(0);
        }

        let correlation = Uuid::new_v4();
        let mut replies = self.ctx.replies.subscribe(correlation);
        let request = self
            .ctx
            .seal(PrepareRequest {
                correlation,
                transfer: transfer.clone(),
            })
            .map_err(TransferError::system)?;
        self.ctx
            .bus
            .publish(Topic::Prepare, Message::Prepare(request))
            .await
            .map_err(TransferError::system)?;

        let deadline = deadline_after(self.ctx.config.prepare_timeout());
        let mut statuses = Vec::with_capacity(waiting.len());
        while !waiting.is_empty() {
            let Some(message) = replies.recv_until(deadline).await else {
                break;
            };
            let Message::PrepareReply(reply) = message else {
                continue;
            };
            if reply.body.transfer_id != transfer.id || !waiting.contains(&reply.signer) {
                continue;
            }
            if let Err(e) = self.ctx.authenticate(&reply) {
                warn!(transfer = %transfer.id, error = %e, "dropping unauthenticated prepare response");
                continue;
            }
            waiting.remove(&reply.signer);
            statuses.push(reply.body.status);
        }

        if !waiting.is_empty() {
            debug!(
                transfer = %transfer.id,
                answered = statuses.len(),
                missing = waiting.len(),
                "prepare window closed with peers silent"
            );
        }
        aggregate_prepare(&statuses)?;
        Ok(statuses.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::testkit::{cluster, funded, new_account_id, transfer};
    use crate::crypto::keys::Keypair;
    use crate::network::topology::NodeId;
    use crate::transfer::TransferId;
    use crate::ledger::{AccountStore, TransferOutcome, TransferStore};
    use rstest::rstest;

    fn request_from(
        coordinator: &NodeContext,
        transfer: Transfer,
    ) -> Signed<PrepareRequest> {
        coordinator
            .seal(PrepareRequest {
                correlation: Uuid::new_v4(),
                transfer,
            })
            .unwrap()
    }

    #[rstest]
    #[case(vec![], Ok(()))]
    #[case(vec![PrepareStatus::ApprovedNoAccountOnFile], Ok(()))]
    #[case(
        vec![PrepareStatus::ApprovedNoAccountOnFile, PrepareStatus::RejectedAccountInProgress],
        Err(TransferError::AccountLocked)
    )]
    #[case(
        vec![PrepareStatus::RejectedTransferReplay, PrepareStatus::ApprovedNoAccountOnFile],
        Err(TransferError::Replay)
    )]
    #[case(
        vec![PrepareStatus::RejectedTransferReplay, PrepareStatus::RejectedAccountInProgress],
        Err(TransferError::AccountLocked)
    )]
    fn aggregation(
        #[case] statuses: Vec<PrepareStatus>,
        #[case] expected: Result<(), TransferError>,
    ) {
        assert_eq!(aggregate_prepare(&statuses), expected);
    }

    #[test]
    fn not_valid_maps_to_system_error() {
        let err = aggregate_prepare(&[PrepareStatus::RejectedRequestNotValid]).unwrap_err();
        assert!(matches!(err, TransferError::System(_)));
    }

    #[test]
    fn approves_and_locks_known_sender() {
        let (_net, nodes) = cluster(&["a", "b"]);
        let (owner, account) = funded("10");
        nodes[1].accounts.save(account.clone());
        let t = transfer(&owner, new_account_id(), "1");

        let peer = PrepareCoordinator::new(nodes[1].ctx.clone());
        let status = peer.evaluate(&request_from(&nodes[0].ctx, t.clone()));
        assert_eq!(
            status,
            PrepareStatus::Approved {
                balance: account.balance,
                height: account.height,
                chain_hash: account.chain_hash,
            }
        );
        assert_eq!(nodes[1].ctx.locks.holder(&t.from), Some(t.id));
    }

    #[test]
    fn unknown_sender_gets_no_opinion_and_no_lock() {
        let (_net, nodes) = cluster(&["a", "b"]);
        let (owner, _) = funded("10");
        let t = transfer(&owner, new_account_id(), "1");

        let peer = PrepareCoordinator::new(nodes[1].ctx.clone());
        assert_eq!(
            peer.evaluate(&request_from(&nodes[0].ctx, t.clone())),
            PrepareStatus::ApprovedNoAccountOnFile
        );
        assert!(!nodes[1].ctx.locks.is_locked(&t.from));
    }

    #[test]
    fn busy_sender_rejected() {
        let (_net, nodes) = cluster(&["a", "b"]);
        let (owner, account) = funded("10");
        nodes[1].accounts.save(account);
        let t = transfer(&owner, new_account_id(), "1");
        let other = TransferId::new(Keypair::generate().sign(b"other"));
        nodes[1].ctx.locks.try_lock(&t.from, &other);

        let peer = PrepareCoordinator::new(nodes[1].ctx.clone());
        assert_eq!(
            peer.evaluate(&request_from(&nodes[0].ctx, t)),
            PrepareStatus::RejectedAccountInProgress
        );
    }

    #[test]
    fn terminal_transfer_rejected_as_replay() {
        let (_net, nodes) = cluster(&["a", "b"]);
        let (owner, account) = funded("10");
        nodes[1].accounts.save(account);
        let t = transfer(&owner, new_account_id(), "1");
        nodes[1].transfers.record(t.id.clone(), TransferOutcome::Settled);

        let peer = PrepareCoordinator::new(nodes[1].ctx.clone());
        assert_eq!(
            peer.evaluate(&request_from(&nodes[0].ctx, t)),
            PrepareStatus::RejectedTransferReplay
        );
    }

    #[test]
    fn forged_request_rejected_without_side_effects() {
        let (_net, nodes) = cluster(&["a", "b"]);
        let (owner, account) = funded("10");
        nodes[1].accounts.save(account);
        let t = transfer(&owner, new_account_id(), "1");
        let forged = Signed::seal(
            &Keypair::generate(),
            NodeId::new("a"),
            PrepareRequest {
                correlation: Uuid::new_v4(),
                transfer: t.clone(),
            },
        )
        .unwrap();

        let peer = PrepareCoordinator::new(nodes[1].ctx.clone());
        assert_eq!(peer.evaluate(&forged), PrepareStatus::RejectedRequestNotValid);
        assert!(!nodes[1].ctx.locks.is_locked(&t.from));
    }

    #[tokio::test]
    async fn reply_is_signed_and_routed_to_requester() {
        let (_net, mut nodes) = cluster(&["a", "b"]);
        let (owner, _) = funded("10");
        let t = transfer(&owner, new_account_id(), "1");
        let request = request_from(&nodes[0].ctx, t.clone());

        PrepareCoordinator::new(nodes[1].ctx.clone())
            .handle_request(request.clone())
            .await;

        let Ok(Message::PrepareReply(reply)) = nodes[0].inbox.try_recv() else {
            panic!("expected a prepare reply in the coordinator inbox");
        };
        assert!(nodes[0].ctx.authenticate(&reply).is_ok());
        assert_eq!(reply.body.correlation, request.body.correlation);
        assert_eq!(reply.body.transfer_id, t.id);
    }

    #[tokio::test]
    async fn lone_node_has_nothing_to_prepare() {
        let (_net, nodes) = cluster(&["solo"]);
        let (owner, _) = funded("10");
        let coordinator = PrepareCoordinator::new(nodes[0].ctx.clone());
        assert_eq!(
            coordinator
                .prepare(&transfer(&owner, new_account_id(), "1"))
                .await,
            Ok(0)
        );
    }
}
