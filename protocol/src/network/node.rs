//! # Validation Node
//!
//! The top-level runtime entity for one validator. Owns the consensus
//! components and drives a client transfer through its lifecycle:
//!
//! ```text
//! RECEIVED -> VALIDATING -> PREPARING -> COLLECTING_CONFIRMATIONS -> SETTLED | FAILED
//! ```
//!
//! Local validation failures return before anything is sent, and so does a
//! sender or recipient already locked on this node. From prepare onwards
//! every failure is broadcast as a `FailureRecord` so peers release their
//! locks.
//!
//! Inbound traffic is handled by [`ValidationNode::run`], one task per
//! message. Replies are routed to whichever collection is waiting for them;
//! everything else goes to the peer-side handler of the matching component.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::consensus::{
    BalanceResolver, ConsensusEngine, NodeContext, PrepareCoordinator, QuorumCollector,
    SettlementBroadcaster,
};
use crate::identity::AccountId;
use crate::ledger::{Account, AccountLockCache, TransferOutcome};
use crate::network::messages::{Message, SettlementRecord};
use crate::network::topology::{NodeId, TopologyDirectory};
use crate::transfer::{
    Transfer, TransferError, TransferId, TransferRequest, TransferState, TransferValidator,
    UnconfirmedTransfer,
};

/// Shortest interval between stale lock sweeps.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct ValidationNode {
    ctx: Arc<NodeContext>,
    validator: TransferValidator,
    prepare: PrepareCoordinator,
    quorum: QuorumCollector,
    engine: ConsensusEngine,
    broadcaster: Arc<SettlementBroadcaster>,
    balances: BalanceResolver,
    /// Transfers this node is coordinating right now.
    in_flight: DashSet<TransferId>,
}

impl ValidationNode {
    pub fn new(ctx: NodeContext) -> Self {
        Self::with_context(Arc::new(ctx))
    }

    /// Build around a context other components already share.
    pub fn with_context(ctx: Arc<NodeContext>) -> Self {
        let broadcaster = Arc::new(SettlementBroadcaster::new(ctx.clone()));
        Self {
            validator: TransferValidator::new(ctx.accounts.clone(), ctx.transfers.clone()),
            prepare: PrepareCoordinator::new(ctx.clone()),
            quorum: QuorumCollector::new(ctx.clone()),
            engine: ConsensusEngine::new(ctx.clone(), broadcaster.clone()),
            balances: BalanceResolver::new(ctx.clone()),
            broadcaster,
            in_flight: DashSet::new(),
            ctx,
        }
    }

    // -----------------------------------------------------------------------
    // Client side
    // -----------------------------------------------------------------------

    /// Validate, agree on and settle a client transfer.
    pub async fn submit(&self, request: TransferRequest) -> Result<SettlementRecord, TransferError> {
        let transfer = match self.validator.validate(&request) {
            Ok(transfer) => transfer,
            Err(err) => {
                debug!(node = %self.node_id(), code = %err.code(), "transfer request rejected locally");
                return Err(err);
            }
        };

        if !self.in_flight.insert(transfer.id.clone()) {
            return Err(TransferError::Replay);
        }
        let id = transfer.id.clone();
        let result = self.coordinate(transfer).await;
        self.in_flight.remove(&id);
        result
    }

    async fn coordinate(&self, transfer: Transfer) -> Result<SettlementRecord, TransferError> {
        // Both ends held until the outcome is applied.
        let Some(_sender_lock) = self.ctx.locks.guard(&transfer.from, &transfer.id) else {
            debug!(transfer = %transfer.id, account = %transfer.from, "sender busy with another transfer");
            return Err(TransferError::AccountLocked);
        };
        let Some(_recipient_lock) = self.ctx.locks.guard(&transfer.to, &transfer.id) else {
            debug!(transfer = %transfer.id, account = %transfer.to, "recipient busy with another transfer");
            return Err(TransferError::AccountLocked);
        };
        let mut unconfirmed = UnconfirmedTransfer::new(transfer);

        unconfirmed.advance(TransferState::Preparing);
        match self.prepare.prepare(unconfirmed.transfer()).await {
            Ok(answered) => debug!(transfer = %unconfirmed.id(), answered, "prepare complete"),
            Err(err) => {
                warn!(transfer = %unconfirmed.id(), code = %err.code(), "prepare rejected");
                return Err(self.abort(&mut unconfirmed, err).await);
            }
        }

        unconfirmed.advance(TransferState::CollectingConfirmations);
        if let Err(err) = self.quorum.collect(&mut unconfirmed).await {
            return Err(self.abort(&mut unconfirmed, err).await);
        }

        self.engine.conclude(&mut unconfirmed).await
    }

    async fn abort(&self, unconfirmed: &mut UnconfirmedTransfer, err: TransferError) -> TransferError {
        self.broadcaster.fail(unconfirmed.transfer(), &err).await;
        unconfirmed.advance(TransferState::Failed(err.code()));
        err
    }

    /// Best-effort freshest snapshot of `account` across the network.
    pub async fn resolve_balance(&self, account: &AccountId) -> Result<Option<Account>, TransferError> {
        self.balances.resolve(account).await
    }

    // -----------------------------------------------------------------------
    // Peer side
    // -----------------------------------------------------------------------

    /// Dispatch one inbound message.
    pub async fn handle(&self, message: Message) {
        match message {
            Message::Prepare(request) => self.prepare.handle_request(request).await,
            Message::Accounts(request) => self.quorum.handle_request(request).await,
            Message::Settlement(record) => self.broadcaster.handle_settlement(&record),
            Message::Failure(record) => self.broadcaster.handle_failure(&record),
            Message::Balance(request) => self.balances.handle_request(request).await,
            Message::BalanceUpdate(update) => self.balances.handle_update(&update),
            reply @ (Message::PrepareReply(_)
            | Message::AccountsReply(_)
            | Message::BalanceReply(_)) => self.route_reply(reply),
        }
    }

    fn route_reply(&self, reply: Message) {
        let Some(correlation) = reply.reply_correlation() else {
            return;
        };
        let kind = reply.kind();
        let from = reply.signer().clone();
        if !self.ctx.replies.deliver(correlation, reply) {
            debug!(kind, from = %from, %correlation, "late reply dropped");
        }
    }

    /// Inbound loop. Runs until the inbox closes or `shutdown` flips.
    pub async fn run(
        self: Arc<Self>,
        mut inbox: mpsc::UnboundedReceiver<Message>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            node = %self.node_id(),
            peers = self.ctx.topology.peer_count(),
            "validation node starting"
        );

        let mut sweep = tokio::time::interval(self.ctx.config.lock_ttl().max(MIN_SWEEP_INTERVAL));
        sweep.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => {
                        let node = Arc::clone(&self);
                        tokio::spawn(async move { node.handle(message).await });
                    }
                    None => {
                        info!(node = %self.node_id(), "inbox closed");
                        break;
                    }
                },
                _ = sweep.tick() => {
                    self.sweep_stale_locks();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(node = %self.node_id(), "validation node stopped");
    }

    /// Free peer-side locks whose coordinator never sent an outcome.
    pub fn sweep_stale_locks(&self) -> usize {
        let expired = self.ctx.locks.expire_stale(self.ctx.config.lock_ttl());
        if expired > 0 {
            warn!(node = %self.node_id(), expired, "expired stale account locks");
        }
        expired
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn node_id(&self) -> &NodeId {
        self.ctx.node_id()
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn topology(&self) -> &Arc<TopologyDirectory> {
        &self.ctx.topology
    }

    pub fn locks(&self) -> &AccountLockCache {
        &self.ctx.locks
    }

    /// This node's stored snapshot of `id`.
    pub fn account(&self, id: &AccountId) -> Option<Account> {
        self.ctx.accounts.find(id)
    }

    pub fn transfer_outcome(&self, id: &TransferId) -> Option<TransferOutcome> {
        self.ctx.transfers.outcome(id)
    }

    pub fn cached_balance(&self, id: &AccountId) -> Option<Account> {
        self.balances.cached(id)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
