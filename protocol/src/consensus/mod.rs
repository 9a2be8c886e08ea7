//! # Transfer Consensus
//!
//! The commit path of a transfer once local validation has passed:
//!
//! ```text
//! prepare.rs     lock-and-snapshot handshake on the sender account
//! quorum.rs      "get accounts" broadcast, per-peer confirmations
//! engine.rs      quorum gate, vetoes, snapshot reconciliation, ledger mutation
//! settlement.rs  publish the signed outcome, apply it locally
//! balance.rs     best-effort cross-node balance reads (not on the commit path)
//! ```
//!
//! Each component has a coordinator side (driven by the node that accepted
//! the client request) and a peer side (driven by inbound messages). Both
//! sides share one [`NodeContext`].
//!
//! ## Invariants
//!
//! - Every inbound record is authenticated against the topology before it
//!   has any side effect.
//! - The account store is written only when a settlement is applied.
//! - A transfer id that reached a terminal state is never processed again.

pub mod balance;
pub mod engine;
pub mod prepare;
pub mod quorum;
pub mod settlement;

use std::sync::Arc;

use serde::Serialize;

use crate::config::NodeConfig;
use crate::crypto::keys::Keypair;
use crate::ledger::{AccountLockCache, AccountStore, TransferStore};
use crate::network::bus::{MessageBus, ReplyRouter};
use crate::network::messages::{AuthError, Signed};
use crate::network::topology::{NodeId, TopologyDirectory};
use crate::transfer::Transfer;

pub use balance::{BalanceCache, BalanceResolver};
pub use engine::{decide, ConsensusEngine, Decision};
pub use prepare::{aggregate_prepare, PrepareCoordinator};
pub use quorum::QuorumCollector;
pub use settlement::SettlementBroadcaster;

/// Everything a node's consensus components share.
pub struct NodeContext {
    keypair: Keypair,
    pub config: NodeConfig,
    pub topology: Arc<TopologyDirectory>,
    pub accounts: Arc<dyn AccountStore>,
    pub transfers: Arc<dyn TransferStore>,
    pub locks: Arc<AccountLockCache>,
    pub bus: Arc<dyn MessageBus>,
    pub replies: ReplyRouter,
}

impl NodeContext {
    pub fn new(
        keypair: Keypair,
        config: NodeConfig,
        topology: Arc<TopologyDirectory>,
        accounts: Arc<dyn AccountStore>,
        transfers: Arc<dyn TransferStore>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            keypair,
            config,
            topology,
            accounts,
            transfers,
            locks: Arc::new(AccountLockCache::new()),
            bus,
            replies: ReplyRouter::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        self.topology.local_id()
    }

    /// Sign `body` as this node.
    pub fn seal<T: Serialize>(&self, body: T) -> Result<Signed<T>, AuthError> {
        Signed::seal(&self.keypair, self.node_id().clone(), body)
    }

    /// Authenticate an inbound record against the current topology.
    pub fn authenticate<T: Serialize>(&self, record: &Signed<T>) -> Result<(), AuthError> {
        record.verify(&self.topology.snapshot())
    }

    /// Release every lock `transfer` holds on this node.
    pub fn release_transfer_locks(&self, transfer: &Transfer) {
        for account in transfer.accounts() {
            self.locks.release(account, &transfer.id);
        }
    }
}
