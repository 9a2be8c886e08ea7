//! End-to-end integration tests for the Ledgerline Protocol.
//!
//! Each test boots a small cluster of validation nodes on the in-process
//! message bus, runs their inbound loops and drives client transfers through
//! one of them. They prove the consensus components compose correctly:
//! validation, prepare, quorum collection, decision, settlement broadcast
//! and the resulting ledger state on every node.
//!
//! Every test owns its cluster. No shared state, no ordering dependencies.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;

use ledgerline_protocol::config::{NodeConfig, GENESIS_CHAIN_HASH, GENESIS_HEIGHT};
use ledgerline_protocol::consensus::NodeContext;
use ledgerline_protocol::crypto::hash::next_chain_hash;
use ledgerline_protocol::crypto::keys::{Keypair, Signature};
use ledgerline_protocol::identity::{AccountId, Curve};
use ledgerline_protocol::ledger::{
    Account, AccountStore, InMemoryAccountStore, InMemoryTransferStore, TransferOutcome,
};
use ledgerline_protocol::network::{
    MemoryNetwork, NodeDescriptor, NodeId, Topology, TopologyDirectory, ValidationNode,
};
use ledgerline_protocol::transfer::{ErrorCode, TransferError, TransferId, TransferRequest};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct Cluster {
    network: Arc<MemoryNetwork>,
    nodes: Vec<Arc<ValidationNode>>,
    stores: Vec<Arc<InMemoryAccountStore>>,
    _shutdown: watch::Sender<bool>,
}

impl Cluster {
    /// `size` nodes, all running, all knowing each other.
    fn start(size: usize, config: NodeConfig) -> Self {
        let keys: Vec<Keypair> = (0..size).map(|_| Keypair::generate()).collect();
        let ids: Vec<NodeId> = (0..size).map(|i| NodeId::new(format!("node-{i}"))).collect();
        let topology = Topology::new(
            ids.iter()
                .zip(&keys)
                .map(|(id, kp)| NodeDescriptor {
                    id: id.clone(),
                    public_key: kp.public_key(),
                    endpoint: String::new(),
                })
                .collect(),
        )
        .expect("valid topology");

        let network = MemoryNetwork::new();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut nodes = Vec::new();
        let mut stores = Vec::new();
        for (id, keypair) in ids.into_iter().zip(keys) {
            let (endpoint, inbox) = network.join(id.clone());
            let accounts = Arc::new(InMemoryAccountStore::new());
            let ctx = NodeContext::new(
                keypair,
                config.clone(),
                Arc::new(TopologyDirectory::new(id, topology.clone())),
                accounts.clone(),
                Arc::new(InMemoryTransferStore::new()),
                Arc::new(endpoint),
            );
            let node = Arc::new(ValidationNode::new(ctx));
            tokio::spawn(Arc::clone(&node).run(inbox, shutdown_rx.clone()));
            nodes.push(node);
            stores.push(accounts);
        }

        Self {
            network,
            nodes,
            stores,
            _shutdown: shutdown,
        }
    }

    /// Put `account` on every node.
    fn seed(&self, account: &Account) {
        for store in &self.stores {
            store.save(account.clone());
        }
    }

    fn disconnect(&self, index: usize) {
        self.network.disconnect(self.nodes[index].node_id());
    }
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn funded(balance: &str) -> (Keypair, Account) {
    let kp = Keypair::generate();
    let id = AccountId::from_public_key(Curve::Ed25519, &kp.public_key());
    (kp, Account::new(id, dec(balance)))
}

fn fresh_account() -> AccountId {
    AccountId::from_public_key(Curve::Ed25519, &Keypair::generate().public_key())
}

fn request(owner: &Keypair, to: &AccountId, amount: &str) -> TransferRequest {
    TransferRequest::signed(owner, to, amount, "e2e").expect("sign request")
}

fn id_of(request: &TransferRequest) -> TransferId {
    TransferId::new(Signature::from_hex(&request.signature).expect("hex signature"))
}

/// Wait until `check` holds, polling on the tokio clock.
async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transfer_settles_on_every_node() {
    let cluster = Cluster::start(4, NodeConfig::default());
    let (owner, sender) = funded("10.0");
    cluster.seed(&sender);
    let recipient = fresh_account();
    let req = request(&owner, &recipient, "1.0");
    let id = id_of(&req);

    let record = cluster.nodes[0].submit(req).await.expect("transfer settles");

    assert_eq!(record.from.balance, dec("8.9999"));
    assert_eq!(record.from.height, sender.height + 1);
    assert_eq!(
        record.from.chain_hash,
        next_chain_hash(&sender.chain_hash, id.as_bytes())
    );
    // First transfer to an unseen address creates it.
    assert_eq!(record.to.id, recipient);
    assert_eq!(record.to.balance, dec("1.0"));
    assert_eq!(record.to.height, GENESIS_HEIGHT + 1);
    assert_eq!(
        record.to.chain_hash,
        next_chain_hash(&GENESIS_CHAIN_HASH, id.as_bytes())
    );

    eventually(|| {
        cluster
            .nodes
            .iter()
            .all(|node| node.transfer_outcome(&id) == Some(TransferOutcome::Settled))
    })
    .await;
    for node in &cluster.nodes {
        assert_eq!(node.account(&sender.id), Some(record.from.clone()));
        assert_eq!(node.account(&recipient), Some(record.to.clone()));
        assert!(node.locks().is_empty(), "{} kept a lock", node.node_id());
    }
}

#[tokio::test]
async fn consecutive_transfers_extend_the_chain() {
    let cluster = Cluster::start(3, NodeConfig::default());
    let (owner, sender) = funded("5");
    cluster.seed(&sender);
    let recipient = fresh_account();

    let first = cluster.nodes[0]
        .submit(request(&owner, &recipient, "1"))
        .await
        .unwrap();
    eventually(|| {
        cluster.nodes.iter().all(|node| {
            node.account(&sender.id) == Some(first.from.clone()) && node.locks().is_empty()
        })
    })
    .await;

    // Coordinated by a different node this time.
    let second = cluster.nodes[1]
        .submit(request(&owner, &recipient, "2"))
        .await
        .unwrap();

    assert_eq!(second.from.height, 2);
    assert_eq!(second.from.balance, dec("1.9998"));
    assert_eq!(second.to.height, 2);
    assert_eq!(second.to.balance, dec("3"));
    assert!(second.from.follows(&first.from, &second.transfer.id));
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resubmission_is_replay() {
    let cluster = Cluster::start(3, NodeConfig::default());
    let (owner, sender) = funded("10");
    cluster.seed(&sender);
    let req = request(&owner, &fresh_account(), "1");
    let id = id_of(&req);

    cluster.nodes[0].submit(req.clone()).await.unwrap();
    assert_eq!(
        cluster.nodes[0].submit(req.clone()).await,
        Err(TransferError::Replay)
    );

    eventually(|| cluster.nodes[2].transfer_outcome(&id).is_some()).await;
    assert_eq!(cluster.nodes[2].submit(req).await, Err(TransferError::Replay));
}

#[tokio::test]
async fn insufficient_funds_rejected_before_broadcast() {
    let cluster = Cluster::start(4, NodeConfig::default());
    let (owner, sender) = funded("0.5");
    cluster.seed(&sender);
    let req = request(&owner, &fresh_account(), "1.0");
    let id = id_of(&req);

    assert_eq!(
        cluster.nodes[0].submit(req).await,
        Err(TransferError::InsufficientFunds)
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    for node in &cluster.nodes {
        assert_eq!(node.transfer_outcome(&id), None);
        assert!(node.locks().is_empty());
        assert_eq!(node.account(&sender.id), Some(sender.clone()));
    }
}

#[tokio::test(start_paused = true)]
async fn too_few_confirmations_is_not_confirmed() {
    let cluster = Cluster::start(5, NodeConfig::default());
    let (owner, sender) = funded("10");
    cluster.seed(&sender);
    for unreachable in 2..5 {
        cluster.disconnect(unreachable);
    }
    let req = request(&owner, &fresh_account(), "1");
    let id = id_of(&req);

    // Four peers, one answer: 1 < 4 / 2.
    assert_eq!(
        cluster.nodes[0].submit(req).await,
        Err(TransferError::NotConfirmed)
    );

    assert_eq!(
        cluster.nodes[0].transfer_outcome(&id),
        Some(TransferOutcome::Failed(ErrorCode::NotConfirmed))
    );
    eventually(|| cluster.nodes[1].transfer_outcome(&id).is_some()).await;
    assert_eq!(
        cluster.nodes[1].transfer_outcome(&id),
        Some(TransferOutcome::Failed(ErrorCode::NotConfirmed))
    );
    assert!(cluster.nodes[1].locks().is_empty());
    assert_eq!(cluster.nodes[0].account(&sender.id), Some(sender));
}

#[tokio::test(start_paused = true)]
async fn half_the_peers_is_enough() {
    let cluster = Cluster::start(5, NodeConfig::default());
    let (owner, sender) = funded("10");
    cluster.seed(&sender);
    cluster.disconnect(3);
    cluster.disconnect(4);

    // Four peers, two answers: 2 is not below 4 / 2.
    let record = cluster.nodes[0]
        .submit(request(&owner, &fresh_account(), "1"))
        .await
        .unwrap();
    assert_eq!(record.from.balance, dec("8.9999"));
}

#[tokio::test]
async fn single_lock_veto_beats_majority() {
    let cluster = Cluster::start(4, NodeConfig::default());
    let (owner, sender) = funded("10");
    cluster.seed(&sender);
    let recipient = fresh_account();
    let blocker = TransferId::new(Keypair::generate().sign(b"elsewhere"));
    cluster.nodes[3].locks().try_lock(&recipient, &blocker);

    let req = request(&owner, &recipient, "1");
    let id = id_of(&req);
    assert_eq!(
        cluster.nodes[0].submit(req).await,
        Err(TransferError::AccountLocked)
    );

    eventually(|| {
        cluster.nodes.iter().all(|node| {
            node.transfer_outcome(&id) == Some(TransferOutcome::Failed(ErrorCode::AccountLocked))
        })
    })
    .await;
    for node in &cluster.nodes {
        assert_eq!(node.account(&sender.id), Some(sender.clone()));
        assert!(!node.locks().is_locked(&sender.id));
    }
    // The unrelated lock survives the failure.
    assert_eq!(cluster.nodes[3].locks().holder(&recipient), Some(blocker));
}

#[tokio::test]
async fn peers_with_fresher_state_catch_overspend() {
    let cluster = Cluster::start(4, NodeConfig::default());
    let (owner, sender) = funded("10");
    // The coordinator missed a transfer the peers saw.
    cluster.stores[0].save(sender.clone());
    let spent = sender
        .debit(dec("9.5"), &TransferId::new(owner.sign(b"earlier")))
        .unwrap();
    for store in &cluster.stores[1..] {
        store.save(spent.clone());
    }

    let req = request(&owner, &fresh_account(), "1");
    let id = id_of(&req);
    assert_eq!(
        cluster.nodes[0].submit(req).await,
        Err(TransferError::InsufficientFunds)
    );
    eventually(|| {
        cluster.nodes[1].transfer_outcome(&id)
            == Some(TransferOutcome::Failed(ErrorCode::InsufficientFunds))
    })
    .await;
}

#[tokio::test]
async fn concurrent_transfers_from_one_sender_on_one_node() {
    let cluster = Cluster::start(3, NodeConfig::default());
    let (owner, sender) = funded("10");
    cluster.seed(&sender);

    let (a, b) = tokio::join!(
        cluster.nodes[0].submit(request(&owner, &fresh_account(), "1")),
        cluster.nodes[0].submit(request(&owner, &fresh_account(), "2")),
    );

    assert!(a.is_ok());
    assert_eq!(b, Err(TransferError::AccountLocked));
}

#[tokio::test]
async fn independent_senders_settle_in_parallel() {
    let cluster = Cluster::start(4, NodeConfig::default());
    let wallets: Vec<_> = (0..4).map(|_| funded("3")).collect();
    for (_, account) in &wallets {
        cluster.seed(account);
    }

    let submissions = wallets.iter().enumerate().map(|(i, (owner, _))| {
        cluster.nodes[i % cluster.nodes.len()].submit(request(owner, &fresh_account(), "1"))
    });
    let results = futures::future::join_all(submissions).await;

    for (result, (_, account)) in results.iter().zip(&wallets) {
        let record = result.as_ref().expect("independent transfer settles");
        assert_eq!(record.from.id, account.id);
        assert_eq!(record.from.balance, dec("1.9999"));
    }
}

#[tokio::test]
async fn conflicting_coordinators_never_both_settle() {
    let cluster = Cluster::start(4, NodeConfig::default());
    let (owner, sender) = funded("10");
    cluster.seed(&sender);

    let (a, b) = tokio::join!(
        cluster.nodes[0].submit(request(&owner, &fresh_account(), "6")),
        cluster.nodes[1].submit(request(&owner, &fresh_account(), "6")),
    );

    assert!(!(a.is_ok() && b.is_ok()), "both conflicting transfers settled");
    tokio::time::sleep(Duration::from_millis(50)).await;
    for node in &cluster.nodes {
        let balance = node.account(&sender.id).unwrap().balance;
        assert!(balance >= Decimal::ZERO);
    }
}

#[tokio::test]
async fn shared_recipient_never_settles_twice_from_one_height() {
    let cluster = Cluster::start(2, NodeConfig::default());
    let (first_owner, first) = funded("10");
    let (second_owner, second) = funded("10");
    cluster.seed(&first);
    cluster.seed(&second);
    let recipient = fresh_account();

    let (a, b) = tokio::join!(
        cluster.nodes[0].submit(request(&first_owner, &recipient, "1")),
        cluster.nodes[1].submit(request(&second_owner, &recipient, "2")),
    );
    assert!(!(a.is_ok() && b.is_ok()), "both credits settled from one height");

    eventually(|| {
        cluster.nodes.iter().all(|node| node.locks().is_empty())
            && cluster.nodes[0].account(&recipient) == cluster.nodes[1].account(&recipient)
    })
    .await;
    let views: Vec<_> = cluster.nodes.iter().map(|n| n.account(&recipient)).collect();

    let credited = [&a, &b]
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|record| record.transfer.amount)
        .sum::<Decimal>();
    let balance = views[0].as_ref().map_or(Decimal::ZERO, |acct| acct.balance);
    assert_eq!(balance, credited);
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

#[tokio::test]
async fn balance_query_returns_freshest_snapshot() {
    let cluster = Cluster::start(3, NodeConfig::default());
    let (owner, sender) = funded("10");
    cluster.seed(&sender);
    let fresher = sender
        .debit(dec("1.0001"), &TransferId::new(owner.sign(b"elsewhere")))
        .unwrap();
    cluster.stores[2].save(fresher.clone());

    let resolved = cluster.nodes[0].resolve_balance(&sender.id).await.unwrap();
    assert_eq!(resolved, Some(fresher.clone()));
    // Read path only.
    assert_eq!(cluster.nodes[0].account(&sender.id), Some(sender));

    // The node that answered with an older snapshot learns the newer one.
    eventually(|| cluster.nodes[1].cached_balance(&fresher.id) == Some(fresher.clone())).await;
}

#[tokio::test]
async fn balance_of_unknown_account_is_absent() {
    let cluster = Cluster::start(3, NodeConfig::default());
    let resolved = cluster.nodes[0]
        .resolve_balance(&fresh_account())
        .await
        .unwrap();
    assert_eq!(resolved, None);
}
