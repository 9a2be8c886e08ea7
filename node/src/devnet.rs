//! # Devnet
//!
//! A local cluster of validation nodes sharing one in-process message bus.
//! Every node has its own key, account store and transfer store, and runs its
//! inbound loop on the current runtime.
//!
//! When a topology path is given, the generated node list is written there
//! and each node re-reads it on every topology refresh tick.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ledgerline_protocol::config::NodeConfig;
use ledgerline_protocol::consensus::NodeContext;
use ledgerline_protocol::crypto::keys::Keypair;
use ledgerline_protocol::ledger::{Account, AccountStore, InMemoryAccountStore, InMemoryTransferStore};
use ledgerline_protocol::network::{
    MemoryNetwork, NodeDescriptor, NodeId, Topology, TopologyDirectory, ValidationNode,
};
use ledgerline_protocol::transfer::TransferId;

/// Shortest interval between topology file reloads.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

pub struct Devnet {
    network: Arc<MemoryNetwork>,
    nodes: Vec<Arc<ValidationNode>>,
    stores: Vec<Arc<InMemoryAccountStore>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Devnet {
    /// Boot `size` nodes named `node-0`, `node-1`, ...
    pub fn boot(size: usize, config: &NodeConfig, topology_out: Option<&Path>) -> Result<Self> {
        anyhow::ensure!(size > 0, "a devnet needs at least one node");

        let keys: Vec<Keypair> = (0..size).map(|_| Keypair::generate()).collect();
        let descriptors: Vec<NodeDescriptor> = keys
            .iter()
            .enumerate()
            .map(|(i, kp)| NodeDescriptor {
                id: NodeId::new(format!("node-{i}")),
                public_key: kp.public_key(),
                endpoint: format!("memory://node-{i}"),
            })
            .collect();

        if let Some(path) = topology_out {
            let json = serde_json::to_string_pretty(&descriptors)?;
            std::fs::write(path, json)
                .with_context(|| format!("failed to write topology to {}", path.display()))?;
            info!(path = %path.display(), nodes = size, "topology written");
        }
        let topology = Topology::new(descriptors.clone()).context("generated topology is invalid")?;

        let network = MemoryNetwork::new();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut nodes = Vec::with_capacity(size);
        let mut stores = Vec::with_capacity(size);
        let mut tasks = Vec::new();

        for (descriptor, keypair) in descriptors.into_iter().zip(keys) {
            let (endpoint, inbox) = network.join(descriptor.id.clone());
            let accounts = Arc::new(InMemoryAccountStore::new());
            let directory = Arc::new(TopologyDirectory::new(descriptor.id, topology.clone()));
            let ctx = NodeContext::new(
                keypair,
                config.clone(),
                directory.clone(),
                accounts.clone(),
                Arc::new(InMemoryTransferStore::new()),
                Arc::new(endpoint),
            );
            let node = Arc::new(ValidationNode::new(ctx));

            tasks.push(tokio::spawn(Arc::clone(&node).run(inbox, shutdown_rx.clone())));
            if let Some(path) = topology_out {
                tasks.push(tokio::spawn(refresh_topology(
                    directory,
                    path.to_path_buf(),
                    config.topology_refresh().max(MIN_REFRESH_INTERVAL),
                    shutdown_rx.clone(),
                )));
            }
            nodes.push(node);
            stores.push(accounts);
        }

        info!(nodes = size, "devnet booted");
        Ok(Self {
            network,
            nodes,
            stores,
            shutdown,
            tasks,
        })
    }

    pub fn nodes(&self) -> &[Arc<ValidationNode>] {
        &self.nodes
    }

    /// Put `account` on every node's store.
    pub fn fund(&self, account: &Account) {
        for store in &self.stores {
            store.save(account.clone());
        }
    }

    /// Cut `count` nodes off the bus, starting from the last one.
    pub fn cut_off(&self, count: usize) {
        for node in self.nodes.iter().rev().take(count) {
            warn!(node = %node.node_id(), "disconnecting node");
            self.network.disconnect(node.node_id());
        }
    }

    /// Wait until every reachable node recorded an outcome for `id` and
    /// holds no locks, or `wait` passes.
    pub async fn settle_everywhere(&self, id: &TransferId, wait: Duration) -> bool {
        let reachable: Vec<_> = self
            .nodes
            .iter()
            .filter(|node| self.network.is_connected(node.node_id()))
            .collect();
        let quiet = tokio::time::timeout(wait, async {
            loop {
                if reachable
                    .iter()
                    .all(|node| node.transfer_outcome(id).is_some() && node.locks().is_empty())
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        quiet.is_ok()
    }

    /// Stop every node loop and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "devnet task ended abnormally");
            }
        }
        info!("devnet stopped");
    }
}

async fn refresh_topology(
    directory: Arc<TopologyDirectory>,
    path: PathBuf,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => match directory.refresh_from_file(&path) {
                Ok(changed) => debug!(node = %directory.local_id(), changed, "topology refreshed"),
                Err(e) => warn!(node = %directory.local_id(), error = %e, "topology refresh failed"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
