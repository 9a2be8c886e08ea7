//! In-process transport.
//!
//! Every node that joins a [`MemoryNetwork`] gets an unbounded inbox and a
//! [`MemoryEndpoint`] implementing [`MessageBus`]. Publishing fans a message
//! out to every other connected node; `send_to` delivers to one.
//!
//! Nodes can be disconnected to simulate an unreachable peer: a disconnected
//! node receives nothing and its own sends fail.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use super::bus::{BusError, MessageBus, Topic};
use super::messages::Message;
use super::topology::NodeId;

/// Shared routing table of an in-process network.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    inboxes: DashMap<NodeId, mpsc::UnboundedSender<Message>>,
    disconnected: RwLock<HashSet<NodeId>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `node` and return its bus handle and inbox.
    pub fn join(
        self: &Arc<Self>,
        node: NodeId,
    ) -> (MemoryEndpoint, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.insert(node.clone(), tx);
        let endpoint = MemoryEndpoint {
            network: Arc::clone(self),
            local: node,
        };
        (endpoint, rx)
    }

    pub fn disconnect(&self, node: &NodeId) {
        self.disconnected.write().insert(node.clone());
    }

    pub fn reconnect(&self, node: &NodeId) {
        self.disconnected.write().remove(node);
    }

    pub fn is_connected(&self, node: &NodeId) -> bool {
        !self.disconnected.read().contains(node)
    }

    fn deliver(&self, to: &NodeId, message: Message) -> bool {
        if !self.is_connected(to) {
            return false;
        }
        match self.inboxes.get(to) {
            Some(inbox) => inbox.send(message).is_ok(),
            None => false,
        }
    }
}

/// One node's view of a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryEndpoint {
    network: Arc<MemoryNetwork>,
    local: NodeId,
}

impl MemoryEndpoint {
    pub fn local(&self) -> &NodeId {
        &self.local
    }
}

#[async_trait]
impl MessageBus for MemoryEndpoint {
    async fn publish(&self, topic: Topic, message: Message) -> Result<(), BusError> {
        if !self.network.is_connected(&self.local) {
            return Err(BusError::Disconnected(self.local.clone()));
        }
        let recipients: Vec<NodeId> = self
            .network
            .inboxes
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|node| *node != self.local)
            .collect();
        let mut delivered = 0usize;
        for node in &recipients {
            if self.network.deliver(node, message.clone()) {
                delivered += 1;
            }
        }
        debug!(
            from = %self.local,
            topic = %topic,
            kind = message.kind(),
            delivered,
            "published"
        );
        Ok(())
    }

    async fn send_to(&self, node: &NodeId, message: Message) -> Result<(), BusError> {
        if !self.network.is_connected(&self.local) {
            return Err(BusError::Disconnected(self.local.clone()));
        }
        if !self.network.inboxes.contains_key(node) {
            return Err(BusError::UnknownNode(node.clone()));
        }
        // An unreachable peer looks like silence, not an error.
        if !self.network.deliver(node, message) {
            debug!(from = %self.local, to = %node, "dropped message to unreachable node");
        }
        Ok(())
    }
}
