//! # Topology Directory
//!
//! The set of validation nodes this node talks to, with the public key each
//! one signs with. The directory holds an `Arc<Topology>` behind a lock and
//! swaps it atomically on refresh. Readers take a snapshot and keep using it
//! until they ask again, so a refresh halfway through a transfer never
//! produces a torn view of the peer set.
//!
//! The topology file is a JSON array:
//!
//! ```json
//! [
//!   { "id": "node-a", "public_key": "<base58>", "endpoint": "10.0.0.1:7000" },
//!   { "id": "node-b", "public_key": "<base58>", "endpoint": "10.0.0.2:7000" }
//! ]
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::crypto::keys::PublicKey;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to read topology file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed topology file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate node id {0} in topology")]
    DuplicateNode(NodeId),
}

/// Identifier of a validation node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// One entry of the validation node list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: NodeId,
    pub public_key: PublicKey,
    #[serde(default)]
    pub endpoint: String,
}

/// An immutable view of the network. Nodes are kept sorted by id so two
/// topologies with the same members compare equal regardless of file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    nodes: Vec<NodeDescriptor>,
}

impl Topology {
    pub fn new(mut nodes: Vec<NodeDescriptor>) -> Result<Self, TopologyError> {
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = nodes.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(TopologyError::DuplicateNode(pair[0].id.clone()));
        }
        Ok(Self { nodes })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let nodes: Vec<NodeDescriptor> =
            serde_json::from_str(&raw).map_err(|source| TopologyError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Self::new(nodes)
    }

    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, id: &NodeId) -> Option<&NodeDescriptor> {
        self.nodes
            .binary_search_by(|node| node.id.cmp(id))
            .ok()
            .map(|idx| &self.nodes[idx])
    }

    pub fn public_key_of(&self, id: &NodeId) -> Option<PublicKey> {
        self.find(id).map(|node| node.public_key)
    }

    /// Every node except `local`.
    pub fn peers_of<'a>(&'a self, local: &'a NodeId) -> impl Iterator<Item = &'a NodeDescriptor> {
        self.nodes.iter().filter(move |node| node.id != *local)
    }
}

// ---------------------------------------------------------------------------
// TopologyDirectory
// ---------------------------------------------------------------------------

/// Shared, refreshable access to the current [`Topology`].
#[derive(Debug)]
pub struct TopologyDirectory {
    local: NodeId,
    current: RwLock<Arc<Topology>>,
}

impl TopologyDirectory {
    pub fn new(local: NodeId, topology: Topology) -> Self {
        Self {
            local,
            current: RwLock::new(Arc::new(topology)),
        }
    }

    /// This node's id.
    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    /// Snapshot valid until the next swap.
    pub fn snapshot(&self) -> Arc<Topology> {
        Arc::clone(&self.current.read())
    }

    /// Every peer validation node.
    pub fn all_peers(&self) -> Vec<NodeDescriptor> {
        self.snapshot().peers_of(&self.local).cloned().collect()
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.snapshot()
            .peers_of(&self.local)
            .map(|node| node.id.clone())
            .collect()
    }

    /// Quorum size is the peer count.
    pub fn peer_count(&self) -> usize {
        self.snapshot().peers_of(&self.local).count()
    }

    pub fn public_key_of(&self, id: &NodeId) -> Option<PublicKey> {
        self.snapshot().public_key_of(id)
    }

    /// Swap in `topology` if it differs from the current one. Returns whether
    /// anything changed.
    pub fn replace(&self, topology: Topology) -> bool {
        let mut current = self.current.write();
        if **current == topology {
            debug!("no change in network topology");
            return false;
        }
        info!(
            nodes = topology.len(),
            previous = current.len(),
            "network topology updated"
        );
        *current = Arc::new(topology);
        true
    }

    /// Re-read the topology file and swap if it changed.
    pub fn refresh_from_file(&self, path: impl AsRef<Path>) -> Result<bool, TopologyError> {
        let topology = Topology::from_json_file(path)?;
        Ok(self.replace(topology))
    }
}
