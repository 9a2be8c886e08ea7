//! # Network Module
//!
//! Everything between validation nodes: who the peers are, what travels
//! between them and how it gets there.
//!
//! ```text
//! topology.rs  Topology Directory, atomic swap on refresh
//! messages.rs  signed, versioned wire records
//! bus.rs       MessageBus trait, topics, correlation-id reply routing
//! memory.rs    in-process MessageBus for tests and the devnet
//! node.rs      ValidationNode: client entry point and inbound dispatch
//! ```
//!
//! The protocol crate stays transport-agnostic. A real deployment plugs its
//! own [`MessageBus`] into the [`NodeContext`](crate::consensus::NodeContext).

pub mod bus;
pub mod memory;
pub mod messages;
pub mod node;
pub mod topology;

pub use bus::{BusError, MessageBus, ReplyRouter, ReplySubscription, Topic};
pub use memory::{MemoryEndpoint, MemoryNetwork};
pub use messages::{
    AccountsRequest, AccountsResponse, AuthError, BalanceRequest, BalanceResponse, BalanceUpdate,
    FailureRecord, Message, PrepareRequest, PrepareResponse, PrepareStatus, SettlementRecord,
    Signed,
};
pub use node::ValidationNode;
pub use topology::{NodeDescriptor, NodeId, Topology, TopologyDirectory, TopologyError};
