//! # Message Bus
//!
//! Transport is pluggable. The engine needs two things from it:
//!
//! - `publish`: broadcast a record on a named topic to every other node;
//! - `send_to`: deliver a reply to one node.
//!
//! Replies are routed back to whoever is waiting for them by correlation id
//! through a [`ReplyRouter`]. A coordinator subscribes before broadcasting,
//! drains its [`ReplySubscription`] until every peer answered or the
//! deadline passed, then drops the subscription. Replies arriving after that
//! have nowhere to go and are discarded.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Duration, Instant};
use uuid::Uuid;

use super::messages::Message;
use super::topology::NodeId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("node {0} is not connected to the bus")]
    Disconnected(NodeId),

    #[error("no route to node {0}")]
    UnknownNode(NodeId),
}

/// Broadcast topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Prepare,
    TransferRequest,
    Settlement,
    Failure,
    BalanceRequest,
    BalanceUpdate,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Prepare => "prepare",
            Topic::TransferRequest => "transfer-request",
            Topic::Settlement => "settlement",
            Topic::Failure => "failure",
            Topic::BalanceRequest => "balance-request",
            Topic::BalanceUpdate => "balance-update",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node's handle on the transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Deliver `message` to every other node subscribed to `topic`.
    async fn publish(&self, topic: Topic, message: Message) -> Result<(), BusError>;

    /// Deliver `message` to a single node.
    async fn send_to(&self, node: &NodeId, message: Message) -> Result<(), BusError>;
}

// ---------------------------------------------------------------------------
// Reply routing
// ---------------------------------------------------------------------------

/// Correlation id -> waiting collector.
#[derive(Debug, Default)]
pub struct ReplyRouter {
    pending: DashMap<Uuid, mpsc::UnboundedSender<Message>>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for replies correlated with `correlation`.
    pub fn subscribe(&self, correlation: Uuid) -> ReplySubscription<'_> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.insert(correlation, tx);
        ReplySubscription {
            router: self,
            correlation,
            rx,
        }
    }

    /// Hand a reply to its collector. Returns `false` if nobody is waiting.
    pub fn deliver(&self, correlation: Uuid, message: Message) -> bool {
        match self.pending.get(&correlation) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Replies for one correlation id. Unsubscribes on drop.
pub struct ReplySubscription<'a> {
    router: &'a ReplyRouter,
    correlation: Uuid,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl ReplySubscription<'_> {
    pub fn correlation(&self) -> Uuid {
        self.correlation
    }

    /// Next reply, or `None` once `deadline` has passed.
    pub async fn recv_until(&mut self, deadline: Instant) -> Option<Message> {
        match timeout_at(deadline, self.rx.recv()).await {
            Ok(message) => message,
            Err(_) => None,
        }
    }
}

impl Drop for ReplySubscription<'_> {
    fn drop(&mut self) {
        self.router.pending.remove(&self.correlation);
    }
}

/// Deadline `wait` from now on the tokio clock.
pub fn deadline_after(wait: Duration) -> Instant {
    Instant::now() + wait
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;
    use crate::identity::{AccountId, Curve};
    use crate::network::messages::{BalanceResponse, Signed};

    fn reply(correlation: Uuid) -> Message {
        let kp = Keypair::generate();
        Message::BalanceReply(
            Signed::seal(
                &kp,
                NodeId::new("peer"),
                BalanceResponse {
                    correlation,
                    account: AccountId::from_public_key(Curve::Ed25519, &kp.public_key()),
                    snapshot: None,
                },
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn delivers_to_matching_subscription() {
        let router = ReplyRouter::new();
        let correlation = Uuid::new_v4();
        let mut sub = router.subscribe(correlation);
        assert!(router.deliver(correlation, reply(correlation)));
        assert!(!router.deliver(Uuid::new_v4(), reply(correlation)));
        let got = sub.recv_until(deadline_after(Duration::from_secs(1))).await;
        assert_eq!(got.and_then(|m| m.reply_correlation()), Some(correlation));
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let router = ReplyRouter::new();
        let correlation = Uuid::new_v4();
        {
            let _sub = router.subscribe(correlation);
            assert_eq!(router.pending(), 1);
        }
        assert_eq!(router.pending(), 0);
        assert!(!router.deliver(correlation, reply(correlation)));
    }

    #[tokio::test(start_paused = true)]
    async fn recv_gives_up_at_deadline() {
        let router = ReplyRouter::new();
        let mut sub = router.subscribe(Uuid::new_v4());
        let started = Instant::now();
        assert!(sub
            .recv_until(deadline_after(Duration::from_secs(5)))
            .await
            .is_none());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
