//! # Wire Records
//!
//! Every message exchanged between validation nodes is a [`Signed`] record:
//! a body plus the wire version, the signer's node id and an Ed25519
//! signature over the canonical encoding of `(version, signer, body)`.
//!
//! Receivers authenticate against the signer's key in their current topology
//! snapshot before acting on anything in the body. Unknown signers, other
//! wire versions and bad signatures are rejected outright.
//!
//! Requests carry a correlation id. Replies echo it, which is how a waiting
//! coordinator matches a reply to the collection it started.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::topology::{NodeId, Topology};
use crate::config::WIRE_VERSION;
use crate::crypto::keys::{Keypair, Signature};
use crate::crypto::signatures::{sign_canonical, verify_canonical};
use crate::identity::AccountId;
use crate::ledger::Account;
use crate::transfer::{ConfirmationStatus, ErrorCode, Transfer, TransferId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("failed to encode record for signing: {0}")]
    Encoding(String),

    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u16),

    #[error("signer {0} is not in the current topology")]
    UnknownSigner(NodeId),

    #[error("bad signature from {0}")]
    BadSignature(NodeId),
}

// ---------------------------------------------------------------------------
// Signed envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signed<T> {
    pub version: u16,
    pub signer: NodeId,
    pub body: T,
    pub signature: Signature,
}

impl<T: Serialize> Signed<T> {
    /// Sign `body` as `signer`.
    pub fn seal(keypair: &Keypair, signer: NodeId, body: T) -> Result<Self, AuthError> {
        let signature = sign_canonical(keypair, &(WIRE_VERSION, &signer, &body))
            .map_err(|e| AuthError::Encoding(e.to_string()))?;
        Ok(Self {
            version: WIRE_VERSION,
            signer,
            body,
            signature,
        })
    }

    /// Check version, signer membership and signature against `topology`.
    pub fn verify(&self, topology: &Topology) -> Result<(), AuthError> {
        if self.version != WIRE_VERSION {
            return Err(AuthError::UnsupportedVersion(self.version));
        }
        let public_key = topology
            .public_key_of(&self.signer)
            .ok_or_else(|| AuthError::UnknownSigner(self.signer.clone()))?;
        verify_canonical(
            &public_key,
            &(self.version, &self.signer, &self.body),
            &self.signature,
        )
        .map_err(|_| AuthError::BadSignature(self.signer.clone()))
    }
}

// ---------------------------------------------------------------------------
// Prepare
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub correlation: Uuid,
    pub transfer: Transfer,
}

/// A peer's answer to a prepare request about the sender account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrepareStatus {
    /// Sender locked for this transfer; current sender snapshot attached.
    Approved {
        balance: Decimal,
        height: u64,
        chain_hash: [u8; 32],
    },
    /// The peer has never seen the sender and has no opinion.
    ApprovedNoAccountOnFile,
    RejectedAccountInProgress,
    RejectedRequestNotValid,
    RejectedTransferReplay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub correlation: Uuid,
    pub transfer_id: TransferId,
    pub status: PrepareStatus,
}

// ---------------------------------------------------------------------------
// Confirmation ("get accounts")
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountsRequest {
    pub correlation: Uuid,
    pub transfer: Transfer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountsResponse {
    pub correlation: Uuid,
    pub transfer_id: TransferId,
    pub status: ConfirmationStatus,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A settled transfer with both post-transfer snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub transfer: Transfer,
    pub from: Account,
    pub to: Account,
    pub settled_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub transfer: Transfer,
    pub code: ErrorCode,
    pub failed_at_ms: i64,
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRequest {
    pub correlation: Uuid,
    pub account: AccountId,
    pub requester: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub correlation: Uuid,
    pub account: AccountId,
    pub snapshot: Option<Account>,
}

/// A newer snapshot a resolver saw, pushed to peers' read caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub account: Account,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Everything that travels over the message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Prepare(Signed<PrepareRequest>),
    PrepareReply(Signed<PrepareResponse>),
    Accounts(Signed<AccountsRequest>),
    AccountsReply(Signed<AccountsResponse>),
    Settlement(Signed<SettlementRecord>),
    Failure(Signed<FailureRecord>),
    Balance(Signed<BalanceRequest>),
    BalanceReply(Signed<BalanceResponse>),
    BalanceUpdate(Signed<BalanceUpdate>),
}

impl Message {
    /// Correlation id of a reply. `None` for broadcasts.
    pub fn reply_correlation(&self) -> Option<Uuid> {
        match self {
            Message::PrepareReply(m) => Some(m.body.correlation),
            Message::AccountsReply(m) => Some(m.body.correlation),
            Message::BalanceReply(m) => Some(m.body.correlation),
            _ => None,
        }
    }

    pub fn signer(&self) -> &NodeId {
        match self {
            Message::Prepare(m) => &m.signer,
            Message::PrepareReply(m) => &m.signer,
            Message::Accounts(m) => &m.signer,
            Message::AccountsReply(m) => &m.signer,
            Message::Settlement(m) => &m.signer,
            Message::Failure(m) => &m.signer,
            Message::Balance(m) => &m.signer,
            Message::BalanceReply(m) => &m.signer,
            Message::BalanceUpdate(m) => &m.signer,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Prepare(_) => "prepare",
            Message::PrepareReply(_) => "prepare-reply",
            Message::Accounts(_) => "accounts",
            Message::AccountsReply(_) => "accounts-reply",
            Message::Settlement(_) => "settlement",
            Message::Failure(_) => "failure",
            Message::Balance(_) => "balance",
            Message::BalanceReply(_) => "balance-reply",
            Message::BalanceUpdate(_) => "balance-update",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::topology::NodeDescriptor;

    fn topology_with(id: &str, keypair: &Keypair) -> Topology {
        Topology::new(vec![NodeDescriptor {
            id: NodeId::new(id),
            public_key: keypair.public_key(),
            endpoint: String::new(),
        }])
        .unwrap()
    }

    fn body() -> BalanceRequest {
        let kp = Keypair::generate();
        BalanceRequest {
            correlation: Uuid::new_v4(),
            account: AccountId::from_public_key(crate::identity::Curve::Ed25519, &kp.public_key()),
            requester: NodeId::new("node-a"),
        }
    }

    #[test]
    fn sealed_record_verifies() {
        let kp = Keypair::generate();
        let signed = Signed::seal(&kp, NodeId::new("node-a"), body()).unwrap();
        assert_eq!(signed.version, WIRE_VERSION);
        assert!(signed.verify(&topology_with("node-a", &kp)).is_ok());
    }

    #[test]
    fn unknown_signer_rejected() {
        let kp = Keypair::generate();
        let signed = Signed::seal(&kp, NodeId::new("node-x"), body()).unwrap();
        assert_eq!(
            signed.verify(&topology_with("node-a", &kp)),
            Err(AuthError::UnknownSigner(NodeId::new("node-x")))
        );
    }

    #[test]
    fn impersonation_rejected() {
        let real = Keypair::generate();
        let forger = Keypair::generate();
        let signed = Signed::seal(&forger, NodeId::new("node-a"), body()).unwrap();
        assert_eq!(
            signed.verify(&topology_with("node-a", &real)),
            Err(AuthError::BadSignature(NodeId::new("node-a")))
        );
    }

    #[test]
    fn tampered_body_rejected() {
        let kp = Keypair::generate();
        let mut signed = Signed::seal(&kp, NodeId::new("node-a"), body()).unwrap();
        signed.body.requester = NodeId::new("node-b");
        assert!(signed.verify(&topology_with("node-a", &kp)).is_err());
    }

    #[test]
    fn other_wire_version_rejected() {
        let kp = Keypair::generate();
        let mut signed = Signed::seal(&kp, NodeId::new("node-a"), body()).unwrap();
        signed.version = WIRE_VERSION + 1;
        assert_eq!(
            signed.verify(&topology_with("node-a", &kp)),
            Err(AuthError::UnsupportedVersion(WIRE_VERSION + 1))
        );
    }

    #[test]
    fn replies_expose_correlation() {
        let kp = Keypair::generate();
        let request = body();
        let reply = Message::BalanceReply(
            Signed::seal(
                &kp,
                NodeId::new("node-b"),
                BalanceResponse {
                    correlation: request.correlation,
                    account: request.account,
                    snapshot: None,
                },
            )
            .unwrap(),
        );
        assert_eq!(reply.reply_correlation(), Some(request.correlation));
        assert_eq!(reply.signer(), &NodeId::new("node-b"));

        let broadcast = Message::Balance(Signed::seal(&kp, NodeId::new("node-a"), request).unwrap());
        assert_eq!(broadcast.reply_correlation(), None);
    }
}
