//! Client transfer requests and the validated [`Transfer`] they become.
//!
//! A request arrives as plain strings, exactly as a wallet produced them. The
//! client signs the canonical encoding of
//! `(from, to, amount, memo, timestamp_ms)`; Ed25519 being deterministic,
//! that signature is unique per request and serves as the [`TransferId`].

use std::fmt;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::crypto::keys::{Keypair, PublicKey, Signature};
use crate::crypto::signatures::{canonical_bytes, SignatureError};
use crate::identity::{AccountId, Curve};

/// Unique id of a transfer: the client's signature over the request.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(Signature);

impl TransferId {
    pub fn new(signature: Signature) -> Self {
        Self(signature)
    }

    pub fn signature(&self) -> &Signature {
        &self.0
    }

    /// Raw signature bytes, the input folded into account chain hashes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.0.to_hex();
        f.write_str(&hex_str[..hex_str.len().min(16)])
    }
}

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferId({self})")
    }
}

// ---------------------------------------------------------------------------
// TransferRequest
// ---------------------------------------------------------------------------

/// A transfer as submitted by a client, before any validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Sender address (Bech32).
    pub from: String,
    /// Recipient address (Bech32).
    pub to: String,
    /// Decimal amount, digits and at most one dot.
    pub amount: String,
    #[serde(default)]
    pub memo: String,
    /// Client clock at signing time, unix milliseconds.
    pub timestamp_ms: i64,
    /// Sender public key, Base58.
    pub public_key: String,
    /// Signature over the canonical payload, hex.
    pub signature: String,
}

#[derive(Serialize)]
struct SigningPayload<'a> {
    from: &'a str,
    to: &'a str,
    amount: &'a str,
    memo: &'a str,
    timestamp_ms: i64,
}

impl TransferRequest {
    /// Build and sign a request the way a wallet would.
    pub fn signed(
        keypair: &Keypair,
        to: &AccountId,
        amount: &str,
        memo: &str,
    ) -> Result<Self, SignatureError> {
        Self::signed_at(keypair, to, amount, memo, Utc::now().timestamp_millis())
    }

    pub fn signed_at(
        keypair: &Keypair,
        to: &AccountId,
        amount: &str,
        memo: &str,
        timestamp_ms: i64,
    ) -> Result<Self, SignatureError> {
        let public_key = keypair.public_key();
        let mut request = Self {
            from: AccountId::from_public_key(Curve::Ed25519, &public_key).to_address(),
            to: to.to_address(),
            amount: amount.to_string(),
            memo: memo.to_string(),
            timestamp_ms,
            public_key: public_key.to_base58(),
            signature: String::new(),
        };
        request.signature = keypair.sign(&request.signing_payload()?).to_hex();
        Ok(request)
    }

    /// Canonical bytes covered by the client signature.
    pub fn signing_payload(&self) -> Result<Vec<u8>, SignatureError> {
        canonical_bytes(&SigningPayload {
            from: &self.from,
            to: &self.to,
            amount: &self.amount,
            memo: &self.memo,
            timestamp_ms: self.timestamp_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// Transfer
// ---------------------------------------------------------------------------

/// A transfer that passed local validation. This is the form that travels
/// between nodes inside prepare, confirmation and outcome records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Decimal,
    pub fee: Decimal,
    pub public_key: PublicKey,
    pub memo: String,
    pub timestamp_ms: i64,
}

impl Transfer {
    /// What the sender pays: amount plus fee. `None` on decimal overflow.
    pub fn total_debit(&self) -> Option<Decimal> {
        self.amount.checked_add(self.fee)
    }

    /// Both accounts the transfer touches.
    pub fn accounts(&self) -> [&AccountId; 2] {
        [&self.from, &self.to]
    }
}
