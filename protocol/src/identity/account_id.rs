//! # Account Identifiers
//!
//! An account id is derived from the owner's public key and rendered as a
//! Bech32 address with the `lln` human-readable prefix:
//!
//! ```text
//! public_key (32 bytes)
//!     -> curve_tag (1 byte) || BLAKE3(public_key) (32 bytes)
//!     -> Bech32("lln", payload) -> lln1q...
//! ```
//!
//! The curve tag travels inside the address so a node can tell which
//! signature scheme the owner uses without any extra lookup. This matters
//! when a transfer creates the recipient account: the fresh account inherits
//! the curve encoded in the address it was sent to.

use std::fmt;
use std::str::FromStr;

use bech32::{Bech32, Hrp};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::config::{ACCOUNT_HRP, HASH_OUTPUT_LENGTH};
use crate::crypto::hash::blake3_hash;
use crate::crypto::keys::PublicKey;

/// Length of the decoded address payload: curve tag + digest.
const PAYLOAD_LENGTH: usize = 1 + HASH_OUTPUT_LENGTH;

fn account_hrp() -> Hrp {
    Hrp::parse(ACCOUNT_HRP).expect("static HRP is valid")
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountIdError {
    #[error("bech32 decode error: {0}")]
    Bech32Decode(String),

    #[error("invalid HRP: expected '{expected}', got '{got}'")]
    InvalidHrp { expected: String, got: String },

    #[error("invalid address payload length: expected {expected} bytes, got {got}")]
    InvalidDataLength { expected: usize, got: usize },

    #[error("unknown curve tag {0}")]
    UnknownCurve(u8),
}

// ---------------------------------------------------------------------------
// Curve
// ---------------------------------------------------------------------------

/// Elliptic curve used by an account's owning key.
///
/// Ed25519 is the only curve with a signature backend today. The tag is part
/// of the address, so adding a curve never changes existing addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Curve {
    Ed25519,
}

impl Curve {
    pub fn tag(self) -> u8 {
        match self {
            Curve::Ed25519 => 0,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, AccountIdError> {
        match tag {
            0 => Ok(Curve::Ed25519),
            other => Err(AccountIdError::UnknownCurve(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// Identifier of a ledger account: curve plus BLAKE3 digest of the owner key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId {
    curve: Curve,
    key_hash: [u8; HASH_OUTPUT_LENGTH],
}

impl AccountId {
    /// Derive the account id owned by `public_key`.
    pub fn from_public_key(curve: Curve, public_key: &PublicKey) -> Self {
        Self {
            curve,
            key_hash: blake3_hash(public_key.as_bytes()),
        }
    }

    /// Parse a Bech32 address. Well-formed means: valid checksum, `lln`
    /// prefix, 33-byte payload and a known curve tag.
    pub fn parse(address: &str) -> Result<Self, AccountIdError> {
        let (hrp, data) =
            bech32::decode(address.trim()).map_err(|e| AccountIdError::Bech32Decode(e.to_string()))?;

        if hrp != account_hrp() {
            return Err(AccountIdError::InvalidHrp {
                expected: ACCOUNT_HRP.to_string(),
                got: hrp.to_string(),
            });
        }
        if data.len() != PAYLOAD_LENGTH {
            return Err(AccountIdError::InvalidDataLength {
                expected: PAYLOAD_LENGTH,
                got: data.len(),
            });
        }

        let curve = Curve::from_tag(data[0])?;
        let mut key_hash = [0u8; HASH_OUTPUT_LENGTH];
        key_hash.copy_from_slice(&data[1..]);
        Ok(Self { curve, key_hash })
    }

    /// Cheap well-formedness check for untrusted input.
    pub fn is_valid(address: &str) -> bool {
        Self::parse(address).is_ok()
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn key_hash(&self) -> &[u8; HASH_OUTPUT_LENGTH] {
        &self.key_hash
    }

    /// Whether `public_key` is the key this account was derived from.
    pub fn is_owned_by(&self, public_key: &PublicKey) -> bool {
        *self == Self::from_public_key(self.curve, public_key)
    }

    /// The Bech32 address.
    pub fn to_address(&self) -> String {
        let mut payload = Vec::with_capacity(PAYLOAD_LENGTH);
        payload.push(self.curve.tag());
        payload.extend_from_slice(&self.key_hash);
        // A 33-byte payload is well inside the bech32 length limit.
        bech32::encode::<Bech32>(account_hrp(), &payload).expect("payload fits bech32 limits")
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_address())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.to_address())
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_address())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::parse(&encoded).map_err(serde::de::Error::custom)
    }
}
