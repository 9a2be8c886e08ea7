//! # Transfer Validation
//!
//! Local admissibility checks run before a transfer is shown to any peer.
//! The checks run in a fixed order and the first failure wins:
//!
//! 1. sender address well-formed
//! 2. recipient address well-formed and different from the sender
//! 3. amount: digits and at most one dot, parses, strictly positive
//! 4. the request's public key hashes to the sender address
//! 5. the transfer id has not reached a terminal state before (replay)
//! 6. the signature over the canonical payload verifies
//! 7. the sender account is known locally
//! 8. the local balance covers amount plus fee
//!
//! Nothing here touches the network or mutates state.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use super::error::TransferError;
use super::request::{Transfer, TransferId, TransferRequest};
use crate::config::{AMOUNT_SCALE, MAX_MEMO_LENGTH, TX_FEE};
use crate::crypto::keys::{PublicKey, Signature};
use crate::identity::AccountId;
use crate::ledger::{AccountStore, TransferStore};

/// Parse a client amount string into a positive decimal at protocol scale.
///
/// Midpoints round toward zero, so the sender is never charged more than
/// they wrote down.
pub fn parse_amount(raw: &str) -> Result<Decimal, TransferError> {
    let raw = raw.trim();
    if raw.is_empty()
        || !raw.chars().all(|c| c.is_ascii_digit() || c == '.')
        || raw.matches('.').count() > 1
    {
        return Err(TransferError::InvalidAmount);
    }
    let amount = Decimal::from_str(raw).map_err(|_| TransferError::InvalidAmount)?;
    let amount = amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointTowardZero);
    if amount <= Decimal::ZERO {
        return Err(TransferError::InvalidAmount);
    }
    Ok(amount)
}

/// Trim a memo and cap it at [`MAX_MEMO_LENGTH`] characters.
pub fn clean_memo(raw: &str) -> String {
    raw.trim().chars().take(MAX_MEMO_LENGTH).collect()
}

/// Runs the local checks against this node's stores.
#[derive(Clone)]
pub struct TransferValidator {
    accounts: Arc<dyn AccountStore>,
    transfers: Arc<dyn TransferStore>,
}

impl TransferValidator {
    pub fn new(accounts: Arc<dyn AccountStore>, transfers: Arc<dyn TransferStore>) -> Self {
        Self {
            accounts,
            transfers,
        }
    }

    /// Validate `request` and return the enriched [`Transfer`].
    pub fn validate(&self, request: &TransferRequest) -> Result<Transfer, TransferError> {
        let from =
            AccountId::parse(&request.from).map_err(|_| TransferError::InvalidFromAccount)?;
        let to = AccountId::parse(&request.to).map_err(|_| TransferError::InvalidToAccount)?;
        if to == from {
            return Err(TransferError::InvalidToAccount);
        }

        let amount = parse_amount(&request.amount)?;

        let public_key =
            PublicKey::from_base58(&request.public_key).map_err(|_| TransferError::Unauthorized)?;
        if !from.is_owned_by(&public_key) {
            return Err(TransferError::Unauthorized);
        }

        let signature =
            Signature::from_hex(&request.signature).map_err(|_| TransferError::Unauthorized)?;
        let id = TransferId::new(signature.clone());
        if self.transfers.contains(&id) {
            return Err(TransferError::Replay);
        }

        let payload = request.signing_payload().map_err(TransferError::system)?;
        if !public_key.verify(&payload, &signature) {
            return Err(TransferError::Unauthorized);
        }

        let sender = self
            .accounts
            .find(&from)
            .ok_or(TransferError::InvalidFromAccount)?;
        let required = amount
            .checked_add(TX_FEE)
            .ok_or(TransferError::InvalidAmount)?;
        if sender.balance < required {
            debug!(
                transfer = %id,
                balance = %sender.balance,
                required = %required,
                "local balance does not cover transfer"
            );
            return Err(TransferError::InsufficientFunds);
        }

        Ok(Transfer {
            id,
            from,
            to,
            amount,
            fee: TX_FEE,
            public_key,
            memo: clean_memo(&request.memo),
            timestamp_ms: request.timestamp_ms,
        })
    }
}
