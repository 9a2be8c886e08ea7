//! Transfer error taxonomy.
//!
//! Every way a transfer can fail maps to exactly one [`ErrorCode`]. The code
//! is what travels inside a `FailureRecord`; the richer [`TransferError`] is
//! what callers of this node see.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a transfer did not settle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("sender account is malformed or unknown")]
    InvalidFromAccount,

    #[error("recipient account is malformed")]
    InvalidToAccount,

    #[error("amount must be a positive decimal")]
    InvalidAmount,

    #[error("signature does not authorize this transfer")]
    Unauthorized,

    #[error("transfer signature has already been seen")]
    Replay,

    #[error("balance does not cover amount plus fee")]
    InsufficientFunds,

    #[error("an account involved in the transfer is locked by another transfer")]
    AccountLocked,

    #[error("not enough peers confirmed the transfer")]
    NotConfirmed,

    #[error("system error: {0}")]
    System(String),
}

/// Stable wire code of a failed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "ERROR_INVALID_FROM_ACCOUNT")]
    InvalidFromAccount,
    #[serde(rename = "ERROR_INVALID_TO_ACCOUNT")]
    InvalidToAccount,
    #[serde(rename = "ERROR_INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "ERROR_TX_SIGNATURE_UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "ERROR_TX_REPLAY")]
    Replay,
    #[serde(rename = "ERROR_INSUFFICIENT_FUNDS")]
    InsufficientFunds,
    #[serde(rename = "ERROR_LOCKED_ACCOUNTS")]
    AccountLocked,
    #[serde(rename = "ERROR_NOT_CONFIRMED")]
    NotConfirmed,
    #[serde(rename = "ERROR_SYSTEM")]
    System,
}

impl TransferError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TransferError::InvalidFromAccount => ErrorCode::InvalidFromAccount,
            TransferError::InvalidToAccount => ErrorCode::InvalidToAccount,
            TransferError::InvalidAmount => ErrorCode::InvalidAmount,
            TransferError::Unauthorized => ErrorCode::Unauthorized,
            TransferError::Replay => ErrorCode::Replay,
            TransferError::InsufficientFunds => ErrorCode::InsufficientFunds,
            TransferError::AccountLocked => ErrorCode::AccountLocked,
            TransferError::NotConfirmed => ErrorCode::NotConfirmed,
            TransferError::System(_) => ErrorCode::System,
        }
    }

    pub fn system(reason: impl fmt::Display) -> Self {
        TransferError::System(reason.to_string())
    }
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidFromAccount => "ERROR_INVALID_FROM_ACCOUNT",
            ErrorCode::InvalidToAccount => "ERROR_INVALID_TO_ACCOUNT",
            ErrorCode::InvalidAmount => "ERROR_INVALID_AMOUNT",
            ErrorCode::Unauthorized => "ERROR_TX_SIGNATURE_UNAUTHORIZED",
            ErrorCode::Replay => "ERROR_TX_REPLAY",
            ErrorCode::InsufficientFunds => "ERROR_INSUFFICIENT_FUNDS",
            ErrorCode::AccountLocked => "ERROR_LOCKED_ACCOUNTS",
            ErrorCode::NotConfirmed => "ERROR_NOT_CONFIRMED",
            ErrorCode::System => "ERROR_SYSTEM",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rebuild a caller-facing error from a code received off the wire.
/// System faults lose their detail on the way.
impl From<ErrorCode> for TransferError {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidFromAccount => TransferError::InvalidFromAccount,
            ErrorCode::InvalidToAccount => TransferError::InvalidToAccount,
            ErrorCode::InvalidAmount => TransferError::InvalidAmount,
            ErrorCode::Unauthorized => TransferError::Unauthorized,
            ErrorCode::Replay => TransferError::Replay,
            ErrorCode::InsufficientFunds => TransferError::InsufficientFunds,
            ErrorCode::AccountLocked => TransferError::AccountLocked,
            ErrorCode::NotConfirmed => TransferError::NotConfirmed,
            ErrorCode::System => TransferError::System("reported by peer".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TransferError::InvalidFromAccount, "ERROR_INVALID_FROM_ACCOUNT")]
    #[case(TransferError::InvalidToAccount, "ERROR_INVALID_TO_ACCOUNT")]
    #[case(TransferError::InvalidAmount, "ERROR_INVALID_AMOUNT")]
    #[case(TransferError::Unauthorized, "ERROR_TX_SIGNATURE_UNAUTHORIZED")]
    #[case(TransferError::Replay, "ERROR_TX_REPLAY")]
    #[case(TransferError::InsufficientFunds, "ERROR_INSUFFICIENT_FUNDS")]
    #[case(TransferError::AccountLocked, "ERROR_LOCKED_ACCOUNTS")]
    #[case(TransferError::NotConfirmed, "ERROR_NOT_CONFIRMED")]
    #[case(TransferError::system("disk on fire"), "ERROR_SYSTEM")]
    fn every_error_has_a_wire_code(#[case] error: TransferError, #[case] code: &str) {
        assert_eq!(error.code().as_str(), code);
        let json = serde_json::to_string(&error.code()).unwrap();
        assert_eq!(json, format!("\"{code}\""));
    }

    #[test]
    fn code_maps_back_to_error() {
        assert_eq!(
            TransferError::from(ErrorCode::NotConfirmed),
            TransferError::NotConfirmed
        );
        assert_eq!(
            TransferError::from(ErrorCode::System).code(),
            ErrorCode::System
        );
    }
}
