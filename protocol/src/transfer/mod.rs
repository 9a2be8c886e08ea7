//! # Transfers
//!
//! Client requests, the local validator, the unconfirmed-transfer state
//! machine and the error taxonomy every failure is reported through.

pub mod error;
pub mod request;
pub mod unconfirmed;
pub mod validation;

pub use error::{ErrorCode, TransferError};
pub use request::{Transfer, TransferId, TransferRequest};
pub use unconfirmed::{Confirmation, ConfirmationStatus, TransferState, UnconfirmedTransfer};
pub use validation::{clean_memo, parse_amount, TransferValidator};
