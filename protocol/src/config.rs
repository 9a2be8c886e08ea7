//! # Protocol Configuration & Constants
//!
//! Every magic number a validation node depends on lives here, next to the
//! runtime knobs an operator is allowed to turn ([`NodeConfig`]).
//!
//! Constants are consensus-relevant: two nodes that disagree on `TX_FEE` or
//! the genesis chain hash will compute different post-transfer snapshots and
//! never agree on anything again. Runtime knobs only change how long a node
//! is willing to wait for its peers.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Wire & Identity
// ---------------------------------------------------------------------------

/// Version stamped into every signed inter-node record. Receivers drop
/// records carrying any other version before looking at the body.
pub const WIRE_VERSION: u16 = 1;

/// Bech32 human-readable prefix for account addresses.
pub const ACCOUNT_HRP: &str = "lln";

/// Length of every digest we produce (BLAKE3, 256-bit).
pub const HASH_OUTPUT_LENGTH: usize = 32;

/// Ed25519 signature length.
pub const SIGNATURE_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Height of an account that has never had a transfer applied.
pub const GENESIS_HEIGHT: u64 = 0;

/// Chain hash of an account that has never had a transfer applied.
pub const GENESIS_CHAIN_HASH: [u8; HASH_OUTPUT_LENGTH] = [0u8; HASH_OUTPUT_LENGTH];

/// Number of decimal places amounts and fees are carried with.
pub const AMOUNT_SCALE: u32 = 8;

/// Flat fee charged to the sender of every transfer: 0.0001.
pub const TX_FEE: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

/// Maximum memo length in characters. Longer memos are truncated, not rejected.
pub const MAX_MEMO_LENGTH: usize = 256;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// How long a coordinator waits for prepare responses.
pub const DEFAULT_PREPARE_TIMEOUT: Duration = Duration::from_secs(3);

/// How long a coordinator waits for quorum confirmations before handing the
/// transfer to the consensus engine with whatever arrived.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded wait of the best-effort balance query.
pub const DEFAULT_BALANCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Locks older than this are presumed orphaned by a coordinator that died
/// before broadcasting an outcome.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(120);

/// Interval between topology file re-reads.
pub const DEFAULT_TOPOLOGY_REFRESH: Duration = Duration::from_secs(60);

/// Upper bound on peer balance responses kept per query.
pub const DEFAULT_MAX_BALANCE_RESPONSES: usize = 64;

/// Entries kept in the read-only cache fed by peer balance updates.
pub const DEFAULT_BALANCE_CACHE_CAPACITY: usize = 4096;

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Errors raised while loading a [`NodeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Runtime knobs for a single validation node.
///
/// Durations are stored as milliseconds so the JSON form stays readable.
/// Every field has a default, so an empty `{}` is a valid config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Wait for prepare responses, in milliseconds.
    pub prepare_timeout_ms: u64,
    /// Wait for quorum confirmations, in milliseconds.
    pub confirmation_timeout_ms: u64,
    /// Wait for peer balance responses, in milliseconds.
    pub balance_timeout_ms: u64,
    /// Age after which an account lock is swept, in seconds.
    pub lock_ttl_secs: u64,
    /// Topology refresh cadence, in seconds.
    pub topology_refresh_secs: u64,
    /// Cap on peer responses retained per balance query.
    pub max_balance_responses: usize,
    /// Cap on accounts held in the balance update cache.
    pub balance_cache_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: DEFAULT_PREPARE_TIMEOUT.as_millis() as u64,
            confirmation_timeout_ms: DEFAULT_CONFIRMATION_TIMEOUT.as_millis() as u64,
            balance_timeout_ms: DEFAULT_BALANCE_TIMEOUT.as_millis() as u64,
            lock_ttl_secs: DEFAULT_LOCK_TTL.as_secs(),
            topology_refresh_secs: DEFAULT_TOPOLOGY_REFRESH.as_secs(),
            max_balance_responses: DEFAULT_MAX_BALANCE_RESPONSES,
            balance_cache_capacity: DEFAULT_BALANCE_CACHE_CAPACITY,
        }
    }
}

impl NodeConfig {
    /// Load a config from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make the node wait forever or
    /// never wait at all.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confirmation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "confirmation_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.max_balance_responses == 0 {
            return Err(ConfigError::Invalid(
                "max_balance_responses must be > 0".to_string(),
            ));
        }
        if self.balance_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "balance_cache_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn balance_timeout(&self) -> Duration {
        Duration::from_millis(self.balance_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn topology_refresh(&self) -> Duration {
        Duration::from_secs(self.topology_refresh_secs)
    }
}
