// Copyright (c) 2026 Ledgerline Contributors. MIT License.
// See LICENSE for details.

//! # Ledgerline Protocol: Core Library
//!
//! Transfer consensus and settlement for a validating node. Each node holds
//! its own view of the accounts it has seen; nobody is authoritative. A
//! transfer becomes final only after the accepting node has locked the
//! sender across its peers, collected their snapshots of both accounts and
//! found no objection among them.
//!
//! ## Architecture
//!
//! - **config**: Protocol constants and runtime knobs.
//! - **crypto**: Ed25519 keys, canonical signing, BLAKE3 chain hashes.
//! - **identity**: Account ids: Bech32 addresses derived from public keys.
//! - **ledger**: Account snapshots, stores and the account lock cache.
//! - **transfer**: Client requests, local validation, the transfer state
//!   machine and the error taxonomy.
//! - **network**: Topology, signed wire records, the message bus and the
//!   `ValidationNode` that ties it all together.
//! - **consensus**: Prepare, quorum collection, the decision engine,
//!   settlement broadcast and balance resolution.
//!
//! ## Design Philosophy
//!
//! 1. Every inter-node record is signed and checked before it can change
//!    anything.
//! 2. A single veto outweighs any number of approvals.
//! 3. Ledger state changes in one place only: applying a settlement.
//! 4. If it touches money, it has tests. Plural.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod identity;
pub mod ledger;
pub mod network;
pub mod transfer;
