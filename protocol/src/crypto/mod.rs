//! # Cryptographic Primitives
//!
//! Thin, typed wrappers around audited implementations:
//!
//! - **Ed25519** (`ed25519-dalek`) for every signature a client or node makes.
//! - **BLAKE3** for account ids and per-account chain hashes.
//! - **bincode** as the canonical byte encoding signatures are computed over.
//!
//! Nothing here is clever on purpose.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{blake3_hash, next_chain_hash};
pub use keys::{KeyError, Keypair, PublicKey, Signature};
pub use signatures::{canonical_bytes, sign_canonical, verify_canonical, SignatureError};
