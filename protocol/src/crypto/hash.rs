//! # Hashing Utilities
//!
//! BLAKE3 is the only digest in the protocol. It derives account ids from
//! public keys and folds every applied transfer into an account's chain hash.

use crate::config::HASH_OUTPUT_LENGTH;

/// BLAKE3 digest of `data`.
pub fn blake3_hash(data: &[u8]) -> [u8; HASH_OUTPUT_LENGTH] {
    *blake3::hash(data).as_bytes()
}

/// Derive the chain hash that follows `previous` once the transfer carrying
/// `transfer_signature` has been applied.
///
/// `next = BLAKE3(previous || transfer_signature)`. Both accounts touched by a
/// transfer use the same derivation, so each account carries its own
/// append-only chain of every transfer that ever touched it.
pub fn next_chain_hash(
    previous: &[u8; HASH_OUTPUT_LENGTH],
    transfer_signature: &[u8],
) -> [u8; HASH_OUTPUT_LENGTH] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(previous);
    hasher.update(transfer_signature);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake3_is_deterministic() {
        assert_eq!(blake3_hash(b"ledgerline"), blake3_hash(b"ledgerline"));
        assert_ne!(blake3_hash(b"ledgerline"), blake3_hash(b"ledgerlinf"));
    }

    #[test]
    fn chain_hash_matches_concatenation() {
        let prev = [3u8; 32];
        let sig = [5u8; 64];
        let mut joined = prev.to_vec();
        joined.extend_from_slice(&sig);
        assert_eq!(next_chain_hash(&prev, &sig), blake3_hash(&joined));
    }

    #[test]
    fn chain_hash_depends_on_both_inputs() {
        let a = next_chain_hash(&[0u8; 32], b"sig-a");
        assert_ne!(a, next_chain_hash(&[0u8; 32], b"sig-b"));
        assert_ne!(a, next_chain_hash(&[1u8; 32], b"sig-a"));
    }
}
