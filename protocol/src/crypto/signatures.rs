//! # Canonical Signing
//!
//! Every signed structure in the protocol is signed over its `bincode`
//! encoding. bincode is deterministic for a given value and field order, so
//! signer and verifier produce identical bytes without agreeing on anything
//! beyond the struct definition.
//!
//! Only the encoding direction is used. Values are never decoded from these
//! bytes; they exist to be signed.

use serde::Serialize;
use thiserror::Error;

use super::keys::{Keypair, PublicKey, Signature};

/// Errors during canonical signing or verification.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("failed to encode signing payload: {0}")]
    Encoding(String),

    #[error("signature verification failed")]
    VerificationFailed,
}

/// Canonical bytes of a serializable value.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, SignatureError> {
    bincode::serialize(value).map_err(|e| SignatureError::Encoding(e.to_string()))
}

/// Sign the canonical encoding of `value`.
pub fn sign_canonical<T: Serialize + ?Sized>(
    keypair: &Keypair,
    value: &T,
) -> Result<Signature, SignatureError> {
    Ok(keypair.sign(&canonical_bytes(value)?))
}

/// Verify a signature over the canonical encoding of `value`.
pub fn verify_canonical<T: Serialize + ?Sized>(
    public_key: &PublicKey,
    value: &T,
    signature: &Signature,
) -> Result<(), SignatureError> {
    let bytes = canonical_bytes(value)?;
    if public_key.verify(&bytes, signature) {
        Ok(())
    } else {
        Err(SignatureError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Payload<'a> {
        to: &'a str,
        amount: &'a str,
    }

    #[test]
    fn canonical_signature_roundtrip() {
        let kp = Keypair::generate();
        let payload = Payload {
            to: "bob",
            amount: "1.0",
        };
        let sig = sign_canonical(&kp, &payload).unwrap();
        assert!(verify_canonical(&kp.public_key(), &payload, &sig).is_ok());
    }

    #[test]
    fn any_field_change_breaks_signature() {
        let kp = Keypair::generate();
        let sig = sign_canonical(
            &kp,
            &Payload {
                to: "bob",
                amount: "1.0",
            },
        )
        .unwrap();
        let tampered = Payload {
            to: "bob",
            amount: "10.0",
        };
        assert!(matches!(
            verify_canonical(&kp.public_key(), &tampered, &sig),
            Err(SignatureError::VerificationFailed)
        ));
    }

    #[test]
    fn tuple_encoding_is_stable() {
        let a = canonical_bytes(&(1u16, "node-a", 42u64)).unwrap();
        let b = canonical_bytes(&(1u16, "node-a", 42u64)).unwrap();
        assert_eq!(a, b);
    }
}
