//! Ed25519 key and signature wrappers, and the signing-input layouts that
//! bind each block to its position in the chain.
//!
//! The wrappers keep dalek types out of the public API and attach the
//! algorithm tag that the wire format carries, so a future algorithm can be
//! added without changing the envelope layout. Secret material is zeroized on
//! drop and never printed.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::FormatError;

/// Signature algorithm tag carried on the wire next to every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    Ed25519,
}

impl Algorithm {
    pub fn tag(self) -> u8 {
        match self {
            Algorithm::Ed25519 => 0,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, FormatError> {
        match tag {
            0 => Ok(Algorithm::Ed25519),
            other => Err(FormatError::UnsupportedAlgorithm(other)),
        }
    }
}

/// A verifying key plus its algorithm tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    algorithm: Algorithm,
    key: VerifyingKey,
}

impl PublicKey {
    /// Parse raw Ed25519 key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        Self::from_bytes_with_algorithm(Algorithm::Ed25519, bytes)
    }

    pub fn from_bytes_with_algorithm(
        algorithm: Algorithm,
        bytes: &[u8],
    ) -> Result<Self, FormatError> {
        let raw: [u8; 32] = bytes.try_into().map_err(|_| FormatError::InvalidKeySize)?;
        let key = VerifyingKey::from_bytes(&raw).map_err(|_| FormatError::InvalidKey)?;
        Ok(Self { algorithm, key })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.key.to_bytes()
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), FormatError> {
        self.key
            .verify(message, &signature.0)
            .map_err(|e| FormatError::InvalidSignature(e.to_string()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ed25519/{}", hex::encode(self.to_bytes()))
    }
}

/// A detached Ed25519 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let raw: [u8; 64] = bytes
            .try_into()
            .map_err(|_| FormatError::InvalidSignatureSize)?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(&raw)))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}

/// A signing key with its derived public half. Debug output never reveals
/// the secret; the raw bytes are zeroized when exported copies drop.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self {
            signing: SigningKey::generate(rng),
        }
    }

    /// Restore a key pair from 32 secret bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let raw: [u8; 32] = bytes.try_into().map_err(|_| FormatError::InvalidKeySize)?;
        Ok(Self {
            signing: SigningKey::from_bytes(&raw),
        })
    }

    pub fn public(&self) -> PublicKey {
        PublicKey {
            algorithm: Algorithm::Ed25519,
            key: self.signing.verifying_key(),
        }
    }

    /// Export the secret half, zeroized when the wrapper drops.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public().to_string())
            .field("secret", &"REDACTED")
            .finish()
    }
}

/// Signing input for a chain signature: the block payload, the algorithm tag
/// and bytes of the next key, then any external signature, then the previous
/// block's signature. Binding the previous signature fixes the block's
/// position in the chain.
pub fn chain_signing_input(
    payload: &[u8],
    next_key: &PublicKey,
    external_signature: Option<&Signature>,
    previous_signature: Option<&Signature>,
) -> Vec<u8> {
    let mut input = Vec::with_capacity(payload.len() + 256);
    input.extend_from_slice(payload);
    input.push(next_key.algorithm().tag());
    input.extend_from_slice(&next_key.to_bytes());
    if let Some(sig) = external_signature {
        input.extend_from_slice(&sig.to_bytes());
    }
    if let Some(sig) = previous_signature {
        input.extend_from_slice(&sig.to_bytes());
    }
    input
}

/// Signing input for a third-party signature: the payload and the chain key
/// the block will be verified against. The external signer commits to the
/// exact token position without learning the chain's secrets.
pub fn external_signing_input(payload: &[u8], chain_key: &PublicKey) -> Vec<u8> {
    let mut input = Vec::with_capacity(payload.len() + 33);
    input.extend_from_slice(payload);
    input.push(chain_key.algorithm().tag());
    input.extend_from_slice(&chain_key.to_bytes());
    input
}

/// Signing input for the seal signature: the last block's payload, next key
/// and chain signature. Sealing consumes the final secret, so no further
/// block can be appended.
pub fn seal_signing_input(
    payload: &[u8],
    next_key: &PublicKey,
    signature: &Signature,
) -> Vec<u8> {
    let mut input = Vec::with_capacity(payload.len() + 97);
    input.extend_from_slice(payload);
    input.push(next_key.algorithm().tag());
    input.extend_from_slice(&next_key.to_bytes());
    input.extend_from_slice(&signature.to_bytes());
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn rng() -> impl CryptoRngCore {
        use rand::SeedableRng;
        rand::rngs::StdRng::seed_from_u64(42)
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let pair = KeyPair::generate(&mut rng());
        let sig = pair.sign(b"message");
        assert!(pair.public().verify(b"message", &sig).is_ok());
        assert_matches!(
            pair.public().verify(b"other", &sig),
            Err(FormatError::InvalidSignature(_))
        );
    }

    #[test]
    fn key_restores_from_secret_bytes() {
        let pair = KeyPair::generate(&mut rng());
        let restored = KeyPair::from_bytes(pair.secret_bytes().as_slice()).unwrap();
        assert_eq!(pair.public(), restored.public());
    }

    #[test]
    fn wrong_key_sizes_are_rejected() {
        assert_matches!(
            PublicKey::from_bytes(&[0u8; 31]),
            Err(FormatError::InvalidKeySize)
        );
        assert_matches!(
            Signature::from_bytes(&[0u8; 63]),
            Err(FormatError::InvalidSignatureSize)
        );
    }

    #[test]
    fn unknown_algorithm_tag_is_rejected() {
        assert_matches!(
            Algorithm::from_tag(7),
            Err(FormatError::UnsupportedAlgorithm(7))
        );
    }

    #[test]
    fn debug_never_prints_the_secret() {
        let pair = KeyPair::generate(&mut rng());
        let rendered = format!("{pair:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(&hex::encode(pair.secret_bytes().as_slice())));
    }

    #[test]
    fn chain_input_binds_position() {
        let pair = KeyPair::generate(&mut rng());
        let next = KeyPair::generate(&mut rng());
        let prev_sig = pair.sign(b"previous");
        let with_prev = chain_signing_input(b"payload", &next.public(), None, Some(&prev_sig));
        let without_prev = chain_signing_input(b"payload", &next.public(), None, None);
        assert_ne!(with_prev, without_prev);
    }
}
