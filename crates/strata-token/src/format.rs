//! Wire format: signed blocks, the container envelope and chain
//! verification.
//!
//! Each block's Datalog payload is kept as the exact bytes that were signed,
//! so re-serializing a parsed token reproduces it byte for byte and
//! signatures stay valid across round trips. The envelope ends with a proof:
//! either the final ephemeral secret (an attenuable token) or a seal
//! signature (a sealed one).

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{
    chain_signing_input, external_signing_input, seal_signing_input, KeyPair, PublicKey,
    Signature,
};
use crate::error::FormatError;

/// Lowest block version this build accepts.
pub const MIN_VERSION: u32 = 1;
/// Highest block version this build accepts.
pub const MAX_VERSION: u32 = 1;
/// Version stamped on newly created blocks.
pub const CURRENT_VERSION: u32 = 1;

/// A third-party signature over a block payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSignature {
    pub key: PublicKey,
    pub signature: Signature,
}

/// One link of the chain: the raw signed payload bytes, the next ephemeral
/// key, and the signatures binding it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    /// Serialized [`crate::block::Block`], kept verbatim.
    pub payload: Vec<u8>,
    /// Public half of the ephemeral key that signs the next block.
    pub next_key: PublicKey,
    pub signature: Signature,
    pub external: Option<ExternalSignature>,
}

impl SignedBlock {
    /// Unique identifier for revocation lists. Derived from the payload, the
    /// next key and the chain signature, so any two blocks with identical
    /// statements still revoke independently.
    pub fn revocation_id(&self) -> RevocationId {
        let mut hasher = Sha256::new();
        hasher.update(&self.payload);
        hasher.update([self.next_key.algorithm().tag()]);
        hasher.update(self.next_key.to_bytes());
        hasher.update(self.signature.to_bytes());
        RevocationId(hasher.finalize().into())
    }
}

/// SHA-256 digest identifying one block for revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RevocationId(pub [u8; 32]);

impl fmt::Display for RevocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Terminates the chain: the final ephemeral secret while the token is
/// attenuable, or the seal signature once it is not.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub enum Proof {
    /// Secret half of the last block's `next_key`.
    NextSecret(Vec<u8>),
    /// Seal signature made with the final secret, which was then discarded.
    #[zeroize(skip)]
    FinalSignature(Signature),
}

impl fmt::Debug for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proof::NextSecret(_) => f.write_str("Proof::NextSecret(REDACTED)"),
            Proof::FinalSignature(sig) => {
                write!(f, "Proof::FinalSignature({})", hex::encode(sig.to_bytes()))
            }
        }
    }
}

/// The full serialized token: root block, attenuation blocks and proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEnvelope {
    pub root: SignedBlock,
    pub blocks: Vec<SignedBlock>,
    pub proof: Proof,
}

impl TokenEnvelope {
    pub fn serialize(&self) -> Result<Vec<u8>, FormatError> {
        bincode::serialize(self).map_err(|e| FormatError::Serialization(e.to_string()))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, FormatError> {
        bincode::deserialize(bytes).map_err(|e| FormatError::Deserialization(e.to_string()))
    }

    /// Verify every signature in the chain against the root public key, then
    /// the proof against the final ephemeral key.
    pub fn verify(&self, root: &PublicKey) -> Result<(), FormatError> {
        let mut current_key = *root;
        let mut previous_signature: Option<Signature> = None;

        for block in std::iter::once(&self.root).chain(self.blocks.iter()) {
            if let Some(external) = &block.external {
                let input = external_signing_input(&block.payload, &current_key);
                external.key.verify(&input, &external.signature)?;
            }
            let input = chain_signing_input(
                &block.payload,
                &block.next_key,
                block.external.as_ref().map(|e| &e.signature),
                previous_signature.as_ref(),
            );
            current_key.verify(&input, &block.signature)?;
            previous_signature = Some(block.signature);
            current_key = block.next_key;
        }

        let last = self.blocks.last().unwrap_or(&self.root);
        match &self.proof {
            Proof::NextSecret(secret) => {
                let pair = KeyPair::from_bytes(secret)?;
                if pair.public() != current_key {
                    return Err(FormatError::InvalidSignature(
                        "proof secret does not match the final chain key".to_string(),
                    ));
                }
            }
            Proof::FinalSignature(signature) => {
                let input = seal_signing_input(&last.payload, &last.next_key, &last.signature);
                current_key.verify(&input, signature)?;
            }
        }
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self.proof, Proof::FinalSignature(_))
    }
}

/// Sign a payload as the next block of a chain.
pub(crate) fn sign_block(
    signer: &KeyPair,
    payload: Vec<u8>,
    next_key: &PublicKey,
    external: Option<ExternalSignature>,
    previous_signature: Option<&Signature>,
) -> SignedBlock {
    let input = chain_signing_input(
        &payload,
        next_key,
        external.as_ref().map(|e| &e.signature),
        previous_signature,
    );
    SignedBlock {
        payload,
        next_key: *next_key,
        signature: signer.sign(&input),
        external,
    }
}
