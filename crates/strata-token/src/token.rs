//! The chained authorization token.
//!
//! A token is a root block signed by the issuer's long-lived key, followed
//! by attenuation blocks each signed by the previous block's ephemeral key.
//! Holding a token is enough to append blocks (the final ephemeral secret
//! travels with it), but appended blocks can only narrow what the token
//! grants, never widen it.

use rand_core::CryptoRngCore;
use strata_datalog::{ExternalKeyOrigins, SymbolTable};
use tracing::debug;

use crate::authorizer::Authorizer;
use crate::block::{Block, BlockBuilder};
use crate::crypto::{external_signing_input, seal_signing_input, KeyPair, PublicKey};
use crate::error::{FormatError, TokenError};
use crate::format::{
    sign_block, ExternalSignature, Proof, RevocationId, SignedBlock, TokenEnvelope,
    MAX_VERSION, MIN_VERSION,
};

/// A verified token: the wire envelope plus its decoded blocks and the
/// symbol table accumulated across them.
#[derive(Debug, Clone)]
pub struct Token {
    envelope: TokenEnvelope,
    /// Decoded blocks in chain order; index 0 is the root block.
    blocks: Vec<Block>,
    symbols: SymbolTable,
    root_key: PublicKey,
}

impl Token {
    /// Create a new token whose root block is signed by `root`.
    pub fn build<R: CryptoRngCore>(
        root: &KeyPair,
        rng: &mut R,
        builder: BlockBuilder,
    ) -> Result<Self, TokenError> {
        let mut symbols = SymbolTable::new();
        let block = builder.build(&mut symbols, None)?;
        let payload = encode_block(&block)?;

        let next = KeyPair::generate(rng);
        let signed = sign_block(root, payload, &next.public(), None, None);
        let envelope = TokenEnvelope {
            root: signed,
            blocks: Vec::new(),
            proof: Proof::NextSecret(next.secret_bytes().to_vec()),
        };
        debug!(root = %root.public(), "built token");
        Ok(Self {
            envelope,
            blocks: vec![block],
            symbols,
            root_key: root.public(),
        })
    }

    /// Parse and fully verify a serialized token against the expected root
    /// public key.
    pub fn from_bytes(bytes: &[u8], root: &PublicKey) -> Result<Self, TokenError> {
        let envelope = TokenEnvelope::deserialize(bytes)?;
        envelope.verify(root)?;

        let mut symbols = SymbolTable::new();
        let mut blocks = Vec::with_capacity(envelope.blocks.len() + 1);
        for signed in std::iter::once(&envelope.root).chain(envelope.blocks.iter()) {
            let block = decode_block(&signed.payload)?;
            if block.version < MIN_VERSION || block.version > MAX_VERSION {
                return Err(FormatError::UnsupportedVersion {
                    actual: block.version,
                    min: MIN_VERSION,
                    max: MAX_VERSION,
                }
                .into());
            }
            // The payload's external-key claim must agree with the envelope's
            // external signature; otherwise a holder could self-sign a block
            // that claims a third party's key and key-scoped statements
            // would trust it.
            if block.external_key != signed.external.as_ref().map(|e| e.key) {
                return Err(FormatError::InvalidSignature(
                    "declared external key does not match the block's external signature"
                        .to_string(),
                )
                .into());
            }
            symbols.extend(&block.symbols);
            block.validate(&symbols)?;
            blocks.push(block);
        }
        debug!(blocks = blocks.len(), "parsed token");
        Ok(Self {
            envelope,
            blocks,
            symbols,
            root_key: *root,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TokenError> {
        Ok(self.envelope.serialize()?)
    }

    /// Append an attenuation block, consuming the current proof secret and
    /// producing a new attenuable token. The original token is unchanged.
    pub fn append<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        builder: BlockBuilder,
    ) -> Result<Self, TokenError> {
        self.append_inner(rng, builder, None)
    }

    /// Append a block carrying a third-party signature. The external signer
    /// vouches for the block's statements; rules elsewhere in the token can
    /// trust facts from blocks signed by that key.
    pub fn append_third_party<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        external: &KeyPair,
        builder: BlockBuilder,
    ) -> Result<Self, TokenError> {
        self.append_inner(rng, builder, Some(external))
    }

    fn append_inner<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        builder: BlockBuilder,
        external: Option<&KeyPair>,
    ) -> Result<Self, TokenError> {
        let secret = match &self.envelope.proof {
            Proof::NextSecret(secret) => secret,
            Proof::FinalSignature(_) => return Err(TokenError::AlreadySealed),
        };
        let signer = KeyPair::from_bytes(secret)?;

        let mut symbols = self.symbols.clone();
        let block = builder.build(&mut symbols, external.map(KeyPair::public))?;
        let payload = encode_block(&block)?;

        let external_signature = external.map(|key| {
            let input = external_signing_input(&payload, &signer.public());
            ExternalSignature {
                key: key.public(),
                signature: key.sign(&input),
            }
        });

        let next = KeyPair::generate(rng);
        let previous = self.last_signed().signature;
        let signed = sign_block(
            &signer,
            payload,
            &next.public(),
            external_signature,
            Some(&previous),
        );

        let mut envelope = self.envelope.clone();
        envelope.blocks.push(signed);
        envelope.proof = Proof::NextSecret(next.secret_bytes().to_vec());

        let mut blocks = self.blocks.clone();
        blocks.push(block);
        debug!(blocks = blocks.len(), "appended block");
        Ok(Self {
            envelope,
            blocks,
            symbols,
            root_key: self.root_key,
        })
    }

    /// Seal the token: replace the proof secret with a final signature so no
    /// further block can ever be appended.
    pub fn seal(&self) -> Result<Self, TokenError> {
        let secret = match &self.envelope.proof {
            Proof::NextSecret(secret) => secret,
            Proof::FinalSignature(_) => return Err(TokenError::AlreadySealed),
        };
        let signer = KeyPair::from_bytes(secret)?;

        let last = self.last_signed();
        let input = seal_signing_input(&last.payload, &last.next_key, &last.signature);
        let mut envelope = self.envelope.clone();
        envelope.proof = Proof::FinalSignature(signer.sign(&input));

        Ok(Self {
            envelope,
            blocks: self.blocks.clone(),
            symbols: self.symbols.clone(),
            root_key: self.root_key,
        })
    }

    pub fn is_sealed(&self) -> bool {
        self.envelope.is_sealed()
    }

    /// Per-block revocation identifiers, in chain order. Publishing any one
    /// of them revokes this token and every token attenuated from it at or
    /// after that block.
    pub fn revocation_identifiers(&self) -> Vec<RevocationId> {
        std::iter::once(&self.envelope.root)
            .chain(self.envelope.blocks.iter())
            .map(SignedBlock::revocation_id)
            .collect()
    }

    /// Map from external public key bytes to the indices of blocks carrying
    /// that key's signature.
    pub fn external_origins(&self) -> ExternalKeyOrigins {
        let mut map = ExternalKeyOrigins::new();
        for (index, block) in self.blocks.iter().enumerate() {
            if let Some(key) = &block.external_key {
                map.entry(key.to_bytes().to_vec())
                    .or_default()
                    .push(index as u32);
            }
        }
        map
    }

    pub fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Per-block context strings, in chain order.
    pub fn context(&self) -> Vec<&str> {
        self.blocks.iter().map(|b| b.context.as_str()).collect()
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn root_key(&self) -> &PublicKey {
        &self.root_key
    }

    /// An authorizer pre-loaded with this token's statements.
    pub fn authorizer(&self) -> Authorizer {
        Authorizer::for_token(self)
    }

    /// Human-readable rendering of every block's statements.
    pub fn print(&self) -> Result<String, TokenError> {
        let mut out = String::new();
        for (index, block) in self.blocks.iter().enumerate() {
            out.push_str(&format!("block {index} {{\n"));
            if !block.context.is_empty() {
                out.push_str(&format!("  context: {:?}\n", block.context));
            }
            for fact in &block.facts {
                out.push_str(&format!("  {}\n", self.symbols.print_fact(fact)?));
            }
            for rule in &block.rules {
                out.push_str(&format!("  {}\n", self.symbols.print_rule(rule)?));
            }
            for check in &block.checks {
                out.push_str(&format!("  {}\n", self.symbols.print_check(check)?));
            }
            out.push_str("}\n");
        }
        Ok(out)
    }

    fn last_signed(&self) -> &SignedBlock {
        self.envelope.blocks.last().unwrap_or(&self.envelope.root)
    }
}

fn encode_block(block: &Block) -> Result<Vec<u8>, TokenError> {
    bincode::serialize(block)
        .map_err(|e| FormatError::Serialization(e.to_string()).into())
}

fn decode_block(payload: &[u8]) -> Result<Block, TokenError> {
    bincode::deserialize(payload)
        .map_err(|e| FormatError::Deserialization(e.to_string()).into())
}
