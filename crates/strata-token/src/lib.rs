//! Decentralized authorization tokens with offline attenuation.
//!
//! A token starts as one block signed by the issuer's root key. Any holder
//! can append further blocks of restrictions offline, each signed by an
//! ephemeral key generated for the previous block, so restrictions can only
//! narrow what the token grants. Verifiers check the whole signature chain
//! against the root public key alone, then run the embedded Datalog
//! statements through an [`Authorizer`] under an explicit compute budget.
//!
//! ```
//! use strata_token::builder::{allow_all, check_if, fact, int, pred, var, BodyLiteral, Expression};
//! use strata_token::{Authorizer, BlockBuilder, KeyPair, RunLimits, Token};
//!
//! # fn main() -> Result<(), strata_token::TokenError> {
//! let mut rng = rand::rngs::OsRng;
//! let root = KeyPair::generate(&mut rng);
//!
//! let token = Token::build(
//!     &root,
//!     &mut rng,
//!     BlockBuilder::new().fact(fact("user", [int(1234)])),
//! )?;
//!
//! let mut authorizer = token.authorizer();
//! authorizer.add_check(check_if(
//!     [BodyLiteral::positive(pred("user", [var("u")]))],
//!     [Expression::equal(var("u"), int(1234))],
//! ));
//! authorizer.add_policy(allow_all());
//! assert_eq!(authorizer.authorize(&RunLimits::default())?, 0);
//! # Ok(())
//! # }
//! ```

pub mod authorizer;
pub mod block;
pub mod builder;
pub mod crypto;
pub mod error;
pub mod format;
pub mod token;

pub use authorizer::Authorizer;
pub use block::{Block, BlockBuilder};
pub use crypto::{Algorithm, KeyPair, PublicKey, Signature};
pub use error::{AuthorizationFailure, FailedCheck, FormatError, TokenError};
pub use format::{Proof, RevocationId, SignedBlock, TokenEnvelope};
pub use token::Token;

pub use strata_datalog::{Origin, RunLimits};
