//! Error types for token encoding, verification and authorization.

use serde::{Deserialize, Serialize};
use strata_datalog::{DatalogError, ExecutionError, RunLimitError};

/// Wire-format and signature failures.
///
/// Signature errors carry a short context string rather than the underlying
/// dalek error so they stay comparable and serializable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// A token component failed to serialize.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The input bytes do not decode as a token.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The signature algorithm tag is not one this build supports.
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(u8),

    /// A public or secret key had the wrong length.
    #[error("invalid key size")]
    InvalidKeySize,

    /// Key bytes of the right length failed point decompression.
    #[error("invalid key")]
    InvalidKey,

    /// A signature had the wrong length.
    #[error("invalid signature size")]
    InvalidSignatureSize,

    /// The block version is outside the supported range.
    #[error("unsupported block version {actual}, supported range is {min}..={max}")]
    UnsupportedVersion { actual: u32, min: u32, max: u32 },

    /// A signature failed verification.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

/// One failed check, identified by where it was declared and which check it
/// was, with its printed source for error messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCheck {
    /// Origin of the block (or authorizer) that declared the check.
    pub origin: strata_datalog::Origin,
    /// Index of the check within its declaring block.
    pub check_index: usize,
    /// Printed form of the check.
    pub source: String,
}

/// The authorizer ran to completion and refused the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum AuthorizationFailure {
    /// Every check is evaluated before reporting, so this lists all failures.
    #[error("the following checks failed: {}", format_checks(.0))]
    FailedChecks(Vec<FailedCheck>),

    /// A deny policy matched before any allow policy.
    #[error("denied by policy {index}")]
    DeniedByPolicy {
        /// Index of the matching deny policy in declaration order.
        index: usize,
    },

    /// All checks passed but no policy matched.
    #[error("no matching policy")]
    NoMatchingPolicy,
}

fn format_checks(checks: &[FailedCheck]) -> String {
    checks
        .iter()
        .map(|c| format!("[{} check {}] {}", c.origin, c.check_index, c.source))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top-level error for every token operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Encoding, decoding or signature failure.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Statement construction or evaluation failure.
    #[error(transparent)]
    Datalog(#[from] DatalogError),

    /// The evaluation budget was exhausted.
    #[error(transparent)]
    RunLimit(#[from] RunLimitError),

    /// Attempted to append a block to a sealed token.
    #[error("cannot append a block to a sealed token")]
    AlreadySealed,

    /// The authorizer evaluated everything and refused.
    #[error(transparent)]
    FailedLogic(#[from] AuthorizationFailure),
}

impl From<ExecutionError> for TokenError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::RunLimit(e) => TokenError::RunLimit(e),
            ExecutionError::Datalog(e) => TokenError::Datalog(e),
        }
    }
}
