//! Error types for Datalog construction and evaluation.
//!
//! All variants are recoverable, caller-visible outcomes. Nothing here is
//! retried internally; a failed run is reported once and the caller decides
//! whether to retry with different inputs or limits.

use serde::{Deserialize, Serialize};

use crate::symbol::SymbolId;

/// Errors raised while building or evaluating Datalog statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum DatalogError {
    /// A symbol id does not resolve against the current symbol table.
    #[error("unknown symbol {0}")]
    UnknownSymbol(SymbolId),

    /// A fact contained a variable; stored facts must be ground.
    #[error("facts must be ground, found a variable")]
    NonGroundFact,

    /// A rule failed structural validation (unbound head variable, variable
    /// used only under negation, empty check, ...).
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// An expression was applied to operands of the wrong type.
    #[error("invalid type in expression: {0}")]
    InvalidType(String),

    /// Integer arithmetic overflowed.
    #[error("integer overflow")]
    Overflow,

    /// Division by zero in an expression.
    #[error("division by zero")]
    DivideByZero,

    /// A variable was referenced without a binding.
    #[error("unbound variable ${0}")]
    UnboundVariable(String),

    /// A term was used in a position that does not accept it.
    #[error("unexpected term: {0}")]
    UnexpectedTerm(String),
}

/// A run limit tripped during fixpoint evaluation.
///
/// The deadline and iteration budgets are checked at the start of every
/// round; the fact budget is checked after a round's insertions, so the fact
/// store can exceed `max_facts` by at most one round of production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RunLimitError {
    /// The fact store grew past the configured maximum.
    #[error("too many facts: {count} > limit {limit}")]
    TooManyFacts {
        /// Fact count observed when the limit tripped.
        count: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// The configured number of fixpoint rounds elapsed without saturation.
    #[error("too many iterations: limit {limit}")]
    TooManyIterations {
        /// Configured maximum number of rounds.
        limit: usize,
    },

    /// The wall-clock deadline passed between rounds.
    #[error("evaluation deadline exceeded")]
    Timeout,
}

/// Failure modes of a full fixpoint run: either a resource limit or an
/// expression evaluation error inside a rule body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// A run limit was exceeded.
    #[error(transparent)]
    RunLimit(#[from] RunLimitError),

    /// Expression or substitution failure while applying a rule.
    #[error(transparent)]
    Datalog(#[from] DatalogError),
}
