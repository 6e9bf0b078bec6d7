//! Origin-scoped Datalog evaluation for authorization decisions.
//!
//! This crate provides the logic layer underneath `strata-token`: interned
//! symbols, a term and expression model, facts, derivation rules, checks and
//! policies, all tagged with the origin that declared them. The [`World`]
//! engine computes a least fixpoint under an explicit [`RunLimits`] budget so
//! evaluation of untrusted statements always terminates.
//!
//! Visibility is governed by [`TrustedOrigins`]: a statement may only read
//! facts whose full provenance it trusts, and the default scope never extends
//! past the declaring block. This asymmetry is what makes token attenuation
//! strictly narrowing.

pub mod check;
pub mod error;
pub mod expression;
pub mod fact;
pub mod origin;
pub mod policy;
pub mod rule;
pub mod snapshot;
pub mod symbol;
pub mod term;
pub mod world;

pub use check::{Check, CheckKind};
pub use error::{DatalogError, ExecutionError, RunLimitError};
pub use expression::{BinaryOp, Binding, Expression, UnaryOp};
pub use fact::{Fact, Predicate};
pub use origin::{ExternalKeyOrigins, Origin, OriginSet, Scope, TrustedOrigins};
pub use policy::{Policy, PolicyEffect};
pub use rule::{BodyLiteral, Rule};
pub use snapshot::WorldSnapshot;
pub use symbol::{SymbolId, SymbolTable, DEFAULT_SYMBOLS_OFFSET};
pub use term::Term;
pub use world::{FactStore, RunLimits, World};
