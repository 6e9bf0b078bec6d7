//! Checks: conditions that must hold for authorization to succeed.

use serde::{Deserialize, Serialize};

use crate::error::DatalogError;
use crate::rule::Rule;
use crate::symbol::SymbolTable;

/// How a check's query bindings are quantified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckKind {
    /// `check if`: some binding must satisfy the body and its expressions.
    One,
    /// `check all`: the body must match at least once and every matching
    /// binding must satisfy the expressions.
    All,
}

/// A non-empty list of query rules. The check passes iff at least one query
/// passes under the check's quantifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub queries: Vec<Rule>,
    pub kind: CheckKind,
}

impl Check {
    pub fn new(queries: Vec<Rule>, kind: CheckKind) -> Result<Self, DatalogError> {
        if queries.is_empty() {
            return Err(DatalogError::InvalidRule(
                "a check needs at least one query".to_string(),
            ));
        }
        Ok(Self { queries, kind })
    }

    /// Validate every query, e.g. after decoding from the wire.
    pub fn validate(&self, symbols: &SymbolTable) -> Result<(), DatalogError> {
        if self.queries.is_empty() {
            return Err(DatalogError::InvalidRule(
                "a check needs at least one query".to_string(),
            ));
        }
        for query in &self.queries {
            query.validate(symbols)?;
        }
        Ok(())
    }
}
