//! Policies: ordered allow/deny decisions evaluated after all checks pass.

use serde::{Deserialize, Serialize};

use crate::error::DatalogError;
use crate::rule::Rule;

/// Outcome of a matching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyEffect {
    Allow,
    Deny,
}

/// An allow/deny rule. Policies are evaluated in declaration order; the
/// first one with a satisfiable query decides the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub queries: Vec<Rule>,
    pub effect: PolicyEffect,
}

impl Policy {
    pub fn new(queries: Vec<Rule>, effect: PolicyEffect) -> Result<Self, DatalogError> {
        if queries.is_empty() {
            return Err(DatalogError::InvalidRule(
                "a policy needs at least one query".to_string(),
            ));
        }
        Ok(Self { queries, effect })
    }
}
