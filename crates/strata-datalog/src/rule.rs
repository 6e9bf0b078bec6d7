//! Rules: deriving new facts from existing ones.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::DatalogError;
use crate::expression::Expression;
use crate::fact::Predicate;
use crate::origin::Scope;
use crate::symbol::{SymbolId, SymbolTable};
use crate::term::Term;

/// One body literal: a predicate pattern, possibly negated.
///
/// A negated literal succeeds iff no visible ground fact matches it at
/// evaluation time, so it is re-evaluated against the current fact set each
/// round rather than cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyLiteral {
    pub predicate: Predicate,
    pub negated: bool,
}

impl BodyLiteral {
    pub fn positive(predicate: Predicate) -> Self {
        Self {
            predicate,
            negated: false,
        }
    }

    pub fn negative(predicate: Predicate) -> Self {
        Self {
            predicate,
            negated: true,
        }
    }
}

/// A derivation rule: head template, body literals, expression constraints
/// and a visibility scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Head predicate; may contain variables bound by the body.
    pub head: Predicate,
    /// Ordered body literals.
    pub body: Vec<BodyLiteral>,
    /// Constraints that must evaluate to true for a binding to survive.
    pub expressions: Vec<Expression>,
    /// Which origins the body may read facts from.
    pub scope: Scope,
}

impl Rule {
    pub fn new(
        head: Predicate,
        body: Vec<BodyLiteral>,
        expressions: Vec<Expression>,
        scope: Scope,
    ) -> Self {
        Self {
            head,
            body,
            expressions,
            scope,
        }
    }

    /// Variables bound by positive body literals.
    fn bound_variables(&self) -> BTreeSet<SymbolId> {
        let mut bound = BTreeSet::new();
        for literal in self.body.iter().filter(|l| !l.negated) {
            for term in &literal.predicate.terms {
                if let Term::Variable(id) = term {
                    bound.insert(*id);
                }
            }
        }
        bound
    }

    /// Structural validation: every variable in the head, in a negated
    /// literal or in an expression must be bound by a positive body literal.
    pub fn validate(&self, symbols: &SymbolTable) -> Result<(), DatalogError> {
        let bound = self.bound_variables();

        let name = |id: SymbolId| symbols.print_symbol(id).unwrap_or("?").to_string();

        for term in &self.head.terms {
            if let Term::Variable(id) = term {
                if !bound.contains(id) {
                    return Err(DatalogError::InvalidRule(format!(
                        "head variable ${} is not bound by the body",
                        name(*id)
                    )));
                }
            }
        }

        for literal in self.body.iter().filter(|l| l.negated) {
            for term in &literal.predicate.terms {
                if let Term::Variable(id) = term {
                    if !bound.contains(id) {
                        return Err(DatalogError::InvalidRule(format!(
                            "variable ${} appears only under negation",
                            name(*id)
                        )));
                    }
                }
            }
        }

        let mut expression_vars = BTreeSet::new();
        for expression in &self.expressions {
            expression.variables(&mut expression_vars);
        }
        if let Some(id) = expression_vars.difference(&bound).next() {
            return Err(DatalogError::InvalidRule(format!(
                "expression variable ${} is not bound by the body",
                name(*id)
            )));
        }

        Ok(())
    }
}
