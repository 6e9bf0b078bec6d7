//! Predicates and ground facts.

use serde::{Deserialize, Serialize};

use crate::error::DatalogError;
use crate::symbol::SymbolId;
use crate::term::Term;

/// A named relation applied to an ordered list of terms.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Predicate {
    /// Interned predicate name.
    pub name: SymbolId,
    /// Ordered argument terms.
    pub terms: Vec<Term>,
}

impl Predicate {
    pub fn new(name: SymbolId, terms: Vec<Term>) -> Self {
        Self { name, terms }
    }

    /// True if no argument contains a variable.
    pub fn is_ground(&self) -> bool {
        self.terms.iter().all(Term::is_ground)
    }
}

/// A ground logic statement. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fact {
    pub predicate: Predicate,
}

impl Fact {
    /// Build a fact, rejecting any variable argument.
    pub fn new(predicate: Predicate) -> Result<Self, DatalogError> {
        let fact = Self { predicate };
        fact.validate()?;
        Ok(fact)
    }

    /// Re-check groundness, e.g. after decoding from the wire.
    pub fn validate(&self) -> Result<(), DatalogError> {
        if self.predicate.is_ground() {
            Ok(())
        } else {
            Err(DatalogError::NonGroundFact)
        }
    }
}
