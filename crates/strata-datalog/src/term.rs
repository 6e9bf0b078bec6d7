//! Typed terms used inside facts, rule bodies and expressions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::symbol::SymbolId;

/// A single value position inside a predicate or expression.
///
/// The derived `Ord` implements the canonical total order: type rank first
/// (Variable < Integer < Str < Bytes < Bool < Date < Set), then value within
/// a type. Sets rely on this order for canonical, deduplicated storage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    /// An unbound variable, by interned name. Only valid in rule heads,
    /// bodies and expressions, never in stored facts.
    Variable(SymbolId),
    /// Signed 64-bit integer.
    Integer(i64),
    /// Interned string literal.
    Str(SymbolId),
    /// Raw byte sequence.
    Bytes(Vec<u8>),
    /// Boolean.
    Bool(bool),
    /// Seconds since the Unix epoch.
    Date(u64),
    /// Ordered, deduplicated set of ground, non-set terms.
    Set(BTreeSet<Term>),
}

impl Term {
    /// True if the term contains no variable anywhere.
    pub fn is_ground(&self) -> bool {
        match self {
            Term::Variable(_) => false,
            Term::Set(items) => items.iter().all(Term::is_ground),
            _ => true,
        }
    }

    /// Human-readable type name, used in expression error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Term::Variable(_) => "variable",
            Term::Integer(_) => "integer",
            Term::Str(_) => "string",
            Term::Bytes(_) => "bytes",
            Term::Bool(_) => "bool",
            Term::Date(_) => "date",
            Term::Set(_) => "set",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_rank_orders_before_value() {
        let ordered = [
            Term::Variable(7),
            Term::Integer(i64::MAX),
            Term::Str(0),
            Term::Bytes(vec![0]),
            Term::Bool(false),
            Term::Date(0),
            Term::Set(BTreeSet::new()),
        ];
        for window in ordered.windows(2) {
            assert!(window[0] < window[1], "{window:?} out of rank order");
        }
    }

    #[test]
    fn values_order_within_type() {
        assert!(Term::Integer(-3) < Term::Integer(4));
        assert!(Term::Date(10) < Term::Date(11));
        assert!(Term::Bytes(vec![1]) < Term::Bytes(vec![1, 0]));
    }

    #[test]
    fn sets_deduplicate() {
        let set: BTreeSet<Term> = [Term::Integer(1), Term::Integer(1), Term::Integer(2)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn groundness() {
        assert!(!Term::Variable(0).is_ground());
        assert!(Term::Integer(1).is_ground());
        let nested: BTreeSet<Term> = [Term::Variable(1)].into_iter().collect();
        assert!(!Term::Set(nested).is_ground());
    }

    mod ordering_laws {
        use super::*;
        use proptest::prelude::*;

        fn arb_term() -> impl Strategy<Value = Term> {
            prop_oneof![
                any::<u64>().prop_map(Term::Variable),
                any::<i64>().prop_map(Term::Integer),
                any::<u64>().prop_map(Term::Str),
                proptest::collection::vec(any::<u8>(), 0..8).prop_map(Term::Bytes),
                any::<bool>().prop_map(Term::Bool),
                any::<u64>().prop_map(Term::Date),
            ]
        }

        proptest! {
            /// Sorting is canonical: any permutation sorts to the same sequence.
            #[test]
            fn sort_is_canonical(mut terms in proptest::collection::vec(arb_term(), 0..16)) {
                let mut sorted = terms.clone();
                sorted.sort();
                terms.reverse();
                terms.sort();
                prop_assert_eq!(sorted, terms);
            }

            /// Comparison is antisymmetric.
            #[test]
            fn antisymmetry(a in arb_term(), b in arb_term()) {
                if a < b {
                    prop_assert!(b > a);
                }
                if a == b {
                    prop_assert_eq!(a.cmp(&b), std::cmp::Ordering::Equal);
                }
            }
        }
    }
}
