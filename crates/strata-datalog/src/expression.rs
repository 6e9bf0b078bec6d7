//! Expression language evaluated inside rule bodies and checks.
//!
//! Expressions run against a completed variable binding produced by body
//! matching; a constraint holds iff it evaluates to `Bool(true)`. Integer
//! arithmetic is checked, sets stay canonical, string operations resolve
//! through the symbol table.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::DatalogError;
use crate::symbol::{SymbolId, SymbolTable};
use crate::term::Term;

/// Variable assignments accumulated while matching a rule body.
pub type Binding = HashMap<SymbolId, Term>;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Boolean negation.
    Negate,
    /// Grouping, evaluates to its operand.
    Parens,
    /// Length of a string, byte sequence or set, as an integer.
    Length,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    LessThan,
    GreaterThan,
    LessOrEqual,
    GreaterOrEqual,
    Equal,
    NotEqual,
    /// Set membership / subset, or string containment.
    Contains,
    /// String prefix test.
    Prefix,
    /// String suffix test.
    Suffix,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Intersection,
    Union,
}

/// An expression tree over terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    /// A literal term or variable reference.
    Value(Term),
    /// Unary application.
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    /// Binary application.
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn value(term: Term) -> Self {
        Expression::Value(term)
    }

    pub fn unary(op: UnaryOp, expr: Expression) -> Self {
        Expression::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Collect the variables referenced by this expression.
    pub fn variables(&self, out: &mut BTreeSet<SymbolId>) {
        match self {
            Expression::Value(Term::Variable(id)) => {
                out.insert(*id);
            }
            Expression::Value(_) => {}
            Expression::Unary { expr, .. } => expr.variables(out),
            Expression::Binary { left, right, .. } => {
                left.variables(out);
                right.variables(out);
            }
        }
    }

    /// Evaluate against a completed binding.
    pub fn evaluate(
        &self,
        binding: &Binding,
        symbols: &SymbolTable,
    ) -> Result<Term, DatalogError> {
        match self {
            Expression::Value(Term::Variable(id)) => {
                binding.get(id).cloned().ok_or_else(|| {
                    DatalogError::UnboundVariable(
                        symbols.print_symbol(*id).unwrap_or("?").to_string(),
                    )
                })
            }
            Expression::Value(term) => Ok(term.clone()),
            Expression::Unary { op, expr } => {
                let value = expr.evaluate(binding, symbols)?;
                op.apply(value, symbols)
            }
            Expression::Binary { op, left, right } => {
                let l = left.evaluate(binding, symbols)?;
                let r = right.evaluate(binding, symbols)?;
                op.apply(l, r, symbols)
            }
        }
    }
}

impl UnaryOp {
    fn apply(self, value: Term, symbols: &SymbolTable) -> Result<Term, DatalogError> {
        match (self, value) {
            (UnaryOp::Negate, Term::Bool(b)) => Ok(Term::Bool(!b)),
            (UnaryOp::Parens, value) => Ok(value),
            (UnaryOp::Length, Term::Str(id)) => {
                Ok(Term::Integer(symbols.print_symbol(id)?.len() as i64))
            }
            (UnaryOp::Length, Term::Bytes(b)) => Ok(Term::Integer(b.len() as i64)),
            (UnaryOp::Length, Term::Set(items)) => Ok(Term::Integer(items.len() as i64)),
            (op, value) => Err(DatalogError::InvalidType(format!(
                "{op:?} is not defined on {}",
                value.type_name()
            ))),
        }
    }
}

impl BinaryOp {
    fn apply(self, left: Term, right: Term, symbols: &SymbolTable) -> Result<Term, DatalogError> {
        use BinaryOp::*;
        use Term::*;

        match (self, left, right) {
            // Comparisons on integers and dates.
            (LessThan, Integer(a), Integer(b)) => Ok(Bool(a < b)),
            (GreaterThan, Integer(a), Integer(b)) => Ok(Bool(a > b)),
            (LessOrEqual, Integer(a), Integer(b)) => Ok(Bool(a <= b)),
            (GreaterOrEqual, Integer(a), Integer(b)) => Ok(Bool(a >= b)),
            (LessThan, Date(a), Date(b)) => Ok(Bool(a < b)),
            (GreaterThan, Date(a), Date(b)) => Ok(Bool(a > b)),
            (LessOrEqual, Date(a), Date(b)) => Ok(Bool(a <= b)),
            (GreaterOrEqual, Date(a), Date(b)) => Ok(Bool(a >= b)),

            // Structural equality between same-typed terms.
            (Equal, a, b) if same_type(&a, &b) => Ok(Bool(a == b)),
            (NotEqual, a, b) if same_type(&a, &b) => Ok(Bool(a != b)),

            // Checked integer arithmetic.
            (Add, Integer(a), Integer(b)) => {
                a.checked_add(b).map(Integer).ok_or(DatalogError::Overflow)
            }
            (Sub, Integer(a), Integer(b)) => {
                a.checked_sub(b).map(Integer).ok_or(DatalogError::Overflow)
            }
            (Mul, Integer(a), Integer(b)) => {
                a.checked_mul(b).map(Integer).ok_or(DatalogError::Overflow)
            }
            (Div, Integer(_), Integer(0)) => Err(DatalogError::DivideByZero),
            (Div, Integer(a), Integer(b)) => {
                a.checked_div(b).map(Integer).ok_or(DatalogError::Overflow)
            }

            (And, Bool(a), Bool(b)) => Ok(Bool(a && b)),
            (Or, Bool(a), Bool(b)) => Ok(Bool(a || b)),

            // Membership and string containment.
            (Contains, Set(items), Set(sub)) => Ok(Bool(sub.is_subset(&items))),
            (Contains, Set(items), element) if element.is_ground() => {
                Ok(Bool(items.contains(&element)))
            }
            (Contains, Str(a), Str(b)) => Ok(Bool(
                symbols.print_symbol(a)?.contains(symbols.print_symbol(b)?),
            )),
            (Prefix, Str(a), Str(b)) => Ok(Bool(
                symbols
                    .print_symbol(a)?
                    .starts_with(symbols.print_symbol(b)?),
            )),
            (Suffix, Str(a), Str(b)) => Ok(Bool(
                symbols
                    .print_symbol(a)?
                    .ends_with(symbols.print_symbol(b)?),
            )),

            (Intersection, Set(a), Set(b)) => Ok(Set(a.intersection(&b).cloned().collect())),
            (Union, Set(a), Set(b)) => Ok(Set(a.union(&b).cloned().collect())),

            (op, a, b) => Err(DatalogError::InvalidType(format!(
                "{op:?} is not defined on ({}, {})",
                a.type_name(),
                b.type_name()
            ))),
        }
    }
}

fn same_type(a: &Term, b: &Term) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn eval(expression: &Expression) -> Result<Term, DatalogError> {
        expression.evaluate(&Binding::new(), &SymbolTable::new())
    }

    #[test]
    fn comparisons() {
        let expr = Expression::binary(
            BinaryOp::LessThan,
            Expression::value(Term::Integer(3)),
            Expression::value(Term::Integer(7)),
        );
        assert_eq!(eval(&expr).unwrap(), Term::Bool(true));

        let expr = Expression::binary(
            BinaryOp::GreaterOrEqual,
            Expression::value(Term::Date(100)),
            Expression::value(Term::Date(100)),
        );
        assert_eq!(eval(&expr).unwrap(), Term::Bool(true));
    }

    #[test]
    fn checked_arithmetic() {
        let overflow = Expression::binary(
            BinaryOp::Add,
            Expression::value(Term::Integer(i64::MAX)),
            Expression::value(Term::Integer(1)),
        );
        assert_matches!(eval(&overflow), Err(DatalogError::Overflow));

        let div_zero = Expression::binary(
            BinaryOp::Div,
            Expression::value(Term::Integer(4)),
            Expression::value(Term::Integer(0)),
        );
        assert_matches!(eval(&div_zero), Err(DatalogError::DivideByZero));
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let expr = Expression::binary(
            BinaryOp::LessThan,
            Expression::value(Term::Integer(3)),
            Expression::value(Term::Bool(true)),
        );
        assert_matches!(eval(&expr), Err(DatalogError::InvalidType(_)));
    }

    #[test]
    fn set_membership() {
        let set: BTreeSet<Term> = [Term::Integer(1), Term::Integer(2)].into_iter().collect();
        let expr = Expression::binary(
            BinaryOp::Contains,
            Expression::value(Term::Set(set.clone())),
            Expression::value(Term::Integer(2)),
        );
        assert_eq!(eval(&expr).unwrap(), Term::Bool(true));

        let sub: BTreeSet<Term> = [Term::Integer(1)].into_iter().collect();
        let expr = Expression::binary(
            BinaryOp::Contains,
            Expression::value(Term::Set(set)),
            Expression::value(Term::Set(sub)),
        );
        assert_eq!(eval(&expr).unwrap(), Term::Bool(true));
    }

    #[test]
    fn string_operations() {
        let mut symbols = SymbolTable::new();
        let hay = symbols.insert("namespace:project");
        let pre = symbols.insert("namespace:");
        let expr = Expression::binary(
            BinaryOp::Prefix,
            Expression::value(Term::Str(hay)),
            Expression::value(Term::Str(pre)),
        );
        assert_eq!(
            expr.evaluate(&Binding::new(), &symbols).unwrap(),
            Term::Bool(true)
        );
    }

    #[test]
    fn variables_resolve_through_binding() {
        let mut symbols = SymbolTable::new();
        let v = symbols.insert("u");
        let expr = Expression::binary(
            BinaryOp::Equal,
            Expression::value(Term::Variable(v)),
            Expression::value(Term::Integer(1234)),
        );
        let mut binding = Binding::new();
        binding.insert(v, Term::Integer(1234));
        assert_eq!(expr.evaluate(&binding, &symbols).unwrap(), Term::Bool(true));

        assert_matches!(
            expr.evaluate(&Binding::new(), &symbols),
            Err(DatalogError::UnboundVariable(_))
        );
    }

    #[test]
    fn negation_and_grouping() {
        let expr = Expression::unary(
            UnaryOp::Negate,
            Expression::unary(UnaryOp::Parens, Expression::value(Term::Bool(false))),
        );
        assert_eq!(eval(&expr).unwrap(), Term::Bool(true));
    }
}
