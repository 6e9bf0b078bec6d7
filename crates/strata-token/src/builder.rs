//! String-owning statement builders.
//!
//! Tokens and authorizers intern strings into per-instance symbol tables, so
//! statements cannot be constructed directly against interned ids without
//! first choosing a table. The builder types here own their strings and are
//! converted against the right table when attached to a block or authorizer.

use std::collections::BTreeSet;
use std::fmt;

use strata_datalog as datalog;
use strata_datalog::{BinaryOp, CheckKind, DatalogError, PolicyEffect, SymbolTable, UnaryOp};

use crate::crypto::PublicKey;

/// A term with owned strings, not yet interned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Term {
    Variable(String),
    Integer(i64),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    /// Seconds since the Unix epoch.
    Date(u64),
    Set(BTreeSet<Term>),
}

impl Term {
    pub(crate) fn convert(&self, symbols: &mut SymbolTable) -> Result<datalog::Term, DatalogError> {
        Ok(match self {
            Term::Variable(name) => datalog::Term::Variable(symbols.insert(name)),
            Term::Integer(i) => datalog::Term::Integer(*i),
            Term::Str(s) => datalog::Term::Str(symbols.insert(s)),
            Term::Bytes(b) => datalog::Term::Bytes(b.clone()),
            Term::Bool(b) => datalog::Term::Bool(*b),
            Term::Date(d) => datalog::Term::Date(*d),
            Term::Set(items) => {
                let mut converted = BTreeSet::new();
                for item in items {
                    match item {
                        Term::Variable(_) => {
                            return Err(DatalogError::UnexpectedTerm(
                                "sets cannot contain variables".to_string(),
                            ))
                        }
                        Term::Set(_) => {
                            return Err(DatalogError::UnexpectedTerm(
                                "sets cannot be nested".to_string(),
                            ))
                        }
                        other => {
                            converted.insert(other.convert(symbols)?);
                        }
                    }
                }
                datalog::Term::Set(converted)
            }
        })
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(name) => write!(f, "${name}"),
            Term::Integer(i) => write!(f, "{i}"),
            Term::Str(s) => write!(f, "\"{s}\""),
            Term::Bytes(b) => write!(f, "hex:{}", hex::encode(b)),
            Term::Bool(b) => write!(f, "{b}"),
            Term::Date(d) => write!(f, "{d}"),
            Term::Set(items) => {
                let rendered: Vec<String> = items.iter().map(|t| t.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

pub fn var(name: &str) -> Term {
    Term::Variable(name.to_string())
}

pub fn string(value: &str) -> Term {
    Term::Str(value.to_string())
}

pub fn int(value: i64) -> Term {
    Term::Integer(value)
}

pub fn bytes(value: &[u8]) -> Term {
    Term::Bytes(value.to_vec())
}

pub fn boolean(value: bool) -> Term {
    Term::Bool(value)
}

pub fn date(unix_seconds: u64) -> Term {
    Term::Date(unix_seconds)
}

pub fn set(items: impl IntoIterator<Item = Term>) -> Term {
    Term::Set(items.into_iter().collect())
}

/// A predicate pattern with an owned name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub name: String,
    pub terms: Vec<Term>,
}

impl Predicate {
    pub(crate) fn convert(
        &self,
        symbols: &mut SymbolTable,
    ) -> Result<datalog::Predicate, DatalogError> {
        let terms = self
            .terms
            .iter()
            .map(|t| t.convert(symbols))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(datalog::Predicate::new(symbols.insert(&self.name), terms))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
        write!(f, "{}({})", self.name, terms.join(", "))
    }
}

pub fn pred(name: &str, terms: impl IntoIterator<Item = Term>) -> Predicate {
    Predicate {
        name: name.to_string(),
        terms: terms.into_iter().collect(),
    }
}

/// A ground fact. Variables are rejected at conversion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fact {
    pub predicate: Predicate,
}

impl Fact {
    pub(crate) fn convert(&self, symbols: &mut SymbolTable) -> Result<datalog::Fact, DatalogError> {
        datalog::Fact::new(self.predicate.convert(symbols)?)
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.predicate.fmt(f)
    }
}

pub fn fact(name: &str, terms: impl IntoIterator<Item = Term>) -> Fact {
    Fact {
        predicate: pred(name, terms),
    }
}

/// One body literal, possibly negated.
#[derive(Debug, Clone, PartialEq, Eq)]
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

    fn convert(&self, symbols: &mut SymbolTable) -> Result<datalog::BodyLiteral, DatalogError> {
        let predicate = self.predicate.convert(symbols)?;
        Ok(if self.negated {
            datalog::BodyLiteral::negative(predicate)
        } else {
            datalog::BodyLiteral::positive(predicate)
        })
    }
}

impl fmt::Display for BodyLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "!")?;
        }
        self.predicate.fmt(f)
    }
}

/// Visibility scope with an owned key, mirroring [`datalog::Scope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Default,
    Authority,
    Previous,
    Origins(BTreeSet<datalog::Origin>),
    PublicKey(PublicKey),
}

impl Scope {
    fn convert(&self) -> datalog::Scope {
        match self {
            Scope::Default => datalog::Scope::Default,
            Scope::Authority => datalog::Scope::Authority,
            Scope::Previous => datalog::Scope::Previous,
            Scope::Origins(origins) => datalog::Scope::Origins(origins.clone()),
            Scope::PublicKey(key) => datalog::Scope::PublicKey(key.to_bytes().to_vec()),
        }
    }
}

/// Expression tree with owned strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Value(Term),
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
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

    pub fn equal(left: Term, right: Term) -> Self {
        Self::binary(BinaryOp::Equal, Self::Value(left), Self::Value(right))
    }

    pub fn less_than(left: Term, right: Term) -> Self {
        Self::binary(BinaryOp::LessThan, Self::Value(left), Self::Value(right))
    }

    pub fn greater_than(left: Term, right: Term) -> Self {
        Self::binary(BinaryOp::GreaterThan, Self::Value(left), Self::Value(right))
    }

    pub fn less_or_equal(left: Term, right: Term) -> Self {
        Self::binary(BinaryOp::LessOrEqual, Self::Value(left), Self::Value(right))
    }

    pub fn contains(left: Term, right: Term) -> Self {
        Self::binary(BinaryOp::Contains, Self::Value(left), Self::Value(right))
    }

    pub fn starts_with(left: Term, right: Term) -> Self {
        Self::binary(BinaryOp::Prefix, Self::Value(left), Self::Value(right))
    }

    pub(crate) fn convert(
        &self,
        symbols: &mut SymbolTable,
    ) -> Result<datalog::Expression, DatalogError> {
        Ok(match self {
            Expression::Value(term) => datalog::Expression::value(term.convert(symbols)?),
            Expression::Unary { op, expr } => {
                datalog::Expression::unary(*op, expr.convert(symbols)?)
            }
            Expression::Binary { op, left, right } => datalog::Expression::binary(
                *op,
                left.convert(symbols)?,
                right.convert(symbols)?,
            ),
        })
    }
}

/// A rule or query with owned strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub head: Predicate,
    pub body: Vec<BodyLiteral>,
    pub expressions: Vec<Expression>,
    pub scope: Scope,
}

impl Rule {
    pub fn scoped(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub(crate) fn convert(&self, symbols: &mut SymbolTable) -> Result<datalog::Rule, DatalogError> {
        let head = self.head.convert(symbols)?;
        let body = self
            .body
            .iter()
            .map(|l| l.convert(symbols))
            .collect::<Result<Vec<_>, _>>()?;
        let expressions = self
            .expressions
            .iter()
            .map(|e| e.convert(symbols))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(datalog::Rule::new(head, body, expressions, self.scope.convert()))
    }
}

pub fn rule(
    head: Predicate,
    body: impl IntoIterator<Item = BodyLiteral>,
    expressions: impl IntoIterator<Item = Expression>,
) -> Rule {
    Rule {
        head,
        body: body.into_iter().collect(),
        expressions: expressions.into_iter().collect(),
        scope: Scope::Default,
    }
}

/// A query: a rule whose head is the reserved `query` predicate. Used as the
/// body of checks and policies.
pub fn query(
    body: impl IntoIterator<Item = BodyLiteral>,
    expressions: impl IntoIterator<Item = Expression>,
) -> Rule {
    rule(pred("query", []), body, expressions)
}

/// A check with owned strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub queries: Vec<Rule>,
    pub kind: CheckKind,
}

impl Check {
    pub(crate) fn convert(
        &self,
        symbols: &mut SymbolTable,
    ) -> Result<datalog::Check, DatalogError> {
        let queries = self
            .queries
            .iter()
            .map(|q| q.convert(symbols))
            .collect::<Result<Vec<_>, _>>()?;
        datalog::Check::new(queries, self.kind)
    }
}

/// `check if`: passes when some binding satisfies the query.
pub fn check_if(
    body: impl IntoIterator<Item = BodyLiteral>,
    expressions: impl IntoIterator<Item = Expression>,
) -> Check {
    Check {
        queries: vec![query(body, expressions)],
        kind: CheckKind::One,
    }
}

/// `check all`: passes when the body matches at least once and every
/// matching binding satisfies the expressions.
pub fn check_all(
    body: impl IntoIterator<Item = BodyLiteral>,
    expressions: impl IntoIterator<Item = Expression>,
) -> Check {
    Check {
        queries: vec![query(body, expressions)],
        kind: CheckKind::All,
    }
}

/// A policy with owned strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub queries: Vec<Rule>,
    pub effect: PolicyEffect,
}

impl Policy {
    pub(crate) fn convert(
        &self,
        symbols: &mut SymbolTable,
    ) -> Result<datalog::Policy, DatalogError> {
        let queries = self
            .queries
            .iter()
            .map(|q| q.convert(symbols))
            .collect::<Result<Vec<_>, _>>()?;
        datalog::Policy::new(queries, self.effect)
    }
}

pub fn allow_if(
    body: impl IntoIterator<Item = BodyLiteral>,
    expressions: impl IntoIterator<Item = Expression>,
) -> Policy {
    Policy {
        queries: vec![query(body, expressions)],
        effect: PolicyEffect::Allow,
    }
}

pub fn deny_if(
    body: impl IntoIterator<Item = BodyLiteral>,
    expressions: impl IntoIterator<Item = Expression>,
) -> Policy {
    Policy {
        queries: vec![query(body, expressions)],
        effect: PolicyEffect::Deny,
    }
}

/// An unconditional policy, usually `allow if true` as the last entry.
pub fn allow_all() -> Policy {
    Policy {
        queries: vec![query([], [Expression::value(boolean(true))])],
        effect: PolicyEffect::Allow,
    }
}

pub fn deny_all() -> Policy {
    Policy {
        queries: vec![query([], [Expression::value(boolean(true))])],
        effect: PolicyEffect::Deny,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn facts_intern_against_the_given_table() {
        let mut symbols = SymbolTable::new();
        let converted = fact("user", [int(1234)]).convert(&mut symbols).unwrap();
        assert_eq!(symbols.print_fact(&converted).unwrap(), "user(1234)");
    }

    #[test]
    fn facts_with_variables_are_rejected() {
        let mut symbols = SymbolTable::new();
        assert_matches!(
            fact("user", [var("u")]).convert(&mut symbols),
            Err(DatalogError::NonGroundFact)
        );
    }

    #[test]
    fn sets_reject_variables_and_nesting() {
        let mut symbols = SymbolTable::new();
        assert_matches!(
            set([var("x")]).convert(&mut symbols),
            Err(DatalogError::UnexpectedTerm(_))
        );
        assert_matches!(
            set([set([int(1)])]).convert(&mut symbols),
            Err(DatalogError::UnexpectedTerm(_))
        );
    }

    #[test]
    fn queries_use_the_reserved_head() {
        let mut symbols = SymbolTable::new();
        let q = query(
            [BodyLiteral::positive(pred("user", [var("u")]))],
            [Expression::equal(var("u"), int(1))],
        );
        let converted = q.convert(&mut symbols).unwrap();
        assert_eq!(converted.head.name, symbols.get("query").unwrap());
        assert!(converted.validate(&symbols).is_ok());
    }

    #[test]
    fn display_matches_interned_printing() {
        let mut symbols = SymbolTable::new();
        let f = fact("right", [string("read"), bytes(&[0xab])]);
        let converted = f.convert(&mut symbols).unwrap();
        assert_eq!(f.to_string(), symbols.print_fact(&converted).unwrap());
    }
}
