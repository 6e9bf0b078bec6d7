//! String interning and statement printing.
//!
//! Predicate names and string literals are interned to small integers for
//! compact storage and canonical comparison. A fixed built-in set of common
//! names occupies a reserved low id range shared by every table, so block
//! symbol deltas only carry genuinely new strings. Tables are append-only;
//! strings are never removed.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::check::{Check, CheckKind};
use crate::error::DatalogError;
use crate::expression::{BinaryOp, Expression, UnaryOp};
use crate::fact::{Fact, Predicate};
use crate::origin::Scope;
use crate::policy::{Policy, PolicyEffect};
use crate::rule::Rule;
use crate::term::Term;

/// Interned symbol identifier.
pub type SymbolId = u64;

/// Ids below this value index the built-in symbol set.
pub const DEFAULT_SYMBOLS_OFFSET: u64 = 1024;

static DEFAULT_SYMBOLS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "read",
        "write",
        "resource",
        "operation",
        "right",
        "time",
        "role",
        "owner",
        "tenant",
        "namespace",
        "user",
        "team",
        "service",
        "admin",
        "email",
        "group",
        "member",
        "ip",
        "client",
        "client_ip",
        "domain",
        "path",
        "version",
        "cluster",
        "node",
        "hostname",
        "nonce",
        "query",
    ]
});

/// Append-only bidirectional mapping between strings and symbol ids.
///
/// One table exists per token or authorizer instance; interning the same
/// string twice always yields the same id within one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: Vec<String>,
}

impl SymbolTable {
    /// Create a table containing only the built-in symbols.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its id. Idempotent.
    pub fn insert(&mut self, symbol: &str) -> SymbolId {
        if let Some(id) = self.get(symbol) {
            return id;
        }
        self.symbols.push(symbol.to_string());
        DEFAULT_SYMBOLS_OFFSET + (self.symbols.len() as u64 - 1)
    }

    /// Look up a string without interning it.
    pub fn get(&self, symbol: &str) -> Option<SymbolId> {
        if let Some(index) = DEFAULT_SYMBOLS.iter().position(|s| *s == symbol) {
            return Some(index as u64);
        }
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|index| DEFAULT_SYMBOLS_OFFSET + index as u64)
    }

    /// Resolve an id back to its string.
    pub fn print_symbol(&self, id: SymbolId) -> Result<&str, DatalogError> {
        if id < DEFAULT_SYMBOLS_OFFSET {
            return DEFAULT_SYMBOLS
                .get(id as usize)
                .copied()
                .ok_or(DatalogError::UnknownSymbol(id));
        }
        self.symbols
            .get((id - DEFAULT_SYMBOLS_OFFSET) as usize)
            .map(String::as_str)
            .ok_or(DatalogError::UnknownSymbol(id))
    }

    /// Number of non-built-in symbols currently in the table.
    pub fn local_len(&self) -> usize {
        self.symbols.len()
    }

    /// Non-built-in symbols appended at or after `start`, in insertion order.
    /// This is the delta a block carries on the wire.
    pub fn local_slice(&self, start: usize) -> Vec<String> {
        self.symbols.get(start..).unwrap_or_default().to_vec()
    }

    /// Append a block's symbol delta verbatim, preserving the issuer's id
    /// assignment. Deduplication is the issuer's concern, not the reader's.
    pub fn extend(&mut self, delta: &[String]) {
        self.symbols.extend(delta.iter().cloned());
    }

    /// Render a term. Dates print as RFC 3339 when representable.
    pub fn print_term(&self, term: &Term) -> Result<String, DatalogError> {
        Ok(match term {
            Term::Variable(id) => format!("${}", self.print_symbol(*id)?),
            Term::Integer(i) => i.to_string(),
            Term::Str(id) => format!("\"{}\"", self.print_symbol(*id)?),
            Term::Bytes(b) => format!("hex:{}", to_hex(b)),
            Term::Bool(b) => b.to_string(),
            Term::Date(d) => OffsetDateTime::from_unix_timestamp(*d as i64)
                .ok()
                .and_then(|t| t.format(&Rfc3339).ok())
                .unwrap_or_else(|| d.to_string()),
            Term::Set(items) => {
                let rendered: Result<Vec<_>, _> =
                    items.iter().map(|t| self.print_term(t)).collect();
                format!("[{}]", rendered?.join(", "))
            }
        })
    }

    /// Render a predicate as `name(t1, t2, ...)`.
    pub fn print_predicate(&self, predicate: &Predicate) -> Result<String, DatalogError> {
        let terms: Result<Vec<_>, _> = predicate
            .terms
            .iter()
            .map(|t| self.print_term(t))
            .collect();
        Ok(format!(
            "{}({})",
            self.print_symbol(predicate.name)?,
            terms?.join(", ")
        ))
    }

    /// Render a ground fact.
    pub fn print_fact(&self, fact: &Fact) -> Result<String, DatalogError> {
        self.print_predicate(&fact.predicate)
    }

    /// Render a rule as `head <- body`.
    pub fn print_rule(&self, rule: &Rule) -> Result<String, DatalogError> {
        Ok(format!(
            "{} <- {}",
            self.print_predicate(&rule.head)?,
            self.print_rule_body(rule)?
        ))
    }

    /// Render a rule body: literals, then expressions, then scope.
    pub fn print_rule_body(&self, rule: &Rule) -> Result<String, DatalogError> {
        let mut parts = Vec::with_capacity(rule.body.len() + rule.expressions.len());
        for literal in &rule.body {
            let rendered = self.print_predicate(&literal.predicate)?;
            if literal.negated {
                parts.push(format!("!{rendered}"));
            } else {
                parts.push(rendered);
            }
        }
        for expression in &rule.expressions {
            parts.push(self.print_expression(expression)?);
        }
        let mut out = parts.join(", ");
        if rule.scope != Scope::Default {
            out.push_str(&format!(" trusting {}", rule.scope));
        }
        Ok(out)
    }

    /// Render a check as `check if ...` / `check all ...`, queries joined
    /// with ` or `.
    pub fn print_check(&self, check: &Check) -> Result<String, DatalogError> {
        let keyword = match check.kind {
            CheckKind::One => "check if",
            CheckKind::All => "check all",
        };
        let queries: Result<Vec<_>, _> = check
            .queries
            .iter()
            .map(|q| self.print_rule_body(q))
            .collect();
        Ok(format!("{keyword} {}", queries?.join(" or ")))
    }

    /// Render a policy as `allow if ...` / `deny if ...`.
    pub fn print_policy(&self, policy: &Policy) -> Result<String, DatalogError> {
        let keyword = match policy.effect {
            PolicyEffect::Allow => "allow if",
            PolicyEffect::Deny => "deny if",
        };
        let queries: Result<Vec<_>, _> = policy
            .queries
            .iter()
            .map(|q| self.print_rule_body(q))
            .collect();
        Ok(format!("{keyword} {}", queries?.join(" or ")))
    }

    /// Render an expression, parenthesizing nested binary operations.
    pub fn print_expression(&self, expression: &Expression) -> Result<String, DatalogError> {
        match expression {
            Expression::Value(term) => self.print_term(term),
            Expression::Unary { op, expr } => {
                let inner = self.print_expression(expr)?;
                Ok(match op {
                    UnaryOp::Negate => format!("!({inner})"),
                    UnaryOp::Parens => format!("({inner})"),
                    UnaryOp::Length => format!("{inner}.length()"),
                })
            }
            Expression::Binary { op, left, right } => {
                let l = self.print_operand(left)?;
                let r = self.print_operand(right)?;
                Ok(match op {
                    BinaryOp::LessThan => format!("{l} < {r}"),
                    BinaryOp::GreaterThan => format!("{l} > {r}"),
                    BinaryOp::LessOrEqual => format!("{l} <= {r}"),
                    BinaryOp::GreaterOrEqual => format!("{l} >= {r}"),
                    BinaryOp::Equal => format!("{l} == {r}"),
                    BinaryOp::NotEqual => format!("{l} != {r}"),
                    BinaryOp::Contains => format!("{l}.contains({r})"),
                    BinaryOp::Prefix => format!("{l}.starts_with({r})"),
                    BinaryOp::Suffix => format!("{l}.ends_with({r})"),
                    BinaryOp::Add => format!("{l} + {r}"),
                    BinaryOp::Sub => format!("{l} - {r}"),
                    BinaryOp::Mul => format!("{l} * {r}"),
                    BinaryOp::Div => format!("{l} / {r}"),
                    BinaryOp::And => format!("{l} && {r}"),
                    BinaryOp::Or => format!("{l} || {r}"),
                    BinaryOp::Intersection => format!("{l}.intersection({r})"),
                    BinaryOp::Union => format!("{l}.union({r})"),
                })
            }
        }
    }

    fn print_operand(&self, expression: &Expression) -> Result<String, DatalogError> {
        let rendered = self.print_expression(expression)?;
        if matches!(expression, Expression::Binary { .. }) {
            Ok(format!("({rendered})"))
        } else {
            Ok(rendered)
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
