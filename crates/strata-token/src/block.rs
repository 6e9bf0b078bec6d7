//! Block contents: the statements one link of the chain carries.

use serde::{Deserialize, Serialize};
use strata_datalog::{Check, DatalogError, Fact, Rule, SymbolTable};

use crate::builder;
use crate::crypto::PublicKey;
use crate::error::TokenError;
use crate::format::CURRENT_VERSION;

/// The decoded payload of one signed block.
///
/// `symbols` is the delta this block appended to the shared table; readers
/// extend their table with it in chain order so every interned id resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub version: u32,
    /// New symbols introduced by this block, in interning order.
    pub symbols: Vec<String>,
    /// Free-form annotation, not evaluated.
    pub context: String,
    pub facts: Vec<Fact>,
    pub rules: Vec<Rule>,
    pub checks: Vec<Check>,
    /// Set on third-party blocks: the key whose external signature covers
    /// this block.
    pub external_key: Option<PublicKey>,
}

impl Block {
    /// Validate every statement against the table accumulated so far.
    pub(crate) fn validate(&self, symbols: &SymbolTable) -> Result<(), DatalogError> {
        for fact in &self.facts {
            fact.validate()?;
            symbols.print_fact(fact)?;
        }
        for rule in &self.rules {
            rule.validate(symbols)?;
        }
        for check in &self.checks {
            check.validate(symbols)?;
        }
        Ok(())
    }
}

/// Accumulates statements for one block before it is interned and signed.
#[derive(Debug, Clone, Default)]
pub struct BlockBuilder {
    facts: Vec<builder::Fact>,
    rules: Vec<builder::Rule>,
    checks: Vec<builder::Check>,
    context: Option<String>,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fact(mut self, fact: builder::Fact) -> Self {
        self.facts.push(fact);
        self
    }

    pub fn rule(mut self, rule: builder::Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn check(mut self, check: builder::Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn context(mut self, context: &str) -> Self {
        self.context = Some(context.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.rules.is_empty() && self.checks.is_empty()
    }

    /// Intern every statement against `symbols` and produce the block,
    /// capturing the symbol delta this block introduced.
    pub(crate) fn build(
        self,
        symbols: &mut SymbolTable,
        external_key: Option<PublicKey>,
    ) -> Result<Block, TokenError> {
        let start = symbols.local_len();

        let facts = self
            .facts
            .iter()
            .map(|f| f.convert(symbols))
            .collect::<Result<Vec<_>, _>>()?;
        let rules = self
            .rules
            .iter()
            .map(|r| r.convert(symbols))
            .collect::<Result<Vec<_>, _>>()?;
        let checks = self
            .checks
            .iter()
            .map(|c| c.convert(symbols))
            .collect::<Result<Vec<_>, _>>()?;

        for rule in &rules {
            rule.validate(symbols).map_err(TokenError::Datalog)?;
        }
        for check in &checks {
            check.validate(symbols).map_err(TokenError::Datalog)?;
        }

        Ok(Block {
            version: CURRENT_VERSION,
            symbols: symbols.local_slice(start),
            context: self.context.unwrap_or_default(),
            facts,
            rules,
            checks,
            external_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{fact, int, pred, rule, string, var, BodyLiteral};

    #[test]
    fn build_captures_the_symbol_delta() {
        let mut symbols = SymbolTable::new();
        let block = BlockBuilder::new()
            .fact(fact("user", [int(1234)]))
            .fact(fact("team", [string("ops")]))
            .build(&mut symbols, None)
            .unwrap();
        // "user" and "team" are built-ins; only "ops" is new.
        assert_eq!(block.symbols, vec!["ops".to_string()]);
        assert_eq!(block.version, CURRENT_VERSION);
    }

    #[test]
    fn build_rejects_invalid_rules() {
        let mut symbols = SymbolTable::new();
        let unbound = rule(pred("out", [var("x")]), [], []);
        assert!(BlockBuilder::new()
            .rule(unbound)
            .build(&mut symbols, None)
            .is_err());
    }

    #[test]
    fn decoded_blocks_revalidate() {
        let mut symbols = SymbolTable::new();
        let block = BlockBuilder::new()
            .rule(rule(
                pred("grown", [var("u")]),
                [BodyLiteral::positive(pred("user", [var("u")]))],
                [],
            ))
            .build(&mut symbols, None)
            .unwrap();
        assert!(block.validate(&symbols).is_ok());
    }
}
