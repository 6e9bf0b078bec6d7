//! Canonical textual snapshots of an evaluated world.
//!
//! A snapshot renders every fact, rule, check and policy to its printed form,
//! grouped by origin and fully sorted, so two worlds with the same contents
//! produce identical snapshots regardless of insertion or derivation order.
//! Authorizer-origin groups sort after block groups.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::check::Check;
use crate::error::DatalogError;
use crate::origin::{Origin, OriginSet};
use crate::policy::Policy;
use crate::symbol::SymbolTable;
use crate::world::World;

/// Facts sharing one origin set, printed and sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSet {
    pub origins: Vec<Origin>,
    pub facts: Vec<String>,
}

/// Rules declared by one origin, printed and sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub origin: Origin,
    pub rules: Vec<String>,
}

/// Checks declared by one origin, printed in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSet {
    pub origin: Origin,
    pub checks: Vec<String>,
}

/// A sorted, printable image of a world after evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub facts: Vec<FactSet>,
    pub rules: Vec<RuleSet>,
    pub checks: Vec<CheckSet>,
    pub policies: Vec<String>,
}

impl WorldSnapshot {
    pub fn build(
        world: &World,
        checks: &[(Origin, Check)],
        policies: &[Policy],
        symbols: &SymbolTable,
    ) -> Result<Self, DatalogError> {
        let mut fact_groups: BTreeMap<OriginSet, Vec<String>> = BTreeMap::new();
        for (origins, fact) in world.facts().iter() {
            fact_groups
                .entry(origins.clone())
                .or_default()
                .push(symbols.print_fact(fact)?);
        }
        let facts = fact_groups
            .into_iter()
            .map(|(origins, mut rendered)| {
                rendered.sort();
                FactSet {
                    origins: origins.iter().copied().collect(),
                    facts: rendered,
                }
            })
            .collect();

        let mut rule_groups: BTreeMap<Origin, Vec<String>> = BTreeMap::new();
        for (origin, _, rule) in world.rules() {
            rule_groups
                .entry(*origin)
                .or_default()
                .push(symbols.print_rule(rule)?);
        }
        let rules = rule_groups
            .into_iter()
            .map(|(origin, mut rendered)| {
                rendered.sort();
                RuleSet {
                    origin,
                    rules: rendered,
                }
            })
            .collect();

        let mut check_groups: BTreeMap<Origin, Vec<String>> = BTreeMap::new();
        for (origin, check) in checks {
            check_groups
                .entry(*origin)
                .or_default()
                .push(symbols.print_check(check)?);
        }
        let checks = check_groups
            .into_iter()
            .map(|(origin, checks)| CheckSet { origin, checks })
            .collect();

        let policies = policies
            .iter()
            .map(|p| symbols.print_policy(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            facts,
            rules,
            checks,
            policies,
        })
    }
}

impl fmt::Display for WorldSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "World {{")?;
        writeln!(f, "  facts: [")?;
        for set in &self.facts {
            let origins: Vec<String> = set.origins.iter().map(|o| o.to_string()).collect();
            writeln!(f, "    {{{}}}:", origins.join(", "))?;
            for fact in &set.facts {
                writeln!(f, "      {fact}")?;
            }
        }
        writeln!(f, "  ]")?;
        writeln!(f, "  rules: [")?;
        for set in &self.rules {
            for rule in &set.rules {
                writeln!(f, "    [{}] {rule}", set.origin)?;
            }
        }
        writeln!(f, "  ]")?;
        writeln!(f, "  checks: [")?;
        for set in &self.checks {
            for check in &set.checks {
                writeln!(f, "    [{}] {check}", set.origin)?;
            }
        }
        writeln!(f, "  ]")?;
        writeln!(f, "  policies: [")?;
        for policy in &self.policies {
            writeln!(f, "    {policy}")?;
        }
        writeln!(f, "  ]")?;
        write!(f, "}}")
    }
}
