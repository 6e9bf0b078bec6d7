//! The fixpoint evaluation engine.
//!
//! A [`World`] holds origin-tagged facts and rules and computes the least
//! fixpoint under a [`RunLimits`] budget. Each round applies every rule
//! against the facts visible to it (a relational join extending partial
//! bindings literal by literal), filters the completed bindings through the
//! rule's expressions, and inserts the derived facts tagged with the rule's
//! origin union the matched facts' origins. Rounds are atomic: the deadline
//! and iteration budgets are checked at round start, the fact budget after a
//! round's insertions, so the store can overshoot `max_facts` by at most one
//! round of production.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{DatalogError, ExecutionError, RunLimitError};
use crate::expression::{Binding, Expression};
use crate::fact::{Fact, Predicate};
use crate::origin::{Origin, OriginSet, TrustedOrigins};
use crate::rule::Rule;
use crate::symbol::SymbolTable;
use crate::term::Term;

/// The compute budget for one evaluation, immutable for its duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLimits {
    /// Maximum total fact count (initial plus derived).
    pub max_facts: usize,
    /// Maximum number of fixpoint rounds.
    pub max_iterations: usize,
    /// Wall-clock deadline, checked between rounds only.
    pub max_time: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_facts: 500,
            max_iterations: 100,
            max_time: Duration::from_millis(500),
        }
    }
}

/// Facts grouped by their origin set. Insertion order is preserved per
/// origin for printing; membership is set-based.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    inner: HashMap<OriginSet, Vec<Fact>>,
}

impl FactStore {
    /// Insert a fact under an origin set. Returns true if it was new.
    pub fn insert(&mut self, origins: OriginSet, fact: Fact) -> bool {
        let facts = self.inner.entry(origins).or_default();
        if facts.contains(&fact) {
            return false;
        }
        facts.push(fact);
        true
    }

    /// Total number of stored facts.
    pub fn len(&self) -> usize {
        self.inner.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.values().all(Vec::is_empty)
    }

    /// Facts visible under a trusted-origin set.
    pub fn visible<'a>(
        &'a self,
        trusted: &'a TrustedOrigins,
    ) -> impl Iterator<Item = (&'a OriginSet, &'a Fact)> {
        self.inner
            .iter()
            .filter(|(origins, _)| trusted.contains_set(origins))
            .flat_map(|(origins, facts)| facts.iter().map(move |f| (origins, f)))
    }

    /// Every stored fact with its origin set.
    pub fn iter(&self) -> impl Iterator<Item = (&OriginSet, &Fact)> {
        self.inner
            .iter()
            .flat_map(|(origins, facts)| facts.iter().map(move |f| (origins, f)))
    }
}

/// The fact/rule database and its fixpoint evaluator. Created fresh per
/// authorization attempt; it only ever grows during a run.
#[derive(Debug, Clone, Default)]
pub struct World {
    facts: FactStore,
    rules: Vec<(Origin, TrustedOrigins, Rule)>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fact(&mut self, origins: OriginSet, fact: Fact) {
        self.facts.insert(origins, fact);
    }

    pub fn add_rule(&mut self, origin: Origin, trusted: TrustedOrigins, rule: Rule) {
        self.rules.push((origin, trusted, rule));
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    pub fn rules(&self) -> &[(Origin, TrustedOrigins, Rule)] {
        &self.rules
    }

    /// Run to the least fixpoint or until a limit trips.
    pub fn run(
        &mut self,
        limits: &RunLimits,
        symbols: &SymbolTable,
    ) -> Result<(), ExecutionError> {
        let deadline = Instant::now() + limits.max_time;
        let mut iterations = 0usize;

        loop {
            if iterations >= limits.max_iterations {
                return Err(RunLimitError::TooManyIterations {
                    limit: limits.max_iterations,
                }
                .into());
            }
            if Instant::now() >= deadline {
                return Err(RunLimitError::Timeout.into());
            }

            let mut derived = Vec::new();
            for (origin, trusted, rule) in &self.rules {
                apply_rule(rule, *origin, trusted, &self.facts, symbols, &mut derived)?;
            }

            let mut added = 0usize;
            for (origins, fact) in derived {
                if self.facts.insert(origins, fact) {
                    added += 1;
                }
            }
            iterations += 1;
            trace!(
                iteration = iterations,
                added,
                total = self.facts.len(),
                "fixpoint round"
            );

            if self.facts.len() > limits.max_facts {
                return Err(RunLimitError::TooManyFacts {
                    count: self.facts.len(),
                    limit: limits.max_facts,
                }
                .into());
            }
            if added == 0 {
                return Ok(());
            }
        }
    }

    /// Does some binding satisfy the query's body and expressions?
    pub fn query_match(
        &self,
        query: &Rule,
        trusted: &TrustedOrigins,
        symbols: &SymbolTable,
    ) -> Result<bool, DatalogError> {
        for (_, binding) in body_bindings(query, &self.facts, trusted, symbols)? {
            if eval_expressions(&query.expressions, &binding, symbols)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Does the body match at least once, with every matching binding
    /// satisfying the expressions? (`check all` semantics.)
    pub fn query_match_all(
        &self,
        query: &Rule,
        trusted: &TrustedOrigins,
        symbols: &SymbolTable,
    ) -> Result<bool, DatalogError> {
        let bindings = body_bindings(query, &self.facts, trusted, symbols)?;
        if bindings.is_empty() {
            return Ok(false);
        }
        for (_, binding) in bindings {
            if !eval_expressions(&query.expressions, &binding, symbols)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Unify a body pattern against a ground fact, extending `binding`.
fn unify(pattern: &Predicate, fact: &Predicate, binding: &Binding) -> Option<Binding> {
    if pattern.name != fact.name || pattern.terms.len() != fact.terms.len() {
        return None;
    }
    let mut next = binding.clone();
    for (pattern_term, fact_term) in pattern.terms.iter().zip(fact.terms.iter()) {
        match pattern_term {
            Term::Variable(id) => match next.get(id) {
                Some(existing) if existing == fact_term => {}
                Some(_) => return None,
                None => {
                    next.insert(*id, fact_term.clone());
                }
            },
            ground => {
                if ground != fact_term {
                    return None;
                }
            }
        }
    }
    Some(next)
}

/// Substitute a binding into a predicate, requiring all variables bound.
fn substitute(
    predicate: &Predicate,
    binding: &Binding,
    symbols: &SymbolTable,
) -> Result<Predicate, DatalogError> {
    let mut terms = Vec::with_capacity(predicate.terms.len());
    for term in &predicate.terms {
        match term {
            Term::Variable(id) => {
                let value = binding.get(id).cloned().ok_or_else(|| {
                    DatalogError::UnboundVariable(
                        symbols.print_symbol(*id).unwrap_or("?").to_string(),
                    )
                })?;
                terms.push(value);
            }
            ground => terms.push(ground.clone()),
        }
    }
    Ok(Predicate::new(predicate.name, terms))
}

/// All bindings satisfying a rule's body literals (positive join, then
/// negation filtering against the current visible facts).
fn body_bindings(
    rule: &Rule,
    facts: &FactStore,
    trusted: &TrustedOrigins,
    symbols: &SymbolTable,
) -> Result<Vec<(OriginSet, Binding)>, DatalogError> {
    let mut states = vec![(OriginSet::default(), Binding::new())];

    for literal in rule.body.iter().filter(|l| !l.negated) {
        let mut next_states = Vec::new();
        for (origins, binding) in &states {
            for (fact_origins, fact) in facts.visible(trusted) {
                if let Some(extended) = unify(&literal.predicate, &fact.predicate, binding) {
                    next_states.push((origins.union(fact_origins), extended));
                }
            }
        }
        states = next_states;
        if states.is_empty() {
            return Ok(states);
        }
    }

    // Negated literals are checked against the facts visible right now, not
    // against a cache, so a blocker derived in an earlier round takes effect.
    let mut surviving = Vec::with_capacity(states.len());
    'states: for (origins, binding) in states {
        for literal in rule.body.iter().filter(|l| l.negated) {
            let ground = substitute(&literal.predicate, &binding, symbols)?;
            if facts.visible(trusted).any(|(_, f)| f.predicate == ground) {
                continue 'states;
            }
        }
        surviving.push((origins, binding));
    }
    Ok(surviving)
}

/// True iff every expression evaluates to `Bool(true)` under the binding.
fn eval_expressions(
    expressions: &[Expression],
    binding: &Binding,
    symbols: &SymbolTable,
) -> Result<bool, DatalogError> {
    for expression in expressions {
        match expression.evaluate(binding, symbols)? {
            Term::Bool(true) => {}
            Term::Bool(false) => return Ok(false),
            other => {
                return Err(DatalogError::InvalidType(format!(
                    "constraint evaluated to {} instead of bool",
                    other.type_name()
                )))
            }
        }
    }
    Ok(true)
}

/// Apply one rule, appending derived facts (tagged with the rule's origin
/// union the matched facts' origins) to `out`.
fn apply_rule(
    rule: &Rule,
    origin: Origin,
    trusted: &TrustedOrigins,
    facts: &FactStore,
    symbols: &SymbolTable,
    out: &mut Vec<(OriginSet, Fact)>,
) -> Result<(), DatalogError> {
    for (origins, binding) in body_bindings(rule, facts, trusted, symbols)? {
        if !eval_expressions(&rule.expressions, &binding, symbols)? {
            continue;
        }
        let head = substitute(&rule.head, &binding, symbols)?;
        let fact = Fact::new(head)?;
        out.push((origins.with(origin), fact));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::BinaryOp;
    use crate::origin::Scope;
    use crate::rule::BodyLiteral;
    use assert_matches::assert_matches;
    use std::collections::BTreeSet;

    struct Fixture {
        symbols: SymbolTable,
        world: World,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                symbols: SymbolTable::new(),
                world: World::new(),
            }
        }

        fn fact(&mut self, name: &str, terms: Vec<Term>) {
            let id = self.symbols.insert(name);
            self.world.add_fact(
                OriginSet::single(Origin::Authorizer),
                Fact::new(Predicate::new(id, terms)).unwrap(),
            );
        }

        fn rule(&mut self, rule: Rule) {
            let trusted = TrustedOrigins::default_for(Origin::Authorizer, 0);
            self.world.add_rule(Origin::Authorizer, trusted, rule);
        }

        fn run(&mut self, limits: &RunLimits) -> Result<(), ExecutionError> {
            let symbols = self.symbols.clone();
            self.world.run(limits, &symbols)
        }

        fn fact_strings(&self) -> BTreeSet<String> {
            self.world
                .facts()
                .iter()
                .map(|(_, f)| self.symbols.print_fact(f).unwrap())
                .collect()
        }
    }

    fn var(symbols: &mut SymbolTable, name: &str) -> Term {
        Term::Variable(symbols.insert(name))
    }

    /// path(X, Z) <- path(X, Y), edge(Y, Z) plus the base case, over a chain
    /// graph of `n` nodes.
    fn chain_fixture(n: i64) -> Fixture {
        let mut fx = Fixture::new();
        for i in 0..n - 1 {
            fx.fact("edge", vec![Term::Integer(i), Term::Integer(i + 1)]);
        }
        let edge = fx.symbols.insert("edge");
        let path = fx.symbols.insert("path");
        let (x, y, z) = (
            fx.symbols.insert("x"),
            fx.symbols.insert("y"),
            fx.symbols.insert("z"),
        );
        fx.rule(Rule::new(
            Predicate::new(path, vec![Term::Variable(x), Term::Variable(y)]),
            vec![BodyLiteral::positive(Predicate::new(
                edge,
                vec![Term::Variable(x), Term::Variable(y)],
            ))],
            vec![],
            Scope::Default,
        ));
        fx.rule(Rule::new(
            Predicate::new(path, vec![Term::Variable(x), Term::Variable(z)]),
            vec![
                BodyLiteral::positive(Predicate::new(
                    path,
                    vec![Term::Variable(x), Term::Variable(y)],
                )),
                BodyLiteral::positive(Predicate::new(
                    edge,
                    vec![Term::Variable(y), Term::Variable(z)],
                )),
            ],
            vec![],
            Scope::Default,
        ));
        fx
    }

    #[test]
    fn reaches_fixpoint_on_transitive_closure() {
        let mut fx = chain_fixture(5);
        fx.run(&RunLimits::default()).unwrap();
        // 4 edges, 4+3+2+1 paths.
        assert_eq!(fx.world.facts().len(), 4 + 10);
        assert!(fx.fact_strings().contains("path(0, 4)"));
    }

    #[test]
    fn fixpoint_is_idempotent() {
        let mut fx = chain_fixture(6);
        fx.run(&RunLimits::default()).unwrap();
        let first = fx.fact_strings();
        fx.run(&RunLimits::default()).unwrap();
        assert_eq!(first, fx.fact_strings());
    }

    #[test]
    fn iteration_limit_trips() {
        let mut fx = chain_fixture(12);
        let limits = RunLimits {
            max_iterations: 3,
            ..RunLimits::default()
        };
        assert_matches!(
            fx.run(&limits),
            Err(ExecutionError::RunLimit(RunLimitError::TooManyIterations {
                limit: 3
            }))
        );
    }

    #[test]
    fn deadline_trips_between_rounds() {
        let mut fx = chain_fixture(4);
        let limits = RunLimits {
            max_time: Duration::ZERO,
            ..RunLimits::default()
        };
        assert_matches!(
            fx.run(&limits),
            Err(ExecutionError::RunLimit(RunLimitError::Timeout))
        );
    }

    #[test]
    fn fact_limit_overshoots_by_at_most_one_round() {
        // pair(X, Y) <- item(X), item(Y): 5 items derive 25 pairs in one
        // round, so the store lands on exactly 30 before the limit trips.
        let mut fx = Fixture::new();
        for i in 0..5 {
            fx.fact("item", vec![Term::Integer(i)]);
        }
        let item = fx.symbols.insert("item");
        let pair = fx.symbols.insert("pair");
        let (x, y) = (fx.symbols.insert("x"), fx.symbols.insert("y"));
        fx.rule(Rule::new(
            Predicate::new(pair, vec![Term::Variable(x), Term::Variable(y)]),
            vec![
                BodyLiteral::positive(Predicate::new(item, vec![Term::Variable(x)])),
                BodyLiteral::positive(Predicate::new(item, vec![Term::Variable(y)])),
            ],
            vec![],
            Scope::Default,
        ));

        let limits = RunLimits {
            max_facts: 10,
            ..RunLimits::default()
        };
        assert_matches!(
            fx.run(&limits),
            Err(ExecutionError::RunLimit(RunLimitError::TooManyFacts {
                count: 30,
                limit: 10
            }))
        );
        assert_eq!(fx.world.facts().len(), 30);
    }

    #[test]
    fn expressions_filter_bindings() {
        let mut fx = Fixture::new();
        fx.fact("user", vec![Term::Integer(1)]);
        fx.fact("user", vec![Term::Integer(100)]);
        let user = fx.symbols.insert("user");
        let trusted_user = fx.symbols.insert("trusted_user");
        let u = fx.symbols.insert("u");
        fx.rule(Rule::new(
            Predicate::new(trusted_user, vec![Term::Variable(u)]),
            vec![BodyLiteral::positive(Predicate::new(
                user,
                vec![Term::Variable(u)],
            ))],
            vec![Expression::binary(
                BinaryOp::LessThan,
                Expression::value(Term::Variable(u)),
                Expression::value(Term::Integer(50)),
            )],
            Scope::Default,
        ));
        fx.run(&RunLimits::default()).unwrap();
        let facts = fx.fact_strings();
        assert!(facts.contains("trusted_user(1)"));
        assert!(!facts.contains("trusted_user(100)"));
    }

    #[test]
    fn negation_sees_facts_derived_in_earlier_rounds() {
        // blocked(1) appears in round one; staged(1) also appears in round
        // one; late(1) <- staged(1), !blocked(1) can only fire from round two
        // onward, by which time the blocker exists, so it never fires.
        let mut fx = Fixture::new();
        fx.fact("seed", vec![Term::Integer(1)]);
        let seed = fx.symbols.insert("seed");
        let staged = fx.symbols.insert("staged");
        let blocked = fx.symbols.insert("blocked");
        let late = fx.symbols.insert("late");
        let x = fx.symbols.insert("x");

        for head in [staged, blocked] {
            fx.rule(Rule::new(
                Predicate::new(head, vec![Term::Variable(x)]),
                vec![BodyLiteral::positive(Predicate::new(
                    seed,
                    vec![Term::Variable(x)],
                ))],
                vec![],
                Scope::Default,
            ));
        }
        fx.rule(Rule::new(
            Predicate::new(late, vec![Term::Variable(x)]),
            vec![
                BodyLiteral::positive(Predicate::new(staged, vec![Term::Variable(x)])),
                BodyLiteral::negative(Predicate::new(blocked, vec![Term::Variable(x)])),
            ],
            vec![],
            Scope::Default,
        ));
        fx.run(&RunLimits::default()).unwrap();
        assert!(!fx.fact_strings().contains("late(1)"));
    }

    #[test]
    fn negation_succeeds_when_no_blocker_exists() {
        let mut fx = Fixture::new();
        fx.fact("seed", vec![Term::Integer(1)]);
        let seed = fx.symbols.insert("seed");
        let blocked = fx.symbols.insert("blocked");
        let open = fx.symbols.insert("open");
        let x = fx.symbols.insert("x");

        fx.rule(Rule::new(
            Predicate::new(open, vec![Term::Variable(x)]),
            vec![
                BodyLiteral::positive(Predicate::new(seed, vec![Term::Variable(x)])),
                BodyLiteral::negative(Predicate::new(blocked, vec![Term::Variable(x)])),
            ],
            vec![],
            Scope::Default,
        ));
        fx.run(&RunLimits::default()).unwrap();
        assert!(fx.fact_strings().contains("open(1)"));
    }

    #[test]
    fn derived_facts_union_their_source_origins() {
        let mut symbols = SymbolTable::new();
        let a = symbols.insert("a");
        let b = symbols.insert("b");
        let both = symbols.insert("both");
        let x = symbols.insert("x");

        let mut world = World::new();
        world.add_fact(
            OriginSet::single(Origin::Block(0)),
            Fact::new(Predicate::new(a, vec![Term::Integer(1)])).unwrap(),
        );
        world.add_fact(
            OriginSet::single(Origin::Block(1)),
            Fact::new(Predicate::new(b, vec![Term::Integer(1)])).unwrap(),
        );
        world.add_rule(
            Origin::Authorizer,
            TrustedOrigins::default_for(Origin::Authorizer, 2),
            Rule::new(
                Predicate::new(both, vec![Term::Variable(x)]),
                vec![
                    BodyLiteral::positive(Predicate::new(a, vec![Term::Variable(x)])),
                    BodyLiteral::positive(Predicate::new(b, vec![Term::Variable(x)])),
                ],
                vec![],
                Scope::Default,
            ),
        );
        world.run(&RunLimits::default(), &symbols).unwrap();

        let expected: OriginSet = [Origin::Block(0), Origin::Block(1), Origin::Authorizer]
            .into_iter()
            .collect();
        let found = world
            .facts()
            .iter()
            .find(|(_, f)| f.predicate.name == both)
            .map(|(origins, _)| origins.clone());
        assert_eq!(found, Some(expected));
    }

    #[test]
    fn scoped_rules_cannot_read_later_blocks() {
        let mut symbols = SymbolTable::new();
        let right = symbols.insert("right");
        let elevated = symbols.insert("elevated");
        let r = symbols.insert("r");

        let mut world = World::new();
        world.add_fact(
            OriginSet::single(Origin::Block(1)),
            Fact::new(Predicate::new(
                right,
                vec![Term::Str(symbols.insert("admin"))],
            ))
            .unwrap(),
        );
        // The rule is declared by block 0, so its default scope stops there.
        world.add_rule(
            Origin::Block(0),
            TrustedOrigins::default_for(Origin::Block(0), 2),
            Rule::new(
                Predicate::new(elevated, vec![Term::Variable(r)]),
                vec![BodyLiteral::positive(Predicate::new(
                    right,
                    vec![Term::Variable(r)],
                ))],
                vec![],
                Scope::Default,
            ),
        );
        world.run(&RunLimits::default(), &symbols).unwrap();
        assert!(!world
            .facts()
            .iter()
            .any(|(_, f)| f.predicate.name == elevated));
    }

    #[test]
    fn query_match_all_requires_every_binding() {
        let mut fx = Fixture::new();
        fx.fact("score", vec![Term::Integer(10)]);
        fx.fact("score", vec![Term::Integer(90)]);
        let score = fx.symbols.insert("score");
        let s = fx.symbols.insert("s");
        let query_head = fx.symbols.insert("query");

        let below_50 = Rule::new(
            Predicate::new(query_head, vec![]),
            vec![BodyLiteral::positive(Predicate::new(
                score,
                vec![Term::Variable(s)],
            ))],
            vec![Expression::binary(
                BinaryOp::LessThan,
                Expression::value(Term::Variable(s)),
                Expression::value(Term::Integer(50)),
            )],
            Scope::Default,
        );
        let trusted = TrustedOrigins::default_for(Origin::Authorizer, 0);
        // Some score is below 50, but not all of them.
        assert!(fx
            .world
            .query_match(&below_50, &trusted, &fx.symbols)
            .unwrap());
        assert!(!fx
            .world
            .query_match_all(&below_50, &trusted, &fx.symbols)
            .unwrap());
    }

    #[test]
    fn query_match_all_fails_on_empty_body_match() {
        let fx = Fixture::new();
        let mut symbols = fx.symbols.clone();
        let missing = symbols.insert("missing");
        let query_head = symbols.insert("query");
        let query = Rule::new(
            Predicate::new(query_head, vec![]),
            vec![BodyLiteral::positive(Predicate::new(missing, vec![]))],
            vec![],
            Scope::Default,
        );
        let trusted = TrustedOrigins::default_for(Origin::Authorizer, 0);
        assert!(!fx.world.query_match_all(&query, &trusted, &symbols).unwrap());
    }

    mod fixpoint_laws {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// The fixpoint is a set: edge insertion order never changes it.
            #[test]
            fn insertion_order_is_irrelevant(
                edges in proptest::collection::vec((0u8..6, 0u8..6), 1..12),
                seed in any::<u64>(),
            ) {
                let closure = |edges: &[(u8, u8)]| {
                    let mut fx = chain_fixture(1);
                    for (a, b) in edges {
                        fx.fact("edge", vec![Term::Integer(*a as i64), Term::Integer(*b as i64)]);
                    }
                    fx.run(&RunLimits { max_facts: 5000, ..RunLimits::default() }).unwrap();
                    fx.fact_strings()
                };

                let mut shuffled = edges.clone();
                // Cheap deterministic shuffle.
                let len = shuffled.len();
                for i in 0..len {
                    let j = (seed as usize).wrapping_mul(31).wrapping_add(i * 7) % len;
                    shuffled.swap(i, j);
                }
                prop_assert_eq!(closure(&edges), closure(&shuffled));
            }
        }
    }
}
