//! The authorization decision point.
//!
//! An authorizer combines a verified token's statements with the verifying
//! side's own facts, rules, checks and policies, runs the world to its
//! fixpoint under an explicit budget, evaluates every check, then walks the
//! policies in declaration order. Token statements keep their block origin
//! and scoping; authorizer statements are fully trusted; ambient facts (the
//! current time) are visible to everyone.

use strata_datalog as datalog;
use strata_datalog::{
    ExternalKeyOrigins, Origin, OriginSet, RunLimits, SymbolTable, TrustedOrigins, World,
    WorldSnapshot,
};
use tracing::{debug, instrument};

use crate::builder;
use crate::error::{AuthorizationFailure, FailedCheck, TokenError};
use crate::token::Token;

/// Token statements staged for composition.
#[derive(Debug, Clone)]
struct TokenContent {
    blocks: Vec<crate::block::Block>,
    symbols: SymbolTable,
    external_origins: ExternalKeyOrigins,
}

/// Everything one authorization run works on. Rebuilt from scratch on every
/// call to `authorize`, so repeated runs on one instance never double-apply.
struct Composition {
    world: World,
    symbols: SymbolTable,
    block_count: u32,
    external: ExternalKeyOrigins,
    /// Checks with their declaring origin and in-block index.
    checks: Vec<(Origin, usize, datalog::Check)>,
    policies: Vec<datalog::Policy>,
}

/// Composes token and local statements and decides authorization.
///
/// Instances are independent and single-threaded; nothing is shared between
/// runs except the statements staged on this instance.
#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    token: Option<TokenContent>,
    facts: Vec<builder::Fact>,
    ambient_facts: Vec<builder::Fact>,
    rules: Vec<builder::Rule>,
    checks: Vec<builder::Check>,
    policies: Vec<builder::Policy>,
    snapshot: Option<WorldSnapshot>,
}

impl Authorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn for_token(token: &Token) -> Self {
        let mut authorizer = Self::new();
        authorizer.add_token(token);
        authorizer
    }

    /// Stage a verified token's statements. Replaces any previous token.
    pub fn add_token(&mut self, token: &Token) {
        self.token = Some(TokenContent {
            blocks: token.blocks().to_vec(),
            symbols: token.symbols().clone(),
            external_origins: token.external_origins(),
        });
    }

    pub fn add_fact(&mut self, fact: builder::Fact) {
        self.facts.push(fact);
    }

    pub fn add_rule(&mut self, rule: builder::Rule) {
        self.rules.push(rule);
    }

    pub fn add_check(&mut self, check: builder::Check) {
        self.checks.push(check);
    }

    pub fn add_policy(&mut self, policy: builder::Policy) {
        self.policies.push(policy);
    }

    /// Add the current wall-clock time as an ambient `time()` fact.
    pub fn set_time(&mut self) {
        let now = time::OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
        self.set_time_at(now);
    }

    /// Add a specific instant as the ambient `time()` fact.
    pub fn set_time_at(&mut self, unix_seconds: u64) {
        self.ambient_facts
            .push(builder::fact("time", [builder::date(unix_seconds)]));
    }

    /// Run the full decision: fixpoint, then every check, then policies in
    /// order. Returns the index of the matching allow policy.
    #[instrument(skip_all, err)]
    pub fn authorize(&mut self, limits: &RunLimits) -> Result<usize, TokenError> {
        let mut comp = self.compose()?;
        comp.world.run(limits, &comp.symbols)?;

        let mut failed = Vec::new();
        for (origin, check_index, check) in &comp.checks {
            let passed = check_passes(&comp, check, *origin)?;
            if !passed {
                failed.push(FailedCheck {
                    origin: *origin,
                    check_index: *check_index,
                    source: comp.symbols.print_check(check).map_err(TokenError::Datalog)?,
                });
            }
        }
        debug!(
            checks = comp.checks.len(),
            failed = failed.len(),
            facts = comp.world.facts().len(),
            "checks evaluated"
        );

        let check_pairs: Vec<(Origin, datalog::Check)> = comp
            .checks
            .iter()
            .map(|(origin, _, check)| (*origin, check.clone()))
            .collect();
        self.snapshot = Some(
            WorldSnapshot::build(&comp.world, &check_pairs, &comp.policies, &comp.symbols)
                .map_err(TokenError::Datalog)?,
        );

        if !failed.is_empty() {
            return Err(AuthorizationFailure::FailedChecks(failed).into());
        }

        let trusted = TrustedOrigins::default_for(Origin::Authorizer, comp.block_count);
        for (index, policy) in comp.policies.iter().enumerate() {
            for query in &policy.queries {
                let query_trusted = match &query.scope {
                    datalog::Scope::Default => trusted.clone(),
                    scope => TrustedOrigins::from_scope(
                        scope,
                        Origin::Authorizer,
                        comp.block_count,
                        &comp.external,
                    ),
                };
                if comp
                    .world
                    .query_match(query, &query_trusted, &comp.symbols)
                    .map_err(TokenError::Datalog)?
                {
                    return match policy.effect {
                        datalog::PolicyEffect::Allow => Ok(index),
                        datalog::PolicyEffect::Deny => {
                            Err(AuthorizationFailure::DeniedByPolicy { index }.into())
                        }
                    };
                }
            }
        }
        Err(AuthorizationFailure::NoMatchingPolicy.into())
    }

    /// The saturated world from the last `authorize` run, if any.
    pub fn snapshot(&self) -> Option<&WorldSnapshot> {
        self.snapshot.as_ref()
    }

    /// Render the world: the last run's saturated state, or the unevaluated
    /// composition if `authorize` has not run yet.
    pub fn print_world(&self) -> Result<String, TokenError> {
        if let Some(snapshot) = &self.snapshot {
            return Ok(snapshot.to_string());
        }
        let comp = self.compose()?;
        let check_pairs: Vec<(Origin, datalog::Check)> = comp
            .checks
            .iter()
            .map(|(origin, _, check)| (*origin, check.clone()))
            .collect();
        let snapshot =
            WorldSnapshot::build(&comp.world, &check_pairs, &comp.policies, &comp.symbols)
                .map_err(TokenError::Datalog)?;
        Ok(snapshot.to_string())
    }

    /// Build a fresh world from the staged token and local statements.
    fn compose(&self) -> Result<Composition, TokenError> {
        let (mut symbols, block_count, external) = match &self.token {
            Some(content) => (
                content.symbols.clone(),
                content.blocks.len() as u32,
                content.external_origins.clone(),
            ),
            None => (SymbolTable::new(), 0, ExternalKeyOrigins::new()),
        };

        let mut world = World::new();
        let mut checks = Vec::new();

        if let Some(content) = &self.token {
            for (index, block) in content.blocks.iter().enumerate() {
                let origin = Origin::Block(index as u32);
                for fact in &block.facts {
                    world.add_fact(OriginSet::single(origin), fact.clone());
                }
                for rule in &block.rules {
                    let trusted = TrustedOrigins::from_scope(
                        &rule.scope,
                        origin,
                        block_count,
                        &external,
                    );
                    world.add_rule(origin, trusted, rule.clone());
                }
                for (check_index, check) in block.checks.iter().enumerate() {
                    checks.push((origin, check_index, check.clone()));
                }
            }
        }

        for fact in &self.facts {
            let converted = fact.convert(&mut symbols).map_err(TokenError::Datalog)?;
            world.add_fact(OriginSet::single(Origin::Authorizer), converted);
        }
        for fact in &self.ambient_facts {
            let converted = fact.convert(&mut symbols).map_err(TokenError::Datalog)?;
            world.add_fact(OriginSet::single(Origin::Ambient), converted);
        }
        for rule in &self.rules {
            let converted = rule.convert(&mut symbols).map_err(TokenError::Datalog)?;
            converted.validate(&symbols).map_err(TokenError::Datalog)?;
            let trusted = TrustedOrigins::from_scope(
                &converted.scope,
                Origin::Authorizer,
                block_count,
                &external,
            );
            world.add_rule(Origin::Authorizer, trusted, converted);
        }
        for (check_index, check) in self.checks.iter().enumerate() {
            let converted = check.convert(&mut symbols).map_err(TokenError::Datalog)?;
            converted.validate(&symbols).map_err(TokenError::Datalog)?;
            checks.push((Origin::Authorizer, check_index, converted));
        }
        let mut policies = Vec::with_capacity(self.policies.len());
        for policy in &self.policies {
            let converted = policy.convert(&mut symbols).map_err(TokenError::Datalog)?;
            for query in &converted.queries {
                query.validate(&symbols).map_err(TokenError::Datalog)?;
            }
            policies.push(converted);
        }

        Ok(Composition {
            world,
            symbols,
            block_count,
            external,
            checks,
            policies,
        })
    }
}

/// Evaluate one check against the saturated world: it passes if any of its
/// queries passes under the check's quantifier.
fn check_passes(
    comp: &Composition,
    check: &datalog::Check,
    origin: Origin,
) -> Result<bool, TokenError> {
    for query in &check.queries {
        let trusted =
            TrustedOrigins::from_scope(&query.scope, origin, comp.block_count, &comp.external);
        let passed = match check.kind {
            datalog::CheckKind::One => comp
                .world
                .query_match(query, &trusted, &comp.symbols)
                .map_err(TokenError::Datalog)?,
            datalog::CheckKind::All => comp
                .world
                .query_match_all(query, &trusted, &comp.symbols)
                .map_err(TokenError::Datalog)?,
        };
        if passed {
            return Ok(true);
        }
    }
    Ok(false)
}
