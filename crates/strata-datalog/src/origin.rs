//! Statement provenance and visibility scoping.
//!
//! Every fact and rule carries where it came from: the authorizer's own
//! context, a specific block of the token, or the ambient marker for facts
//! that are always visible. Trusted-origin sets govern which facts a rule or
//! check may read. The asymmetric default (a statement sees the blocks up to
//! and including its own, never later ones) is what keeps attenuation
//! strictly narrowing: a later block cannot fabricate facts that an earlier
//! rule would trust.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Provenance of a single statement.
///
/// The `Ord` derive sorts block origins first and the authorizer last, which
/// canonical snapshots rely on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Origin {
    /// A token block: 0 is the root block, 1..N the attenuation blocks.
    Block(u32),
    /// Always-visible facts supplied by the verifying side (e.g. the current
    /// time).
    Ambient,
    /// The authorizer's own statements, always fully trusted.
    Authorizer,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Block(i) => write!(f, "{i}"),
            Origin::Ambient => write!(f, "ambient"),
            Origin::Authorizer => write!(f, "authorizer"),
        }
    }
}

/// The full provenance of a fact: the origins of every fact it was derived
/// from, plus the deriving rule's origin.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OriginSet(BTreeSet<Origin>);

impl OriginSet {
    pub fn single(origin: Origin) -> Self {
        Self([origin].into_iter().collect())
    }

    pub fn insert(&mut self, origin: Origin) {
        self.0.insert(origin);
    }

    /// Union with another set, used when joining facts across origins.
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).cloned().collect())
    }

    /// This set extended with one more origin.
    pub fn with(&self, origin: Origin) -> Self {
        let mut out = self.clone();
        out.insert(origin);
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Origin> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Origin> for OriginSet {
    fn from_iter<I: IntoIterator<Item = Origin>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Scope declaration attached to a rule or check, resolved into a
/// [`TrustedOrigins`] once the token shape is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Blocks up to and including the declaring one, plus ambient and the
    /// authorizer.
    Default,
    /// The root block only.
    Authority,
    /// Same visibility as `Default`; kept distinct so explicit declarations
    /// survive printing.
    Previous,
    /// A literal set of origins.
    Origins(BTreeSet<Origin>),
    /// Blocks carrying an external signature by this key (raw Ed25519 bytes).
    PublicKey(Vec<u8>),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Default => write!(f, "default"),
            Scope::Authority => write!(f, "authority"),
            Scope::Previous => write!(f, "previous"),
            Scope::Origins(origins) => {
                let rendered: Vec<String> = origins.iter().map(|o| o.to_string()).collect();
                write!(f, "{{{}}}", rendered.join(", "))
            }
            Scope::PublicKey(bytes) => {
                write!(f, "ed25519/")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Map from external public key bytes to the block indices signed by that
/// key, used to resolve [`Scope::PublicKey`].
pub type ExternalKeyOrigins = BTreeMap<Vec<u8>, Vec<u32>>;

/// The set of origins a statement is allowed to read facts from.
///
/// Every trusted-origin set contains `Ambient` (always-visible facts) and
/// `Authorizer` (the verifying party's own facts) along with the declaring
/// statement's origin; explicit scopes can only restrict which *blocks* are
/// read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedOrigins(BTreeSet<Origin>);

impl TrustedOrigins {
    /// The default scope for a statement declared at `origin`: all blocks up
    /// to and including the declaring one (all blocks, for authorizer
    /// statements), plus ambient and the authorizer.
    pub fn default_for(origin: Origin, block_count: u32) -> Self {
        let mut inner: BTreeSet<Origin> = [Origin::Ambient, Origin::Authorizer].into();
        match origin {
            Origin::Block(i) => {
                for b in 0..=i {
                    inner.insert(Origin::Block(b));
                }
            }
            Origin::Authorizer | Origin::Ambient => {
                for b in 0..block_count {
                    inner.insert(Origin::Block(b));
                }
            }
        }
        Self(inner)
    }

    /// Resolve a scope declaration for a statement declared at `origin`.
    pub fn from_scope(
        scope: &Scope,
        origin: Origin,
        block_count: u32,
        external: &ExternalKeyOrigins,
    ) -> Self {
        match scope {
            Scope::Default | Scope::Previous => Self::default_for(origin, block_count),
            Scope::Authority => {
                Self::explicit([Origin::Block(0)].into_iter().collect(), origin)
            }
            Scope::Origins(origins) => Self::explicit(origins.clone(), origin),
            Scope::PublicKey(key) => {
                let blocks = external
                    .get(key)
                    .map(|indices| indices.iter().map(|i| Origin::Block(*i)).collect())
                    .unwrap_or_default();
                Self::explicit(blocks, origin)
            }
        }
    }

    fn explicit(mut inner: BTreeSet<Origin>, own: Origin) -> Self {
        inner.insert(Origin::Ambient);
        inner.insert(Origin::Authorizer);
        inner.insert(own);
        Self(inner)
    }

    /// Is a single origin trusted?
    pub fn contains(&self, origin: &Origin) -> bool {
        self.0.contains(origin)
    }

    /// A fact is visible iff every origin it was derived from is trusted.
    pub fn contains_set(&self, origins: &OriginSet) -> bool {
        origins.iter().all(|o| self.0.contains(o))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scope_sees_own_and_earlier_blocks() {
        let trusted = TrustedOrigins::default_for(Origin::Block(1), 3);
        assert!(trusted.contains(&Origin::Block(0)));
        assert!(trusted.contains(&Origin::Block(1)));
        assert!(!trusted.contains(&Origin::Block(2)));
        assert!(trusted.contains(&Origin::Ambient));
        assert!(trusted.contains(&Origin::Authorizer));
    }

    #[test]
    fn authorizer_default_sees_every_block() {
        let trusted = TrustedOrigins::default_for(Origin::Authorizer, 2);
        assert!(trusted.contains(&Origin::Block(0)));
        assert!(trusted.contains(&Origin::Block(1)));
    }

    #[test]
    fn explicit_scope_is_literal_plus_implicits() {
        let scope = Scope::Origins([Origin::Block(0)].into_iter().collect());
        let trusted =
            TrustedOrigins::from_scope(&scope, Origin::Block(2), 3, &ExternalKeyOrigins::new());
        assert!(trusted.contains(&Origin::Block(0)));
        assert!(!trusted.contains(&Origin::Block(1)));
        // Declaring origin and the implicit markers are always present.
        assert!(trusted.contains(&Origin::Block(2)));
        assert!(trusted.contains(&Origin::Ambient));
        assert!(trusted.contains(&Origin::Authorizer));
    }

    #[test]
    fn public_key_scope_resolves_to_signed_blocks() {
        let key = vec![0xaa; 32];
        let mut external = ExternalKeyOrigins::new();
        external.insert(key.clone(), vec![2]);

        let trusted = TrustedOrigins::from_scope(
            &Scope::PublicKey(key),
            Origin::Authorizer,
            3,
            &external,
        );
        assert!(trusted.contains(&Origin::Block(2)));
        assert!(!trusted.contains(&Origin::Block(0)));
    }

    #[test]
    fn visibility_requires_every_member_origin() {
        let trusted = TrustedOrigins::default_for(Origin::Block(0), 2);
        let derived: OriginSet = [Origin::Block(0), Origin::Block(1)].into_iter().collect();
        assert!(!trusted.contains_set(&derived));

        let own: OriginSet = [Origin::Block(0)].into_iter().collect();
        assert!(trusted.contains_set(&own));
    }

    #[test]
    fn authorizer_sorts_last() {
        let mut origins = vec![Origin::Authorizer, Origin::Ambient, Origin::Block(4)];
        origins.sort();
        assert_eq!(
            origins,
            vec![Origin::Block(4), Origin::Ambient, Origin::Authorizer]
        );
    }
}
