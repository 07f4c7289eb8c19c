//! Read-side primitives: the projection contract, its identifiers, and shape
//! hashing.
//!
//! A projection is a read model computed by folding events. The [`Projection`]
//! trait is a capability set, not an inheritance hierarchy: `apply` is the
//! folder for the projection's event sum type and `projection_ids` maps an
//! event to the instances it touches.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::event::ProjectionEvent;
use crate::version::VersionHash;

/// A read model rebuilt by folding a stream of domain events.
///
/// `NAME` is the stable contract identifier for the projection type; two
/// deployments agree on commit-log layout through it. Names compare
/// case-insensitively, so use lowercase kebab-case: `"account-balance"`,
/// `"order-totals"`.
///
/// Set `SNAPSHOTTABLE` to `false` for projections whose replay is cheap or
/// whose state should never be checkpointed; their reads always replay the
/// full commit log.
pub trait Projection:
    Default + Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Stable contract identifier for this projection type.
    const NAME: &'static str;

    /// Whether reads may checkpoint this projection's state.
    const SNAPSHOTTABLE: bool = true;

    /// Sum type of the events this projection folds.
    type Event: ProjectionEvent + Send + Sync;

    /// The projection instances an event maps to.
    ///
    /// May be empty (the event is a no-op for this projection), a single id,
    /// or many.
    fn projection_ids(event: &Self::Event) -> Vec<ProjectionId>;

    /// Fold one event into the projection state.
    fn apply(&mut self, event: &Self::Event);
}

/// Opaque byte identifier selecting a single projection instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectionId(Vec<u8>);

impl ProjectionId {
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for ProjectionId {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<String> for ProjectionId {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl fmt::Display for ProjectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Error raised when constructing a [`ProjectionName`] from an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("projection name must not be empty")]
pub struct EmptyProjectionName;

/// Non-empty projection contract name with case-insensitive equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectionName(String);

impl ProjectionName {
    /// Build a name from an arbitrary string.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyProjectionName`] for the empty string.
    pub fn new(name: impl Into<String>) -> Result<Self, EmptyProjectionName> {
        let name = name.into();
        if name.is_empty() {
            return Err(EmptyProjectionName);
        }
        Ok(Self(name))
    }

    /// The contract name of a projection type.
    #[must_use]
    pub fn of<P: Projection>() -> Self {
        debug_assert!(!P::NAME.is_empty());
        Self(P::NAME.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for ProjectionName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for ProjectionName {}

impl Hash for ProjectionName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for ProjectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable content hash of a projection type's shape.
///
/// Used to detect schema changes: two versions at the same revision must
/// carry the same hash, and a differing hash requires a new revision.
pub trait ProjectionHasher {
    fn version_hash<P: Projection>(&self) -> VersionHash;
}

/// Default hasher covering the contract name and the ordered handled event
/// kinds, which is the schema surface the decode seam exposes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShapeHasher;

impl ProjectionHasher for ShapeHasher {
    fn version_hash<P: Projection>(&self) -> VersionHash {
        let mut hasher = Sha256::new();
        hasher.update(P::NAME.to_ascii_lowercase().as_bytes());
        for kind in <P::Event as ProjectionEvent>::EVENT_KINDS {
            hasher.update([0u8]);
            hasher.update(kind.as_bytes());
        }
        VersionHash::new(hex::encode(hasher.finalize()))
    }
}
