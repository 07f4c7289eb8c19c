//! Projection version lifecycle data model.
//!
//! A version is a named, hashed, status-tagged generation of a projection.
//! New code versions introduce new generations that are rebuilt in the
//! background before going live; [`ProjectionVersions`] is the set of all
//! non-retired generations for one projection name.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::projection::ProjectionName;

pub mod cache;
pub mod manager;
pub mod resolver;

/// Lifecycle state of a projection version.
///
/// Only `Building` and `Live` accept writes; only `Live` serves reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectionStatus {
    New,
    Building,
    Live,
    Canceled,
    Timedout,
}

impl ProjectionStatus {
    #[must_use]
    pub const fn accepts_writes(self) -> bool {
        matches!(self, Self::Building | Self::Live)
    }

    #[must_use]
    pub const fn serves_reads(self) -> bool {
        matches!(self, Self::Live)
    }
}

impl fmt::Display for ProjectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::New => "new",
            Self::Building => "building",
            Self::Live => "live",
            Self::Canceled => "canceled",
            Self::Timedout => "timedout",
        };
        f.write_str(label)
    }
}

/// Content-addressed fingerprint of a projection definition's shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionHash(String);

impl VersionHash {
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Isolation scope for projection versioning.
///
/// The version-manager projection instance is keyed by
/// `(projection name, tenant)`, so tenants may live at different versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tenant(String);

impl Tenant {
    #[must_use]
    pub fn new(tenant: impl Into<String>) -> Self {
        Self(tenant.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One generation of a projection: `(name, status, revision, hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectionVersion {
    name: ProjectionName,
    status: ProjectionStatus,
    revision: u64,
    hash: VersionHash,
}

impl ProjectionVersion {
    #[must_use]
    pub fn new(
        name: ProjectionName,
        status: ProjectionStatus,
        revision: u64,
        hash: VersionHash,
    ) -> Self {
        Self {
            name,
            status,
            revision,
            hash,
        }
    }

    #[must_use]
    pub fn name(&self) -> &ProjectionName {
        &self.name
    }

    #[must_use]
    pub fn status(&self) -> ProjectionStatus {
        self.status
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn hash(&self) -> &VersionHash {
        &self.hash
    }

    /// The same generation in a different lifecycle state.
    #[must_use]
    pub fn with_status(&self, status: ProjectionStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn accepts_writes(&self) -> bool {
        self.status.accepts_writes()
    }
}

impl fmt::Display for ProjectionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.revision, self.status)
    }
}

/// Conflict detected while registering a version transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionConflict {
    #[error("version belongs to `{actual}`, expected `{expected}`")]
    NameMismatch {
        expected: ProjectionName,
        actual: ProjectionName,
    },
    #[error(
        "revision {revision} of `{name}` is already registered with a different hash; a schema change requires a new revision"
    )]
    HashMismatch {
        name: ProjectionName,
        revision: u64,
    },
    #[error("building revision {building} does not supersede live revision {live}")]
    StaleBuild { building: u64, live: u64 },
}

/// The set of all non-retired versions for one projection name.
///
/// Invariants: at most one `Live`; a `Building` revision is always above the
/// live revision; promoting a version retires the previous live one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectionVersions {
    versions: Vec<ProjectionVersion>,
}

impl ProjectionVersions {
    /// Register a version, upserting by revision.
    ///
    /// A `Live` version replaces any previous live one; the replaced version
    /// is retired out of the set.
    ///
    /// # Errors
    ///
    /// Returns [`VersionConflict`] when the version belongs to a different
    /// projection name, re-registers a revision under a different hash, or
    /// marks a revision at or below the live one as building.
    pub fn add(&mut self, version: ProjectionVersion) -> Result<(), VersionConflict> {
        if let Some(first) = self.versions.first()
            && first.name() != version.name()
        {
            return Err(VersionConflict::NameMismatch {
                expected: first.name().clone(),
                actual: version.name().clone(),
            });
        }
        if let Some(existing) = self
            .versions
            .iter()
            .find(|v| v.revision() == version.revision())
            && existing.hash() != version.hash()
        {
            return Err(VersionConflict::HashMismatch {
                name: version.name().clone(),
                revision: version.revision(),
            });
        }
        if version.status() == ProjectionStatus::Building
            && let Some(live) = self.live()
            && version.revision() <= live.revision()
        {
            return Err(VersionConflict::StaleBuild {
                building: version.revision(),
                live: live.revision(),
            });
        }

        self.versions.retain(|v| v.revision() != version.revision());
        if version.status() == ProjectionStatus::Live {
            self.versions
                .retain(|v| v.status() != ProjectionStatus::Live);
        }
        self.versions.push(version);
        self.versions.sort_by_key(ProjectionVersion::revision);
        Ok(())
    }

    /// The single live version, when one exists.
    #[must_use]
    pub fn live(&self) -> Option<&ProjectionVersion> {
        self.versions
            .iter()
            .find(|v| v.status() == ProjectionStatus::Live)
    }

    /// All versions currently being rebuilt.
    pub fn building(&self) -> impl Iterator<Item = &ProjectionVersion> {
        self.versions
            .iter()
            .filter(|v| v.status() == ProjectionStatus::Building)
    }

    /// The versions every new event must be committed to.
    pub fn write_targets(&self) -> impl Iterator<Item = &ProjectionVersion> {
        self.versions.iter().filter(|v| v.accepts_writes())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProjectionVersion> {
        self.versions.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    #[must_use]
    pub fn name(&self) -> Option<&ProjectionName> {
        self.versions.first().map(ProjectionVersion::name)
    }
}
