//! The version-manager projection: a projection about projections.
//!
//! Version lifecycle transitions are themselves domain events, folded into a
//! [`ProjectionVersions`] read model per `(projection name, tenant)`. The
//! resolver replays this projection through the same stream loader that
//! serves user projections, so the version system bootstraps itself.

use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::event::{DomainEvent, EventDecodeError, ProjectionEvent};
use crate::projection::{Projection, ProjectionId, ProjectionName};

use super::{ProjectionStatus, ProjectionVersion, ProjectionVersions, Tenant, VersionHash};

/// A new projection generation was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRequested {
    pub tenant: Tenant,
    pub name: ProjectionName,
    pub revision: u64,
    pub hash: VersionHash,
}

impl DomainEvent for VersionRequested {
    const KIND: &'static str = "projection-version-requested";
}

/// A rebuild worker started feeding the requested generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBuildStarted {
    pub tenant: Tenant,
    pub name: ProjectionName,
    pub revision: u64,
    pub hash: VersionHash,
}

impl DomainEvent for VersionBuildStarted {
    const KIND: &'static str = "projection-version-build-started";
}

/// A fully rebuilt generation became the live one, retiring its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPromoted {
    pub tenant: Tenant,
    pub name: ProjectionName,
    pub revision: u64,
    pub hash: VersionHash,
}

impl DomainEvent for VersionPromoted {
    const KIND: &'static str = "projection-version-promoted";
}

/// A requested generation was canceled before completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCanceled {
    pub tenant: Tenant,
    pub name: ProjectionName,
    pub revision: u64,
    pub hash: VersionHash,
}

impl DomainEvent for VersionCanceled {
    const KIND: &'static str = "projection-version-canceled";
}

/// A rebuild overran its timebox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionTimedOut {
    pub tenant: Tenant,
    pub name: ProjectionName,
    pub revision: u64,
    pub hash: VersionHash,
}

impl DomainEvent for VersionTimedOut {
    const KIND: &'static str = "projection-version-timed-out";
}

/// Sum type of the version lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionEvent {
    Requested(VersionRequested),
    BuildStarted(VersionBuildStarted),
    Promoted(VersionPromoted),
    Canceled(VersionCanceled),
    TimedOut(VersionTimedOut),
}

impl VersionEvent {
    #[must_use]
    pub fn tenant(&self) -> &Tenant {
        match self {
            Self::Requested(e) => &e.tenant,
            Self::BuildStarted(e) => &e.tenant,
            Self::Promoted(e) => &e.tenant,
            Self::Canceled(e) => &e.tenant,
            Self::TimedOut(e) => &e.tenant,
        }
    }

    #[must_use]
    pub fn name(&self) -> &ProjectionName {
        match self {
            Self::Requested(e) => &e.name,
            Self::BuildStarted(e) => &e.name,
            Self::Promoted(e) => &e.name,
            Self::Canceled(e) => &e.name,
            Self::TimedOut(e) => &e.name,
        }
    }

    /// The version this transition resolves to.
    #[must_use]
    pub fn to_version(&self) -> ProjectionVersion {
        let (status, name, revision, hash) = match self {
            Self::Requested(e) => (ProjectionStatus::New, &e.name, e.revision, &e.hash),
            Self::BuildStarted(e) => (ProjectionStatus::Building, &e.name, e.revision, &e.hash),
            Self::Promoted(e) => (ProjectionStatus::Live, &e.name, e.revision, &e.hash),
            Self::Canceled(e) => (ProjectionStatus::Canceled, &e.name, e.revision, &e.hash),
            Self::TimedOut(e) => (ProjectionStatus::Timedout, &e.name, e.revision, &e.hash),
        };
        ProjectionVersion::new(name.clone(), status, revision, hash.clone())
    }
}

impl From<VersionRequested> for VersionEvent {
    fn from(event: VersionRequested) -> Self {
        Self::Requested(event)
    }
}

impl From<VersionBuildStarted> for VersionEvent {
    fn from(event: VersionBuildStarted) -> Self {
        Self::BuildStarted(event)
    }
}

impl From<VersionPromoted> for VersionEvent {
    fn from(event: VersionPromoted) -> Self {
        Self::Promoted(event)
    }
}

impl From<VersionCanceled> for VersionEvent {
    fn from(event: VersionCanceled) -> Self {
        Self::Canceled(event)
    }
}

impl From<VersionTimedOut> for VersionEvent {
    fn from(event: VersionTimedOut) -> Self {
        Self::TimedOut(event)
    }
}

impl ProjectionEvent for VersionEvent {
    const EVENT_KINDS: &'static [&'static str] = &[
        VersionRequested::KIND,
        VersionBuildStarted::KIND,
        VersionPromoted::KIND,
        VersionCanceled::KIND,
        VersionTimedOut::KIND,
    ];

    fn kind(&self) -> &'static str {
        match self {
            Self::Requested(_) => VersionRequested::KIND,
            Self::BuildStarted(_) => VersionBuildStarted::KIND,
            Self::Promoted(_) => VersionPromoted::KIND,
            Self::Canceled(_) => VersionCanceled::KIND,
            Self::TimedOut(_) => VersionTimedOut::KIND,
        }
    }

    fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, C::Error> {
        match self {
            Self::Requested(e) => codec.serialize(e),
            Self::BuildStarted(e) => codec.serialize(e),
            Self::Promoted(e) => codec.serialize(e),
            Self::Canceled(e) => codec.serialize(e),
            Self::TimedOut(e) => codec.serialize(e),
        }
    }

    fn decode<C: Codec>(
        kind: &str,
        data: &[u8],
        codec: &C,
    ) -> Result<Self, EventDecodeError<C::Error>> {
        match kind {
            "projection-version-requested" => Ok(Self::Requested(
                codec.deserialize(data).map_err(EventDecodeError::Codec)?,
            )),
            "projection-version-build-started" => Ok(Self::BuildStarted(
                codec.deserialize(data).map_err(EventDecodeError::Codec)?,
            )),
            "projection-version-promoted" => Ok(Self::Promoted(
                codec.deserialize(data).map_err(EventDecodeError::Codec)?,
            )),
            "projection-version-canceled" => Ok(Self::Canceled(
                codec.deserialize(data).map_err(EventDecodeError::Codec)?,
            )),
            "projection-version-timed-out" => Ok(Self::TimedOut(
                codec.deserialize(data).map_err(EventDecodeError::Codec)?,
            )),
            _ => Err(EventDecodeError::UnknownKind {
                kind: kind.to_string(),
                expected: Self::EVENT_KINDS,
            }),
        }
    }
}

/// Read model folding version lifecycle events into [`ProjectionVersions`].
///
/// One instance per `(projection name, tenant)`. Not snapshottable: the
/// transition history is short and replaying it must not depend on the
/// snapshot store the bootstrap path is still constructing.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct VersionManager {
    versions: ProjectionVersions,
}

impl VersionManager {
    #[must_use]
    pub fn versions(&self) -> &ProjectionVersions {
        &self.versions
    }

    #[must_use]
    pub fn into_versions(self) -> ProjectionVersions {
        self.versions
    }

    /// The instance id addressing one `(tenant, name)` pair.
    #[must_use]
    pub fn instance_id(tenant: &Tenant, name: &ProjectionName) -> ProjectionId {
        let key = format!("{}:{}", tenant.as_str(), name.as_str().to_ascii_lowercase());
        ProjectionId::new(key.into_bytes())
    }
}

impl Projection for VersionManager {
    const NAME: &'static str = "projection-versions";
    const SNAPSHOTTABLE: bool = false;

    type Event = VersionEvent;

    fn projection_ids(event: &Self::Event) -> Vec<ProjectionId> {
        vec![Self::instance_id(event.tenant(), event.name())]
    }

    fn apply(&mut self, event: &Self::Event) {
        if let Err(error) = self.versions.add(event.to_version()) {
            tracing::warn!(%error, kind = event.kind(), "skipping conflicting version transition");
        }
    }
}
