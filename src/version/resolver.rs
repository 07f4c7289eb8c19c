//! Version resolution with cache-backed staleness control.
//!
//! The resolver answers "which versions does this projection name map to
//! right now". It serves from the in-memory cache and, once the refresh
//! interval elapses or the entry is missing, re-replays the version-manager
//! projection through the same stream loader that serves user projections.

use std::sync::Arc;

use thiserror::Error;

use crate::codec::Codec;
use crate::event::EventDecodeError;
use crate::projection::{ProjectionHasher as _, ProjectionName, ShapeHasher};
use crate::snapshot::{SnapshotStore, SnapshotStrategy};
use crate::store::ProjectionStore;
use crate::stream::{self, LoadError};

use super::cache::VersionCache;
use super::manager::VersionManager;
use super::{ProjectionStatus, ProjectionVersion, ProjectionVersions, Tenant};

/// Alias binding [`ResolveError`] to concrete store and codec types.
pub type ResolverError<S, SS, C> = ResolveError<
    <S as ProjectionStore>::Error,
    <SS as SnapshotStore>::Error,
    <C as Codec>::Error,
>;

/// Failure to resolve the current versions of a projection name.
///
/// A failing refresh surfaces here without evicting already-cached entries;
/// subsequent calls re-attempt once they observe staleness again.
#[derive(Debug, Error)]
pub enum ResolveError<StoreError, SnapshotError, CodecError>
where
    StoreError: std::error::Error + 'static,
    SnapshotError: std::error::Error + 'static,
    CodecError: std::error::Error + 'static,
{
    #[error("failed to replay the projection version manager: {0}")]
    Replay(#[source] LoadError<StoreError, SnapshotError, CodecError>),
    #[error("failed to restore the projection version manager: {0}")]
    Restore(#[source] EventDecodeError<CodecError>),
}

pub struct VersionResolver<S, SS, C> {
    store: Arc<S>,
    snapshots: Arc<SS>,
    codec: C,
    strategy: SnapshotStrategy,
    cache: VersionCache,
    tenant: Tenant,
    manager_version: ProjectionVersion,
}

impl<S, SS, C> VersionResolver<S, SS, C>
where
    S: ProjectionStore,
    SS: SnapshotStore,
    C: Codec,
{
    pub(crate) fn new(
        store: Arc<S>,
        snapshots: Arc<SS>,
        codec: C,
        strategy: SnapshotStrategy,
        tenant: Tenant,
        cache: VersionCache,
    ) -> Self {
        // The version manager bootstraps itself: its own commits live under
        // this fixed live version.
        let manager_version = ProjectionVersion::new(
            ProjectionName::of::<VersionManager>(),
            ProjectionStatus::Live,
            1,
            ShapeHasher.version_hash::<VersionManager>(),
        );
        Self {
            store,
            snapshots,
            codec,
            strategy,
            cache,
            tenant,
            manager_version,
        }
    }

    /// The current versions for a projection name.
    ///
    /// Served from the cache while fresh and non-empty; otherwise refreshed
    /// by replaying the version-manager projection instance keyed by
    /// `(name, tenant)`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the refresh replay fails. Cached
    /// entries are retained.
    pub async fn resolve(
        &self,
        name: &ProjectionName,
    ) -> Result<ProjectionVersions, ResolverError<S, SS, C>> {
        if *name == *self.manager_version.name() {
            let mut versions = ProjectionVersions::default();
            versions
                .add(self.manager_version.clone())
                .expect("the bootstrap version always fits an empty set");
            return Ok(versions);
        }

        if !self.cache.is_stale()
            && let Some(versions) = self.cache.get(name)
            && !versions.is_empty()
        {
            return Ok(versions);
        }

        self.refresh(name).await
    }

    async fn refresh(&self, name: &ProjectionName) -> Result<ProjectionVersions, ResolverError<S, SS, C>> {
        tracing::debug!(projection = %name, tenant = %self.tenant, "refreshing projection versions");

        let id = VersionManager::instance_id(&self.tenant, name);
        let mut replay = stream::load_live::<VersionManager, _, _, _>(
            self.store.as_ref(),
            self.snapshots.as_ref(),
            &self.codec,
            self.strategy,
            &self.manager_version,
            &id,
        )
        .await
        .map_err(ResolveError::Replay)?;
        let manager = replay.restore(&self.codec).map_err(ResolveError::Restore)?;

        let mut fresh = ProjectionVersions::default();
        let resolved = manager.into_versions();
        if let Some(live) = resolved.live() {
            record(&mut fresh, live);
        }
        for building in resolved.building() {
            record(&mut fresh, building);
        }

        self.cache.replace(name.clone(), fresh.clone());
        self.cache.mark_refreshed();
        tracing::debug!(projection = %name, versions = fresh.len(), "projection versions refreshed");
        Ok(fresh)
    }
}

fn record(target: &mut ProjectionVersions, version: &ProjectionVersion) {
    if let Err(error) = target.add(version.clone()) {
        tracing::warn!(%error, "discarding conflicting resolved version");
    }
}
