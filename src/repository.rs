//! The projection repository: fan-out writes, targeted writes and
//! checkpointed reads.
//!
//! [`ProjectionRepository`] is the top-level facade of the crate. A domain
//! event arrives with its [`EventOrigin`]; the repository asks the projection
//! type which instances the event maps to, resolves the target versions
//! through the cache-backed resolver, and appends one commit per
//! write-eligible `(instance, version)` pair. Reads replay the live version's
//! commit log on top of the latest snapshot and fold the result.
//!
//! # Quick example
//!
//! ```ignore
//! let repository = ProjectionRepository::new(store, snapshots, Tenant::new("acme"));
//!
//! // Fan out a domain event to every write-eligible version.
//! repository.save::<AccountBalance>(&event, &origin).await?;
//!
//! // Feed a rebuild directly.
//! repository.save_to_version::<AccountBalance>(&event, &origin, &building).await?;
//!
//! // Read the live state.
//! let balance: AccountBalance = repository.get(&id).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::codec::{Codec, JsonCodec};
use crate::event::{EventDecodeError, EventOrigin, ProjectionEvent as _};
use crate::projection::{Projection, ProjectionId, ProjectionName};
use crate::snapshot::{SnapshotStore, SnapshotStrategy};
use crate::store::{ProjectionCommit, ProjectionStore};
use crate::stream::{self, LoadError, ProjectionStream};
use crate::version::cache::{DEFAULT_REFRESH_INTERVAL, VersionCache};
use crate::version::resolver::{ResolveError, VersionResolver};
use crate::version::{ProjectionStatus, ProjectionVersion, Tenant};

/// Alias binding [`SaveError`] to concrete store and codec types.
pub type RepositorySaveError<S, SS, C> = SaveError<
    <S as ProjectionStore>::Error,
    <SS as SnapshotStore>::Error,
    <C as Codec>::Error,
>;

/// Alias binding [`ReadError`] to concrete store and codec types.
pub type RepositoryReadError<S, SS, C> = ReadError<
    <S as ProjectionStore>::Error,
    <SS as SnapshotStore>::Error,
    <C as Codec>::Error,
>;

/// Error persisting a projection commit.
#[derive(Debug, Error)]
pub enum SaveError<StoreError, SnapshotError, CodecError>
where
    StoreError: std::error::Error + 'static,
    SnapshotError: std::error::Error + 'static,
    CodecError: std::error::Error + 'static,
{
    /// The targeted version's status does not accept writes.
    #[error("revision {revision} of `{name}` is {status} and does not accept writes")]
    VersionNotWritable {
        name: ProjectionName,
        revision: u64,
        status: ProjectionStatus,
    },
    /// The targeted version belongs to a different projection.
    #[error("version belongs to `{actual}`, expected projection `{expected}`")]
    VersionNameMismatch {
        expected: ProjectionName,
        actual: ProjectionName,
    },
    #[error("failed to resolve projection versions: {0}")]
    Resolve(#[source] ResolveError<StoreError, SnapshotError, CodecError>),
    #[error("failed to encode event: {0}")]
    Encode(#[source] CodecError),
    #[error("failed to read snapshot metadata: {0}")]
    Snapshot(#[source] SnapshotError),
    #[error("failed to persist projection commit: {0}")]
    Store(#[source] StoreError),
}

/// Error reconstructing a projection.
///
/// Reads are self-contained: a failure returns this error and never a
/// partial state.
#[derive(Debug, Error)]
pub enum ReadError<StoreError, SnapshotError, CodecError>
where
    StoreError: std::error::Error + 'static,
    SnapshotError: std::error::Error + 'static,
    CodecError: std::error::Error + 'static,
{
    #[error("failed to resolve projection versions: {0}")]
    Resolve(#[source] ResolveError<StoreError, SnapshotError, CodecError>),
    #[error(transparent)]
    Load(LoadError<StoreError, SnapshotError, CodecError>),
    #[error("failed to restore projection state: {0}")]
    Restore(#[source] EventDecodeError<CodecError>),
}

/// Top-level facade over the projection store, snapshot store and version
/// resolver.
///
/// One repository serves one tenant. All operations are suspendable and
/// cancel cooperatively at store boundaries; [`ProjectionRepository::blocking`]
/// exposes the same operations behind an in-place executor.
pub struct ProjectionRepository<S, SS, C = JsonCodec> {
    store: Arc<S>,
    snapshots: Arc<SS>,
    codec: C,
    strategy: SnapshotStrategy,
    tenant: Tenant,
    refresh_interval: Duration,
    resolver: VersionResolver<S, SS, C>,
}

impl<S, SS> ProjectionRepository<S, SS>
where
    S: ProjectionStore,
    SS: SnapshotStore,
{
    #[must_use]
    pub fn new(store: S, snapshots: SS, tenant: Tenant) -> Self {
        Self::with_codec(store, snapshots, tenant, JsonCodec)
    }
}

impl<S, SS, C> ProjectionRepository<S, SS, C>
where
    S: ProjectionStore,
    SS: SnapshotStore,
    C: Codec + Clone,
{
    #[must_use]
    pub fn with_codec(store: S, snapshots: SS, tenant: Tenant, codec: C) -> Self {
        let store = Arc::new(store);
        let snapshots = Arc::new(snapshots);
        let strategy = SnapshotStrategy::default();
        let refresh_interval = DEFAULT_REFRESH_INTERVAL;
        let resolver = VersionResolver::new(
            store.clone(),
            snapshots.clone(),
            codec.clone(),
            strategy,
            tenant.clone(),
            VersionCache::with_refresh_interval(refresh_interval),
        );
        Self {
            store,
            snapshots,
            codec,
            strategy,
            tenant,
            refresh_interval,
            resolver,
        }
    }

    /// Replace the snapshot strategy. Resets the version cache.
    #[must_use]
    pub fn with_snapshot_strategy(mut self, strategy: SnapshotStrategy) -> Self {
        self.strategy = strategy;
        self.rebuild_resolver();
        self
    }

    /// Replace the version-cache refresh interval. Resets the version cache.
    #[must_use]
    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self.rebuild_resolver();
        self
    }

    fn rebuild_resolver(&mut self) {
        self.resolver = VersionResolver::new(
            self.store.clone(),
            self.snapshots.clone(),
            self.codec.clone(),
            self.strategy,
            self.tenant.clone(),
            VersionCache::with_refresh_interval(self.refresh_interval),
        );
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn snapshot_store(&self) -> &SS {
        &self.snapshots
    }

    /// Persist an event into every write-eligible version of every
    /// projection instance it maps to.
    ///
    /// Writes to distinct `(instance, version)` pairs are independent: a
    /// failing one is logged with enough context to replay the projection
    /// and the remaining pairs proceed. An event mapping to no instances is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SaveError::Resolve`] when the target versions cannot be
    /// determined at all.
    #[tracing::instrument(skip_all, fields(projection = P::NAME))]
    pub async fn save<P>(
        &self,
        event: &P::Event,
        origin: &EventOrigin,
    ) -> Result<(), RepositorySaveError<S, SS, C>>
    where
        P: Projection,
    {
        let ids = P::projection_ids(event);
        if ids.is_empty() {
            tracing::trace!("event maps to no projection instances");
            return Ok(());
        }

        let name = ProjectionName::of::<P>();
        for id in &ids {
            let versions = self
                .resolver
                .resolve(&name)
                .await
                .map_err(SaveError::Resolve)?;
            for version in versions.write_targets() {
                if let Err(error) = self.commit_one::<P>(id, version, event, origin).await {
                    tracing::error!(
                        projection = %name,
                        projection_id = %id,
                        revision = version.revision(),
                        %error,
                        "projection commit failed; replay this projection version to converge"
                    );
                }
            }
        }
        Ok(())
    }

    /// Persist an event into one specific version.
    ///
    /// Used by rebuild workers that know exactly which building version they
    /// are feeding. Unlike the fan-out path, store failures propagate: the
    /// worker owns retries for its single version.
    ///
    /// # Errors
    ///
    /// Returns [`SaveError::VersionNotWritable`] or
    /// [`SaveError::VersionNameMismatch`] before any I/O when the version is
    /// not a valid target, and the underlying failure otherwise.
    #[tracing::instrument(skip_all, fields(projection = P::NAME, revision = version.revision()))]
    pub async fn save_to_version<P>(
        &self,
        event: &P::Event,
        origin: &EventOrigin,
        version: &ProjectionVersion,
    ) -> Result<(), RepositorySaveError<S, SS, C>>
    where
        P: Projection,
    {
        if !version.accepts_writes() {
            return Err(SaveError::VersionNotWritable {
                name: version.name().clone(),
                revision: version.revision(),
                status: version.status(),
            });
        }
        let name = ProjectionName::of::<P>();
        if *version.name() != name {
            return Err(SaveError::VersionNameMismatch {
                expected: name,
                actual: version.name().clone(),
            });
        }

        for id in P::projection_ids(event) {
            self.commit_one::<P>(&id, version, event, origin).await?;
        }
        Ok(())
    }

    async fn commit_one<P>(
        &self,
        id: &ProjectionId,
        version: &ProjectionVersion,
        event: &P::Event,
        origin: &EventOrigin,
    ) -> Result<(), RepositorySaveError<S, SS, C>>
    where
        P: Projection,
    {
        let name = ProjectionName::of::<P>();
        let snapshot_revision = if P::SNAPSHOTTABLE {
            self.snapshots
                .load_meta(&name, id, version)
                .await
                .map_err(SaveError::Snapshot)?
                .map_or(0, |meta| meta.revision)
        } else {
            0
        };

        let current = stream::load_for_write::<P, _>(
            self.store.as_ref(),
            self.strategy,
            version,
            id,
            snapshot_revision,
        )
        .await
        .map_err(SaveError::Store)?;
        let marker = self
            .strategy
            .snapshot_marker(current.commits().len(), snapshot_revision);

        let data = event.encode(&self.codec).map_err(SaveError::Encode)?;
        let commit = ProjectionCommit::new(
            id.clone(),
            version.clone(),
            event.kind(),
            data,
            marker,
            origin.clone(),
        );
        self.store.save(commit).await.map_err(SaveError::Store)?;
        tracing::debug!(
            projection = %name,
            revision = version.revision(),
            marker,
            "projection commit persisted"
        );
        Ok(())
    }

    /// Reconstruct the live state of a projection instance.
    ///
    /// Resolves the live version, replays its commit log on top of the
    /// latest snapshot (checkpointing along the way for snapshottable
    /// projections) and folds the stream. When no live version exists the
    /// zero projection value is returned and a warning logged; reads do not
    /// fail on missing versions.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError`] when version resolution, the replay, or the
    /// fold fails. No partial state is ever returned.
    #[tracing::instrument(skip_all, fields(projection = P::NAME, id = %id))]
    pub async fn get<P>(&self, id: &ProjectionId) -> Result<P, RepositoryReadError<S, SS, C>>
    where
        P: Projection,
    {
        let name = ProjectionName::of::<P>();
        let versions = self
            .resolver
            .resolve(&name)
            .await
            .map_err(ReadError::Resolve)?;
        let Some(live) = versions.live() else {
            tracing::warn!(projection = %name, "no live version; serving the zero projection");
            return Ok(P::default());
        };

        let mut stream = self.load_stream::<P>(live, id).await?;
        stream.restore(&self.codec).map_err(ReadError::Restore)
    }

    /// Load the commit stream of a projection instance at a specific
    /// version, checkpointing full pages for snapshottable projections.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Load`] when paging or checkpointing fails.
    pub async fn load_stream<P>(
        &self,
        version: &ProjectionVersion,
        id: &ProjectionId,
    ) -> Result<ProjectionStream<P>, RepositoryReadError<S, SS, C>>
    where
        P: Projection,
    {
        stream::load_live::<P, _, _, _>(
            self.store.as_ref(),
            self.snapshots.as_ref(),
            &self.codec,
            self.strategy,
            version,
            id,
        )
        .await
        .map_err(ReadError::Load)
    }

    /// Blocking facade over the same operations, driven on an in-place
    /// executor. Must not be called from within an async runtime.
    #[must_use]
    pub fn blocking(&self) -> Blocking<'_, S, SS, C> {
        Blocking { inner: self }
    }
}

/// Synchronous view of a [`ProjectionRepository`].
pub struct Blocking<'a, S, SS, C> {
    inner: &'a ProjectionRepository<S, SS, C>,
}

impl<S, SS, C> Blocking<'_, S, SS, C>
where
    S: ProjectionStore,
    SS: SnapshotStore,
    C: Codec + Clone,
{
    /// Blocking [`ProjectionRepository::save`].
    ///
    /// # Errors
    ///
    /// See [`ProjectionRepository::save`].
    pub fn save<P>(
        &self,
        event: &P::Event,
        origin: &EventOrigin,
    ) -> Result<(), RepositorySaveError<S, SS, C>>
    where
        P: Projection,
    {
        futures::executor::block_on(self.inner.save::<P>(event, origin))
    }

    /// Blocking [`ProjectionRepository::save_to_version`].
    ///
    /// # Errors
    ///
    /// See [`ProjectionRepository::save_to_version`].
    pub fn save_to_version<P>(
        &self,
        event: &P::Event,
        origin: &EventOrigin,
        version: &ProjectionVersion,
    ) -> Result<(), RepositorySaveError<S, SS, C>>
    where
        P: Projection,
    {
        futures::executor::block_on(self.inner.save_to_version::<P>(event, origin, version))
    }

    /// Blocking [`ProjectionRepository::get`].
    ///
    /// # Errors
    ///
    /// See [`ProjectionRepository::get`].
    pub fn get<P>(&self, id: &ProjectionId) -> Result<P, RepositoryReadError<S, SS, C>>
    where
        P: Projection,
    {
        futures::executor::block_on(self.inner.get::<P>(id))
    }
}
