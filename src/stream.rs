//! Projection streams: ordered commit batches plus the snapshot they fold
//! from.
//!
//! A [`ProjectionStream`] is a short-lived value owned by one operation. The
//! read path builds it with the page-and-checkpoint loop ([`load_live`]);
//! the write path builds it anchored at the snapshot metadata, only to derive
//! the next commit's marker ([`load_for_write`]).

use std::fmt;

use thiserror::Error;

use crate::codec::Codec;
use crate::event::{EventDecodeError, ProjectionEvent};
use crate::projection::{Projection, ProjectionId, ProjectionName};
use crate::snapshot::{Snapshot, SnapshotStore, SnapshotStrategy};
use crate::store::{ProjectionCommit, ProjectionStore};
use crate::version::ProjectionVersion;

/// The snapshot position a stream folds from.
#[derive(Debug, Clone)]
pub enum StreamSnapshot<P> {
    Real(Snapshot<P>),
    None,
}

impl<P> StreamSnapshot<P> {
    /// The snapshot revision; the absent snapshot folds from revision zero.
    #[must_use]
    pub fn revision(&self) -> u64 {
        match self {
            Self::Real(snapshot) => snapshot.revision,
            Self::None => 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> Option<&P> {
        match self {
            Self::Real(snapshot) => Some(&snapshot.state),
            Self::None => None,
        }
    }
}

impl<P> From<Option<Snapshot<P>>> for StreamSnapshot<P> {
    fn from(snapshot: Option<Snapshot<P>>) -> Self {
        snapshot.map_or(Self::None, Self::Real)
    }
}

/// Deferred or already-materialized snapshot access for a stream.
///
/// The deferred variant is consumed at most once; its result is cached in
/// place, keeping [`ProjectionStream::restore`] idempotent.
pub enum SnapshotLoader<P> {
    Eager(StreamSnapshot<P>),
    Deferred(Box<dyn FnOnce() -> StreamSnapshot<P> + Send>),
}

impl<P> SnapshotLoader<P> {
    #[must_use]
    pub fn eager(snapshot: StreamSnapshot<P>) -> Self {
        Self::Eager(snapshot)
    }

    /// A loader that always yields the absent snapshot.
    #[must_use]
    pub fn none() -> Self {
        Self::Eager(StreamSnapshot::None)
    }

    #[must_use]
    pub fn deferred(load: impl FnOnce() -> StreamSnapshot<P> + Send + 'static) -> Self {
        Self::Deferred(Box::new(load))
    }

    fn materialize(&mut self) -> &StreamSnapshot<P> {
        if matches!(self, Self::Deferred(_)) {
            let Self::Deferred(load) = std::mem::replace(self, Self::Eager(StreamSnapshot::None))
            else {
                unreachable!("variant checked above");
            };
            *self = Self::Eager(load());
        }
        let Self::Eager(snapshot) = self else {
            unreachable!("deferred loader replaced above");
        };
        snapshot
    }
}

impl<P> fmt::Debug for SnapshotLoader<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eager(_) => f.write_str("SnapshotLoader::Eager"),
            Self::Deferred(_) => f.write_str("SnapshotLoader::Deferred"),
        }
    }
}

/// Ordered commit batch plus a lazy snapshot loader; folds itself into the
/// projection state.
pub struct ProjectionStream<P: Projection> {
    projection_id: ProjectionId,
    commits: Vec<ProjectionCommit>,
    snapshot: SnapshotLoader<P>,
}

impl<P: Projection> ProjectionStream<P> {
    #[must_use]
    pub fn new(
        projection_id: ProjectionId,
        commits: Vec<ProjectionCommit>,
        snapshot: SnapshotLoader<P>,
    ) -> Self {
        Self {
            projection_id,
            commits,
            snapshot,
        }
    }

    /// The distinguished empty stream; folds to the zero projection value.
    #[must_use]
    pub fn empty(projection_id: ProjectionId) -> Self {
        Self::new(projection_id, Vec::new(), SnapshotLoader::none())
    }

    #[must_use]
    pub fn projection_id(&self) -> &ProjectionId {
        &self.projection_id
    }

    #[must_use]
    pub fn commits(&self) -> &[ProjectionCommit] {
        &self.commits
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Materialize the snapshot and fold the commits, in persisted order,
    /// into the projection state.
    ///
    /// Repeated calls yield equal states: the deferred snapshot loader runs
    /// at most once and the fold is pure.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError`] when a stored event does not decode into
    /// the projection's event type.
    pub fn restore<C: Codec>(&mut self, codec: &C) -> Result<P, EventDecodeError<C::Error>> {
        let snapshot = self.snapshot.materialize();
        let mut state = snapshot.state().cloned().unwrap_or_default();
        for commit in &self.commits {
            let event = P::Event::decode(&commit.event_kind, &commit.data, codec)?;
            state.apply(&event);
        }
        Ok(state)
    }
}

/// Error loading a projection stream.
#[derive(Debug, Error)]
pub enum LoadError<StoreError, SnapshotError, CodecError>
where
    StoreError: std::error::Error + 'static,
    SnapshotError: std::error::Error + 'static,
    CodecError: std::error::Error + 'static,
{
    #[error("failed to load projection commits: {0}")]
    Store(#[source] StoreError),
    #[error("snapshot operation failed: {0}")]
    Snapshot(#[source] SnapshotError),
    #[error("failed to decode stored event: {0}")]
    Decode(#[source] EventDecodeError<CodecError>),
}

/// Read-path loader: page through the commit log on top of the latest
/// snapshot, checkpointing whenever a full page accumulates.
///
/// Checkpointing is a side effect on the read path. A snapshot at revision
/// `r + 1` is a pure function of the commits up to a deterministic marker,
/// so racing readers produce equal snapshots and last-writer-wins is safe.
/// Non-snapshottable projections skip the checkpoint branch entirely.
pub(crate) async fn load_live<P, S, SS, C>(
    store: &S,
    snapshots: &SS,
    codec: &C,
    strategy: SnapshotStrategy,
    version: &ProjectionVersion,
    projection_id: &ProjectionId,
) -> Result<ProjectionStream<P>, LoadError<S::Error, SS::Error, C::Error>>
where
    P: Projection,
    S: ProjectionStore,
    SS: SnapshotStore,
    C: Codec,
{
    let name = ProjectionName::of::<P>();
    let mut current: StreamSnapshot<P> = if P::SNAPSHOTTABLE {
        snapshots
            .load::<P>(&name, projection_id, version)
            .await
            .map_err(LoadError::Snapshot)?
            .into()
    } else {
        StreamSnapshot::None
    };

    let page_size = strategy.events_in_snapshot();
    let mut state = current.state().cloned().unwrap_or_default();
    let mut marker = current.revision();
    let mut accumulated: Vec<ProjectionCommit> = Vec::new();

    loop {
        marker += 1;
        let page = store
            .load(version, projection_id, marker)
            .await
            .map_err(LoadError::Store)?;
        let page_len = page.len();

        if P::SNAPSHOTTABLE {
            for commit in &page {
                let event = P::Event::decode(&commit.event_kind, &commit.data, codec)
                    .map_err(LoadError::Decode)?;
                state.apply(&event);
            }
        }
        accumulated.extend(page);

        if P::SNAPSHOTTABLE && strategy.should_create_snapshot(accumulated.len()) {
            let next = Snapshot::new(
                projection_id.clone(),
                name.clone(),
                state.clone(),
                current.revision() + 1,
            );
            snapshots
                .save(&next, version)
                .await
                .map_err(LoadError::Snapshot)?;
            tracing::debug!(
                projection = %name,
                revision = next.revision,
                "projection snapshot checkpointed"
            );
            current = StreamSnapshot::Real(next);
            // The checkpoint now carries these commits; folding them again
            // would double-apply.
            accumulated.clear();
        }

        if page_len < page_size {
            break;
        }
        if page_len > page_size + page_size / 2 {
            tracing::warn!(
                projection = %name,
                page_len,
                page_size,
                "commit page overflows the configured snapshot size; check store pagination"
            );
        }
    }

    Ok(ProjectionStream::new(
        projection_id.clone(),
        accumulated,
        SnapshotLoader::eager(current),
    ))
}

/// Write-path loader: accumulate every commit past the given snapshot
/// revision, without checkpointing.
///
/// The result exists to derive the next commit's snapshot marker; its
/// snapshot loader yields nothing, and the snapshot state is never fetched.
pub(crate) async fn load_for_write<P, S>(
    store: &S,
    strategy: SnapshotStrategy,
    version: &ProjectionVersion,
    projection_id: &ProjectionId,
    snapshot_revision: u64,
) -> Result<ProjectionStream<P>, S::Error>
where
    P: Projection,
    S: ProjectionStore,
{
    let page_size = strategy.events_in_snapshot();
    let mut marker = snapshot_revision;
    let mut commits = Vec::new();

    loop {
        marker += 1;
        let page = store.load(version, projection_id, marker).await?;
        let page_len = page.len();
        commits.extend(page);
        if page_len < page_size {
            break;
        }
    }

    Ok(ProjectionStream::new(
        projection_id.clone(),
        commits,
        SnapshotLoader::deferred(|| StreamSnapshot::None),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::JsonCodec;
    use crate::version::manager::{VersionManager, VersionPromoted};
    use crate::version::{Tenant, VersionHash};

    fn promoted_commit(position: u64) -> ProjectionCommit {
        use crate::event::{EventOrigin, ProjectionEvent as _};
        use crate::version::manager::VersionEvent;
        use crate::version::{ProjectionStatus, ProjectionVersion};

        let event: VersionEvent = VersionPromoted {
            tenant: Tenant::new("acme"),
            name: ProjectionName::new("account-balance").unwrap(),
            revision: 1,
            hash: VersionHash::new("h1"),
        }
        .into();
        ProjectionCommit::new(
            ProjectionId::from("acme:account-balance"),
            ProjectionVersion::new(
                ProjectionName::of::<VersionManager>(),
                ProjectionStatus::Live,
                1,
                VersionHash::new("mh"),
            ),
            event.kind(),
            event.encode(&JsonCodec).unwrap(),
            1,
            EventOrigin::new("root", 1, position, chrono::Utc::now()),
        )
    }

    #[test]
    fn empty_stream_folds_to_the_zero_value() {
        let mut stream = ProjectionStream::<VersionManager>::empty(ProjectionId::from("a"));
        let manager = stream.restore(&JsonCodec).unwrap();
        assert!(manager.versions().is_empty());
    }

    #[test]
    fn restore_is_idempotent() {
        let mut stream = ProjectionStream::<VersionManager>::new(
            ProjectionId::from("acme:account-balance"),
            vec![promoted_commit(0)],
            SnapshotLoader::none(),
        );
        let first = stream.restore(&JsonCodec).unwrap();
        let second = stream.restore(&JsonCodec).unwrap();
        assert_eq!(
            first.versions().live().unwrap(),
            second.versions().live().unwrap()
        );
    }

    #[test]
    fn deferred_loader_runs_at_most_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let mut stream = ProjectionStream::<VersionManager>::new(
            ProjectionId::from("a"),
            Vec::new(),
            SnapshotLoader::deferred(move || {
                counted.fetch_add(1, Ordering::SeqCst);
                StreamSnapshot::None
            }),
        );

        stream.restore(&JsonCodec).unwrap();
        stream.restore(&JsonCodec).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn restore_folds_commits_in_persisted_order() {
        let mut stream = ProjectionStream::<VersionManager>::new(
            ProjectionId::from("acme:account-balance"),
            vec![promoted_commit(0)],
            SnapshotLoader::none(),
        );
        let manager = stream.restore(&JsonCodec).unwrap();
        assert_eq!(manager.versions().live().unwrap().revision(), 1);
    }
}
