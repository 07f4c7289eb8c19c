//! Snapshot checkpointing: pure policy and the snapshot store contract.
//!
//! Snapshots bound replay cost for long-lived projections. The
//! [`SnapshotStrategy`] decides page sizing and checkpoint cadence; the
//! [`SnapshotStore`] persists checkpointed state keyed by
//! `(projection name, projection id, version)`.

use std::future::Future;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::projection::{ProjectionId, ProjectionName};
use crate::version::ProjectionVersion;

pub mod inmemory;

/// Default commit-log page size per snapshot revision.
pub const DEFAULT_EVENTS_IN_SNAPSHOT: usize = 500;

/// Pure checkpointing policy.
///
/// The snapshot marker is a deterministic function of position alone, so
/// parallel writers targeting the same `(projection id, version)` derive the
/// same marker for commits at the same ordinal position. The store can
/// therefore index commits by `(version, id, marker)` and serve ranged reads.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotStrategy {
    events_in_snapshot: usize,
}

impl SnapshotStrategy {
    /// A strategy paging `events_in_snapshot` commits per snapshot revision.
    /// Zero is clamped to one.
    #[must_use]
    pub fn new(events_in_snapshot: usize) -> Self {
        Self {
            events_in_snapshot: events_in_snapshot.max(1),
        }
    }

    /// Page size used when reading from the projection store.
    #[must_use]
    pub const fn events_in_snapshot(&self) -> usize {
        self.events_in_snapshot
    }

    /// Whether the accumulated commits fill a page and warrant a checkpoint.
    #[must_use]
    pub const fn should_create_snapshot(&self, commits_since_snapshot: usize) -> bool {
        commits_since_snapshot >= self.events_in_snapshot
    }

    /// The page index the next commit must be written to.
    ///
    /// Markers start one page past the snapshot revision: the read loop
    /// fetches its first page at `revision + 1`, so a commit persisted right
    /// after a checkpoint must land there.
    #[must_use]
    pub const fn snapshot_marker(&self, commits_since_snapshot: usize, snapshot_revision: u64) -> u64 {
        snapshot_revision + (commits_since_snapshot / self.events_in_snapshot) as u64 + 1
    }
}

impl Default for SnapshotStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_EVENTS_IN_SNAPSHOT)
    }
}

/// Checkpointed materialization of a projection instance at a revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub projection_id: ProjectionId,
    pub projection_name: ProjectionName,
    pub state: T,
    pub revision: u64,
}

impl<T> Snapshot<T> {
    #[must_use]
    pub fn new(
        projection_id: ProjectionId,
        projection_name: ProjectionName,
        state: T,
        revision: u64,
    ) -> Self {
        Self {
            projection_id,
            projection_name,
            state,
            revision,
        }
    }

    /// The same snapshot without its state, cheap to pass around.
    #[must_use]
    pub fn meta(&self) -> SnapshotMeta {
        SnapshotMeta {
            projection_id: self.projection_id.clone(),
            projection_name: self.projection_name.clone(),
            revision: self.revision,
        }
    }
}

/// Snapshot coordinates without the state payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub projection_id: ProjectionId,
    pub projection_name: ProjectionName,
    pub revision: u64,
}

/// Key-value persistence of snapshots and snapshot metadata.
///
/// Implementations must be safe for concurrent use by multiple repository
/// instances. Racing checkpoint writers produce equal snapshots for equal
/// revisions, so last-writer-wins semantics are acceptable.
pub trait SnapshotStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the latest snapshot for a projection instance at a version.
    ///
    /// Returns `Ok(None)` when no snapshot exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying storage fails.
    fn load<T>(
        &self,
        name: &ProjectionName,
        id: &ProjectionId,
        version: &ProjectionVersion,
    ) -> impl Future<Output = Result<Option<Snapshot<T>>, Self::Error>> + Send
    where
        T: DeserializeOwned;

    /// Load only the snapshot coordinates, skipping the state payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying storage fails.
    fn load_meta(
        &self,
        name: &ProjectionName,
        id: &ProjectionId,
        version: &ProjectionVersion,
    ) -> impl Future<Output = Result<Option<SnapshotMeta>, Self::Error>> + Send;

    /// Persist a snapshot for a version.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying storage fails.
    fn save<T>(
        &self,
        snapshot: &Snapshot<T>,
        version: &ProjectionVersion,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send
    where
        T: Serialize + Sync;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_streams_start_at_the_first_page() {
        let strategy = SnapshotStrategy::new(3);
        assert_eq!(strategy.snapshot_marker(0, 0), 1);
        assert_eq!(strategy.snapshot_marker(1, 0), 1);
        assert_eq!(strategy.snapshot_marker(2, 0), 1);
    }

    #[test]
    fn markers_advance_every_full_page() {
        let strategy = SnapshotStrategy::new(3);
        assert_eq!(strategy.snapshot_marker(3, 0), 2);
        assert_eq!(strategy.snapshot_marker(5, 0), 2);
        assert_eq!(strategy.snapshot_marker(6, 0), 3);
    }

    #[test]
    fn markers_continue_past_the_snapshot_revision() {
        let strategy = SnapshotStrategy::new(3);
        assert_eq!(strategy.snapshot_marker(0, 2), 3);
        assert_eq!(strategy.snapshot_marker(4, 2), 4);
    }

    #[test]
    fn checkpoint_fires_on_a_full_page() {
        let strategy = SnapshotStrategy::new(3);
        assert!(!strategy.should_create_snapshot(2));
        assert!(strategy.should_create_snapshot(3));
        assert!(strategy.should_create_snapshot(4));
    }

    #[test]
    fn zero_page_size_is_clamped() {
        let strategy = SnapshotStrategy::new(0);
        assert_eq!(strategy.events_in_snapshot(), 1);
    }

    #[test]
    fn meta_drops_the_state() {
        let snapshot = Snapshot::new(
            ProjectionId::from("a"),
            ProjectionName::new("account-balance").unwrap(),
            String::from("state"),
            4,
        );
        let meta = snapshot.meta();
        assert_eq!(meta.revision, 4);
        assert_eq!(meta.projection_id, snapshot.projection_id);
    }
}
