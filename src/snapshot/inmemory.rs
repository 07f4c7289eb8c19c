//! In-memory snapshot store implementation.
//!
//! Thread-safe reference implementation suitable for tests and examples.
//! Production systems implement [`SnapshotStore`] over durable storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Serialize, de::DeserializeOwned};

use crate::projection::{ProjectionId, ProjectionName};
use crate::version::ProjectionVersion;

use super::{Snapshot, SnapshotMeta, SnapshotStore};

/// Error type for the in-memory snapshot store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("deserialization error: {0}")]
    Deserialization(#[source] serde_json::Error),
}

type SharedSnapshots = Arc<RwLock<HashMap<SnapshotKey, Snapshot<serde_json::Value>>>>;

/// In-memory snapshot store keeping the latest snapshot per
/// `(name, id, version)` in a hash map.
#[derive(Clone, Debug, Default)]
pub struct Store {
    snapshots: SharedSnapshots,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct SnapshotKey {
    name: String,
    id: ProjectionId,
    version_revision: u64,
}

impl SnapshotKey {
    fn new(name: &ProjectionName, id: &ProjectionId, version: &ProjectionVersion) -> Self {
        Self {
            name: name.as_str().to_ascii_lowercase(),
            id: id.clone(),
            version_revision: version.revision(),
        }
    }
}

impl SnapshotStore for Store {
    type Error = Error;

    #[tracing::instrument(skip(self, id))]
    async fn load<T>(
        &self,
        name: &ProjectionName,
        id: &ProjectionId,
        version: &ProjectionVersion,
    ) -> Result<Option<Snapshot<T>>, Self::Error>
    where
        T: DeserializeOwned,
    {
        let key = SnapshotKey::new(name, id, version);
        let stored = {
            let snapshots = self.snapshots.read().expect("snapshot store lock poisoned");
            snapshots.get(&key).cloned()
        };
        let snapshot = match stored {
            Some(stored) => {
                let state =
                    serde_json::from_value(stored.state).map_err(Error::Deserialization)?;
                Some(Snapshot::new(
                    stored.projection_id,
                    stored.projection_name,
                    state,
                    stored.revision,
                ))
            }
            None => None,
        };
        tracing::trace!(found = snapshot.is_some(), "snapshot lookup");
        Ok(snapshot)
    }

    #[tracing::instrument(skip(self, id))]
    async fn load_meta(
        &self,
        name: &ProjectionName,
        id: &ProjectionId,
        version: &ProjectionVersion,
    ) -> Result<Option<SnapshotMeta>, Self::Error> {
        let key = SnapshotKey::new(name, id, version);
        let snapshots = self.snapshots.read().expect("snapshot store lock poisoned");
        Ok(snapshots.get(&key).map(Snapshot::meta))
    }

    #[tracing::instrument(skip(self, snapshot), fields(revision = snapshot.revision))]
    async fn save<T>(
        &self,
        snapshot: &Snapshot<T>,
        version: &ProjectionVersion,
    ) -> Result<(), Self::Error>
    where
        T: Serialize + Sync,
    {
        let state = serde_json::to_value(&snapshot.state).map_err(Error::Serialization)?;
        let key = SnapshotKey::new(&snapshot.projection_name, &snapshot.projection_id, version);
        let stored = Snapshot::new(
            snapshot.projection_id.clone(),
            snapshot.projection_name.clone(),
            state,
            snapshot.revision,
        );

        let mut snapshots = self
            .snapshots
            .write()
            .expect("snapshot store lock poisoned");
        match snapshots.get(&key) {
            // A racing reader already checkpointed further; keep its snapshot.
            Some(existing) if existing.revision > stored.revision => {
                tracing::trace!(existing = existing.revision, "declining older snapshot");
            }
            _ => {
                snapshots.insert(key, stored);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{ProjectionStatus, VersionHash};

    fn name() -> ProjectionName {
        ProjectionName::new("account-balance").unwrap()
    }

    fn version() -> ProjectionVersion {
        ProjectionVersion::new(name(), ProjectionStatus::Live, 1, VersionHash::new("h1"))
    }

    fn snapshot(revision: u64, state: &str) -> Snapshot<String> {
        Snapshot::new(ProjectionId::from("a"), name(), state.to_string(), revision)
    }

    #[tokio::test]
    async fn load_returns_none_for_missing() {
        let store = Store::new();
        let result: Option<Snapshot<String>> = store
            .load(&name(), &ProjectionId::from("a"), &version())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn load_returns_stored_snapshot() {
        let store = Store::new();
        store.save(&snapshot(2, "state"), &version()).await.unwrap();

        let loaded: Snapshot<String> = store
            .load(&name(), &ProjectionId::from("a"), &version())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.revision, 2);
        assert_eq!(loaded.state, "state");
    }

    #[tokio::test]
    async fn load_meta_skips_the_state() {
        let store = Store::new();
        store.save(&snapshot(3, "state"), &version()).await.unwrap();

        let meta = store
            .load_meta(&name(), &ProjectionId::from("a"), &version())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.revision, 3);
    }

    #[tokio::test]
    async fn save_declines_older_revision() {
        let store = Store::new();
        store.save(&snapshot(5, "newer"), &version()).await.unwrap();
        store.save(&snapshot(4, "older"), &version()).await.unwrap();

        let loaded: Snapshot<String> = store
            .load(&name(), &ProjectionId::from("a"), &version())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.revision, 5);
        assert_eq!(loaded.state, "newer");
    }

    #[tokio::test]
    async fn snapshots_are_scoped_per_version() {
        let store = Store::new();
        let v2 = ProjectionVersion::new(name(), ProjectionStatus::Building, 2, VersionHash::new("h1"));
        store.save(&snapshot(1, "v1-state"), &version()).await.unwrap();

        let missing: Option<Snapshot<String>> = store
            .load(&name(), &ProjectionId::from("a"), &v2)
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
