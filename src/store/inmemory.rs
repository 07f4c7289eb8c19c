//! In-memory projection store implementation for testing.
//!
//! Keeps commit pages in a hash map behind an `RwLock` and deduplicates
//! appends on `(projection id, version, origin)`.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::{Arc, RwLock};

use crate::event::EventOrigin;
use crate::projection::ProjectionId;
use crate::version::ProjectionVersion;

use super::{ProjectionCommit, ProjectionStore};

/// Identity of one commit page.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct PageKey {
    name: String,
    revision: u64,
    id: ProjectionId,
    marker: u64,
}

/// Identity of one `(version, projection id)` log, for origin dedup.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct LogKey {
    name: String,
    revision: u64,
    id: ProjectionId,
}

impl PageKey {
    fn new(version: &ProjectionVersion, id: &ProjectionId, marker: u64) -> Self {
        Self {
            name: version.name().as_str().to_ascii_lowercase(),
            revision: version.revision(),
            id: id.clone(),
            marker,
        }
    }

    fn log_key(&self) -> LogKey {
        LogKey {
            name: self.name.clone(),
            revision: self.revision,
            id: self.id.clone(),
        }
    }
}

#[derive(Default)]
struct Inner {
    pages: HashMap<PageKey, Vec<ProjectionCommit>>,
    origins: HashMap<LogKey, HashSet<EventOrigin>>,
}

/// In-memory commit log that keeps pages in a hash map.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Inner>>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionStore for Store {
    type Error = Infallible;

    #[tracing::instrument(skip(self, commit), fields(marker = commit.snapshot_marker))]
    fn save(
        &self,
        commit: ProjectionCommit,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let page_key = PageKey::new(&commit.version, &commit.projection_id, commit.snapshot_marker);
        let mut inner = self.inner.write().expect("projection store lock poisoned");
        let fresh = inner
            .origins
            .entry(page_key.log_key())
            .or_default()
            .insert(commit.origin.clone());
        if fresh {
            inner.pages.entry(page_key).or_default().push(commit);
            tracing::trace!("commit appended");
        } else {
            tracing::trace!("duplicate commit ignored");
        }
        drop(inner);
        std::future::ready(Ok(()))
    }

    #[tracing::instrument(skip(self, projection_id))]
    fn load(
        &self,
        version: &ProjectionVersion,
        projection_id: &ProjectionId,
        snapshot_marker: u64,
    ) -> impl Future<Output = Result<Vec<ProjectionCommit>, Self::Error>> + Send {
        let key = PageKey::new(version, projection_id, snapshot_marker);
        let inner = self.inner.read().expect("projection store lock poisoned");
        let page = inner.pages.get(&key).cloned().unwrap_or_default();
        tracing::trace!(commits = page.len(), "page loaded");
        std::future::ready(Ok(page))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::projection::ProjectionName;
    use crate::version::{ProjectionStatus, VersionHash};

    fn version(status: ProjectionStatus, revision: u64) -> ProjectionVersion {
        ProjectionVersion::new(
            ProjectionName::new("account-balance").unwrap(),
            status,
            revision,
            VersionHash::new("h1"),
        )
    }

    fn origin(position: u64) -> EventOrigin {
        EventOrigin::new("root-1", 1, position, Utc::now())
    }

    fn commit(version: &ProjectionVersion, marker: u64, position: u64) -> ProjectionCommit {
        ProjectionCommit::new(
            ProjectionId::from("a"),
            version.clone(),
            "funds-deposited",
            br#"{"amount":1}"#.to_vec(),
            marker,
            origin(position),
        )
    }

    #[tokio::test]
    async fn saved_commits_load_in_insertion_order() {
        let store = Store::new();
        let v = version(ProjectionStatus::Live, 1);
        store.save(commit(&v, 1, 0)).await.unwrap();
        store.save(commit(&v, 1, 1)).await.unwrap();

        let page = store.load(&v, &ProjectionId::from("a"), 1).await.unwrap();
        let positions: Vec<u64> = page.iter().map(|c| c.origin.event_position).collect();
        assert_eq!(positions, vec![0, 1]);
    }

    #[tokio::test]
    async fn missing_page_loads_empty() {
        let store = Store::new();
        let v = version(ProjectionStatus::Live, 1);
        let page = store.load(&v, &ProjectionId::from("a"), 7).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn duplicate_origin_is_ignored() {
        let store = Store::new();
        let v = version(ProjectionStatus::Live, 1);
        store.save(commit(&v, 1, 0)).await.unwrap();
        store.save(commit(&v, 1, 0)).await.unwrap();

        let page = store.load(&v, &ProjectionId::from("a"), 1).await.unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn same_origin_lands_in_each_version_log() {
        let store = Store::new();
        let live = version(ProjectionStatus::Live, 1);
        let building = version(ProjectionStatus::Building, 2);
        store.save(commit(&live, 1, 0)).await.unwrap();
        store.save(commit(&building, 1, 0)).await.unwrap();

        assert_eq!(store.load(&live, &ProjectionId::from("a"), 1).await.unwrap().len(), 1);
        assert_eq!(
            store.load(&building, &ProjectionId::from("a"), 1).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn commits_survive_a_status_flip() {
        let store = Store::new();
        let building = version(ProjectionStatus::Building, 2);
        store.save(commit(&building, 1, 0)).await.unwrap();

        let live = building.with_status(ProjectionStatus::Live);
        let page = store.load(&live, &ProjectionId::from("a"), 1).await.unwrap();
        assert_eq!(page.len(), 1);
    }
}
