//! In-memory projection version cache.
//!
//! One cache instance serves one tenant. Readers get cloned immutable
//! snapshots; insertions are serialized behind a coarse write lock. A single
//! cache-wide refresh timestamp bounds staleness: the resolver re-replays the
//! version manager once the configured interval has elapsed.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::projection::ProjectionName;

use super::{ProjectionVersion, ProjectionVersions};

/// How long cached versions are served before the next read refreshes them.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
pub struct VersionCache {
    entries: RwLock<HashMap<ProjectionName, ProjectionVersions>>,
    last_refresh: RwLock<Instant>,
    refresh_interval: Duration,
}

impl VersionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_refresh_interval(DEFAULT_REFRESH_INTERVAL)
    }

    #[must_use]
    pub fn with_refresh_interval(refresh_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(Instant::now()),
            refresh_interval,
        }
    }

    /// The cached versions for a name, when present.
    #[must_use]
    pub fn get(&self, name: &ProjectionName) -> Option<ProjectionVersions> {
        let entries = self.entries.read().expect("version cache lock poisoned");
        let versions = entries.get(name).cloned();
        tracing::trace!(%name, found = versions.is_some(), "version cache lookup");
        versions
    }

    /// Upsert a single version into its name's entry.
    pub fn cache_version(&self, version: ProjectionVersion) {
        let mut entries = self.entries.write().expect("version cache lock poisoned");
        Self::insert(&mut entries, version);
    }

    /// Upsert a batch of versions under one lock acquisition.
    pub fn cache_versions(&self, versions: impl IntoIterator<Item = ProjectionVersion>) {
        let mut entries = self.entries.write().expect("version cache lock poisoned");
        for version in versions {
            Self::insert(&mut entries, version);
        }
    }

    /// Replace the whole entry for a name with a freshly resolved set.
    pub fn replace(&self, name: ProjectionName, versions: ProjectionVersions) {
        let mut entries = self.entries.write().expect("version cache lock poisoned");
        entries.insert(name, versions);
    }

    /// Whether the refresh interval has elapsed since the last refresh.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        let last_refresh = self.last_refresh.read().expect("version cache lock poisoned");
        last_refresh.elapsed() >= self.refresh_interval
    }

    /// Reset the staleness clock. Racing writers only bias staleness.
    pub fn mark_refreshed(&self) {
        let mut last_refresh = self
            .last_refresh
            .write()
            .expect("version cache lock poisoned");
        *last_refresh = Instant::now();
    }

    fn insert(entries: &mut HashMap<ProjectionName, ProjectionVersions>, version: ProjectionVersion) {
        let slot = entries.entry(version.name().clone()).or_default();
        if let Err(error) = slot.add(version) {
            tracing::warn!(%error, "discarding conflicting cached version");
        }
    }
}

impl Default for VersionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{ProjectionStatus, VersionHash};

    fn version(revision: u64, status: ProjectionStatus) -> ProjectionVersion {
        ProjectionVersion::new(
            ProjectionName::new("account-balance").unwrap(),
            status,
            revision,
            VersionHash::new("h1"),
        )
    }

    #[test]
    fn get_returns_none_for_unknown_name() {
        let cache = VersionCache::new();
        assert!(cache.get(&ProjectionName::new("missing").unwrap()).is_none());
    }

    #[test]
    fn cached_versions_are_returned_by_name() {
        let cache = VersionCache::new();
        cache.cache_version(version(1, ProjectionStatus::Live));

        let name = ProjectionName::new("Account-Balance").unwrap();
        let versions = cache.get(&name).unwrap();
        assert_eq!(versions.live().unwrap().revision(), 1);
    }

    #[test]
    fn replace_drops_entries_absent_from_the_fresh_set() {
        let cache = VersionCache::new();
        cache.cache_version(version(1, ProjectionStatus::Live));
        cache.cache_version(version(2, ProjectionStatus::Building));

        let mut fresh = ProjectionVersions::default();
        fresh.add(version(1, ProjectionStatus::Live)).unwrap();
        let name = ProjectionName::new("account-balance").unwrap();
        cache.replace(name.clone(), fresh);

        let versions = cache.get(&name).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions.building().count(), 0);
    }

    #[test]
    fn zero_interval_is_immediately_stale() {
        let cache = VersionCache::with_refresh_interval(Duration::ZERO);
        assert!(cache.is_stale());
        cache.mark_refreshed();
        assert!(cache.is_stale());
    }

    #[test]
    fn fresh_cache_is_not_stale() {
        let cache = VersionCache::with_refresh_interval(Duration::from_secs(300));
        assert!(!cache.is_stale());
    }
}
