//! Projection commit log abstractions.
//!
//! A [`ProjectionCommit`] is the persisted record that a specific event was
//! applied to a specific projection instance at a specific version. The
//! [`ProjectionStore`] is an append-only log of those records, indexed by
//! `(version, projection id, snapshot marker)` and read in fixed-size pages.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventOrigin;
use crate::projection::ProjectionId;
use crate::version::ProjectionVersion;

pub mod inmemory;

/// One persisted event application. Created by the repository on write, owned
/// by the projection store thereafter, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionCommit {
    pub projection_id: ProjectionId,
    pub version: ProjectionVersion,
    pub event_kind: String,
    pub data: Vec<u8>,
    pub snapshot_marker: u64,
    pub origin: EventOrigin,
    pub persisted_at: DateTime<Utc>,
}

impl ProjectionCommit {
    #[must_use]
    pub fn new(
        projection_id: ProjectionId,
        version: ProjectionVersion,
        event_kind: impl Into<String>,
        data: Vec<u8>,
        snapshot_marker: u64,
        origin: EventOrigin,
    ) -> Self {
        Self {
            projection_id,
            version,
            event_kind: event_kind.into(),
            data,
            snapshot_marker,
            origin,
            persisted_at: Utc::now(),
        }
    }
}

/// Append-only, paged commit log.
///
/// Commits for a version are keyed by its `(name, revision)` identity, not
/// its status: commits written while a version is `Building` must be found
/// once it flips to `Live`. Implementations must be safe for concurrent use
/// by multiple repository instances within a process.
pub trait ProjectionStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Durable append.
    ///
    /// Deduplicating on `(projection id, version, origin)` is recommended;
    /// redelivered events carry the same origin.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the append fails.
    fn save(
        &self,
        commit: ProjectionCommit,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// All commits at the given marker, in insertion order.
    ///
    /// Returns at most the configured page size; a shorter result signals
    /// the end of the log.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when loading fails.
    fn load(
        &self,
        version: &ProjectionVersion,
        projection_id: &ProjectionId,
        snapshot_marker: u64,
    ) -> impl Future<Output = Result<Vec<ProjectionCommit>, Self::Error>> + Send;
}
