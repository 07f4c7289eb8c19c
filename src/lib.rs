//! Core types for the projectory event-sourced projection runtime.
//!
//! A projection is a materialized read model derived by folding a sequence of
//! domain events. This crate provides the projection repository core:
//!
//! - [`projection`] - Read-side contract (`Projection`, ids, names, hashing)
//! - [`event`] - Event markers and the event-store origin pointer
//! - [`version`] - Version lifecycle, cache, resolver and the version manager
//! - [`store`] - Commit log abstraction (`ProjectionStore`) and wire types
//! - [`snapshot`] - Checkpointing policy and snapshot persistence
//! - [`stream`] - Projection streams and paged replay
//! - [`repository`] - The top-level facade (`ProjectionRepository`)
//! - [`codec`] - Serialization boundary (`Codec`, `JsonCodec`)
//!
//! # Example
//!
//! ```
//! use projectory::{ProjectionRepository, Tenant};
//! use projectory::{snapshot, store};
//!
//! let repository = ProjectionRepository::new(
//!     store::inmemory::Store::new(),
//!     snapshot::inmemory::Store::new(),
//!     Tenant::new("acme"),
//! );
//! ```

pub mod codec;
pub mod event;
pub mod projection;
pub mod repository;
pub mod snapshot;
pub mod store;
pub mod stream;
pub mod version;

pub use codec::{Codec, JsonCodec};
pub use event::{DomainEvent, EventKind, EventOrigin, ProjectionEvent};
pub use projection::{Projection, ProjectionHasher, ProjectionId, ProjectionName, ShapeHasher};
pub use repository::ProjectionRepository;
pub use snapshot::{Snapshot, SnapshotMeta, SnapshotStore, SnapshotStrategy};
pub use store::{ProjectionCommit, ProjectionStore};
pub use stream::ProjectionStream;
pub use version::{
    ProjectionStatus, ProjectionVersion, ProjectionVersions, Tenant, VersionHash,
};
