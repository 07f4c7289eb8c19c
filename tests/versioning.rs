//! Integration tests for the version lifecycle: promotion, cancellation,
//! resolution failures and case-insensitive naming.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use projectory::codec::Codec;
use projectory::event::{DomainEvent, EventDecodeError, EventOrigin, ProjectionEvent};
use projectory::projection::{
    Projection, ProjectionHasher as _, ProjectionId, ProjectionName, ShapeHasher,
};
use projectory::repository::{ProjectionRepository, ReadError};
use projectory::snapshot::inmemory as snapshots;
use projectory::store::{ProjectionCommit, ProjectionStore, inmemory as stores};
use projectory::version::manager::{
    VersionBuildStarted, VersionCanceled, VersionEvent, VersionManager, VersionPromoted,
    VersionRequested,
};
use projectory::version::{ProjectionStatus, ProjectionVersion, Tenant, VersionHash};
use serde::{Deserialize, Serialize};

// ============================================================================
// Fixture domain
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderPlaced {
    order: String,
    total: i64,
}

impl DomainEvent for OrderPlaced {
    const KIND: &'static str = "order-placed";
}

#[derive(Debug, Clone, PartialEq)]
enum OrderEvent {
    Placed(OrderPlaced),
}

impl ProjectionEvent for OrderEvent {
    const EVENT_KINDS: &'static [&'static str] = &[OrderPlaced::KIND];

    fn kind(&self) -> &'static str {
        OrderPlaced::KIND
    }

    fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, C::Error> {
        match self {
            Self::Placed(e) => codec.serialize(e),
        }
    }

    fn decode<C: Codec>(
        kind: &str,
        data: &[u8],
        codec: &C,
    ) -> Result<Self, EventDecodeError<C::Error>> {
        match kind {
            "order-placed" => Ok(Self::Placed(
                codec.deserialize(data).map_err(EventDecodeError::Codec)?,
            )),
            _ => Err(EventDecodeError::UnknownKind {
                kind: kind.to_string(),
                expected: Self::EVENT_KINDS,
            }),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct OrderTotals {
    total: i64,
    orders: u64,
}

impl Projection for OrderTotals {
    const NAME: &'static str = "order-totals";

    type Event = OrderEvent;

    fn projection_ids(event: &Self::Event) -> Vec<ProjectionId> {
        let OrderEvent::Placed(e) = event;
        vec![ProjectionId::from(e.order.as_str())]
    }

    fn apply(&mut self, event: &Self::Event) {
        let OrderEvent::Placed(e) = event;
        self.total += e.total;
        self.orders += 1;
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn tenant() -> Tenant {
    Tenant::new("acme")
}

fn origin(position: u64) -> EventOrigin {
    EventOrigin::new("orders-1", position, position, Utc::now())
}

fn placed(order: &str, total: i64) -> OrderEvent {
    OrderEvent::Placed(OrderPlaced {
        order: order.to_string(),
        total,
    })
}

fn totals_name() -> ProjectionName {
    ProjectionName::of::<OrderTotals>()
}

fn totals_hash() -> VersionHash {
    ShapeHasher.version_hash::<OrderTotals>()
}

fn totals_version(status: ProjectionStatus, revision: u64) -> ProjectionVersion {
    ProjectionVersion::new(totals_name(), status, revision, totals_hash())
}

fn transition(
    make: fn(Tenant, ProjectionName, u64, VersionHash) -> VersionEvent,
    name: &ProjectionName,
    revision: u64,
) -> VersionEvent {
    make(tenant(), name.clone(), revision, totals_hash())
}

fn requested(name: &ProjectionName, revision: u64) -> VersionEvent {
    transition(
        |tenant, name, revision, hash| {
            VersionRequested {
                tenant,
                name,
                revision,
                hash,
            }
            .into()
        },
        name,
        revision,
    )
}

fn build_started(name: &ProjectionName, revision: u64) -> VersionEvent {
    transition(
        |tenant, name, revision, hash| {
            VersionBuildStarted {
                tenant,
                name,
                revision,
                hash,
            }
            .into()
        },
        name,
        revision,
    )
}

fn promoted(name: &ProjectionName, revision: u64) -> VersionEvent {
    transition(
        |tenant, name, revision, hash| {
            VersionPromoted {
                tenant,
                name,
                revision,
                hash,
            }
            .into()
        },
        name,
        revision,
    )
}

fn canceled(name: &ProjectionName, revision: u64) -> VersionEvent {
    transition(
        |tenant, name, revision, hash| {
            VersionCanceled {
                tenant,
                name,
                revision,
                hash,
            }
            .into()
        },
        name,
        revision,
    )
}

async fn apply_transitions<S, SS>(
    repo: &ProjectionRepository<S, SS>,
    events: &[VersionEvent],
    base: u64,
) where
    S: ProjectionStore,
    SS: projectory::snapshot::SnapshotStore,
{
    for (offset, event) in events.iter().enumerate() {
        repo.save::<VersionManager>(event, &origin(base + offset as u64))
            .await
            .unwrap();
    }
}

fn repository() -> (
    ProjectionRepository<stores::Store, snapshots::Store>,
    stores::Store,
) {
    let store = stores::Store::new();
    let repo = ProjectionRepository::new(store.clone(), snapshots::Store::new(), tenant())
        .with_refresh_interval(Duration::ZERO);
    (repo, store)
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn a_canceled_build_stops_receiving_writes() {
    let (repo, store) = repository();
    let name = totals_name();
    apply_transitions(
        &repo,
        &[
            requested(&name, 1),
            build_started(&name, 1),
            promoted(&name, 1),
            requested(&name, 2),
            build_started(&name, 2),
        ],
        1000,
    )
    .await;

    let id = ProjectionId::from("order-7");
    repo.save::<OrderTotals>(&placed("order-7", 10), &origin(0))
        .await
        .unwrap();

    apply_transitions(&repo, &[canceled(&name, 2)], 2000).await;
    repo.save::<OrderTotals>(&placed("order-7", 20), &origin(1))
        .await
        .unwrap();

    let live = totals_version(ProjectionStatus::Live, 1);
    let building = totals_version(ProjectionStatus::Building, 2);
    assert_eq!(store.load(&live, &id, 1).await.unwrap().len(), 2);
    assert_eq!(
        store.load(&building, &id, 1).await.unwrap().len(),
        1,
        "only the pre-cancellation write reached the canceled build"
    );
}

#[tokio::test]
async fn a_promoted_build_serves_reads_with_the_same_state() {
    let (repo, _) = repository();
    let name = totals_name();
    apply_transitions(
        &repo,
        &[
            requested(&name, 1),
            build_started(&name, 1),
            promoted(&name, 1),
            requested(&name, 2),
            build_started(&name, 2),
        ],
        1000,
    )
    .await;

    // Fan-out keeps the build converging with the live version.
    let id = ProjectionId::from("order-7");
    repo.save::<OrderTotals>(&placed("order-7", 10), &origin(0))
        .await
        .unwrap();
    repo.save::<OrderTotals>(&placed("order-7", 25), &origin(1))
        .await
        .unwrap();

    let before: OrderTotals = repo.get(&id).await.unwrap();
    apply_transitions(&repo, &[promoted(&name, 2)], 2000).await;
    let after: OrderTotals = repo.get(&id).await.unwrap();

    assert_eq!(before, after);
    assert_eq!(after.total, 35);
}

#[tokio::test]
async fn the_version_manager_reads_like_any_projection() {
    let (repo, _) = repository();
    let name = totals_name();
    apply_transitions(
        &repo,
        &[requested(&name, 1), build_started(&name, 1), promoted(&name, 1)],
        1000,
    )
    .await;

    let manager: VersionManager = repo
        .get(&VersionManager::instance_id(&tenant(), &name))
        .await
        .unwrap();
    let live = manager.versions().live().unwrap();
    assert_eq!(live.revision(), 1);
    assert_eq!(*live.hash(), totals_hash());
}

#[tokio::test]
async fn version_names_resolve_case_insensitively() {
    let (repo, _) = repository();
    let spelled_differently = ProjectionName::new("Order-Totals").unwrap();
    apply_transitions(
        &repo,
        &[
            requested(&spelled_differently, 1),
            build_started(&spelled_differently, 1),
            promoted(&spelled_differently, 1),
        ],
        1000,
    )
    .await;

    let id = ProjectionId::from("order-7");
    repo.save::<OrderTotals>(&placed("order-7", 10), &origin(0))
        .await
        .unwrap();

    let totals: OrderTotals = repo.get(&id).await.unwrap();
    assert_eq!(totals.total, 10);
}

// ============================================================================
// Resolution failures
// ============================================================================

/// Store wrapper that can be switched to fail version-manager loads.
#[derive(Clone)]
struct FlakyStore {
    inner: stores::Store,
    fail_manager_loads: Arc<AtomicBool>,
}

impl ProjectionStore for FlakyStore {
    type Error = std::io::Error;

    async fn save(&self, commit: ProjectionCommit) -> Result<(), Self::Error> {
        self.inner.save(commit).await.map_err(|e| match e {})
    }

    async fn load(
        &self,
        version: &ProjectionVersion,
        projection_id: &ProjectionId,
        snapshot_marker: u64,
    ) -> Result<Vec<ProjectionCommit>, Self::Error> {
        if self.fail_manager_loads.load(Ordering::SeqCst)
            && *version.name() == ProjectionName::of::<VersionManager>()
        {
            return Err(std::io::Error::other("injected resolution outage"));
        }
        self.inner
            .load(version, projection_id, snapshot_marker)
            .await
            .map_err(|e| match e {})
    }
}

#[tokio::test]
async fn a_failing_refresh_surfaces_as_a_read_error() {
    let fail_manager_loads = Arc::new(AtomicBool::new(false));
    let store = FlakyStore {
        inner: stores::Store::new(),
        fail_manager_loads: fail_manager_loads.clone(),
    };
    let repo = ProjectionRepository::new(store, snapshots::Store::new(), tenant())
        .with_refresh_interval(Duration::ZERO);

    let name = totals_name();
    apply_transitions(
        &repo,
        &[requested(&name, 1), build_started(&name, 1), promoted(&name, 1)],
        1000,
    )
    .await;

    let id = ProjectionId::from("order-7");
    repo.save::<OrderTotals>(&placed("order-7", 10), &origin(0))
        .await
        .unwrap();

    fail_manager_loads.store(true, Ordering::SeqCst);
    let result: Result<OrderTotals, _> = repo.get(&id).await;
    assert!(matches!(result, Err(ReadError::Resolve(_))));

    // The outage clears and reads recover.
    fail_manager_loads.store(false, Ordering::SeqCst);
    let totals: OrderTotals = repo.get(&id).await.unwrap();
    assert_eq!(totals.total, 10);
}
