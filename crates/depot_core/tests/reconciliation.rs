use depot_core::db::open_db_in_memory;
use depot_core::{
    ChainDirectory, HierarchyService, InMemoryZoneMembership, ItemDetails, MembershipDelta,
    MembershipReconciler, MoveRequest, RecordId, RelocationService, RemoteError,
    SqliteSnapshotRepository, VersionChain, ZoneId, ZoneMembershipClient,
};
use rusqlite::Connection;
use std::collections::HashSet;
use uuid::Uuid;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn item_chain(conn: &Connection) -> VersionChain<ItemDetails, SqliteSnapshotRepository<'_, ItemDetails>> {
    VersionChain::new(SqliteSnapshotRepository::try_new(conn).unwrap())
}

fn reconciler<'conn, Z: ZoneMembershipClient>(
    conn: &'conn Connection,
    membership: Z,
) -> MembershipReconciler<ChainDirectory<ItemDetails, SqliteSnapshotRepository<'conn, ItemDetails>>, Z>
{
    MembershipReconciler::new(
        ChainDirectory::new(SqliteSnapshotRepository::try_new(conn).unwrap()),
        membership,
    )
}

/// Membership double whose removal pushes always fail; reads delegate to an
/// in-memory store.
struct RemoveFailsMembership {
    inner: InMemoryZoneMembership,
}

impl ZoneMembershipClient for RemoveFailsMembership {
    fn move_records(&self, deltas: &[MembershipDelta]) -> Result<(), RemoteError> {
        self.inner.move_records(deltas)
    }

    fn remove_from_zone(&self, _zone: ZoneId, _record: RecordId) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable("write path down".to_string()))
    }

    fn zone_contents(&self, zone: ZoneId) -> Result<HashSet<RecordId>, RemoteError> {
        self.inner.zone_contents(zone)
    }
}

#[test]
fn zone_view_partitions_present_and_stale_members() {
    let conn = setup();
    let chain = item_chain(&conn);
    let membership = InMemoryZoneMembership::new();

    let live = chain.create(ItemDetails::named("live")).unwrap().record_uuid;
    let tombstoned = chain.create(ItemDetails::named("gone")).unwrap().record_uuid;
    chain.soft_delete_chain(tombstoned).unwrap();
    let unknown = Uuid::new_v4();

    let zone = Uuid::new_v4();
    membership.seed_zone(zone, [live, tombstoned, unknown]);

    let view = reconciler(&conn, &membership).zone_view(zone).unwrap();

    assert_eq!(view.present, vec![live]);
    let mut expected_pruned = vec![tombstoned, unknown];
    expected_pruned.sort();
    assert_eq!(view.pruned, expected_pruned);

    // The removals were pushed back to the membership store.
    assert_eq!(membership.members_of(zone), vec![live]);
}

#[test]
fn cascade_delete_staleness_converges_in_one_reconciliation_pass() {
    let conn = setup();
    let membership = InMemoryZoneMembership::new();

    let chain = item_chain(&conn);
    let parent = chain.create(ItemDetails::named("rack")).unwrap().record_uuid;
    let child = chain.create(ItemDetails::named("bin")).unwrap().record_uuid;

    let floor = Uuid::new_v4();
    let zone = Uuid::new_v4();
    let relocation = RelocationService::new(
        HierarchyService::new(item_chain(&conn)),
        &membership,
    );
    relocation.move_records(&[
        MoveRequest {
            record_uuid: parent,
            new_floor_uuid: Some(floor),
            new_zone_uuid: Some(zone),
            new_parent_uuid: None,
        },
        MoveRequest {
            record_uuid: child,
            new_floor_uuid: Some(floor),
            new_zone_uuid: Some(zone),
            new_parent_uuid: Some(parent),
        },
    ]);
    assert_eq!(membership.members_of(zone).len(), 2);

    // Cascade delete never touches the membership index.
    HierarchyService::new(item_chain(&conn))
        .cascade_delete(parent)
        .unwrap();
    assert_eq!(membership.members_of(zone).len(), 2);

    let view = reconciler(&conn, &membership).zone_view(zone).unwrap();
    assert!(view.present.is_empty());
    assert_eq!(view.pruned.len(), 2);
    assert!(membership.members_of(zone).is_empty());

    // A second read finds nothing left to prune.
    let view = reconciler(&conn, &membership).zone_view(zone).unwrap();
    assert!(view.present.is_empty());
    assert!(view.pruned.is_empty());
}

#[test]
fn empty_zone_reads_as_empty_view() {
    let conn = setup();
    let membership = InMemoryZoneMembership::new();

    let view = reconciler(&conn, &membership).zone_view(Uuid::new_v4()).unwrap();
    assert!(view.present.is_empty());
    assert!(view.pruned.is_empty());
}

#[test]
fn failed_removal_push_still_excludes_the_stale_member() {
    let conn = setup();
    let chain = item_chain(&conn);
    let membership = RemoveFailsMembership {
        inner: InMemoryZoneMembership::new(),
    };

    let live = chain.create(ItemDetails::named("live")).unwrap().record_uuid;
    let tombstoned = chain.create(ItemDetails::named("gone")).unwrap().record_uuid;
    chain.soft_delete_chain(tombstoned).unwrap();

    let zone = Uuid::new_v4();
    membership.inner.seed_zone(zone, [live, tombstoned]);

    let view = reconciler(&conn, &membership).zone_view(zone).unwrap();
    assert_eq!(view.present, vec![live]);
    assert_eq!(view.pruned, vec![tombstoned]);

    // The push failed, so the store stays stale until the next read retries.
    let mut remaining = membership.inner.members_of(zone);
    remaining.sort();
    let mut expected = vec![live, tombstoned];
    expected.sort();
    assert_eq!(remaining, expected);
}

#[test]
fn membership_fetch_failure_surfaces_as_error() {
    struct DownMembership;
    impl ZoneMembershipClient for DownMembership {
        fn move_records(&self, _deltas: &[MembershipDelta]) -> Result<(), RemoteError> {
            Err(RemoteError::Unavailable("down".to_string()))
        }
        fn remove_from_zone(&self, _zone: ZoneId, _record: RecordId) -> Result<(), RemoteError> {
            Err(RemoteError::Unavailable("down".to_string()))
        }
        fn zone_contents(&self, _zone: ZoneId) -> Result<HashSet<RecordId>, RemoteError> {
            Err(RemoteError::Unavailable("down".to_string()))
        }
    }

    let conn = setup();
    let result = reconciler(&conn, DownMembership).zone_view(Uuid::new_v4());
    assert!(result.is_err());
}
