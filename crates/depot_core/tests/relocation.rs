use depot_core::db::open_db_in_memory;
use depot_core::{
    HierarchyError, HierarchyService, InMemoryZoneMembership, ItemDetails, MembershipDelta,
    MembershipSync, MoveRequest, MoveStatus, RecordId, RelocationService, RemoteError,
    SqliteSnapshotRepository, VersionChain, ZoneId, ZoneMembershipClient,
};
use rusqlite::Connection;
use std::collections::HashSet;
use uuid::Uuid;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn relocation<'conn, Z: ZoneMembershipClient>(
    conn: &'conn Connection,
    membership: Z,
) -> RelocationService<ItemDetails, SqliteSnapshotRepository<'conn, ItemDetails>, Z> {
    RelocationService::new(
        HierarchyService::new(VersionChain::new(
            SqliteSnapshotRepository::try_new(conn).unwrap(),
        )),
        membership,
    )
}

fn create_item(conn: &Connection, name: &str) -> RecordId {
    let chain: VersionChain<ItemDetails, _> =
        VersionChain::new(SqliteSnapshotRepository::try_new(conn).unwrap());
    chain.create(ItemDetails::named(name)).unwrap().record_uuid
}

fn move_to_zone(record_uuid: RecordId, floor: Uuid, zone: ZoneId) -> MoveRequest {
    MoveRequest {
        record_uuid,
        new_floor_uuid: Some(floor),
        new_zone_uuid: Some(zone),
        new_parent_uuid: None,
    }
}

/// Membership double that rejects every call, simulating an outage.
struct UnreachableMembership;

impl ZoneMembershipClient for UnreachableMembership {
    fn move_records(&self, _deltas: &[MembershipDelta]) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable("connection refused".to_string()))
    }

    fn remove_from_zone(&self, _zone: ZoneId, _record: RecordId) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable("connection refused".to_string()))
    }

    fn zone_contents(&self, _zone: ZoneId) -> Result<HashSet<RecordId>, RemoteError> {
        Err(RemoteError::Unavailable("connection refused".to_string()))
    }
}

#[test]
fn batch_move_updates_locations_and_membership() {
    let conn = setup();
    let membership = InMemoryZoneMembership::new();
    let service = relocation(&conn, &membership);

    let floor = Uuid::new_v4();
    let zone_a = Uuid::new_v4();
    let zone_b = Uuid::new_v4();
    let first = create_item(&conn, "first");
    let second = create_item(&conn, "second");

    let report = service.move_records(&[
        move_to_zone(first, floor, zone_a),
        move_to_zone(second, floor, zone_b),
    ]);

    assert!(matches!(report.membership, MembershipSync::Synced { deltas: 2 }));
    assert!(!report.partial_failure());
    for outcome in &report.outcomes {
        assert!(matches!(outcome.status, MoveStatus::Relocated { new_version: 2 }));
    }

    let chain = service.hierarchy().chain();
    let first_snapshot = chain.current_of(first).unwrap();
    assert_eq!(first_snapshot.location.floor_uuid, Some(floor));
    assert_eq!(first_snapshot.location.zone_uuid, Some(zone_a));

    assert_eq!(membership.members_of(zone_a), vec![first]);
    assert_eq!(membership.members_of(zone_b), vec![second]);
}

#[test]
fn moving_between_zones_emits_remove_and_add() {
    let conn = setup();
    let membership = InMemoryZoneMembership::new();
    let service = relocation(&conn, &membership);

    let floor = Uuid::new_v4();
    let zone_a = Uuid::new_v4();
    let zone_b = Uuid::new_v4();
    let item = create_item(&conn, "crate");

    service.move_records(&[move_to_zone(item, floor, zone_a)]);
    let report = service.move_records(&[move_to_zone(item, floor, zone_b)]);

    assert!(matches!(report.membership, MembershipSync::Synced { deltas: 1 }));
    assert!(membership.members_of(zone_a).is_empty());
    assert_eq!(membership.members_of(zone_b), vec![item]);
}

#[test]
fn batch_applies_partially_around_an_unknown_record() {
    let conn = setup();
    let membership = InMemoryZoneMembership::new();
    let service = relocation(&conn, &membership);

    let floor = Uuid::new_v4();
    let zone = Uuid::new_v4();
    let first = create_item(&conn, "first");
    let missing = Uuid::new_v4();
    let third = create_item(&conn, "third");

    let report = service.move_records(&[
        move_to_zone(first, floor, zone),
        move_to_zone(missing, floor, zone),
        move_to_zone(third, floor, zone),
    ]);

    assert_eq!(report.outcomes.len(), 3);
    assert!(matches!(report.outcomes[0].status, MoveStatus::Relocated { .. }));
    assert!(matches!(
        report.outcomes[1].status,
        MoveStatus::Rejected(HierarchyError::NotFound(id)) if id == missing
    ));
    assert!(matches!(report.outcomes[2].status, MoveStatus::Relocated { .. }));

    // Only the two applied moves reached the membership service.
    assert!(matches!(report.membership, MembershipSync::Synced { deltas: 2 }));
    assert_eq!(membership.members_of(zone), {
        let mut expected = vec![first, third];
        expected.sort();
        expected
    });

    let chain = service.hierarchy().chain();
    assert_eq!(chain.current_of(first).unwrap().location.zone_uuid, Some(zone));
    assert_eq!(chain.current_of(third).unwrap().location.zone_uuid, Some(zone));
}

#[test]
fn remote_outage_reports_partial_failure_without_rolling_back() {
    let conn = setup();
    let service = relocation(&conn, UnreachableMembership);

    let floor = Uuid::new_v4();
    let zone = Uuid::new_v4();
    let item = create_item(&conn, "crate");

    let report = service.move_records(&[move_to_zone(item, floor, zone)]);

    assert!(matches!(report.outcomes[0].status, MoveStatus::Relocated { .. }));
    assert!(matches!(
        report.membership,
        MembershipSync::Failed(RemoteError::Unavailable(_))
    ));
    assert!(report.partial_failure());

    // Local state is the source of truth and keeps the committed move.
    let snapshot = service.hierarchy().chain().current_of(item).unwrap();
    assert_eq!(snapshot.location.zone_uuid, Some(zone));
    assert_eq!(snapshot.version, 2);
}

#[test]
fn empty_and_fully_rejected_batches_skip_the_remote_call() {
    let conn = setup();
    let membership = InMemoryZoneMembership::new();
    let service = relocation(&conn, &membership);

    let report = service.move_records(&[]);
    assert!(matches!(report.membership, MembershipSync::Skipped));

    let report = service.move_records(&[move_to_zone(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
    )]);
    assert!(matches!(report.membership, MembershipSync::Skipped));
    assert!(!report.partial_failure());
}

#[test]
fn move_with_new_parent_reparents_in_the_same_version() {
    let conn = setup();
    let membership = InMemoryZoneMembership::new();
    let service = relocation(&conn, &membership);

    let floor = Uuid::new_v4();
    let zone = Uuid::new_v4();
    let parent = create_item(&conn, "rack");
    let child = create_item(&conn, "bin");

    let report = service.move_records(&[MoveRequest {
        record_uuid: child,
        new_floor_uuid: Some(floor),
        new_zone_uuid: Some(zone),
        new_parent_uuid: Some(parent),
    }]);
    assert!(matches!(
        report.outcomes[0].status,
        MoveStatus::Relocated { new_version: 2 }
    ));

    let snapshot = service.hierarchy().chain().current_of(child).unwrap();
    assert_eq!(snapshot.parent_uuid, Some(parent));
    assert_eq!(snapshot.location.zone_uuid, Some(zone));
    // Location and parent landed in one copy-on-write step.
    assert_eq!(snapshot.version, 2);
}

#[test]
fn move_creating_a_cycle_is_rejected_without_mutation() {
    let conn = setup();
    let membership = InMemoryZoneMembership::new();
    let service = relocation(&conn, &membership);

    let parent = create_item(&conn, "rack");
    let child = create_item(&conn, "bin");
    service.hierarchy().add_child(parent, child).unwrap();

    let parent_version_before = service.hierarchy().chain().current_of(parent).unwrap().version;

    let report = service.move_records(&[MoveRequest {
        record_uuid: parent,
        new_floor_uuid: None,
        new_zone_uuid: None,
        new_parent_uuid: Some(child),
    }]);

    assert!(matches!(
        report.outcomes[0].status,
        MoveStatus::Rejected(HierarchyError::CycleDetected { .. })
    ));
    assert!(matches!(report.membership, MembershipSync::Skipped));
    assert_eq!(
        service.hierarchy().chain().current_of(parent).unwrap().version,
        parent_version_before
    );
}
