//! Core domain logic for Depot warehouse-layout management.
//! This crate is the single source of truth for record versioning, hierarchy
//! and zone-membership consistency invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod remote;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::record::{
    Draft, FixtureDetails, FloorId, ItemDetails, LocationAssignment, PayloadValidationError,
    RecordId, RecordPayload, Snapshot, ZoneId,
};
pub use remote::memory::InMemoryZoneMembership;
pub use remote::{
    MembershipDelta, RecordDirectory, RecordStatus, RemoteError, ZoneMembershipClient,
};
pub use repo::record_repo::{RepoError, RepoResult, SnapshotRepository, SqliteSnapshotRepository};
pub use service::hierarchy_service::{HierarchyError, HierarchyResult, HierarchyService};
pub use service::reconcile_service::{
    ChainDirectory, MembershipReconciler, ReconcileError, ReconcileResult, ZoneView,
};
pub use service::relocation_service::{
    MembershipSync, MoveOutcome, MoveRequest, MoveStatus, RelocationReport, RelocationService,
};
pub use service::version_service::{ChainError, ChainResult, VersionChain};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
