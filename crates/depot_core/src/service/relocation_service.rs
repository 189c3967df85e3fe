//! Relocation coordination across local chains and remote zone membership.
//!
//! # Responsibility
//! - Apply batches of move requests: one copy-on-write version per record
//!   carrying the new floor/zone/parent, then one batched membership call to
//!   the external zone service.
//!
//! # Invariants
//! - Local mutations commit before any remote call; a remote failure never
//!   rolls local state back.
//! - A request that fails validation mutates nothing and fails only itself;
//!   the rest of the batch proceeds.
//! - The remote batch carries deltas for successfully moved records only.

use crate::model::record::{FloorId, LocationAssignment, RecordId, RecordPayload, ZoneId};
use crate::remote::{MembershipDelta, RemoteError, ZoneMembershipClient};
use crate::repo::record_repo::SnapshotRepository;
use crate::service::hierarchy_service::{HierarchyError, HierarchyService};
use log::{error, info};

/// One requested move.
#[derive(Debug, Clone, Copy)]
pub struct MoveRequest {
    /// Record to relocate.
    pub record_uuid: RecordId,
    /// Destination floor, if any.
    pub new_floor_uuid: Option<FloorId>,
    /// Destination zone, if any.
    pub new_zone_uuid: Option<ZoneId>,
    /// Destination parent; `None` makes the record a root.
    pub new_parent_uuid: Option<RecordId>,
}

/// Per-request outcome of a relocation batch.
#[derive(Debug)]
pub struct MoveOutcome {
    /// Record the request addressed.
    pub record_uuid: RecordId,
    /// What happened to it.
    pub status: MoveStatus,
}

/// Result of one move request.
#[derive(Debug)]
pub enum MoveStatus {
    /// A new version with the requested placement was committed.
    Relocated { new_version: i64 },
    /// The request was rejected before mutating anything.
    Rejected(HierarchyError),
}

/// Outcome of the post-batch membership synchronization.
#[derive(Debug)]
pub enum MembershipSync {
    /// The remote service acknowledged the delta batch.
    Synced { deltas: usize },
    /// No record moved, so no remote call was made.
    Skipped,
    /// Local moves committed but the remote call failed; membership is stale
    /// until reconciliation catches up.
    Failed(RemoteError),
}

/// Per-item outcomes plus membership sync status for one batch.
#[derive(Debug)]
pub struct RelocationReport {
    pub outcomes: Vec<MoveOutcome>,
    pub membership: MembershipSync,
}

impl RelocationReport {
    /// True when local moves committed but the membership index was left
    /// stale — the mixed-success state callers must be able to see.
    pub fn partial_failure(&self) -> bool {
        matches!(self.membership, MembershipSync::Failed(_))
            && self
                .outcomes
                .iter()
                .any(|outcome| matches!(outcome.status, MoveStatus::Relocated { .. }))
    }
}

/// Batch move orchestration over a hierarchy and a membership client.
pub struct RelocationService<P, R, Z> {
    hierarchy: HierarchyService<P, R>,
    membership: Z,
}

impl<P, R, Z> RelocationService<P, R, Z>
where
    P: RecordPayload,
    R: SnapshotRepository<P>,
    Z: ZoneMembershipClient,
{
    /// Creates a relocation service from a hierarchy and a membership client.
    pub fn new(hierarchy: HierarchyService<P, R>, membership: Z) -> Self {
        Self {
            hierarchy,
            membership,
        }
    }

    /// Returns the underlying hierarchy service.
    pub fn hierarchy(&self) -> &HierarchyService<P, R> {
        &self.hierarchy
    }

    /// Applies a batch of move requests and synchronizes zone membership.
    pub fn move_records(&self, requests: &[MoveRequest]) -> RelocationReport {
        let mut outcomes = Vec::with_capacity(requests.len());
        let mut deltas = Vec::new();

        for request in requests {
            let status = match self.apply_move(request) {
                Ok((new_version, delta)) => {
                    deltas.push(delta);
                    MoveStatus::Relocated { new_version }
                }
                Err(err) => MoveStatus::Rejected(err),
            };
            outcomes.push(MoveOutcome {
                record_uuid: request.record_uuid,
                status,
            });
        }

        let membership = self.sync_membership(&deltas);
        RelocationReport {
            outcomes,
            membership,
        }
    }

    /// Validates and applies one request; nothing is written on error.
    fn apply_move(&self, request: &MoveRequest) -> Result<(i64, MembershipDelta), HierarchyError> {
        let current = self.hierarchy.chain().current_of(request.record_uuid)?;

        if let Some(parent_uuid) = request.new_parent_uuid {
            if parent_uuid == request.record_uuid {
                return Err(HierarchyError::CycleDetected {
                    child_uuid: request.record_uuid,
                    parent_uuid,
                });
            }
            if current.parent_uuid != Some(parent_uuid) {
                self.hierarchy.ensure_parent_exists(parent_uuid)?;
                self.hierarchy
                    .ensure_no_cycle(request.record_uuid, parent_uuid)?;
            }
        }

        let old_zone_uuid = current.location.zone_uuid;
        let next = self.hierarchy.chain().update(request.record_uuid, |draft| {
            draft.location = LocationAssignment {
                floor_uuid: request.new_floor_uuid,
                zone_uuid: request.new_zone_uuid,
            };
            draft.parent_uuid = request.new_parent_uuid;
        })?;

        Ok((
            next.version,
            MembershipDelta {
                record_uuid: request.record_uuid,
                old_zone_uuid,
                new_zone_uuid: request.new_zone_uuid,
            },
        ))
    }

    fn sync_membership(&self, deltas: &[MembershipDelta]) -> MembershipSync {
        if deltas.is_empty() {
            return MembershipSync::Skipped;
        }

        info!(
            "event=membership_sync module=relocation status=start deltas={}",
            deltas.len()
        );
        match self.membership.move_records(deltas) {
            Ok(()) => {
                info!(
                    "event=membership_sync module=relocation status=ok deltas={}",
                    deltas.len()
                );
                MembershipSync::Synced {
                    deltas: deltas.len(),
                }
            }
            Err(err) => {
                // Local chains are already committed at this point.
                error!(
                    "event=membership_sync module=relocation status=error deltas={} error={err}",
                    deltas.len()
                );
                MembershipSync::Failed(err)
            }
        }
    }
}
