//! Lazy zone-membership reconciliation.
//!
//! # Responsibility
//! - On zone reads, prune membership entries pointing at missing or
//!   tombstoned records and push the removals back to the membership
//!   service.
//!
//! # Invariants
//! - Reconciliation never mutates local chain state.
//! - A stale id is excluded from the returned view even when its removal
//!   push fails; the next read retries the push.
//! - This is the only path that cleans up staleness left behind by cascade
//!   deletes, which never touch the membership index.

use crate::model::record::{RecordId, RecordPayload, ZoneId};
use crate::remote::{RecordDirectory, RecordStatus, RemoteError, ZoneMembershipClient};
use crate::repo::record_repo::{RepoError, SnapshotRepository};
use log::{info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

/// Result type used by reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors from reconciliation reads.
#[derive(Debug)]
pub enum ReconcileError {
    /// Membership fetch or id resolution failed; no view can be produced.
    Remote(RemoteError),
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Remote(err) => Some(err),
        }
    }
}

impl From<RemoteError> for ReconcileError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}

/// Reconciled view of one zone's membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneView {
    /// Zone the view describes.
    pub zone_uuid: ZoneId,
    /// Members backed by a current, non-deleted record, sorted.
    pub present: Vec<RecordId>,
    /// Members found stale and pushed for removal, sorted.
    pub pruned: Vec<RecordId>,
}

/// Record-directory adapter over the local chain store.
///
/// Fills the lookup contract the reconciler needs without exposing payloads
/// or chain internals.
pub struct ChainDirectory<P, R> {
    repo: R,
    _payload: PhantomData<P>,
}

impl<P: RecordPayload, R: SnapshotRepository<P>> ChainDirectory<P, R> {
    /// Creates a directory over a snapshot repository.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            _payload: PhantomData,
        }
    }
}

impl<P: RecordPayload, R: SnapshotRepository<P>> RecordDirectory for ChainDirectory<P, R> {
    fn resolve(&self, ids: &[RecordId]) -> Result<HashMap<RecordId, RecordStatus>, RemoteError> {
        let heads = self
            .repo
            .get_by_ids(ids)
            .map_err(|err: RepoError| RemoteError::Unavailable(err.to_string()))?;
        Ok(heads
            .into_iter()
            .map(|(id, snapshot)| {
                let status = if snapshot.deleted {
                    RecordStatus::Deleted
                } else {
                    RecordStatus::Active
                };
                (id, status)
            })
            .collect())
    }
}

/// Read-triggered membership repair over a directory and membership client.
pub struct MembershipReconciler<D, Z> {
    directory: D,
    membership: Z,
}

impl<D: RecordDirectory, Z: ZoneMembershipClient> MembershipReconciler<D, Z> {
    /// Creates a reconciler from a directory and a membership client.
    pub fn new(directory: D, membership: Z) -> Self {
        Self {
            directory,
            membership,
        }
    }

    /// Returns the live membership of a zone, pruning stale entries as a
    /// side effect of the read.
    pub fn zone_view(&self, zone_uuid: ZoneId) -> ReconcileResult<ZoneView> {
        let raw = self.membership.zone_contents(zone_uuid)?;
        let mut ids: Vec<RecordId> = raw.into_iter().collect();
        ids.sort();

        let resolved = self.directory.resolve(&ids)?;

        let mut present = Vec::new();
        let mut pruned = Vec::new();
        for id in ids {
            match resolved.get(&id) {
                Some(RecordStatus::Active) => present.push(id),
                Some(RecordStatus::Deleted) | None => {
                    if let Err(err) = self.membership.remove_from_zone(zone_uuid, id) {
                        warn!(
                            "event=membership_prune module=reconcile status=error zone={zone_uuid} record={id} error={err}"
                        );
                    }
                    pruned.push(id);
                }
            }
        }

        if !pruned.is_empty() {
            info!(
                "event=membership_prune module=reconcile status=ok zone={zone_uuid} pruned={}",
                pruned.len()
            );
        }

        Ok(ZoneView {
            zone_uuid,
            present,
            pruned,
        })
    }
}
