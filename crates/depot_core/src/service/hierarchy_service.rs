//! Hierarchy use-case service.
//!
//! # Responsibility
//! - Maintain parent/child trees over version chains: attach, detach,
//!   reparent, cascade soft-delete.
//! - Derive children from the stable-id parent pointer; never store both
//!   sides of the relation.
//!
//! # Invariants
//! - The relation over current, non-deleted snapshots stays a forest; moves
//!   that would create a cycle are rejected before any mutation.
//! - Cascade delete walks an explicit worklist with a visited set and
//!   tolerates stale parent links.

use crate::model::record::{RecordId, RecordPayload, Snapshot};
use crate::repo::record_repo::{RepoError, SnapshotRepository};
use crate::service::version_service::{ChainError, VersionChain};
use log::info;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by hierarchy operations.
pub type HierarchyResult<T> = Result<T, HierarchyError>;

/// Errors from hierarchy operations.
#[derive(Debug)]
pub enum HierarchyError {
    /// Target record has no current, non-deleted snapshot.
    NotFound(RecordId),
    /// Requested parent has no current, non-deleted snapshot.
    ParentNotFound(RecordId),
    /// Child already sits under a different parent; reparenting requires an
    /// explicit move.
    AlreadyAttached {
        child_uuid: RecordId,
        current_parent_uuid: RecordId,
    },
    /// Attaching would create a cycle.
    CycleDetected {
        child_uuid: RecordId,
        parent_uuid: RecordId,
    },
    /// Chain-level failure.
    Chain(ChainError),
}

impl Display for HierarchyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent record not found: {id}"),
            Self::AlreadyAttached {
                child_uuid,
                current_parent_uuid,
            } => write!(
                f,
                "record {child_uuid} is already attached to parent {current_parent_uuid}"
            ),
            Self::CycleDetected {
                child_uuid,
                parent_uuid,
            } => write!(
                f,
                "attach would create cycle: record {child_uuid} under parent {parent_uuid}"
            ),
            Self::Chain(err) => write!(f, "{err}"),
        }
    }
}

impl Error for HierarchyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Chain(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ChainError> for HierarchyError {
    fn from(value: ChainError) -> Self {
        match value {
            ChainError::NotFound(id) => Self::NotFound(id),
            other => Self::Chain(other),
        }
    }
}

impl From<RepoError> for HierarchyError {
    fn from(value: RepoError) -> Self {
        Self::from(ChainError::from(value))
    }
}

/// Tree maintenance over one record kind's version chains.
pub struct HierarchyService<P, R> {
    chain: VersionChain<P, R>,
}

impl<P: RecordPayload, R: SnapshotRepository<P>> HierarchyService<P, R> {
    /// Creates a hierarchy service over a version chain.
    pub fn new(chain: VersionChain<P, R>) -> Self {
        Self { chain }
    }

    /// Returns the underlying version chain.
    pub fn chain(&self) -> &VersionChain<P, R> {
        &self.chain
    }

    /// Lists the current, non-deleted children of a record.
    pub fn get_children(&self, parent_uuid: RecordId) -> HierarchyResult<Vec<Snapshot<P>>> {
        self.chain.current_of(parent_uuid)?;
        Ok(self.chain.repo().list_children(parent_uuid)?)
    }

    /// Resolves a record's parent snapshot.
    ///
    /// Returns `Ok(None)` for roots; a parent link pointing at a missing or
    /// tombstoned record is `ParentNotFound`.
    pub fn get_parent(&self, child_uuid: RecordId) -> HierarchyResult<Option<Snapshot<P>>> {
        let child = self.chain.current_of(child_uuid)?;
        let Some(parent_uuid) = child.parent_uuid else {
            return Ok(None);
        };
        match self.chain.repo().current_of(parent_uuid)? {
            Some(parent) => Ok(Some(parent)),
            None => Err(HierarchyError::ParentNotFound(parent_uuid)),
        }
    }

    /// Attaches a root child under a parent.
    ///
    /// Attaching to the same parent again is a no-op; a child under a
    /// different parent must be moved explicitly via `move_child`.
    pub fn add_child(&self, parent_uuid: RecordId, child_uuid: RecordId) -> HierarchyResult<()> {
        self.ensure_parent_exists(parent_uuid)?;
        let child = self.chain.current_of(child_uuid)?;

        match child.parent_uuid {
            Some(existing) if existing == parent_uuid => return Ok(()),
            Some(existing) => {
                return Err(HierarchyError::AlreadyAttached {
                    child_uuid,
                    current_parent_uuid: existing,
                });
            }
            None => {}
        }

        self.ensure_no_cycle(child_uuid, parent_uuid)?;
        self.chain.update(child_uuid, |draft| {
            draft.parent_uuid = Some(parent_uuid);
        })?;
        Ok(())
    }

    /// Clears the child's parent link if it currently equals `parent_uuid`;
    /// silent no-op otherwise.
    pub fn remove_child(&self, parent_uuid: RecordId, child_uuid: RecordId) -> HierarchyResult<()> {
        let child = self.chain.current_of(child_uuid)?;
        if child.parent_uuid != Some(parent_uuid) {
            return Ok(());
        }
        self.chain.update(child_uuid, |draft| {
            draft.parent_uuid = None;
        })?;
        Ok(())
    }

    /// Reparents a record under `new_parent_uuid`, or makes it a root when
    /// `None`. Detach and attach happen in one chain update.
    pub fn move_child(
        &self,
        child_uuid: RecordId,
        new_parent_uuid: Option<RecordId>,
    ) -> HierarchyResult<()> {
        self.chain.current_of(child_uuid)?;

        if let Some(parent_uuid) = new_parent_uuid {
            if parent_uuid == child_uuid {
                return Err(HierarchyError::CycleDetected {
                    child_uuid,
                    parent_uuid,
                });
            }
            self.ensure_parent_exists(parent_uuid)?;
            self.ensure_no_cycle(child_uuid, parent_uuid)?;
        }

        self.chain.update(child_uuid, |draft| {
            draft.parent_uuid = new_parent_uuid;
        })?;
        Ok(())
    }

    /// Soft-deletes a record and every descendant reachable through current
    /// parent links.
    ///
    /// Each id is visited at most once; stale parent links never raise.
    /// Returns the ids whose chains were tombstoned. Idempotent.
    pub fn cascade_delete(&self, root_uuid: RecordId) -> HierarchyResult<Vec<RecordId>> {
        if self.chain.latest_of(root_uuid)?.is_none() {
            return Err(HierarchyError::NotFound(root_uuid));
        }

        let mut visited: HashSet<RecordId> = HashSet::new();
        let mut worklist = vec![root_uuid];
        let mut deleted = Vec::new();

        while let Some(record_uuid) = worklist.pop() {
            if !visited.insert(record_uuid) {
                continue;
            }

            // Children are collected before the tombstone lands so the
            // derived-children query still sees them as attached.
            for child in self.chain.repo().list_children(record_uuid)? {
                worklist.push(child.record_uuid);
            }

            self.chain.repo().mark_chain_deleted(record_uuid)?;
            deleted.push(record_uuid);
        }

        info!(
            "event=cascade_delete module=hierarchy status=ok root={root_uuid} deleted={}",
            deleted.len()
        );
        Ok(deleted)
    }

    pub(crate) fn ensure_parent_exists(&self, parent_uuid: RecordId) -> HierarchyResult<()> {
        if self.chain.repo().current_of(parent_uuid)?.is_none() {
            return Err(HierarchyError::ParentNotFound(parent_uuid));
        }
        Ok(())
    }

    /// Walks ancestor links from the candidate parent; reaching the child
    /// means the attach would close a cycle. The walk stops quietly at stale
    /// or missing ancestors.
    pub(crate) fn ensure_no_cycle(
        &self,
        child_uuid: RecordId,
        candidate_parent_uuid: RecordId,
    ) -> HierarchyResult<()> {
        let mut seen = HashSet::new();
        let mut cursor = Some(candidate_parent_uuid);
        while let Some(ancestor_uuid) = cursor {
            if ancestor_uuid == child_uuid {
                return Err(HierarchyError::CycleDetected {
                    child_uuid,
                    parent_uuid: candidate_parent_uuid,
                });
            }
            if !seen.insert(ancestor_uuid) {
                // Pre-existing cycle among ancestors; attaching under it
                // would only make things worse.
                return Err(HierarchyError::CycleDetected {
                    child_uuid,
                    parent_uuid: candidate_parent_uuid,
                });
            }
            cursor = match self.chain.repo().current_of(ancestor_uuid)? {
                Some(ancestor) => ancestor.parent_uuid,
                None => None,
            };
        }
        Ok(())
    }
}
