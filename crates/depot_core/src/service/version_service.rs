//! Version chain use-case service.
//!
//! # Responsibility
//! - Provide the copy-on-write lifecycle for one record kind: create, read
//!   current/historical snapshots, update via draft mutation, tombstone whole
//!   chains.
//!
//! # Invariants
//! - An update never mutates a persisted snapshot; it writes version `v+1`
//!   and retires version `v` in one compare-and-swap transaction.
//! - `soft_delete_chain` is idempotent and leaves `current` flags untouched.
//! - Deleted chain heads are not updatable and read as absent.

use crate::model::record::{Draft, PayloadValidationError, RecordId, RecordPayload, Snapshot};
use crate::repo::record_repo::{RepoError, SnapshotRepository};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};

/// Result type used by chain service operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors from version chain operations.
#[derive(Debug)]
pub enum ChainError {
    /// Payload failed validation; nothing was written.
    Validation(PayloadValidationError),
    /// No current, non-deleted snapshot exists for the record.
    NotFound(RecordId),
    /// A concurrent update retired the snapshot this write was based on.
    /// Retryable: the losing write had no side effect.
    ConcurrentModification {
        record_uuid: RecordId,
        expected_version: i64,
    },
    /// Repository-level failure.
    Repo(RepoError),
}

impl Display for ChainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::ConcurrentModification {
                record_uuid,
                expected_version,
            } => write!(
                f,
                "concurrent modification of record {record_uuid}: version {expected_version} is no longer current"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ChainError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PayloadValidationError> for ChainError {
    fn from(value: PayloadValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for ChainError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::VersionConflict {
                record_uuid,
                expected_version,
            } => Self::ConcurrentModification {
                record_uuid,
                expected_version,
            },
            other => Self::Repo(other),
        }
    }
}

/// Copy-on-write version chain over a snapshot repository.
pub struct VersionChain<P, R> {
    repo: R,
    _payload: PhantomData<P>,
}

impl<P: RecordPayload, R: SnapshotRepository<P>> VersionChain<P, R> {
    /// Creates a chain service from a repository implementation.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            _payload: PhantomData,
        }
    }

    pub(crate) fn repo(&self) -> &R {
        &self.repo
    }

    /// Creates a new record chain and returns its version-1 head.
    pub fn create(&self, payload: P) -> ChainResult<Snapshot<P>> {
        payload.validate()?;
        let head = Snapshot::chain_head(payload, epoch_ms());
        self.repo.insert_chain_head(&head)?;
        Ok(head)
    }

    /// Returns the current, non-deleted snapshot for a record.
    pub fn current_of(&self, record_uuid: RecordId) -> ChainResult<Snapshot<P>> {
        self.repo
            .current_of(record_uuid)?
            .ok_or(ChainError::NotFound(record_uuid))
    }

    /// Returns the chain head even when it is tombstoned.
    pub fn latest_of(&self, record_uuid: RecordId) -> ChainResult<Option<Snapshot<P>>> {
        Ok(self.repo.latest_of(record_uuid)?)
    }

    /// Returns one explicit historical version, if it exists.
    pub fn version_of(
        &self,
        record_uuid: RecordId,
        version: i64,
    ) -> ChainResult<Option<Snapshot<P>>> {
        Ok(self.repo.version_of(record_uuid, version)?)
    }

    /// Returns every version of a chain, newest first.
    pub fn history(&self, record_uuid: RecordId) -> ChainResult<Vec<Snapshot<P>>> {
        Ok(self.repo.list_versions(record_uuid)?)
    }

    /// Returns all current, non-deleted records of this kind.
    pub fn list_current(&self) -> ChainResult<Vec<Snapshot<P>>> {
        Ok(self.repo.list_current()?)
    }

    /// Batched head lookup; missing ids are absent from the map.
    pub fn resolve(&self, ids: &[RecordId]) -> ChainResult<HashMap<RecordId, Snapshot<P>>> {
        Ok(self.repo.get_by_ids(ids)?)
    }

    /// Applies a mutator to a copy of the current snapshot and commits the
    /// copy as the new chain head.
    ///
    /// # Errors
    /// - `NotFound` when the record has no current, non-deleted snapshot.
    /// - `Validation` when the mutated payload is invalid; nothing written.
    /// - `ConcurrentModification` when another writer retired the snapshot
    ///   first; safe to retry.
    pub fn update(
        &self,
        record_uuid: RecordId,
        mutate: impl FnOnce(&mut Draft<P>),
    ) -> ChainResult<Snapshot<P>> {
        let current = self.current_of(record_uuid)?;

        let mut draft = Draft::from_snapshot(&current);
        mutate(&mut draft);
        draft.payload.validate()?;

        let next = current.succeed_with(draft, epoch_ms());
        self.repo.commit_new_version(current.version, &next)?;
        Ok(next)
    }

    /// Marks every snapshot of a chain deleted.
    ///
    /// Re-applying is a no-op; a record with no chain at all is `NotFound`.
    pub fn soft_delete_chain(&self, record_uuid: RecordId) -> ChainResult<()> {
        if self.repo.latest_of(record_uuid)?.is_none() {
            return Err(ChainError::NotFound(record_uuid));
        }
        self.repo.mark_chain_deleted(record_uuid)?;
        Ok(())
    }
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
