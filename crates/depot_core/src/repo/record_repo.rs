//! Snapshot chain repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist immutable snapshot rows and serve chain-oriented reads.
//! - Keep SQL details and the current-flip compare-and-swap inside the
//!   repository boundary.
//!
//! # Invariants
//! - `(record_uuid, version)` rows are never updated except for the `current`
//!   and `deleted` flags.
//! - `commit_new_version` retires the previous head and writes the new one in
//!   a single transaction; losing the flip race surfaces `VersionConflict`
//!   and writes nothing.
//! - Reads are scoped to one payload kind per repository instance.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::record::{LocationAssignment, RecordId, RecordPayload, Snapshot};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use uuid::Uuid;

const SNAPSHOT_SELECT_SQL: &str = "SELECT
    record_uuid,
    version,
    current,
    deleted,
    parent_uuid,
    floor_uuid,
    zone_uuid,
    payload,
    created_at
FROM snapshots";

/// Result type used by snapshot repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from snapshot repository operations.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// The current-flip compare-and-swap lost against a concurrent writer.
    VersionConflict {
        record_uuid: RecordId,
        expected_version: i64,
    },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::VersionConflict {
                record_uuid,
                expected_version,
            } => write!(
                f,
                "snapshot {record_uuid} v{expected_version} is no longer current"
            ),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "snapshot repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid snapshot data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Chain-store interface for one payload kind.
pub trait SnapshotRepository<P: RecordPayload> {
    /// Persists the version-1 head of a new chain.
    fn insert_chain_head(&self, snapshot: &Snapshot<P>) -> RepoResult<()>;
    /// Loads the current, non-deleted snapshot.
    fn current_of(&self, record_uuid: RecordId) -> RepoResult<Option<Snapshot<P>>>;
    /// Loads the current snapshot even when tombstoned.
    fn latest_of(&self, record_uuid: RecordId) -> RepoResult<Option<Snapshot<P>>>;
    /// Loads one explicit historical version.
    fn version_of(&self, record_uuid: RecordId, version: i64) -> RepoResult<Option<Snapshot<P>>>;
    /// Loads every version of a chain, newest first.
    fn list_versions(&self, record_uuid: RecordId) -> RepoResult<Vec<Snapshot<P>>>;
    /// Loads all current, non-deleted records of this kind.
    fn list_current(&self) -> RepoResult<Vec<Snapshot<P>>>;
    /// Loads current, non-deleted records whose parent link equals
    /// `parent_uuid`.
    fn list_children(&self, parent_uuid: RecordId) -> RepoResult<Vec<Snapshot<P>>>;
    /// Batched head lookup (tombstoned heads included); missing ids are
    /// simply absent from the result map.
    fn get_by_ids(&self, ids: &[RecordId]) -> RepoResult<HashMap<RecordId, Snapshot<P>>>;
    /// Retires the head at `previous_version` and persists `next` as the new
    /// head atomically.
    fn commit_new_version(&self, previous_version: i64, next: &Snapshot<P>) -> RepoResult<()>;
    /// Marks every snapshot of the chain deleted; returns the number of rows
    /// that were not yet tombstoned.
    fn mark_chain_deleted(&self, record_uuid: RecordId) -> RepoResult<usize>;
}

/// SQLite-backed snapshot repository for payload kind `P`.
pub struct SqliteSnapshotRepository<'conn, P> {
    conn: &'conn Connection,
    _payload: PhantomData<P>,
}

impl<'conn, P: RecordPayload> SqliteSnapshotRepository<'conn, P> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self {
            conn,
            _payload: PhantomData,
        })
    }
}

impl<P: RecordPayload> SnapshotRepository<P> for SqliteSnapshotRepository<'_, P> {
    fn insert_chain_head(&self, snapshot: &Snapshot<P>) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO snapshots (
                record_uuid,
                version,
                kind,
                current,
                deleted,
                parent_uuid,
                floor_uuid,
                zone_uuid,
                payload,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                snapshot.record_uuid.to_string(),
                snapshot.version,
                P::KIND,
                bool_to_int(snapshot.current),
                bool_to_int(snapshot.deleted),
                snapshot.parent_uuid.map(|value| value.to_string()),
                snapshot.location.floor_uuid.map(|value| value.to_string()),
                snapshot.location.zone_uuid.map(|value| value.to_string()),
                encode_payload(&snapshot.payload)?,
                snapshot.created_at,
            ],
        )?;
        Ok(())
    }

    fn current_of(&self, record_uuid: RecordId) -> RepoResult<Option<Snapshot<P>>> {
        self.query_one(
            &format!(
                "{SNAPSHOT_SELECT_SQL}
                 WHERE record_uuid = ?1
                   AND kind = ?2
                   AND current = 1
                   AND deleted = 0;"
            ),
            params![record_uuid.to_string(), P::KIND],
        )
    }

    fn latest_of(&self, record_uuid: RecordId) -> RepoResult<Option<Snapshot<P>>> {
        self.query_one(
            &format!(
                "{SNAPSHOT_SELECT_SQL}
                 WHERE record_uuid = ?1
                   AND kind = ?2
                   AND current = 1;"
            ),
            params![record_uuid.to_string(), P::KIND],
        )
    }

    fn version_of(&self, record_uuid: RecordId, version: i64) -> RepoResult<Option<Snapshot<P>>> {
        self.query_one(
            &format!(
                "{SNAPSHOT_SELECT_SQL}
                 WHERE record_uuid = ?1
                   AND kind = ?2
                   AND version = ?3;"
            ),
            params![record_uuid.to_string(), P::KIND, version],
        )
    }

    fn list_versions(&self, record_uuid: RecordId) -> RepoResult<Vec<Snapshot<P>>> {
        self.query_many(
            &format!(
                "{SNAPSHOT_SELECT_SQL}
                 WHERE record_uuid = ?1
                   AND kind = ?2
                 ORDER BY version DESC;"
            ),
            params![record_uuid.to_string(), P::KIND],
        )
    }

    fn list_current(&self) -> RepoResult<Vec<Snapshot<P>>> {
        self.query_many(
            &format!(
                "{SNAPSHOT_SELECT_SQL}
                 WHERE kind = ?1
                   AND current = 1
                   AND deleted = 0
                 ORDER BY created_at DESC, record_uuid ASC;"
            ),
            params![P::KIND],
        )
    }

    fn list_children(&self, parent_uuid: RecordId) -> RepoResult<Vec<Snapshot<P>>> {
        self.query_many(
            &format!(
                "{SNAPSHOT_SELECT_SQL}
                 WHERE parent_uuid = ?1
                   AND kind = ?2
                   AND current = 1
                   AND deleted = 0
                 ORDER BY record_uuid ASC;"
            ),
            params![parent_uuid.to_string(), P::KIND],
        )
    }

    fn get_by_ids(&self, ids: &[RecordId]) -> RepoResult<HashMap<RecordId, Snapshot<P>>> {
        let mut found = HashMap::with_capacity(ids.len());
        // Point lookups per id stay under SQLite's bind-parameter limit for
        // arbitrarily large batches.
        for id in ids {
            if found.contains_key(id) {
                continue;
            }
            if let Some(snapshot) = self.latest_of(*id)? {
                found.insert(*id, snapshot);
            }
        }
        Ok(found)
    }

    fn commit_new_version(&self, previous_version: i64, next: &Snapshot<P>) -> RepoResult<()> {
        let payload_json = encode_payload(&next.payload)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let flipped = tx.execute(
            "UPDATE snapshots
             SET current = 0
             WHERE record_uuid = ?1
               AND kind = ?2
               AND version = ?3
               AND current = 1;",
            params![next.record_uuid.to_string(), P::KIND, previous_version],
        )?;
        if flipped == 0 {
            // Another writer already retired this head; no partial state to
            // clean up because nothing was written yet.
            return Err(RepoError::VersionConflict {
                record_uuid: next.record_uuid,
                expected_version: previous_version,
            });
        }

        tx.execute(
            "INSERT INTO snapshots (
                record_uuid,
                version,
                kind,
                current,
                deleted,
                parent_uuid,
                floor_uuid,
                zone_uuid,
                payload,
                created_at
            ) VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                next.record_uuid.to_string(),
                next.version,
                P::KIND,
                bool_to_int(next.deleted),
                next.parent_uuid.map(|value| value.to_string()),
                next.location.floor_uuid.map(|value| value.to_string()),
                next.location.zone_uuid.map(|value| value.to_string()),
                payload_json,
                next.created_at,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn mark_chain_deleted(&self, record_uuid: RecordId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE snapshots
             SET deleted = 1
             WHERE record_uuid = ?1
               AND kind = ?2
               AND deleted = 0;",
            params![record_uuid.to_string(), P::KIND],
        )?;
        Ok(changed)
    }
}

impl<P: RecordPayload> SqliteSnapshotRepository<'_, P> {
    fn query_one(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> RepoResult<Option<Snapshot<P>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_snapshot_row(row)?));
        }
        Ok(None)
    }

    fn query_many(&self, sql: &str, params: impl rusqlite::Params) -> RepoResult<Vec<Snapshot<P>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut snapshots = Vec::new();
        while let Some(row) = rows.next()? {
            snapshots.push(parse_snapshot_row(row)?);
        }
        Ok(snapshots)
    }
}

fn encode_payload<P: RecordPayload>(payload: &P) -> RepoResult<String> {
    serde_json::to_string(payload).map_err(|err| {
        RepoError::InvalidData(format!("payload for kind `{}` failed to encode: {err}", P::KIND))
    })
}

fn parse_snapshot_row<P: RecordPayload>(row: &Row<'_>) -> RepoResult<Snapshot<P>> {
    let record_uuid_text: String = row.get("record_uuid")?;
    let record_uuid = parse_uuid(&record_uuid_text, "snapshots.record_uuid")?;

    let parent_uuid = row
        .get::<_, Option<String>>("parent_uuid")?
        .map(|value| parse_uuid(&value, "snapshots.parent_uuid"))
        .transpose()?;
    let floor_uuid = row
        .get::<_, Option<String>>("floor_uuid")?
        .map(|value| parse_uuid(&value, "snapshots.floor_uuid"))
        .transpose()?;
    let zone_uuid = row
        .get::<_, Option<String>>("zone_uuid")?
        .map(|value| parse_uuid(&value, "snapshots.zone_uuid"))
        .transpose()?;

    let payload_json: String = row.get("payload")?;
    let payload = serde_json::from_str(&payload_json).map_err(|err| {
        RepoError::InvalidData(format!(
            "payload for record `{record_uuid}` failed to decode as kind `{}`: {err}",
            P::KIND
        ))
    })?;

    Ok(Snapshot {
        record_uuid,
        version: row.get("version")?,
        current: parse_flag(row, "current")?,
        deleted: parse_flag(row, "deleted")?,
        parent_uuid,
        location: LocationAssignment {
            floor_uuid,
            zone_uuid,
        },
        payload,
        created_at: row.get("created_at")?,
    })
}

fn parse_flag(row: &Row<'_>, column: &'static str) -> RepoResult<bool> {
    match row.get::<_, i64>(column)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid {column} value `{other}` in snapshots.{column}"
        ))),
    }
}

fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}
