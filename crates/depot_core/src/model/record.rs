//! Versioned record domain model.
//!
//! # Responsibility
//! - Define the snapshot shape shared by every record kind (items, fixtures).
//! - Provide the copy-on-write draft used by chain updates.
//!
//! # Invariants
//! - `record_uuid` is stable and never reused for another record.
//! - `version` is a per-record counter starting at 1; snapshots are immutable
//!   once persisted.
//! - At most one snapshot per `record_uuid` has `current = true`.
//! - `deleted` is independent of `current`: a chain head can be both current
//!   and tombstoned.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for every record chain.
pub type RecordId = Uuid;

/// Identifier of an external floor container.
pub type FloorId = Uuid;

/// Identifier of an external zone instance.
pub type ZoneId = Uuid;

/// First version written for a freshly created record.
pub const INITIAL_VERSION: i64 = 1;

const MAX_NAME_CHARS: usize = 255;

/// Validation errors raised before any payload is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadValidationError {
    /// Record name is blank after trim.
    BlankName,
    /// Record name exceeds the storage limit.
    NameTooLong { max_chars: usize, actual_chars: usize },
}

impl Display for PayloadValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "record name must not be blank"),
            Self::NameTooLong {
                max_chars,
                actual_chars,
            } => write!(
                f,
                "record name cannot exceed {max_chars} characters, got {actual_chars}"
            ),
        }
    }
}

impl Error for PayloadValidationError {}

/// Kind-specific attributes carried by a snapshot.
///
/// The `KIND` discriminant keys persisted rows so multiple record kinds can
/// share one chain store without re-implementing the version/tombstone
/// lifecycle per kind.
pub trait RecordPayload: Clone + Serialize + DeserializeOwned {
    /// Stable storage discriminant for this payload kind.
    const KIND: &'static str;

    /// Checks payload-level constraints before persistence.
    fn validate(&self) -> Result<(), PayloadValidationError>;
}

/// Floor/zone placement of a record.
///
/// Both sides are optional: a record can sit on a floor outside any zone, or
/// be entirely unplaced. Zone membership itself is owned by the external
/// membership service; this assignment is the local source of truth it is
/// reconciled against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationAssignment {
    /// Floor container holding the record, if placed.
    pub floor_uuid: Option<FloorId>,
    /// Zone instance within the floor, if assigned.
    pub zone_uuid: Option<ZoneId>,
}

impl LocationAssignment {
    /// Returns an unplaced assignment.
    pub fn unplaced() -> Self {
        Self::default()
    }
}

/// One immutable version of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<P> {
    /// Stable record identity shared by every version.
    pub record_uuid: RecordId,
    /// Per-record version counter, 1-based.
    pub version: i64,
    /// Whether this snapshot is the live value of the record.
    pub current: bool,
    /// Soft-delete tombstone.
    pub deleted: bool,
    /// Stable id of the parent record. `None` means root.
    pub parent_uuid: Option<RecordId>,
    /// Floor/zone placement.
    pub location: LocationAssignment,
    /// Kind-specific attributes.
    pub payload: P,
    /// Epoch ms at which this snapshot was written.
    pub created_at: i64,
}

impl<P: RecordPayload> Snapshot<P> {
    /// Builds the version-1 head for a new record chain.
    pub fn chain_head(payload: P, created_at: i64) -> Self {
        Self {
            record_uuid: Uuid::new_v4(),
            version: INITIAL_VERSION,
            current: true,
            deleted: false,
            parent_uuid: None,
            location: LocationAssignment::unplaced(),
            payload,
            created_at,
        }
    }

    /// Returns whether this snapshot should be considered visible/active.
    pub fn is_active(&self) -> bool {
        self.current && !self.deleted
    }

    /// Produces the successor snapshot carrying the draft's state.
    ///
    /// The successor inherits identity and tombstone state and bumps the
    /// version counter; persisting it and retiring `self` is the repository's
    /// job.
    pub fn succeed_with(&self, draft: Draft<P>, created_at: i64) -> Self {
        Self {
            record_uuid: self.record_uuid,
            version: self.version + 1,
            current: true,
            deleted: self.deleted,
            parent_uuid: draft.parent_uuid,
            location: draft.location,
            payload: draft.payload,
            created_at,
        }
    }
}

/// Mutable view handed to chain-update mutators.
///
/// Only the fields a new version may legitimately change are exposed;
/// identity, version and lifecycle flags stay under chain control.
#[derive(Debug, Clone)]
pub struct Draft<P> {
    /// Kind-specific attributes of the new version.
    pub payload: P,
    /// Parent link of the new version (stable id).
    pub parent_uuid: Option<RecordId>,
    /// Placement of the new version.
    pub location: LocationAssignment,
}

impl<P: Clone> Draft<P> {
    /// Seeds a draft from the snapshot being superseded.
    pub fn from_snapshot(snapshot: &Snapshot<P>) -> Self {
        Self {
            payload: snapshot.payload.clone(),
            parent_uuid: snapshot.parent_uuid,
            location: snapshot.location,
        }
    }
}

/// Stored item attributes: stock-keeping records placed on floors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDetails {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Classification label.
    pub category: Option<String>,
    /// Free-form stock quantity (for example "12" or "3 pallets").
    pub quantity: Option<String>,
}

impl ItemDetails {
    /// Creates item details with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            category: None,
            quantity: None,
        }
    }
}

impl RecordPayload for ItemDetails {
    const KIND: &'static str = "item";

    fn validate(&self) -> Result<(), PayloadValidationError> {
        validate_name(&self.name)
    }
}

/// Fixture attributes: furniture-like containers placed on floors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureDetails {
    /// Display name.
    pub name: String,
    /// Manufacturer or catalog code.
    pub model_code: Option<String>,
}

impl FixtureDetails {
    /// Creates fixture details with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_code: None,
        }
    }
}

impl RecordPayload for FixtureDetails {
    const KIND: &'static str = "fixture";

    fn validate(&self) -> Result<(), PayloadValidationError> {
        validate_name(&self.name)
    }
}

fn validate_name(name: &str) -> Result<(), PayloadValidationError> {
    if name.trim().is_empty() {
        return Err(PayloadValidationError::BlankName);
    }
    let chars = name.chars().count();
    if chars > MAX_NAME_CHARS {
        return Err(PayloadValidationError::NameTooLong {
            max_chars: MAX_NAME_CHARS,
            actual_chars: chars,
        });
    }
    Ok(())
}
