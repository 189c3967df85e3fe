//! Domain model for versioned warehouse-layout records.
//!
//! # Responsibility
//! - Define the canonical snapshot shape shared by every record kind.
//! - Keep one generic version/tombstone lifecycle instead of per-kind copies.
//!
//! # Invariants
//! - Every record is identified by a stable `RecordId`.
//! - Deletion is represented by soft-delete tombstones, not hard delete.
//! - Updates never mutate a persisted snapshot in place.

pub mod record;
