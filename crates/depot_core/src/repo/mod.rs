//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define chain-store data access contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository writes must be validated at the payload level before SQL
//!   mutations.
//! - Repository APIs return semantic errors (`NotFound`, `VersionConflict`)
//!   in addition to DB transport errors.

pub mod record_repo;
