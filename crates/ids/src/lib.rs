//! Identifier types for the LifeTag consent engine.
//!
//! Every entity the engine tracks is keyed by a *canonical* UUID: **32 lowercase hexadecimal
//! characters** (no hyphens). Wrapping each kind of identifier in its own newtype means a
//! `DoctorId` can never be passed where a `PatientId` is expected.
//!
//! This crate provides:
//! - [`CanonicalUuid`], which guarantees the canonical format once constructed, together with
//!   the sharded directory layout used for on-disk record indexes.
//! - Typed identifiers: [`PatientId`], [`DoctorId`], [`AdminId`], [`GrantId`], [`RecordId`].
//! - [`TagId`], the patient's permanent, scan-presentable handle.
//!
//! ## Canonical UUID form
//! - Length: 32
//! - Characters: `0-9` and `a-f` only
//! - Example: `550e8400e29b41d4a716446655440000`
//!
//! Non-canonical values (uppercase, hyphenated, wrong length, non-hex) are rejected.
//!
//! ## Sharded directory layout
//! For a canonical UUID `u`, data is stored under:
//! `parent_dir/<u[0..2]>/<u[2..4]>/<u>/`

mod canonical;
mod tag;

pub use canonical::{AdminId, CanonicalUuid, DoctorId, GrantId, PatientId, RecordId, Uuid};
pub use tag::TagId;

/// Error type for identifier parsing.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type IdResult<T> = Result<T, IdError>;
