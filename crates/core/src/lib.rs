//! # LifeTag Core
//!
//! Access-control and consent engine for the LifeTag patient record system.
//!
//! This crate decides, for every record read, whether a doctor is currently authorised to
//! view a patient's records, manages the lifecycle of access grants, and keeps the audit
//! trail of who accessed what and when:
//! - Identity registry (patients, doctors, admins, permanent tags)
//! - Grant store and lifecycle state machine
//! - Access decisions and the record access gateway
//! - Append-only audit log backed by a JSON-lines journal
//! - Expiry sweep
//!
//! **No API concerns**: Authentication, HTTP servers, or request parsing belong in `api-rest`
//! or `api-shared`.

pub mod audit;
pub mod clock;
pub mod config;
pub mod constants;
pub mod decision;
pub mod error;
pub mod gateway;
pub mod grants;
pub mod identity;
pub mod journal;
pub mod records;
pub mod service;
pub mod sweep;
pub mod workflow;

pub use audit::{AccessAuditEntry, AuditAction, AuditLog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{resolve_policy, ConsentPolicy, CoreConfig};
pub use decision::{AccessDecisionEngine, Decision, DenyReason};
pub use error::{ConsentError, ConsentResult, ErrorKind, ErrorReport};
pub use grants::{AccessGrant, GrantAction, GrantState, GrantStore, TransitionDetails};
pub use identity::{Actor, Doctor, IdentityRegistry, InMemoryIdentityRegistry, Patient};
pub use records::{
    InMemoryRecordStorage, MedicalRecord, RecordStorage, ShardedRecordIndex, StorageError,
};
pub use service::ConsentService;
pub use sweep::SweepReport;

pub use lifetag_types::{NonEmptyText, TextError};
pub use lifetag_ids::{AdminId, DoctorId, GrantId, IdError, PatientId, RecordId, TagId};
