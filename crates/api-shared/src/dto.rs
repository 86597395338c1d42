//! Request and response bodies.
//!
//! Identifiers travel as canonical 32-hex strings and timestamps as RFC 3339 strings, so the
//! wire format does not depend on the core crate's serde representation.

use chrono::{DateTime, SecondsFormat, Utc};
use lifetag_core::{
    AccessAuditEntry, AccessGrant, Actor, Doctor, ErrorReport, MedicalRecord, Patient,
    SweepReport,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    /// Machine-readable error kind, e.g. `access_denied` or `invalid_transition`.
    pub kind: String,
    pub message: String,
}

impl From<ErrorReport> for ErrorRes {
    fn from(report: ErrorReport) -> Self {
        Self {
            kind: report.kind.as_str().to_owned(),
            message: report.message,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RequestAccessReq {
    pub patient_id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ApproveAccessReq {
    /// Overrides the configured default validity. Omit for the default.
    #[serde(default)]
    pub valid_for_hours: Option<i64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct RevokeAccessReq {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GrantRes {
    pub id: String,
    pub doctor_id: String,
    pub patient_id: String,
    /// One of `requested`, `active`, `denied`, `withdrawn`, `revoked`, `expired`.
    pub state: String,
    pub created_at: String,
    pub approved_at: Option<String>,
    pub expires_at: Option<String>,
    pub revoked_at: Option<String>,
    pub revocation_reason: Option<String>,
    pub closed_at: Option<String>,
}

impl From<AccessGrant> for GrantRes {
    fn from(grant: AccessGrant) -> Self {
        Self {
            id: grant.id.to_string(),
            doctor_id: grant.doctor_id.to_string(),
            patient_id: grant.patient_id.to_string(),
            state: grant.state.as_str().to_owned(),
            created_at: timestamp(grant.created_at),
            approved_at: grant.approved_at.map(timestamp),
            expires_at: grant.expires_at.map(timestamp),
            revoked_at: grant.revoked_at.map(timestamp),
            revocation_reason: grant.revocation_reason.map(|r| r.as_str().to_owned()),
            closed_at: grant.closed_at.map(timestamp),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListGrantsRes {
    pub grants: Vec<GrantRes>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuditEntryRes {
    pub sequence: u64,
    /// `patient`, `doctor`, `admin`, or `system`.
    pub actor_role: String,
    pub actor_id: Option<String>,
    pub patient_id: String,
    pub doctor_id: Option<String>,
    pub action: String,
    pub timestamp: String,
    pub grant_id: Option<String>,
    pub detail: Option<String>,
}

impl From<AccessAuditEntry> for AuditEntryRes {
    fn from(entry: AccessAuditEntry) -> Self {
        let (actor_role, actor_id) = match entry.actor {
            Actor::Patient(id) => ("patient", Some(id.to_string())),
            Actor::Doctor(id) => ("doctor", Some(id.to_string())),
            Actor::Admin(id) => ("admin", Some(id.to_string())),
            Actor::System => ("system", None),
        };
        Self {
            sequence: entry.sequence,
            actor_role: actor_role.to_owned(),
            actor_id,
            patient_id: entry.patient_id.to_string(),
            doctor_id: entry.doctor_id.map(|id| id.to_string()),
            action: entry.action.as_str().to_owned(),
            timestamp: timestamp(entry.timestamp),
            grant_id: entry.grant_id.map(|id| id.to_string()),
            detail: entry.detail,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuditTrailRes {
    pub entries: Vec<AuditEntryRes>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecordRes {
    pub id: String,
    pub title: String,
    pub kind: String,
    pub uploaded_at: String,
}

impl From<MedicalRecord> for RecordRes {
    fn from(record: MedicalRecord) -> Self {
        Self {
            id: record.id.to_string(),
            title: record.title,
            kind: record.kind,
            uploaded_at: timestamp(record.uploaded_at),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListRecordsRes {
    pub patient_id: String,
    pub records: Vec<RecordRes>,
}

/// Patient as seen through a tag lookup. The national id is only ever shown masked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PatientRes {
    pub id: String,
    pub tag_id: String,
    pub full_name: String,
    pub age: Option<u16>,
    pub gender: Option<String>,
    pub identity_verified: bool,
    pub masked_national_id: Option<String>,
}

impl From<Patient> for PatientRes {
    fn from(patient: Patient) -> Self {
        Self {
            masked_national_id: patient.masked_national_id(),
            id: patient.id.to_string(),
            tag_id: patient.tag_id.to_string(),
            full_name: patient.full_name.as_str().to_owned(),
            age: patient.age,
            gender: patient.gender,
            identity_verified: patient.identity_verified,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DoctorRes {
    pub id: String,
    pub full_name: String,
    pub specialization: Option<String>,
    pub hospital: Option<String>,
    pub department: Option<String>,
}

impl From<Doctor> for DoctorRes {
    fn from(doctor: Doctor) -> Self {
        Self {
            id: doctor.id.to_string(),
            full_name: doctor.full_name.as_str().to_owned(),
            specialization: doctor.specialization,
            hospital: doctor.hospital,
            department: doctor.department,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListDoctorsRes {
    pub doctors: Vec<DoctorRes>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SweepRes {
    pub expired: Vec<String>,
    pub skipped: usize,
    pub failed: usize,
}

impl From<SweepReport> for SweepRes {
    fn from(report: SweepReport) -> Self {
        Self {
            expired: report.expired.iter().map(ToString::to_string).collect(),
            skipped: report.skipped,
            failed: report.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lifetag_core::{AuditAction, PatientId};

    #[test]
    fn system_actor_has_no_id() {
        let entry = AccessAuditEntry {
            sequence: 7,
            actor: Actor::System,
            patient_id: PatientId::new(),
            doctor_id: None,
            action: AuditAction::Expire,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            grant_id: None,
            detail: None,
        };
        let res = AuditEntryRes::from(entry);
        assert_eq!(res.actor_role, "system");
        assert_eq!(res.actor_id, None);
        assert_eq!(res.action, "expire");
        assert_eq!(res.timestamp, "2026-01-02T03:04:05Z");
    }

    #[test]
    fn approve_body_fields_are_optional() {
        let req: ApproveAccessReq = serde_json::from_str("{}").unwrap();
        assert_eq!(req.valid_for_hours, None);
    }
}
