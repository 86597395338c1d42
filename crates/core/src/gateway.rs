//! Record access gateway.
//!
//! The only path by which a doctor reaches record storage. Each call decides, audits the
//! decision, and only then touches storage. Deciding and auditing happen under the grant
//! store's read lock, so a `read-allowed` entry always precedes the revoke or expiry of the
//! grant it names.

use crate::audit::{AuditAction, AuditLog, NewAuditEntry};
use crate::clock::Clock;
use crate::decision::{AccessDecisionEngine, Decision};
use crate::identity::Actor;
use crate::records::{MedicalRecord, RecordStorage};
use crate::{ConsentError, ConsentResult};
use lifetag_ids::{DoctorId, PatientId};
use std::sync::Arc;

pub struct RecordAccessGateway {
    engine: Arc<AccessDecisionEngine>,
    audit: Arc<AuditLog>,
    storage: Arc<dyn RecordStorage>,
    clock: Arc<dyn Clock>,
}

impl RecordAccessGateway {
    pub fn new(
        engine: Arc<AccessDecisionEngine>,
        audit: Arc<AuditLog>,
        storage: Arc<dyn RecordStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            audit,
            storage,
            clock,
        }
    }

    /// Returns the patient's records if the doctor is currently allowed to see them.
    ///
    /// Exactly one `read-allowed` or `read-denied` entry is written before this returns,
    /// whatever the outcome of the storage call.
    pub fn read_records(
        &self,
        doctor: &DoctorId,
        patient: &PatientId,
    ) -> ConsentResult<Vec<MedicalRecord>> {
        let now = self.clock.now();
        let decision = self.engine.decide_then(doctor, patient, now, |decision| {
            let (action, grant_id, detail) = match decision {
                Decision::Allow { grant_id } => (AuditAction::ReadAllowed, Some(grant_id), None),
                Decision::Deny(reason) => {
                    (AuditAction::ReadDenied, None, Some(reason.as_str().to_owned()))
                }
            };
            self.audit
                .record(NewAuditEntry {
                    actor: Actor::Doctor(*doctor),
                    patient_id: *patient,
                    doctor_id: Some(*doctor),
                    action,
                    timestamp: now,
                    grant_id,
                    detail,
                })
                .map(|_| decision)
        })?;

        if let Decision::Deny(reason) = decision {
            tracing::warn!(
                doctor_id = %doctor,
                patient_id = %patient,
                reason = reason.as_str(),
                "record read denied"
            );
            return Err(ConsentError::Denied(reason));
        }

        // Outside the grant lock.
        self.storage.fetch_records(patient).map_err(|e| {
            tracing::warn!(
                patient_id = %patient,
                error = %e,
                "record storage failed after allowed read"
            );
            ConsentError::Storage(e)
        })
    }
}
