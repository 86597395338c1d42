//! Request and approval workflow.
//!
//! Enforces who may perform each lifecycle action before handing the edge to the
//! [`GrantStore`]:
//!
//! | Action     | Allowed actor                         | From state  |
//! |------------|---------------------------------------|-------------|
//! | request    | eligible doctor                       | (new grant) |
//! | approve    | owning patient                        | `Requested` |
//! | deny       | owning patient                        | `Requested` |
//! | withdraw   | requesting doctor                     | `Requested` |
//! | revoke     | owning patient, or a registered admin | `Active`    |

use crate::clock::Clock;
use crate::constants::MAX_GRANT_VALIDITY_HOURS;
use crate::grants::{AccessGrant, GrantAction, GrantStore, TransitionDetails};
use crate::identity::{Actor, IdentityRegistry};
use crate::{ConsentError, ConsentResult};
use chrono::Duration;
use lifetag_ids::{DoctorId, GrantId, PatientId};
use lifetag_types::NonEmptyText;
use std::sync::Arc;

pub struct AccessWorkflow {
    registry: Arc<dyn IdentityRegistry>,
    grants: Arc<GrantStore>,
    clock: Arc<dyn Clock>,
    default_validity: Option<Duration>,
}

impl AccessWorkflow {
    pub fn new(
        registry: Arc<dyn IdentityRegistry>,
        grants: Arc<GrantStore>,
        clock: Arc<dyn Clock>,
        default_validity: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            grants,
            clock,
            default_validity,
        }
    }

    pub fn request(&self, doctor: &DoctorId, patient: &PatientId) -> ConsentResult<AccessGrant> {
        if !self.registry.is_doctor_eligible(doctor) {
            tracing::warn!(doctor_id = %doctor, "access request from ineligible doctor");
            return Err(ConsentError::NotEligible);
        }
        self.registry.get_patient(patient)?;
        self.grants
            .create_request_exclusive(*doctor, *patient, self.clock.now())
    }

    /// Approves with the configured default validity.
    pub fn approve(&self, grant_id: &GrantId, patient: &PatientId) -> ConsentResult<AccessGrant> {
        self.approve_for(grant_id, patient, None)
    }

    /// Approves with an explicit validity window, falling back to the default when `None`.
    pub fn approve_for(
        &self,
        grant_id: &GrantId,
        patient: &PatientId,
        valid_for: Option<Duration>,
    ) -> ConsentResult<AccessGrant> {
        if let Some(valid_for) = valid_for {
            let max = Duration::hours(MAX_GRANT_VALIDITY_HOURS);
            if valid_for <= Duration::zero() || valid_for > max {
                return Err(ConsentError::InvalidInput(format!(
                    "validity must be positive and at most {MAX_GRANT_VALIDITY_HOURS} hours"
                )));
            }
        }

        let grant = self.owned_by_patient(grant_id, patient)?;
        if !self.registry.is_doctor_eligible(&grant.doctor_id) {
            return Err(ConsentError::NotEligible);
        }

        let details = TransitionDetails {
            valid_for: valid_for.or(self.default_validity),
            ..Default::default()
        };
        self.grants.transition(
            grant_id,
            GrantAction::Approve,
            Actor::Patient(*patient),
            &details,
            self.clock.now(),
        )
    }

    pub fn deny(&self, grant_id: &GrantId, patient: &PatientId) -> ConsentResult<AccessGrant> {
        self.owned_by_patient(grant_id, patient)?;
        self.grants.transition(
            grant_id,
            GrantAction::Deny,
            Actor::Patient(*patient),
            &TransitionDetails::default(),
            self.clock.now(),
        )
    }

    pub fn revoke(
        &self,
        grant_id: &GrantId,
        actor: Actor,
        reason: Option<NonEmptyText>,
    ) -> ConsentResult<AccessGrant> {
        let grant = self.grants.get(grant_id)?;
        let permitted = match actor {
            Actor::Patient(patient) => patient == grant.patient_id,
            Actor::Admin(admin) => self.registry.is_admin(&admin),
            Actor::Doctor(_) | Actor::System => false,
        };
        if !permitted {
            return Err(ConsentError::Forbidden);
        }

        self.grants.transition(
            grant_id,
            GrantAction::Revoke,
            actor,
            &TransitionDetails {
                reason,
                ..Default::default()
            },
            self.clock.now(),
        )
    }

    pub fn withdraw(&self, grant_id: &GrantId, doctor: &DoctorId) -> ConsentResult<AccessGrant> {
        let grant = self.grants.get(grant_id)?;
        if grant.doctor_id != *doctor {
            return Err(ConsentError::Forbidden);
        }
        self.grants.transition(
            grant_id,
            GrantAction::Withdraw,
            Actor::Doctor(*doctor),
            &TransitionDetails::default(),
            self.clock.now(),
        )
    }

    fn owned_by_patient(
        &self,
        grant_id: &GrantId,
        patient: &PatientId,
    ) -> ConsentResult<AccessGrant> {
        let grant = self.grants.get(grant_id)?;
        if grant.patient_id != *patient {
            return Err(ConsentError::Forbidden);
        }
        Ok(grant)
    }
}
