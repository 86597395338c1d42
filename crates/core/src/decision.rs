//! Access decisions.
//!
//! [`AccessDecisionEngine::decide`] answers one question: may this doctor read this patient's
//! records right now? It only reads shared state. A grant found `Active` in the store but past
//! its expiry is treated as expired and handed to the [`ExpiryQueue`]; the sweep performs the
//! actual transition later.

use crate::clock::Clock;
use crate::grants::{GrantState, GrantStore};
use crate::identity::IdentityRegistry;
use crate::sweep::ExpiryQueue;
use chrono::{DateTime, Utc};
use lifetag_ids::{DoctorId, GrantId, PatientId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Unknown, unverified, or blocked doctor.
    NotEligible,
    UnknownPatient,
    /// No `Active` grant for the pair.
    NotActive,
    /// The pair's grant is stored as `Active` but its expiry has passed.
    Expired,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::NotEligible => "not_eligible",
            DenyReason::UnknownPatient => "unknown_patient",
            DenyReason::NotActive => "not_active",
            DenyReason::Expired => "expired",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DenyReason::NotEligible => "doctor is not eligible",
            DenyReason::UnknownPatient => "patient is unknown",
            DenyReason::NotActive => "no active grant",
            DenyReason::Expired => "grant has expired",
        };
        f.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow { grant_id: GrantId },
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

pub struct AccessDecisionEngine {
    registry: Arc<dyn IdentityRegistry>,
    grants: Arc<GrantStore>,
    clock: Arc<dyn Clock>,
    expiry_queue: Arc<ExpiryQueue>,
}

impl AccessDecisionEngine {
    pub fn new(
        registry: Arc<dyn IdentityRegistry>,
        grants: Arc<GrantStore>,
        clock: Arc<dyn Clock>,
        expiry_queue: Arc<ExpiryQueue>,
    ) -> Self {
        Self {
            registry,
            grants,
            clock,
            expiry_queue,
        }
    }

    pub fn decide(&self, doctor: &DoctorId, patient: &PatientId) -> Decision {
        self.decide_at(doctor, patient, self.clock.now())
    }

    pub fn decide_at(
        &self,
        doctor: &DoctorId,
        patient: &PatientId,
        now: DateTime<Utc>,
    ) -> Decision {
        self.decide_then(doctor, patient, now, |decision| decision)
    }

    /// Decides and hands the decision to `then` before the grant can change.
    ///
    /// `then` runs under the grant store's read lock, so a revoke or expiry cannot commit
    /// between the decision and whatever `then` records. Keep it short and never call back
    /// into the grant store from it.
    pub fn decide_then<R>(
        &self,
        doctor: &DoctorId,
        patient: &PatientId,
        now: DateTime<Utc>,
        then: impl FnOnce(Decision) -> R,
    ) -> R {
        if !self.registry.is_doctor_eligible(doctor) {
            return then(Decision::Deny(DenyReason::NotEligible));
        }
        if self.registry.get_patient(patient).is_err() {
            return then(Decision::Deny(DenyReason::UnknownPatient));
        }

        self.grants.with_active_grant(doctor, patient, |grant| {
            let decision = match grant {
                None => Decision::Deny(DenyReason::NotActive),
                Some(grant) => match grant.effective_state(now) {
                    GrantState::Active => Decision::Allow { grant_id: grant.id },
                    _ => {
                        self.expiry_queue.enqueue(grant.id);
                        Decision::Deny(DenyReason::Expired)
                    }
                },
            };
            then(decision)
        })
    }
}
