//! Access grant lifecycle.
//!
//! ```text
//!              approve            revoke
//! Requested ───────────► Active ─────────► Revoked
//!   │   │                  │
//!   │   │ deny             │ expire (once expires_at has passed)
//!   │   ▼                  ▼
//!   │  Denied            Expired
//!   │ withdraw
//!   ▼
//! Withdrawn
//! ```
//!
//! `Denied`, `Withdrawn`, `Revoked`, and `Expired` are terminal. A new access relationship
//! always starts from a brand-new grant.

use crate::audit::AuditAction;
use crate::{ConsentError, ConsentResult};
use chrono::{DateTime, Duration, Utc};
use lifetag_ids::{DoctorId, GrantId, PatientId};
use lifetag_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantState {
    Requested,
    Active,
    Denied,
    Withdrawn,
    Revoked,
    Expired,
}

impl GrantState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, GrantState::Requested | GrantState::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GrantState::Requested => "requested",
            GrantState::Active => "active",
            GrantState::Denied => "denied",
            GrantState::Withdrawn => "withdrawn",
            GrantState::Revoked => "revoked",
            GrantState::Expired => "expired",
        }
    }
}

impl fmt::Display for GrantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantAction {
    Approve,
    Deny,
    Withdraw,
    Revoke,
    Expire,
}

impl GrantAction {
    pub const ALL: [GrantAction; 5] = [
        GrantAction::Approve,
        GrantAction::Deny,
        GrantAction::Withdraw,
        GrantAction::Revoke,
        GrantAction::Expire,
    ];

    /// The state this action leads to from `from`, if the edge exists.
    pub fn target(self, from: GrantState) -> Option<GrantState> {
        match (from, self) {
            (GrantState::Requested, GrantAction::Approve) => Some(GrantState::Active),
            (GrantState::Requested, GrantAction::Deny) => Some(GrantState::Denied),
            (GrantState::Requested, GrantAction::Withdraw) => Some(GrantState::Withdrawn),
            (GrantState::Active, GrantAction::Revoke) => Some(GrantState::Revoked),
            (GrantState::Active, GrantAction::Expire) => Some(GrantState::Expired),
            _ => None,
        }
    }

    pub fn audit_action(self) -> AuditAction {
        match self {
            GrantAction::Approve => AuditAction::Approve,
            GrantAction::Deny => AuditAction::Deny,
            GrantAction::Withdraw => AuditAction::Withdraw,
            GrantAction::Revoke => AuditAction::Revoke,
            GrantAction::Expire => AuditAction::Expire,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GrantAction::Approve => "approve",
            GrantAction::Deny => "deny",
            GrantAction::Withdraw => "withdraw",
            GrantAction::Revoke => "revoke",
            GrantAction::Expire => "expire",
        }
    }
}

impl fmt::Display for GrantAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional inputs carried by some transitions.
#[derive(Clone, Debug, Default)]
pub struct TransitionDetails {
    /// Revocation reason. Ignored by other actions.
    pub reason: Option<NonEmptyText>,
    /// Validity window starting at approval. Ignored by other actions.
    pub valid_for: Option<Duration>,
}

/// The authorisation relationship permitting one doctor to read one patient's records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: GrantId,
    pub doctor_id: DoctorId,
    pub patient_id: PatientId,
    pub state: GrantState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    /// Absent means the grant never expires on its own.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revocation_reason: Option<NonEmptyText>,
    /// When the grant reached `Denied`, `Withdrawn`, or `Expired`.
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl AccessGrant {
    pub(crate) fn requested(
        doctor_id: DoctorId,
        patient_id: PatientId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: GrantId::new(),
            doctor_id,
            patient_id,
            state: GrantState::Requested,
            created_at: now,
            approved_at: None,
            expires_at: None,
            revoked_at: None,
            revocation_reason: None,
            closed_at: None,
        }
    }

    /// True once `expires_at` is at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// The state that governs decisions: an `Active` grant past its expiry counts as
    /// `Expired` even before the sweep records the transition.
    pub fn effective_state(&self, now: DateTime<Utc>) -> GrantState {
        match self.state {
            GrantState::Active if self.is_expired_at(now) => GrantState::Expired,
            state => state,
        }
    }

    /// Computes the grant as it would be after `action`, leaving `self` untouched.
    pub(crate) fn apply(
        &self,
        action: GrantAction,
        details: &TransitionDetails,
        now: DateTime<Utc>,
    ) -> ConsentResult<AccessGrant> {
        let invalid = || ConsentError::InvalidTransition {
            from: self.state,
            action,
        };
        let target = action.target(self.state).ok_or_else(invalid)?;

        let mut next = self.clone();
        next.state = target;
        match action {
            GrantAction::Approve => {
                next.approved_at = Some(now);
                next.expires_at = details.valid_for.map(|valid_for| now + valid_for);
            }
            GrantAction::Revoke => {
                next.revoked_at = Some(now);
                next.revocation_reason = details.reason.clone();
            }
            GrantAction::Expire => {
                if !self.is_expired_at(now) {
                    return Err(invalid());
                }
                next.closed_at = Some(now);
            }
            GrantAction::Deny | GrantAction::Withdraw => {
                next.closed_at = Some(now);
            }
        }
        Ok(next)
    }
}
