//! Append-only audit log.
//!
//! Every grant transition and every read decision produces exactly one
//! [`AccessAuditEntry`]. Entries are never mutated or removed.
//!
//! Transitions are committed through [`AuditLog::commit`]: the entry is persisted to the
//! journal sink first, then the caller's `apply` closure publishes the state change, then the
//! entry is appended to the in-memory log, all under the audit lock. If the sink fails nothing
//! is published, so neither an orphaned transition nor an orphaned entry can be observed.

use crate::grants::AccessGrant;
use crate::identity::Actor;
use crate::journal::{JournalRecord, JournalSink, NullJournal};
use crate::ConsentResult;
use chrono::{DateTime, Utc};
use lifetag_ids::{DoctorId, GrantId, PatientId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Request,
    Approve,
    Deny,
    Withdraw,
    Revoke,
    Expire,
    ReadAllowed,
    ReadDenied,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Request => "request",
            AuditAction::Approve => "approve",
            AuditAction::Deny => "deny",
            AuditAction::Withdraw => "withdraw",
            AuditAction::Revoke => "revoke",
            AuditAction::Expire => "expire",
            AuditAction::ReadAllowed => "read-allowed",
            AuditAction::ReadDenied => "read-denied",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one decision or transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessAuditEntry {
    /// Position in the log, starting at 1.
    pub sequence: u64,
    pub actor: Actor,
    pub patient_id: PatientId,
    #[serde(default)]
    pub doctor_id: Option<DoctorId>,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub grant_id: Option<GrantId>,
    /// Revocation reason, denial reason, or expiry time, depending on the action.
    #[serde(default)]
    pub detail: Option<String>,
}

/// An entry before the log assigns its sequence number.
#[derive(Clone, Debug)]
pub struct NewAuditEntry {
    pub actor: Actor,
    pub patient_id: PatientId,
    pub doctor_id: Option<DoctorId>,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub grant_id: Option<GrantId>,
    pub detail: Option<String>,
}

impl NewAuditEntry {
    /// Entry describing a transition of `grant` performed by `actor`.
    pub fn for_grant(
        grant: &AccessGrant,
        actor: Actor,
        action: AuditAction,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            actor,
            patient_id: grant.patient_id,
            doctor_id: Some(grant.doctor_id),
            action,
            timestamp,
            grant_id: Some(grant.id),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    fn sequenced(self, sequence: u64) -> AccessAuditEntry {
        AccessAuditEntry {
            sequence,
            actor: self.actor,
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            action: self.action,
            timestamp: self.timestamp,
            grant_id: self.grant_id,
            detail: self.detail,
        }
    }
}

#[derive(Default)]
struct AuditState {
    entries: Vec<AccessAuditEntry>,
    by_patient: HashMap<PatientId, Vec<usize>>,
    by_grant: HashMap<GrantId, Vec<usize>>,
}

impl AuditState {
    fn next_sequence(&self) -> u64 {
        self.entries.last().map_or(1, |e| e.sequence + 1)
    }

    fn push(&mut self, entry: AccessAuditEntry) {
        let index = self.entries.len();
        self.by_patient
            .entry(entry.patient_id)
            .or_default()
            .push(index);
        if let Some(grant_id) = entry.grant_id {
            self.by_grant.entry(grant_id).or_default().push(index);
        }
        self.entries.push(entry);
    }

    fn collect(&self, indexes: Option<&Vec<usize>>) -> Vec<AccessAuditEntry> {
        indexes
            .map(|ix| ix.iter().map(|&i| self.entries[i].clone()).collect())
            .unwrap_or_default()
    }
}

pub struct AuditLog {
    state: Mutex<AuditState>,
    sink: Arc<dyn JournalSink>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn JournalSink>) -> Self {
        Self {
            state: Mutex::new(AuditState::default()),
            sink,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(NullJournal))
    }

    fn lock(&self) -> MutexGuard<'_, AuditState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persists `entry`, runs `apply`, and appends the entry, as one unit.
    ///
    /// `grant` is the post-transition snapshot written to the journal alongside the entry.
    /// `apply` runs only if the sink accepted the record and must not fail.
    pub(crate) fn commit<F>(
        &self,
        entry: NewAuditEntry,
        grant: Option<&AccessGrant>,
        apply: F,
    ) -> ConsentResult<AccessAuditEntry>
    where
        F: FnOnce(),
    {
        let mut state = self.lock();
        let entry = entry.sequenced(state.next_sequence());

        let record = JournalRecord {
            entry,
            grant: grant.cloned(),
        };
        self.sink.append(&record)?;

        apply();
        state.push(record.entry.clone());
        Ok(record.entry)
    }

    /// Appends a decision entry that has no accompanying state change.
    pub fn record(&self, entry: NewAuditEntry) -> ConsentResult<AccessAuditEntry> {
        self.commit(entry, None, || {})
    }

    /// Re-inserts an entry read back from the journal without writing it again.
    pub(crate) fn restore(&self, entry: AccessAuditEntry) {
        self.lock().push(entry);
    }

    /// Entries about `patient`, in append order.
    pub fn trail_for_patient(&self, patient: &PatientId) -> Vec<AccessAuditEntry> {
        let state = self.lock();
        state.collect(state.by_patient.get(patient))
    }

    /// Entries referencing `grant`, in append order.
    pub fn trail_for_grant(&self, grant: &GrantId) -> Vec<AccessAuditEntry> {
        let state = self.lock();
        state.collect(state.by_grant.get(grant))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::journal::JournalError;
    use crate::ConsentError;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sink that rejects appends while `failing` is set.
    #[derive(Default)]
    pub(crate) struct FlakyJournal {
        pub(crate) failing: AtomicBool,
    }

    impl JournalSink for FlakyJournal {
        fn append(&self, _record: &JournalRecord) -> Result<(), JournalError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(JournalError::Write(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    fn read_entry(patient: PatientId, action: AuditAction) -> NewAuditEntry {
        let doctor = DoctorId::new();
        NewAuditEntry {
            actor: Actor::Doctor(doctor),
            patient_id: patient,
            doctor_id: Some(doctor),
            action,
            timestamp: Utc::now(),
            grant_id: None,
            detail: None,
        }
    }

    #[test]
    fn sequences_are_contiguous_and_trails_are_per_patient() {
        let log = AuditLog::in_memory();
        let p1 = PatientId::new();
        let p2 = PatientId::new();

        let a = log.record(read_entry(p1, AuditAction::ReadDenied)).unwrap();
        let b = log.record(read_entry(p2, AuditAction::ReadAllowed)).unwrap();
        let c = log.record(read_entry(p1, AuditAction::ReadAllowed)).unwrap();

        assert_eq!((a.sequence, b.sequence, c.sequence), (1, 2, 3));
        let trail = log.trail_for_patient(&p1);
        assert_eq!(
            trail.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert!(log.trail_for_patient(&PatientId::new()).is_empty());
    }

    #[test]
    fn failed_sink_skips_apply_and_entry() {
        let sink = Arc::new(FlakyJournal::default());
        sink.failing.store(true, Ordering::SeqCst);
        let log = AuditLog::new(sink.clone());

        let mut applied = false;
        let result = log.commit(
            read_entry(PatientId::new(), AuditAction::ReadAllowed),
            None,
            || applied = true,
        );

        assert!(matches!(result, Err(ConsentError::Journal(_))));
        assert!(!applied);
        assert!(log.is_empty());

        sink.failing.store(false, Ordering::SeqCst);
        let entry = log
            .record(read_entry(PatientId::new(), AuditAction::ReadAllowed))
            .unwrap();
        assert_eq!(entry.sequence, 1);
    }

    #[test]
    fn restored_entries_continue_the_sequence() {
        let log = AuditLog::in_memory();
        let patient = PatientId::new();
        let restored = read_entry(patient, AuditAction::ReadDenied).sequenced(41);
        log.restore(restored);

        let next = log.record(read_entry(patient, AuditAction::ReadAllowed)).unwrap();
        assert_eq!(next.sequence, 42);
        assert_eq!(log.trail_for_patient(&patient).len(), 2);
    }

    #[test]
    fn actions_serialise_in_kebab_case() {
        assert_eq!(
            serde_json::to_string(&AuditAction::ReadAllowed).unwrap(),
            "\"read-allowed\""
        );
        assert_eq!(AuditAction::ReadDenied.to_string(), "read-denied");
    }
}
