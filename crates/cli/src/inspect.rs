//! Read-only views over the consent journal.
//!
//! Everything here works from the records returned by [`lifetag_core::journal::replay`] and
//! never opens the journal for writing, so it is safe to run next to a live server.

use chrono::{DateTime, Utc};
use lifetag_core::journal::JournalRecord;
use lifetag_core::{AccessAuditEntry, AccessGrant, DoctorId, GrantId, GrantState, PatientId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Latest snapshot of every grant mentioned in the journal.
pub fn latest_grants(records: &[JournalRecord]) -> BTreeMap<GrantId, AccessGrant> {
    let mut grants = BTreeMap::new();
    for grant in records.iter().filter_map(|r| r.grant.as_ref()) {
        grants.insert(grant.id, grant.clone());
    }
    grants
}

/// Grant history filter used by `lifetag grants`.
#[derive(Clone, Copy, Debug)]
pub enum GrantFilter {
    Patient(PatientId),
    Doctor(DoctorId),
    All,
}

impl GrantFilter {
    fn matches(&self, grant: &AccessGrant) -> bool {
        match self {
            GrantFilter::Patient(id) => grant.patient_id == *id,
            GrantFilter::Doctor(id) => grant.doctor_id == *id,
            GrantFilter::All => true,
        }
    }
}

/// Grants matching `filter`, newest first.
pub fn grants_matching(records: &[JournalRecord], filter: GrantFilter) -> Vec<AccessGrant> {
    let mut grants: Vec<_> = latest_grants(records)
        .into_values()
        .filter(|g| filter.matches(g))
        .collect();
    grants.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    grants
}

pub fn patient_trail(records: &[JournalRecord], patient: &PatientId) -> Vec<AccessAuditEntry> {
    records
        .iter()
        .filter(|r| r.entry.patient_id == *patient)
        .map(|r| r.entry.clone())
        .collect()
}

pub fn grant_trail(records: &[JournalRecord], grant: &GrantId) -> Vec<AccessAuditEntry> {
    records
        .iter()
        .filter(|r| r.entry.grant_id.as_ref() == Some(grant))
        .map(|r| r.entry.clone())
        .collect()
}

/// Something `lifetag verify` found wrong with a journal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Problem {
    SequenceGap { expected: u64, found: u64 },
    SnapshotWithoutGrantId { sequence: u64 },
    SnapshotMismatch { sequence: u64, grant: GrantId },
    ConflictingActiveGrants {
        doctor: DoctorId,
        patient: PatientId,
        grants: Vec<GrantId>,
    },
    TerminalGrantReopened { sequence: u64, grant: GrantId },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::SequenceGap { expected, found } => {
                write!(f, "sequence gap: expected {expected}, found {found}")
            }
            Problem::SnapshotWithoutGrantId { sequence } => {
                write!(f, "entry {sequence} carries a grant snapshot but no grant id")
            }
            Problem::SnapshotMismatch { sequence, grant } => write!(
                f,
                "entry {sequence} does not match the snapshot of grant {grant}"
            ),
            Problem::ConflictingActiveGrants {
                doctor,
                patient,
                grants,
            } => {
                let ids: Vec<String> = grants.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "doctor {doctor} holds {} active grants for patient {patient}: {}",
                    grants.len(),
                    ids.join(", ")
                )
            }
            Problem::TerminalGrantReopened { sequence, grant } => write!(
                f,
                "entry {sequence} moves grant {grant} out of a terminal state"
            ),
        }
    }
}

/// Checks the structural invariants of a replayed journal.
///
/// Active grants are judged against `now`, so a grant past its expiry that the sweep has not
/// reached yet does not count towards a conflict.
pub fn verify(records: &[JournalRecord], now: DateTime<Utc>) -> Vec<Problem> {
    let mut problems = Vec::new();
    let mut last_state: HashMap<GrantId, GrantState> = HashMap::new();

    for (index, record) in records.iter().enumerate() {
        let entry = &record.entry;
        let expected = index as u64 + 1;
        if entry.sequence != expected {
            problems.push(Problem::SequenceGap {
                expected,
                found: entry.sequence,
            });
        }

        let Some(grant) = &record.grant else {
            continue;
        };
        match entry.grant_id {
            None => problems.push(Problem::SnapshotWithoutGrantId {
                sequence: entry.sequence,
            }),
            Some(id)
                if id != grant.id
                    || entry.patient_id != grant.patient_id
                    || entry.doctor_id != Some(grant.doctor_id) =>
            {
                problems.push(Problem::SnapshotMismatch {
                    sequence: entry.sequence,
                    grant: grant.id,
                })
            }
            Some(_) => {}
        }

        if let Some(previous) = last_state.insert(grant.id, grant.state) {
            if previous.is_terminal() && previous != grant.state {
                problems.push(Problem::TerminalGrantReopened {
                    sequence: entry.sequence,
                    grant: grant.id,
                });
            }
        }
    }

    let mut active: BTreeMap<(DoctorId, PatientId), Vec<GrantId>> = BTreeMap::new();
    for grant in latest_grants(records).into_values() {
        if grant.effective_state(now) == GrantState::Active {
            active
                .entry((grant.doctor_id, grant.patient_id))
                .or_default()
                .push(grant.id);
        }
    }
    for ((doctor, patient), grants) in active {
        if grants.len() > 1 {
            problems.push(Problem::ConflictingActiveGrants {
                doctor,
                patient,
                grants,
            });
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifetag_core::identity::NewPatient;
    use lifetag_core::journal::replay;
    use lifetag_core::{
        Actor, ConsentPolicy, ConsentService, CoreConfig, Doctor, InMemoryIdentityRegistry,
        InMemoryRecordStorage, ManualClock, NonEmptyText,
    };
    use std::path::Path;
    use std::sync::Arc;

    struct Fixture {
        service: ConsentService,
        patient: PatientId,
        doctor: DoctorId,
    }

    fn fixture(dir: &Path) -> Fixture {
        let registry = InMemoryIdentityRegistry::new();
        let patient = registry
            .register_patient(NewPatient {
                full_name: NonEmptyText::new("Amina Yusuf").unwrap(),
                age: Some(34),
                gender: None,
                national_id_last4: None,
            })
            .id;
        let doctor = Doctor {
            id: DoctorId::new(),
            full_name: NonEmptyText::new("Dr Okafor").unwrap(),
            specialization: None,
            hospital: None,
            department: None,
            verified: true,
            blocked: false,
        };
        registry.register_doctor(doctor.clone());

        let cfg = CoreConfig::new(dir.to_path_buf(), ConsentPolicy::default()).unwrap();
        let service = ConsentService::new(
            &cfg,
            Arc::new(registry),
            Arc::new(InMemoryRecordStorage::new()),
            Arc::new(ManualClock::new(Utc::now())),
        )
        .unwrap();
        Fixture {
            service,
            patient,
            doctor: doctor.id,
        }
    }

    fn journal(dir: &Path) -> Vec<JournalRecord> {
        let cfg = CoreConfig::new(dir.to_path_buf(), ConsentPolicy::default()).unwrap();
        replay(&cfg.journal_path()).unwrap()
    }

    #[test]
    fn views_follow_the_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path());
        let doctor = Actor::Doctor(f.doctor);
        let patient = Actor::Patient(f.patient);

        let first = f.service.request_access(&doctor, &f.patient).unwrap();
        f.service.deny_access(&patient, &first.id).unwrap();
        let second = f.service.request_access(&doctor, &f.patient).unwrap();
        f.service.approve_access(&patient, &second.id, None).unwrap();
        f.service.read_records(&doctor, &f.patient).unwrap();

        let records = journal(dir.path());
        let grants = grants_matching(&records, GrantFilter::Patient(f.patient));
        assert_eq!(grants.len(), 2);
        let states: Vec<_> = grants.iter().map(|g| (g.id, g.state)).collect();
        assert!(states.contains(&(first.id, GrantState::Denied)));
        assert!(states.contains(&(second.id, GrantState::Active)));

        // request, approve, read-allowed
        assert_eq!(grant_trail(&records, &second.id).len(), 3);
        // request, deny, request, approve, read-allowed
        assert_eq!(patient_trail(&records, &f.patient).len(), 5);
        assert!(grants_matching(&records, GrantFilter::Doctor(DoctorId::new())).is_empty());
    }

    #[test]
    fn a_clean_journal_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path());
        let doctor = Actor::Doctor(f.doctor);
        let grant = f.service.request_access(&doctor, &f.patient).unwrap();
        f.service
            .approve_access(&Actor::Patient(f.patient), &grant.id, None)
            .unwrap();
        f.service
            .revoke_access(&Actor::Patient(f.patient), &grant.id, Some("moved clinic"))
            .unwrap();

        assert!(verify(&journal(dir.path()), Utc::now()).is_empty());
    }

    #[test]
    fn tampering_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path());
        let doctor = Actor::Doctor(f.doctor);
        let grant = f.service.request_access(&doctor, &f.patient).unwrap();
        f.service
            .approve_access(&Actor::Patient(f.patient), &grant.id, None)
            .unwrap();

        let mut records = journal(dir.path());
        assert_eq!(records.len(), 2);

        // A second active grant for the same pair, with a skipped sequence number.
        let mut forged = records[1].clone();
        let mut duplicate = grant.clone();
        duplicate.id = GrantId::new();
        duplicate.state = GrantState::Active;
        forged.entry.sequence = 5;
        forged.entry.grant_id = Some(duplicate.id);
        forged.grant = Some(duplicate);
        records.push(forged);

        let problems = verify(&records, Utc::now());
        assert!(problems.contains(&Problem::SequenceGap {
            expected: 3,
            found: 5
        }));
        assert!(problems.iter().any(|p| matches!(
            p,
            Problem::ConflictingActiveGrants { grants, .. } if grants.len() == 2
        )));
    }

    #[test]
    fn reopening_a_terminal_grant_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture(dir.path());
        let grant = f
            .service
            .request_access(&Actor::Doctor(f.doctor), &f.patient)
            .unwrap();
        f.service
            .deny_access(&Actor::Patient(f.patient), &grant.id)
            .unwrap();

        let mut records = journal(dir.path());
        let mut reopened = records[1].clone();
        reopened.entry.sequence = 3;
        if let Some(g) = reopened.grant.as_mut() {
            g.state = GrantState::Requested;
        }
        records.push(reopened);

        assert_eq!(
            verify(&records, Utc::now()),
            vec![Problem::TerminalGrantReopened {
                sequence: 3,
                grant: grant.id
            }]
        );
    }
}
