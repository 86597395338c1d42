//! In-memory grant store.
//!
//! All grants live in one table behind a `RwLock`. Transitions hold the write lock from the
//! state check until the audit commit returns, so two transitions on the same pair can never
//! interleave. The `active` index maps each (doctor, patient) pair to its single `Active`
//! grant; it is only ever updated inside the audit commit, together with the grant itself.

use super::model::{AccessGrant, GrantAction, GrantState, TransitionDetails};
use crate::audit::{AuditAction, AuditLog, NewAuditEntry};
use crate::identity::Actor;
use crate::{ConsentError, ConsentResult};
use chrono::{DateTime, SecondsFormat, Utc};
use lifetag_ids::{DoctorId, GrantId, PatientId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Pair = (DoctorId, PatientId);

/// Result of asking the store to expire one grant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpiryOutcome {
    Expired(AccessGrant),
    AlreadyExpired,
    NotDue,
    NotActive,
}

#[derive(Default)]
struct GrantTable {
    grants: HashMap<GrantId, AccessGrant>,
    by_pair: HashMap<Pair, Vec<GrantId>>,
    by_patient: HashMap<PatientId, Vec<GrantId>>,
    by_doctor: HashMap<DoctorId, Vec<GrantId>>,
    active: HashMap<Pair, GrantId>,
}

impl GrantTable {
    fn get(&self, id: &GrantId) -> ConsentResult<&AccessGrant> {
        self.grants
            .get(id)
            .ok_or_else(|| ConsentError::NotFound(format!("grant {id}")))
    }

    fn upsert(&mut self, grant: AccessGrant) {
        let pair = (grant.doctor_id, grant.patient_id);
        if !self.grants.contains_key(&grant.id) {
            self.by_pair.entry(pair).or_default().push(grant.id);
            self.by_patient
                .entry(grant.patient_id)
                .or_default()
                .push(grant.id);
            self.by_doctor
                .entry(grant.doctor_id)
                .or_default()
                .push(grant.id);
        }

        if grant.state == GrantState::Active {
            self.active.insert(pair, grant.id);
        } else if self.active.get(&pair) == Some(&grant.id) {
            self.active.remove(&pair);
        }
        self.grants.insert(grant.id, grant);
    }

    fn pair_grants(&self, pair: &Pair) -> Vec<AccessGrant> {
        self.by_pair
            .get(pair)
            .map(|ids| ids.iter().filter_map(|id| self.grants.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// Grants referenced by `ids`, newest first. Grants created at the same instant keep
    /// reverse insertion order.
    fn newest_first(&self, ids: Option<&Vec<GrantId>>) -> Vec<AccessGrant> {
        let mut grants: Vec<AccessGrant> = ids
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| self.grants.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        grants.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        grants
    }
}

pub struct GrantStore {
    table: RwLock<GrantTable>,
    audit: Arc<AuditLog>,
}

impl GrantStore {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            table: RwLock::new(GrantTable::default()),
            audit,
        }
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    fn read(&self) -> RwLockReadGuard<'_, GrantTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GrantTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a `Requested` grant without checking for existing grants on the pair.
    pub fn create_request(
        &self,
        doctor: DoctorId,
        patient: PatientId,
        now: DateTime<Utc>,
    ) -> ConsentResult<AccessGrant> {
        let mut table = self.write();
        let grant = AccessGrant::requested(doctor, patient, now);
        self.commit(&mut table, grant, Actor::Doctor(doctor), AuditAction::Request, now)
    }

    /// Creates a `Requested` grant unless the pair already has a pending or active grant.
    ///
    /// An `Active` grant whose expiry has passed is expired first and does not block the new
    /// request.
    pub fn create_request_exclusive(
        &self,
        doctor: DoctorId,
        patient: PatientId,
        now: DateTime<Utc>,
    ) -> ConsentResult<AccessGrant> {
        let mut table = self.write();

        for existing in table.pair_grants(&(doctor, patient)) {
            if existing.state == GrantState::Active && existing.is_expired_at(now) {
                self.expire_locked(&mut table, &existing, now)?;
            } else if !existing.state.is_terminal() {
                return Err(ConsentError::DuplicateRequest);
            }
        }

        let grant = AccessGrant::requested(doctor, patient, now);
        self.commit(&mut table, grant, Actor::Doctor(doctor), AuditAction::Request, now)
    }

    /// The stored `Active` grant for the pair, regardless of its expiry.
    pub fn find_active_grant(&self, doctor: &DoctorId, patient: &PatientId) -> Option<AccessGrant> {
        self.with_active_grant(doctor, patient, |grant| grant.cloned())
    }

    /// Runs `f` on the pair's stored `Active` grant while holding the read lock.
    ///
    /// No transition can commit until `f` returns, so an audit entry appended inside `f` is
    /// sequenced before any later change to the grant. `f` must not call back into the store.
    pub fn with_active_grant<R>(
        &self,
        doctor: &DoctorId,
        patient: &PatientId,
        f: impl FnOnce(Option<&AccessGrant>) -> R,
    ) -> R {
        let table = self.read();
        let grant = table
            .active
            .get(&(*doctor, *patient))
            .and_then(|id| table.grants.get(id));
        f(grant)
    }

    pub fn get(&self, id: &GrantId) -> ConsentResult<AccessGrant> {
        self.read().get(id).cloned()
    }

    pub fn list_grants_for_patient(&self, patient: &PatientId) -> Vec<AccessGrant> {
        let table = self.read();
        table.newest_first(table.by_patient.get(patient))
    }

    pub fn list_grants_for_doctor(&self, doctor: &DoctorId) -> Vec<AccessGrant> {
        let table = self.read();
        table.newest_first(table.by_doctor.get(doctor))
    }

    /// Applies one lifecycle edge to a grant.
    ///
    /// Approval fails with `ConflictingGrant` while another grant for the same pair is
    /// `Active` and not yet past its expiry. An overdue one is expired in the same critical
    /// section.
    pub fn transition(
        &self,
        id: &GrantId,
        action: GrantAction,
        actor: Actor,
        details: &TransitionDetails,
        now: DateTime<Utc>,
    ) -> ConsentResult<AccessGrant> {
        let mut table = self.write();
        let current = table.get(id)?.clone();
        let next = current.apply(action, details, now)?;

        if action == GrantAction::Approve {
            let pair = (current.doctor_id, current.patient_id);
            if let Some(other_id) = table.active.get(&pair).copied() {
                let other = table.get(&other_id)?.clone();
                if !other.is_expired_at(now) {
                    tracing::warn!(
                        grant_id = %id,
                        active_grant_id = %other_id,
                        "approval refused, pair already has an active grant"
                    );
                    return Err(ConsentError::ConflictingGrant);
                }
                self.expire_locked(&mut table, &other, now)?;
            }
        }

        self.commit(&mut table, next, actor, action.audit_action(), now)
    }

    /// Expires `id` if it is `Active` and past its expiry. Anything else is a no-op.
    pub fn expire_if_due(&self, id: &GrantId, now: DateTime<Utc>) -> ConsentResult<ExpiryOutcome> {
        let mut table = self.write();
        let current = table.get(id)?.clone();

        match current.state {
            GrantState::Expired => Ok(ExpiryOutcome::AlreadyExpired),
            GrantState::Active if current.is_expired_at(now) => self
                .expire_locked(&mut table, &current, now)
                .map(ExpiryOutcome::Expired),
            GrantState::Active => Ok(ExpiryOutcome::NotDue),
            _ => Ok(ExpiryOutcome::NotActive),
        }
    }

    /// Ids of `Active` grants whose expiry is at or before `now`.
    pub fn due_for_expiry(&self, now: DateTime<Utc>) -> Vec<GrantId> {
        let table = self.read();
        let mut due: Vec<GrantId> = table
            .active
            .values()
            .filter(|id| table.grants.get(id).is_some_and(|g| g.is_expired_at(now)))
            .copied()
            .collect();
        due.sort();
        due
    }

    /// Every stored grant, in no particular order.
    pub fn all(&self) -> Vec<AccessGrant> {
        self.read().grants.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Installs a grant snapshot read back from the journal. Later snapshots of the same
    /// grant replace earlier ones.
    pub(crate) fn restore(&self, grant: AccessGrant) {
        self.write().upsert(grant);
    }

    fn expire_locked(
        &self,
        table: &mut GrantTable,
        grant: &AccessGrant,
        now: DateTime<Utc>,
    ) -> ConsentResult<AccessGrant> {
        let expired = grant.apply(GrantAction::Expire, &TransitionDetails::default(), now)?;
        self.commit(table, expired, Actor::System, AuditAction::Expire, now)
    }

    fn commit(
        &self,
        table: &mut GrantTable,
        next: AccessGrant,
        actor: Actor,
        action: AuditAction,
        now: DateTime<Utc>,
    ) -> ConsentResult<AccessGrant> {
        let detail = match action {
            AuditAction::Revoke => next
                .revocation_reason
                .as_ref()
                .map(|reason| reason.as_str().to_owned()),
            AuditAction::Expire => next
                .expires_at
                .map(|at| format!("expired at {}", at.to_rfc3339_opts(SecondsFormat::Secs, true))),
            _ => None,
        };
        let entry = NewAuditEntry::for_grant(&next, actor, action, now).with_detail(detail);

        self.audit
            .commit(entry, Some(&next), || table.upsert(next.clone()))?;

        tracing::info!(
            grant_id = %next.id,
            doctor_id = %next.doctor_id,
            patient_id = %next.patient_id,
            action = %action,
            state = %next.state,
            "grant transition committed"
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::tests::FlakyJournal;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::Ordering;
    use std::sync::Barrier;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()
    }

    fn store() -> GrantStore {
        GrantStore::new(Arc::new(AuditLog::in_memory()))
    }

    fn approve_for(valid_for: Option<Duration>) -> TransitionDetails {
        TransitionDetails {
            valid_for,
            ..Default::default()
        }
    }

    #[test]
    fn request_then_approve_is_audited_once_each() {
        let store = store();
        let (doctor, patient) = (DoctorId::new(), PatientId::new());

        let grant = store.create_request_exclusive(doctor, patient, t0()).unwrap();
        assert_eq!(grant.state, GrantState::Requested);

        let active = store
            .transition(
                &grant.id,
                GrantAction::Approve,
                Actor::Patient(patient),
                &approve_for(None),
                t0(),
            )
            .unwrap();
        assert_eq!(active.state, GrantState::Active);
        assert_eq!(store.find_active_grant(&doctor, &patient), Some(active));

        let actions: Vec<_> = store
            .audit()
            .trail_for_grant(&grant.id)
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::Request, AuditAction::Approve]);
    }

    #[test]
    fn duplicate_request_is_refused_until_terminal() {
        let store = store();
        let (doctor, patient) = (DoctorId::new(), PatientId::new());

        let first = store.create_request_exclusive(doctor, patient, t0()).unwrap();
        assert!(matches!(
            store.create_request_exclusive(doctor, patient, t0()),
            Err(ConsentError::DuplicateRequest)
        ));

        store
            .transition(
                &first.id,
                GrantAction::Withdraw,
                Actor::Doctor(doctor),
                &TransitionDetails::default(),
                t0(),
            )
            .unwrap();
        assert!(store.create_request_exclusive(doctor, patient, t0()).is_ok());
        assert_eq!(store.list_grants_for_patient(&patient).len(), 2);
    }

    #[test]
    fn concurrent_approvals_admit_exactly_one_active_grant() {
        const N: usize = 8;
        let store = Arc::new(store());
        let (doctor, patient) = (DoctorId::new(), PatientId::new());
        let ids: Vec<GrantId> = (0..N)
            .map(|_| store.create_request(doctor, patient, t0()).unwrap().id)
            .collect();

        let barrier = Arc::new(Barrier::new(N));
        let handles: Vec<_> = ids
            .iter()
            .copied()
            .map(|id| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store.transition(
                        &id,
                        GrantAction::Approve,
                        Actor::Patient(patient),
                        &TransitionDetails::default(),
                        t0(),
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(ConsentError::ConflictingGrant)))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(conflicts, N - 1);

        let active = store
            .list_grants_for_patient(&patient)
            .into_iter()
            .filter(|g| g.state == GrantState::Active)
            .count();
        assert_eq!(active, 1);
    }

    #[test]
    fn overdue_active_grant_is_expired_instead_of_conflicting() {
        let store = store();
        let (doctor, patient) = (DoctorId::new(), PatientId::new());
        let old = store.create_request(doctor, patient, t0()).unwrap();
        store
            .transition(
                &old.id,
                GrantAction::Approve,
                Actor::Patient(patient),
                &approve_for(Some(Duration::hours(1))),
                t0(),
            )
            .unwrap();

        let later = t0() + Duration::hours(2);
        let fresh = store.create_request_exclusive(doctor, patient, later).unwrap();
        assert_eq!(store.get(&old.id).unwrap().state, GrantState::Expired);

        store
            .transition(
                &fresh.id,
                GrantAction::Approve,
                Actor::Patient(patient),
                &approve_for(None),
                later,
            )
            .unwrap();

        let expire_entries: Vec<_> = store
            .audit()
            .trail_for_grant(&old.id)
            .into_iter()
            .filter(|e| e.action == AuditAction::Expire)
            .collect();
        assert_eq!(expire_entries.len(), 1);
        assert_eq!(expire_entries[0].actor, Actor::System);
    }

    #[test]
    fn failing_sink_leaves_grant_unchanged() {
        let sink = Arc::new(FlakyJournal::default());
        let audit = Arc::new(AuditLog::new(sink.clone()));
        let store = GrantStore::new(Arc::clone(&audit));
        let (doctor, patient) = (DoctorId::new(), PatientId::new());
        let grant = store.create_request(doctor, patient, t0()).unwrap();
        let entries_before = audit.len();

        sink.failing.store(true, Ordering::SeqCst);
        let result = store.transition(
            &grant.id,
            GrantAction::Approve,
            Actor::Patient(patient),
            &TransitionDetails::default(),
            t0(),
        );

        assert!(matches!(result, Err(ConsentError::Journal(_))));
        assert_eq!(store.get(&grant.id).unwrap().state, GrantState::Requested);
        assert_eq!(store.find_active_grant(&doctor, &patient), None);
        assert_eq!(audit.len(), entries_before);
    }

    #[test]
    fn terminal_grants_reject_every_action() {
        let store = store();
        let (doctor, patient) = (DoctorId::new(), PatientId::new());
        let grant = store.create_request(doctor, patient, t0()).unwrap();
        store
            .transition(
                &grant.id,
                GrantAction::Deny,
                Actor::Patient(patient),
                &TransitionDetails::default(),
                t0(),
            )
            .unwrap();
        let entries = store.audit().len();

        for action in GrantAction::ALL {
            let result = store.transition(
                &grant.id,
                action,
                Actor::Patient(patient),
                &TransitionDetails::default(),
                t0(),
            );
            assert!(
                matches!(
                    result,
                    Err(ConsentError::InvalidTransition {
                        from: GrantState::Denied,
                        ..
                    })
                ),
                "{action}"
            );
        }
        assert_eq!(store.audit().len(), entries);
    }

    #[test]
    fn expire_if_due_reports_each_outcome() {
        let store = store();
        let (doctor, patient) = (DoctorId::new(), PatientId::new());
        let grant = store.create_request(doctor, patient, t0()).unwrap();
        assert_eq!(
            store.expire_if_due(&grant.id, t0()).unwrap(),
            ExpiryOutcome::NotActive
        );

        store
            .transition(
                &grant.id,
                GrantAction::Approve,
                Actor::Patient(patient),
                &approve_for(Some(Duration::minutes(10))),
                t0(),
            )
            .unwrap();
        assert_eq!(
            store.expire_if_due(&grant.id, t0()).unwrap(),
            ExpiryOutcome::NotDue
        );

        let due = t0() + Duration::minutes(10);
        assert_eq!(store.due_for_expiry(due), vec![grant.id]);
        assert!(matches!(
            store.expire_if_due(&grant.id, due).unwrap(),
            ExpiryOutcome::Expired(_)
        ));
        assert_eq!(
            store.expire_if_due(&grant.id, due).unwrap(),
            ExpiryOutcome::AlreadyExpired
        );
        assert!(store.due_for_expiry(due).is_empty());
        assert!(matches!(
            store.expire_if_due(&GrantId::new(), due),
            Err(ConsentError::NotFound(_))
        ));
    }

    #[test]
    fn listings_are_newest_first() {
        let store = store();
        let patient = PatientId::new();
        let (d1, d2) = (DoctorId::new(), DoctorId::new());
        let older = store.create_request(d1, patient, t0()).unwrap();
        let newer = store
            .create_request(d2, patient, t0() + Duration::minutes(5))
            .unwrap();

        let ids: Vec<_> = store
            .list_grants_for_patient(&patient)
            .into_iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id]);
        assert_eq!(store.list_grants_for_doctor(&d1).len(), 1);
        assert!(store.list_grants_for_doctor(&DoctorId::new()).is_empty());
    }
}
