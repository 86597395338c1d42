//! Automatic expiry.
//!
//! Expired grants are moved to `Expired` by a sweep rather than inline with reads. The sweep
//! considers every id queued by the decision engine plus every `Active` grant the store reports
//! as due. Running it twice, or concurrently with decisions, is harmless: expiring a grant
//! that is no longer due or already expired does nothing.

use crate::clock::Clock;
use crate::grants::{ExpiryOutcome, GrantStore};
use crate::ConsentError;
use lifetag_ids::GrantId;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Grant ids whose expiry was noticed during a decision.
#[derive(Debug, Default)]
pub struct ExpiryQueue {
    pending: Mutex<BTreeSet<GrantId>>,
}

impl ExpiryQueue {
    fn lock(&self) -> MutexGuard<'_, BTreeSet<GrantId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, id: GrantId) {
        self.lock().insert(id);
    }

    /// Takes every pending id, leaving the queue empty.
    pub fn drain(&self) -> Vec<GrantId> {
        std::mem::take(&mut *self.lock()).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Grants moved to `Expired` by this run.
    pub expired: Vec<GrantId>,
    /// Candidates that needed nothing.
    pub skipped: usize,
    /// Candidates that could not be committed; they are queued again.
    pub failed: usize,
}

pub struct ExpirySweeper {
    grants: Arc<GrantStore>,
    clock: Arc<dyn Clock>,
    queue: Arc<ExpiryQueue>,
}

impl ExpirySweeper {
    pub fn new(grants: Arc<GrantStore>, clock: Arc<dyn Clock>, queue: Arc<ExpiryQueue>) -> Self {
        Self {
            grants,
            clock,
            queue,
        }
    }

    pub fn run_once(&self) -> SweepReport {
        let now = self.clock.now();
        let mut candidates: BTreeSet<GrantId> = self.queue.drain().into_iter().collect();
        candidates.extend(self.grants.due_for_expiry(now));

        let mut report = SweepReport::default();
        for id in candidates {
            match self.grants.expire_if_due(&id, now) {
                Ok(ExpiryOutcome::Expired(grant)) => report.expired.push(grant.id),
                Ok(_) | Err(ConsentError::NotFound(_)) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(
                        grant_id = %id,
                        error = %e,
                        "failed to expire grant, will retry"
                    );
                    self.queue.enqueue(id);
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            expired = report.expired.len(),
            skipped = report.skipped,
            failed = report.failed,
            "expiry sweep finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::tests::FlakyJournal;
    use crate::audit::{AuditAction, AuditLog};
    use crate::clock::ManualClock;
    use crate::grants::{GrantAction, GrantState, TransitionDetails};
    use crate::identity::Actor;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use lifetag_ids::{DoctorId, PatientId};
    use std::sync::atomic::Ordering;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 6, 0, 0).unwrap()
    }

    fn active_grant(grants: &GrantStore, valid_for: Duration) -> GrantId {
        let patient = PatientId::new();
        let grant = grants.create_request(DoctorId::new(), patient, t0()).unwrap();
        grants
            .transition(
                &grant.id,
                GrantAction::Approve,
                Actor::Patient(patient),
                &TransitionDetails {
                    valid_for: Some(valid_for),
                    ..Default::default()
                },
                t0(),
            )
            .unwrap();
        grant.id
    }

    #[test]
    fn sweep_is_idempotent() {
        let grants = Arc::new(GrantStore::new(Arc::new(AuditLog::in_memory())));
        let clock = Arc::new(ManualClock::new(t0()));
        let queue = Arc::new(ExpiryQueue::default());
        let sweeper = ExpirySweeper::new(grants.clone(), clock.clone(), queue.clone());

        let due = active_grant(&grants, Duration::minutes(30));
        let later = active_grant(&grants, Duration::days(2));

        assert!(sweeper.run_once().expired.is_empty());

        clock.advance(Duration::hours(1));
        queue.enqueue(due);
        let first = sweeper.run_once();
        assert_eq!(first.expired, vec![due]);
        assert_eq!(grants.get(&due).unwrap().state, GrantState::Expired);
        assert_eq!(grants.get(&later).unwrap().state, GrantState::Active);

        let second = sweeper.run_once();
        assert!(second.expired.is_empty());
        assert_eq!(second.failed, 0);

        let expire_entries = grants
            .audit()
            .trail_for_grant(&due)
            .into_iter()
            .filter(|e| e.action == AuditAction::Expire)
            .count();
        assert_eq!(expire_entries, 1);
    }

    #[test]
    fn unknown_queued_ids_are_skipped() {
        let grants = Arc::new(GrantStore::new(Arc::new(AuditLog::in_memory())));
        let queue = Arc::new(ExpiryQueue::default());
        queue.enqueue(GrantId::new());
        let sweeper = ExpirySweeper::new(grants, Arc::new(ManualClock::new(t0())), queue.clone());

        let report = sweeper.run_once();
        assert_eq!(report.skipped, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn failed_expiries_are_requeued() {
        let sink = Arc::new(FlakyJournal::default());
        let grants = Arc::new(GrantStore::new(Arc::new(AuditLog::new(sink.clone()))));
        let clock = Arc::new(ManualClock::new(t0()));
        let queue = Arc::new(ExpiryQueue::default());
        let sweeper = ExpirySweeper::new(grants.clone(), clock.clone(), queue.clone());
        let id = active_grant(&grants, Duration::minutes(5));

        clock.advance(Duration::minutes(10));
        sink.failing.store(true, Ordering::SeqCst);
        let report = sweeper.run_once();
        assert_eq!(report.failed, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(grants.get(&id).unwrap().state, GrantState::Active);

        sink.failing.store(false, Ordering::SeqCst);
        assert_eq!(sweeper.run_once().expired, vec![id]);
    }
}
