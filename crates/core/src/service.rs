//! Consent service facade.
//!
//! [`ConsentService`] wires the registry, grant store, audit log, decision engine, workflow,
//! gateway, and sweeper together and exposes the operations adapters call. Every operation
//! takes the acting [`Actor`] and checks that the actor may perform it before delegating.

use crate::audit::{AccessAuditEntry, AuditLog};
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::constants::MAX_REVOCATION_REASON_CHARS;
use crate::decision::{AccessDecisionEngine, Decision};
use crate::gateway::RecordAccessGateway;
use crate::grants::{AccessGrant, GrantStore};
use crate::identity::{Actor, Doctor, IdentityRegistry, Patient};
use crate::journal::{self, FileJournal, JournalSink, NullJournal};
use crate::records::{MedicalRecord, RecordStorage};
use crate::sweep::{ExpiryQueue, ExpirySweeper, SweepReport};
use crate::workflow::AccessWorkflow;
use crate::{ConsentError, ConsentResult};
use chrono::Duration;
use lifetag_ids::{DoctorId, GrantId, PatientId, TagId};
use lifetag_types::NonEmptyText;
use std::sync::Arc;

pub struct ConsentService {
    registry: Arc<dyn IdentityRegistry>,
    audit: Arc<AuditLog>,
    grants: Arc<GrantStore>,
    engine: Arc<AccessDecisionEngine>,
    workflow: AccessWorkflow,
    gateway: RecordAccessGateway,
    sweeper: ExpirySweeper,
}

impl ConsentService {
    /// Builds the service from configuration, replaying the journal when it is enabled.
    pub fn new(
        cfg: &CoreConfig,
        registry: Arc<dyn IdentityRegistry>,
        storage: Arc<dyn RecordStorage>,
        clock: Arc<dyn Clock>,
    ) -> ConsentResult<Self> {
        if !cfg.journal_enabled() {
            return Ok(Self::in_memory(
                registry,
                storage,
                clock,
                cfg.default_grant_validity(),
            ));
        }

        let path = cfg.journal_path();
        // Opening first takes the writer lock and cuts any torn tail before replay reads it.
        let sink: Arc<dyn JournalSink> = Arc::new(FileJournal::open(&path)?);
        let records = journal::replay(&path)?;
        let service = Self::assemble(sink, registry, storage, clock, cfg.default_grant_validity());

        let count = records.len();
        for record in records {
            if let Some(grant) = record.grant {
                service.grants.restore(grant);
            }
            service.audit.restore(record.entry);
        }
        tracing::info!(
            records = count,
            grants = service.grants.len(),
            "consent journal replayed"
        );
        Ok(service)
    }

    /// A service that keeps everything in memory.
    pub fn in_memory(
        registry: Arc<dyn IdentityRegistry>,
        storage: Arc<dyn RecordStorage>,
        clock: Arc<dyn Clock>,
        default_validity: Option<Duration>,
    ) -> Self {
        Self::assemble(Arc::new(NullJournal), registry, storage, clock, default_validity)
    }

    fn assemble(
        sink: Arc<dyn JournalSink>,
        registry: Arc<dyn IdentityRegistry>,
        storage: Arc<dyn RecordStorage>,
        clock: Arc<dyn Clock>,
        default_validity: Option<Duration>,
    ) -> Self {
        let audit = Arc::new(AuditLog::new(sink));
        let grants = Arc::new(GrantStore::new(audit.clone()));
        let queue = Arc::new(ExpiryQueue::default());
        let engine = Arc::new(AccessDecisionEngine::new(
            registry.clone(),
            grants.clone(),
            clock.clone(),
            queue.clone(),
        ));
        let workflow = AccessWorkflow::new(
            registry.clone(),
            grants.clone(),
            clock.clone(),
            default_validity,
        );
        let gateway =
            RecordAccessGateway::new(engine.clone(), audit.clone(), storage, clock.clone());
        let sweeper = ExpirySweeper::new(grants.clone(), clock, queue);

        Self {
            registry,
            audit,
            grants,
            engine,
            workflow,
            gateway,
            sweeper,
        }
    }

    pub fn registry(&self) -> &Arc<dyn IdentityRegistry> {
        &self.registry
    }

    pub fn grants(&self) -> &Arc<GrantStore> {
        &self.grants
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    fn is_admin(&self, actor: &Actor) -> bool {
        matches!(actor, Actor::Admin(admin) if self.registry.is_admin(admin))
    }

    pub fn request_access(&self, actor: &Actor, patient: &PatientId) -> ConsentResult<AccessGrant> {
        match actor {
            Actor::Doctor(doctor) => self.workflow.request(doctor, patient),
            _ => Err(ConsentError::Forbidden),
        }
    }

    /// Approves a pending grant. `valid_for` overrides the configured default validity.
    pub fn approve_access(
        &self,
        actor: &Actor,
        grant: &GrantId,
        valid_for: Option<Duration>,
    ) -> ConsentResult<AccessGrant> {
        match actor {
            Actor::Patient(patient) => self.workflow.approve_for(grant, patient, valid_for),
            _ => Err(ConsentError::Forbidden),
        }
    }

    pub fn deny_access(&self, actor: &Actor, grant: &GrantId) -> ConsentResult<AccessGrant> {
        match actor {
            Actor::Patient(patient) => self.workflow.deny(grant, patient),
            _ => Err(ConsentError::Forbidden),
        }
    }

    /// Revokes an active grant. A blank reason counts as no reason.
    pub fn revoke_access(
        &self,
        actor: &Actor,
        grant: &GrantId,
        reason: Option<&str>,
    ) -> ConsentResult<AccessGrant> {
        let reason = NonEmptyText::optional(reason, MAX_REVOCATION_REASON_CHARS)
            .map_err(|e| ConsentError::InvalidInput(format!("reason: {e}")))?;
        self.workflow.revoke(grant, *actor, reason)
    }

    pub fn withdraw_request(&self, actor: &Actor, grant: &GrantId) -> ConsentResult<AccessGrant> {
        match actor {
            Actor::Doctor(doctor) => self.workflow.withdraw(grant, doctor),
            _ => Err(ConsentError::Forbidden),
        }
    }

    pub fn get_grant(&self, actor: &Actor, grant: &GrantId) -> ConsentResult<AccessGrant> {
        let found = self.grants.get(grant)?;
        let visible = match actor {
            Actor::Patient(patient) => *patient == found.patient_id,
            Actor::Doctor(doctor) => *doctor == found.doctor_id,
            Actor::Admin(_) => self.is_admin(actor),
            Actor::System => false,
        };
        if !visible {
            return Err(ConsentError::Forbidden);
        }
        Ok(found)
    }

    /// A patient's grants, newest first. Visible to that patient and to admins.
    pub fn list_grants_for_patient(
        &self,
        actor: &Actor,
        patient: &PatientId,
    ) -> ConsentResult<Vec<AccessGrant>> {
        match actor {
            Actor::Patient(p) if p == patient => {}
            _ if self.is_admin(actor) => {}
            _ => return Err(ConsentError::Forbidden),
        }
        Ok(self.grants.list_grants_for_patient(patient))
    }

    /// A doctor's grants, newest first. Visible to that doctor and to admins.
    pub fn list_grants_for_doctor(
        &self,
        actor: &Actor,
        doctor: &DoctorId,
    ) -> ConsentResult<Vec<AccessGrant>> {
        match actor {
            Actor::Doctor(d) if d == doctor => {}
            _ if self.is_admin(actor) => {}
            _ => return Err(ConsentError::Forbidden),
        }
        Ok(self.grants.list_grants_for_doctor(doctor))
    }

    pub fn read_records(
        &self,
        actor: &Actor,
        patient: &PatientId,
    ) -> ConsentResult<Vec<MedicalRecord>> {
        match actor {
            Actor::Doctor(doctor) => self.gateway.read_records(doctor, patient),
            _ => Err(ConsentError::Forbidden),
        }
    }

    /// Audit entries about `patient`, in append order. Visible to that patient and to admins.
    pub fn get_audit_trail(
        &self,
        actor: &Actor,
        patient: &PatientId,
    ) -> ConsentResult<Vec<AccessAuditEntry>> {
        match actor {
            Actor::Patient(p) if p == patient => {}
            _ if self.is_admin(actor) => {}
            _ => return Err(ConsentError::Forbidden),
        }
        Ok(self.audit.trail_for_patient(patient))
    }

    pub fn get_grant_audit_trail(
        &self,
        actor: &Actor,
        grant: &GrantId,
    ) -> ConsentResult<Vec<AccessAuditEntry>> {
        let found = self.grants.get(grant)?;
        match actor {
            Actor::Patient(p) if *p == found.patient_id => {}
            _ if self.is_admin(actor) => {}
            _ => return Err(ConsentError::Forbidden),
        }
        Ok(self.audit.trail_for_grant(grant))
    }

    /// Resolves a tag to its patient for eligible doctors, admins, and the patient themself.
    pub fn find_patient_by_tag(&self, actor: &Actor, tag: &TagId) -> ConsentResult<Patient> {
        match actor {
            Actor::Doctor(doctor) if !self.registry.is_doctor_eligible(doctor) => {
                return Err(ConsentError::NotEligible)
            }
            Actor::Doctor(_) => {}
            _ if self.is_admin(actor) => {}
            Actor::Patient(_) => {}
            _ => return Err(ConsentError::Forbidden),
        }

        let patient = self.registry.find_patient_by_tag(tag)?;
        if matches!(actor, Actor::Patient(p) if *p != patient.id) {
            return Err(ConsentError::Forbidden);
        }
        Ok(patient)
    }

    pub fn list_eligible_doctors(&self, search: Option<&str>) -> Vec<Doctor> {
        self.registry.list_eligible_doctors(search)
    }

    pub fn decide(&self, doctor: &DoctorId, patient: &PatientId) -> Decision {
        self.engine.decide(doctor, patient)
    }

    pub fn run_expiry_sweep(&self) -> SweepReport {
        self.sweeper.run_once()
    }

    /// On-demand sweep for an admin, on top of the background interval.
    pub fn sweep_as(&self, actor: &Actor) -> ConsentResult<SweepReport> {
        if !self.is_admin(actor) {
            return Err(ConsentError::Forbidden);
        }
        Ok(self.run_expiry_sweep())
    }
}
