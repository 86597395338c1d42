//! Identity registry.
//!
//! Holds the canonical patient and doctor identities the engine consults on every decision.
//! From the engine's point of view the registry is read-only: verification and blocking are
//! performed by an external moderation collaborator, which talks to
//! [`InMemoryIdentityRegistry`] through its mutation methods.
//!
//! A patient's [`TagId`] is issued at registration and is never reassigned, even after the
//! account is deleted. The registry keeps every tag it has ever issued for that reason, and
//! [`InMemoryIdentityRegistry::save_yaml`] writes the tags of deleted patients out as
//! `retired_tags` so the reservation survives a restart.

use crate::{ConsentError, ConsentResult};
use lifetag_ids::{AdminId, DoctorId, PatientId, TagId};
use lifetag_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Whoever performs an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Patient(PatientId),
    Doctor(DoctorId),
    Admin(AdminId),
    /// The engine itself, e.g. the expiry sweep.
    System,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Patient(id) => write!(f, "patient:{id}"),
            Actor::Doctor(id) => write!(f, "doctor:{id}"),
            Actor::Admin(id) => write!(f, "admin:{id}"),
            Actor::System => write!(f, "system"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub full_name: NonEmptyText,
    #[serde(default)]
    pub age: Option<u16>,
    #[serde(default)]
    pub gender: Option<String>,
    pub tag_id: TagId,
    #[serde(default)]
    pub identity_verified: bool,
    /// Last four digits of the national identity number, if verification recorded them.
    #[serde(default)]
    pub national_id_last4: Option<String>,
}

impl Patient {
    /// National identity number in display form, e.g. `XXXX-1234`.
    pub fn masked_national_id(&self) -> Option<String> {
        self.national_id_last4
            .as_deref()
            .map(|last4| format!("XXXX-{last4}"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: DoctorId,
    pub full_name: NonEmptyText,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub hospital: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    /// Set by the moderation collaborator once registration documents are checked.
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub blocked: bool,
}

impl Doctor {
    pub fn is_eligible(&self) -> bool {
        self.verified && !self.blocked
    }

    fn matches(&self, needle: &str) -> bool {
        std::iter::once(Some(self.full_name.as_str()))
            .chain([
                self.specialization.as_deref(),
                self.hospital.as_deref(),
                self.department.as_deref(),
            ])
            .flatten()
            .any(|field| field.to_lowercase().contains(needle))
    }
}

/// Read-only view of identities used by the decision engine and workflow.
pub trait IdentityRegistry: Send + Sync {
    fn get_patient(&self, id: &PatientId) -> ConsentResult<Patient>;

    fn get_doctor(&self, id: &DoctorId) -> ConsentResult<Doctor>;

    /// True iff the doctor exists, is verified, and is not blocked. Unknown ids are never
    /// eligible.
    fn is_doctor_eligible(&self, id: &DoctorId) -> bool;

    fn is_admin(&self, id: &AdminId) -> bool;

    fn find_patient_by_tag(&self, tag: &TagId) -> ConsentResult<Patient>;

    /// Eligible doctors, optionally filtered by a case-insensitive search over name,
    /// specialization, hospital, and department. Ordered by name.
    fn list_eligible_doctors(&self, search: Option<&str>) -> Vec<Doctor>;
}

/// Registration payload for a new patient. The registry allocates the id and the tag.
#[derive(Clone, Debug)]
pub struct NewPatient {
    pub full_name: NonEmptyText,
    pub age: Option<u16>,
    pub gender: Option<String>,
    pub national_id_last4: Option<String>,
}

/// Seed file layout for [`InMemoryIdentityRegistry::load_yaml`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentitySeed {
    #[serde(default)]
    pub patients: Vec<Patient>,
    #[serde(default)]
    pub doctors: Vec<Doctor>,
    #[serde(default)]
    pub admins: Vec<AdminId>,
    /// Tags of deleted patients. Never issued again.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retired_tags: Vec<TagId>,
}

#[derive(Default)]
struct RegistryState {
    patients: HashMap<PatientId, Patient>,
    by_tag: HashMap<TagId, PatientId>,
    issued_tags: HashSet<TagId>,
    doctors: HashMap<DoctorId, Doctor>,
    admins: HashSet<AdminId>,
}

#[derive(Default)]
pub struct InMemoryIdentityRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryIdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a YAML seed file.
    pub fn load_yaml(path: &Path) -> ConsentResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConsentError::Config(format!("failed to read identities {}: {e}", path.display()))
        })?;
        let seed: IdentitySeed = serde_yaml::from_str(&raw)
            .map_err(|e| ConsentError::Config(format!("invalid identities file: {e}")))?;

        let registry = Self::new();
        registry.write().issued_tags.extend(seed.retired_tags);
        for patient in seed.patients {
            registry.restore_patient(patient)?;
        }
        for doctor in seed.doctors {
            registry.register_doctor(doctor);
        }
        for admin in seed.admins {
            registry.register_admin(admin);
        }
        Ok(registry)
    }

    /// Everything [`load_yaml`](Self::load_yaml) needs to rebuild this registry, in id order.
    pub fn to_seed(&self) -> IdentitySeed {
        let state = self.read();
        let mut patients: Vec<Patient> = state.patients.values().cloned().collect();
        patients.sort_by_key(|p| p.id);
        let mut doctors: Vec<Doctor> = state.doctors.values().cloned().collect();
        doctors.sort_by_key(|d| d.id);
        let mut admins: Vec<AdminId> = state.admins.iter().copied().collect();
        admins.sort();
        let mut retired_tags: Vec<TagId> = state
            .issued_tags
            .iter()
            .filter(|tag| !state.by_tag.contains_key(*tag))
            .cloned()
            .collect();
        retired_tags.sort();
        IdentitySeed {
            patients,
            doctors,
            admins,
            retired_tags,
        }
    }

    /// Writes [`to_seed`](Self::to_seed) to `path`, replacing the file in one rename.
    pub fn save_yaml(&self, path: &Path) -> ConsentResult<()> {
        let yaml = serde_yaml::to_string(&self.to_seed())
            .map_err(|e| ConsentError::Config(format!("failed to encode identities: {e}")))?;
        let staged = path.with_extension("yaml.tmp");
        std::fs::write(&staged, yaml)
            .and_then(|()| std::fs::rename(&staged, path))
            .map_err(|e| {
                ConsentError::Config(format!("failed to write identities {}: {e}", path.display()))
            })
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a patient, issuing a fresh id and a tag that has never been issued before.
    pub fn register_patient(&self, new: NewPatient) -> Patient {
        let mut state = self.write();

        let tag_id = loop {
            let candidate = TagId::generate();
            if !state.issued_tags.contains(&candidate) {
                break candidate;
            }
        };

        let patient = Patient {
            id: PatientId::new(),
            full_name: new.full_name,
            age: new.age,
            gender: new.gender,
            tag_id: tag_id.clone(),
            identity_verified: false,
            national_id_last4: new.national_id_last4,
        };

        state.issued_tags.insert(tag_id.clone());
        state.by_tag.insert(tag_id, patient.id);
        state.patients.insert(patient.id, patient.clone());
        tracing::info!(patient_id = %patient.id, "patient registered");
        patient
    }

    /// Re-inserts a patient whose id and tag were issued earlier (seed files, migrations).
    ///
    /// Fails if the tag was already issued to anyone, including a deleted account.
    pub fn restore_patient(&self, patient: Patient) -> ConsentResult<()> {
        let mut state = self.write();
        if state.issued_tags.contains(&patient.tag_id) || state.patients.contains_key(&patient.id)
        {
            return Err(ConsentError::InvalidInput(format!(
                "tag or id already issued for patient {}",
                patient.id
            )));
        }
        state.issued_tags.insert(patient.tag_id.clone());
        state.by_tag.insert(patient.tag_id.clone(), patient.id);
        state.patients.insert(patient.id, patient);
        Ok(())
    }

    pub fn register_doctor(&self, doctor: Doctor) {
        tracing::info!(doctor_id = %doctor.id, "doctor registered");
        self.write().doctors.insert(doctor.id, doctor);
    }

    pub fn register_admin(&self, admin: AdminId) {
        self.write().admins.insert(admin);
    }

    pub fn set_patient_identity_verified(
        &self,
        id: &PatientId,
        verified: bool,
    ) -> ConsentResult<()> {
        let mut state = self.write();
        let patient = state
            .patients
            .get_mut(id)
            .ok_or_else(|| ConsentError::NotFound(format!("patient {id}")))?;
        patient.identity_verified = verified;
        Ok(())
    }

    pub fn set_doctor_verified(&self, id: &DoctorId, verified: bool) -> ConsentResult<()> {
        let mut state = self.write();
        let doctor = state
            .doctors
            .get_mut(id)
            .ok_or_else(|| ConsentError::NotFound(format!("doctor {id}")))?;
        doctor.verified = verified;
        tracing::info!(doctor_id = %id, verified, "doctor verification changed");
        Ok(())
    }

    pub fn set_doctor_blocked(&self, id: &DoctorId, blocked: bool) -> ConsentResult<()> {
        let mut state = self.write();
        let doctor = state
            .doctors
            .get_mut(id)
            .ok_or_else(|| ConsentError::NotFound(format!("doctor {id}")))?;
        doctor.blocked = blocked;
        tracing::info!(doctor_id = %id, blocked, "doctor block flag changed");
        Ok(())
    }

    /// Removes a patient account. The tag stays reserved forever.
    pub fn delete_patient(&self, id: &PatientId) -> ConsentResult<Patient> {
        let mut state = self.write();
        let patient = state
            .patients
            .remove(id)
            .ok_or_else(|| ConsentError::NotFound(format!("patient {id}")))?;
        state.by_tag.remove(&patient.tag_id);
        tracing::info!(patient_id = %id, "patient deleted; tag retained as issued");
        Ok(patient)
    }
}

impl IdentityRegistry for InMemoryIdentityRegistry {
    fn get_patient(&self, id: &PatientId) -> ConsentResult<Patient> {
        self.read()
            .patients
            .get(id)
            .cloned()
            .ok_or_else(|| ConsentError::NotFound(format!("patient {id}")))
    }

    fn get_doctor(&self, id: &DoctorId) -> ConsentResult<Doctor> {
        self.read()
            .doctors
            .get(id)
            .cloned()
            .ok_or_else(|| ConsentError::NotFound(format!("doctor {id}")))
    }

    fn is_doctor_eligible(&self, id: &DoctorId) -> bool {
        self.read()
            .doctors
            .get(id)
            .is_some_and(Doctor::is_eligible)
    }

    fn is_admin(&self, id: &AdminId) -> bool {
        self.read().admins.contains(id)
    }

    fn find_patient_by_tag(&self, tag: &TagId) -> ConsentResult<Patient> {
        let state = self.read();
        state
            .by_tag
            .get(tag)
            .and_then(|id| state.patients.get(id))
            .cloned()
            .ok_or_else(|| ConsentError::NotFound(format!("tag {tag}")))
    }

    fn list_eligible_doctors(&self, search: Option<&str>) -> Vec<Doctor> {
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut doctors: Vec<Doctor> = self
            .read()
            .doctors
            .values()
            .filter(|d| d.is_eligible())
            .filter(|d| needle.as_deref().map_or(true, |n| d.matches(n)))
            .cloned()
            .collect();
        doctors.sort_by(|a, b| a.full_name.as_str().cmp(b.full_name.as_str()));
        doctors
    }
}
