//! Medical record storage collaborator.
//!
//! The engine never looks inside records. It only asks a [`RecordStorage`] for a patient's
//! record list once a read has been allowed.
//!
//! [`ShardedRecordIndex`] reads one JSON index per patient from the sharded layout:
//!
//! ```text
//! records/
//!   55/
//!     0e/
//!       550e8400e29b41d4a716446655440000/
//!         records.json
//! ```

use crate::constants::RECORDS_INDEX_FILENAME;
use chrono::{DateTime, Utc};
use lifetag_ids::{PatientId, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("record storage unavailable: {0}")]
    Unavailable(String),
    #[error("record storage timed out")]
    Timeout,
    #[error("record storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record index: {0}")]
    Corrupt(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalRecord {
    pub id: RecordId,
    pub patient_id: PatientId,
    pub title: String,
    /// Free-form category such as `lab-report` or `prescription`.
    pub kind: String,
    pub uploaded_at: DateTime<Utc>,
}

pub trait RecordStorage: Send + Sync {
    fn fetch_records(&self, patient: &PatientId) -> Result<Vec<MedicalRecord>, StorageError>;
}

#[derive(Debug, Default)]
pub struct InMemoryRecordStorage {
    records: RwLock<HashMap<PatientId, Vec<MedicalRecord>>>,
    fetches: AtomicUsize,
}

impl InMemoryRecordStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: MedicalRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(record.patient_id)
            .or_default()
            .push(record);
    }

    /// How many times `fetch_records` has been called.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl RecordStorage for InMemoryRecordStorage {
    fn fetch_records(&self, patient: &PatientId) -> Result<Vec<MedicalRecord>, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(patient)
            .cloned()
            .unwrap_or_default())
    }
}

/// Per-patient `records.json` files under a sharded directory tree.
#[derive(Clone, Debug)]
pub struct ShardedRecordIndex {
    records_dir: PathBuf,
}

impl ShardedRecordIndex {
    pub fn new(records_dir: impl Into<PathBuf>) -> Self {
        Self {
            records_dir: records_dir.into(),
        }
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    fn index_path(&self, patient: &PatientId) -> PathBuf {
        patient
            .sharded_dir(&self.records_dir)
            .join(RECORDS_INDEX_FILENAME)
    }

    /// Replaces the patient's record index.
    pub fn write_records(
        &self,
        patient: &PatientId,
        records: &[MedicalRecord],
    ) -> Result<(), StorageError> {
        let path = self.index_path(patient);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        std::fs::write(&path, json)?;
        Ok(())
    }
}

impl RecordStorage for ShardedRecordIndex {
    fn fetch_records(&self, patient: &PatientId) -> Result<Vec<MedicalRecord>, StorageError> {
        let path = self.index_path(patient);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };
        serde_json::from_str(&raw)
            .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(patient: PatientId, title: &str) -> MedicalRecord {
        MedicalRecord {
            id: RecordId::new(),
            patient_id: patient,
            title: title.into(),
            kind: "lab-report".into(),
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn in_memory_storage_counts_fetches() {
        let storage = InMemoryRecordStorage::new();
        let patient = PatientId::new();
        storage.insert(record(patient, "CBC"));

        assert_eq!(storage.fetch_records(&patient).unwrap().len(), 1);
        assert!(storage.fetch_records(&PatientId::new()).unwrap().is_empty());
        assert_eq!(storage.fetch_count(), 2);
    }

    #[test]
    fn sharded_index_uses_sharded_layout() {
        let temp = TempDir::new().unwrap();
        let index = ShardedRecordIndex::new(temp.path().join("records"));
        let patient = PatientId::new();
        let records = vec![record(patient, "X-ray"), record(patient, "MRI")];
        index.write_records(&patient, &records).unwrap();

        let hex = patient.to_string();
        let expected = temp
            .path()
            .join("records")
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(&hex)
            .join(RECORDS_INDEX_FILENAME);
        assert!(expected.is_file());
        assert_eq!(index.fetch_records(&patient).unwrap(), records);
    }

    #[test]
    fn sharded_index_missing_is_empty_and_garbage_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let index = ShardedRecordIndex::new(temp.path());
        let patient = PatientId::new();
        assert!(index.fetch_records(&patient).unwrap().is_empty());

        let dir = patient.sharded_dir(temp.path());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(RECORDS_INDEX_FILENAME), "{not json").unwrap();
        assert!(matches!(
            index.fetch_records(&patient),
            Err(StorageError::Corrupt(_))
        ));
    }
}
