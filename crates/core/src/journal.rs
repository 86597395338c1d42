//! Append-only consent journal.
//!
//! Every committed audit entry is written as one JSON line. Transition entries also carry the
//! grant as it stands after the transition, so replaying the file rebuilds both the grant
//! store and the audit log.
//!
//! ```text
//! <data_dir>/consent-journal.jsonl
//! {"entry":{"sequence":1,"action":"request",...},"grant":{"id":"...","state":"requested",...}}
//! {"entry":{"sequence":2,"action":"read-denied",...}}
//! ```
//!
//! A [`FileJournal`] holds an exclusive advisory lock on the file for as long as it is open, so
//! a second writer fails fast instead of interleaving sequence numbers. [`replay`] takes no lock
//! and can read a journal that a live server is appending to.

use crate::audit::AccessAuditEntry;
use crate::grants::AccessGrant;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("failed to open journal {path}: {source}", path = path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("journal {path} is locked by another writer", path = path.display())]
    Locked { path: PathBuf },
    #[error("failed to write journal: {0}")]
    Write(std::io::Error),
    #[error("failed to read journal: {0}")]
    Read(std::io::Error),
    #[error("failed to serialise journal record: {0}")]
    Serialization(serde_json::Error),
    #[error("corrupt journal record at line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub entry: AccessAuditEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant: Option<AccessGrant>,
}

/// Durable destination for committed audit entries.
///
/// `append` must either persist the whole record or return an error; the audit log only makes
/// a transition visible after `append` succeeds.
pub trait JournalSink: Send + Sync {
    fn append(&self, record: &JournalRecord) -> Result<(), JournalError>;
}

/// Keeps nothing. For in-memory deployments and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullJournal;

impl JournalSink for NullJournal {
    fn append(&self, _record: &JournalRecord) -> Result<(), JournalError> {
        Ok(())
    }
}

/// JSON-lines journal on the local filesystem.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileJournal {
    /// Opens (creating if needed) the journal at `path` for appending.
    ///
    /// Fails with [`JournalError::Locked`] while another `FileJournal` has the file open. A torn
    /// final line left by an interrupted append is cut off before the first new record lands.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let open_err = |source| JournalError::Open {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(open_err)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(JournalError::Locked {
                    path: path.to_path_buf(),
                })
            }
            Err(TryLockError::Error(source)) => return Err(open_err(source)),
        }
        repair_tail(&mut file).map_err(open_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JournalSink for FileJournal {
    fn append(&self, record: &JournalRecord) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(record).map_err(JournalError::Serialization)?;
        line.push(b'\n');

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let start = file.metadata().map_err(JournalError::Write)?.len();

        let written = file.write_all(&line).and_then(|()| file.sync_data());
        if let Err(e) = written {
            // Drop any partial line so later appends stay parseable.
            if let Err(truncate_err) = file.set_len(start) {
                tracing::error!(
                    error = %truncate_err,
                    "failed to truncate journal after a failed append"
                );
            }
            return Err(JournalError::Write(e));
        }
        Ok(())
    }
}

/// Makes the file end on a line boundary.
///
/// An unterminated final line that parses is kept and terminated; one that does not is an
/// interrupted write and is truncated away.
fn repair_tail(file: &mut File) -> std::io::Result<()> {
    let len = file.metadata()?.len();
    let keep = end_of_last_line(file, len)?;
    if keep == len {
        return Ok(());
    }

    let mut tail = Vec::new();
    file.seek(SeekFrom::Start(keep))?;
    file.read_to_end(&mut tail)?;
    if serde_json::from_slice::<JournalRecord>(&tail).is_ok() {
        file.write_all(b"\n")?;
    } else {
        tracing::warn!(offset = keep, bytes = tail.len(), "truncating torn journal tail");
        file.set_len(keep)?;
    }
    file.sync_data()
}

/// Offset just past the last `\n` in the first `len` bytes, or 0 when there is none.
fn end_of_last_line(file: &mut File, len: u64) -> std::io::Result<u64> {
    const CHUNK: u64 = 4096;
    let mut buf = [0u8; CHUNK as usize];
    let mut end = len;
    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

/// Reads every record from the journal at `path`.
///
/// A missing file is an empty journal. A final line that does not parse and is not
/// newline-terminated is treated as an interrupted write and skipped; any other unparsable line
/// is an error.
pub fn replay(path: &Path) -> Result<Vec<JournalRecord>, JournalError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(JournalError::Read(e)),
    };

    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut line_no = 0usize;
    let mut buf = String::new();

    loop {
        buf.clear();
        let read = reader.read_line(&mut buf).map_err(JournalError::Read)?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let terminated = buf.ends_with('\n');
        let trimmed = buf.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<JournalRecord>(trimmed) {
            Ok(record) => records.push(record),
            Err(source) if !terminated => {
                tracing::warn!(line = line_no, error = %source, "skipping torn journal tail");
                break;
            }
            Err(source) => {
                return Err(JournalError::Corrupt {
                    line: line_no,
                    source,
                })
            }
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use crate::identity::Actor;
    use chrono::Utc;
    use lifetag_ids::{DoctorId, PatientId};
    use tempfile::TempDir;

    fn record(sequence: u64) -> JournalRecord {
        let doctor = DoctorId::new();
        JournalRecord {
            entry: AccessAuditEntry {
                sequence,
                actor: Actor::Doctor(doctor),
                patient_id: PatientId::new(),
                doctor_id: Some(doctor),
                action: AuditAction::ReadDenied,
                timestamp: Utc::now(),
                grant_id: None,
                detail: Some("not_active".into()),
            },
            grant: None,
        }
    }

    #[test]
    fn missing_journal_replays_empty() {
        let temp = TempDir::new().unwrap();
        let records = replay(&temp.path().join("absent.jsonl")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn appended_records_replay_in_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("journal.jsonl");
        let journal = FileJournal::open(&path).unwrap();

        let first = record(1);
        let second = record(2);
        journal.append(&first).unwrap();
        journal.append(&second).unwrap();

        let replayed = replay(&path).unwrap();
        assert_eq!(replayed, vec![first, second]);
    }

    #[test]
    fn torn_tail_is_skipped_and_cut_on_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("journal.jsonl");
        let first = record(1);
        FileJournal::open(&path).unwrap().append(&first).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"entry\":{\"seq").unwrap();
        drop(file);
        assert_eq!(replay(&path).unwrap(), vec![first.clone()]);

        let second = record(2);
        FileJournal::open(&path).unwrap().append(&second).unwrap();
        assert_eq!(replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn complete_but_unterminated_tail_is_kept() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("journal.jsonl");
        let first = record(1);
        std::fs::write(&path, serde_json::to_vec(&first).unwrap()).unwrap();

        let second = record(2);
        FileJournal::open(&path).unwrap().append(&second).unwrap();
        assert_eq!(replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn second_writer_is_refused_until_the_first_closes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("journal.jsonl");
        let journal = FileJournal::open(&path).unwrap();

        assert!(matches!(
            FileJournal::open(&path),
            Err(JournalError::Locked { .. })
        ));
        assert!(replay(&path).unwrap().is_empty());

        drop(journal);
        assert!(FileJournal::open(&path).is_ok());
    }

    #[test]
    fn corrupt_middle_line_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("journal.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        let journal = FileJournal::open(&path).unwrap();
        journal.append(&record(1)).unwrap();

        assert!(matches!(
            replay(&path),
            Err(JournalError::Corrupt { line: 1, .. })
        ));
    }
}
