//! Constants used throughout the LifeTag core crate.
//!
//! Path and filename constants live here so that the runner, the CLI, and the tests agree on
//! the on-disk layout.

/// Default directory for engine state when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "lifetag_data";

/// Filename of the append-only consent journal (one JSON object per line).
pub const JOURNAL_FILENAME: &str = "consent-journal.jsonl";

/// Directory name for the sharded medical record indexes.
pub const RECORDS_DIR_NAME: &str = "records";

/// Filename of a single patient's record index inside its sharded directory.
pub const RECORDS_INDEX_FILENAME: &str = "records.json";

/// Filename of the optional identity seed file.
pub const IDENTITIES_FILENAME: &str = "identities.yaml";

/// Sweep interval used when the policy does not specify one.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Upper bound for the sweep interval; a longer interval would let expired grants linger in
/// listings for too long.
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Longest accepted revocation reason, in characters.
pub const MAX_REVOCATION_REASON_CHARS: usize = 500;

/// Longest accepted grant validity, in hours (five years).
pub const MAX_GRANT_VALIDITY_HOURS: i64 = 5 * 365 * 24;
