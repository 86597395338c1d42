//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the core services.
//! Nothing in the request path reads environment variables.

use crate::constants::{
    DEFAULT_SWEEP_INTERVAL_SECS, IDENTITIES_FILENAME, JOURNAL_FILENAME, MAX_GRANT_VALIDITY_HOURS,
    MAX_SWEEP_INTERVAL_SECS, RECORDS_DIR_NAME,
};
use crate::{ConsentError, ConsentResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Consent policy as written in a YAML policy file.
///
/// ```yaml
/// default_validity_hours: 720
/// sweep_interval_secs: 60
/// journal: true
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConsentPolicy {
    /// Validity applied to a grant when the patient approves it without choosing one.
    /// Absent means approved grants do not expire automatically.
    #[serde(default)]
    pub default_validity_hours: Option<i64>,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Persist grant transitions and audit entries to the journal file.
    #[serde(default = "default_journal")]
    pub journal: bool,
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_journal() -> bool {
    true
}

impl Default for ConsentPolicy {
    fn default() -> Self {
        Self {
            default_validity_hours: None,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            journal: true,
        }
    }
}

impl ConsentPolicy {
    pub fn from_yaml_str(raw: &str) -> ConsentResult<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| ConsentError::Config(format!("invalid consent policy: {e}")))
    }

    pub fn load(path: &Path) -> ConsentResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConsentError::Config(format!(
                "failed to read consent policy {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&raw)
    }
}

/// Resolve the consent policy without reading environment variables.
///
/// If `override_path` is provided the file must exist and parse. Otherwise the default policy
/// is used.
pub fn resolve_policy(override_path: Option<PathBuf>) -> ConsentResult<ConsentPolicy> {
    match override_path {
        Some(path) if path.is_file() => ConsentPolicy::load(&path),
        Some(path) => Err(ConsentError::Config(format!(
            "LIFETAG_POLICY_FILE override is not a file: {}",
            path.display()
        ))),
        None => Ok(ConsentPolicy::default()),
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    default_grant_validity: Option<chrono::Duration>,
    sweep_interval: std::time::Duration,
    journal_enabled: bool,
}

impl CoreConfig {
    /// Create a new `CoreConfig`, validating the policy values.
    pub fn new(data_dir: PathBuf, policy: ConsentPolicy) -> ConsentResult<Self> {
        if data_dir.as_os_str().is_empty() {
            return Err(ConsentError::InvalidInput("data_dir cannot be empty".into()));
        }

        let default_grant_validity = match policy.default_validity_hours {
            Some(hours) if hours <= 0 || hours > MAX_GRANT_VALIDITY_HOURS => {
                return Err(ConsentError::InvalidInput(format!(
                    "default_validity_hours must be between 1 and {MAX_GRANT_VALIDITY_HOURS}"
                )));
            }
            Some(hours) => Some(chrono::Duration::hours(hours)),
            None => None,
        };

        if policy.sweep_interval_secs == 0 || policy.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS
        {
            return Err(ConsentError::InvalidInput(format!(
                "sweep_interval_secs must be between 1 and {MAX_SWEEP_INTERVAL_SECS}"
            )));
        }

        Ok(Self {
            data_dir,
            default_grant_validity,
            sweep_interval: std::time::Duration::from_secs(policy.sweep_interval_secs),
            journal_enabled: policy.journal,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(JOURNAL_FILENAME)
    }

    pub fn records_dir(&self) -> PathBuf {
        self.data_dir.join(RECORDS_DIR_NAME)
    }

    pub fn identities_path(&self) -> PathBuf {
        self.data_dir.join(IDENTITIES_FILENAME)
    }

    pub fn default_grant_validity(&self) -> Option<chrono::Duration> {
        self.default_grant_validity
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        self.sweep_interval
    }

    pub fn journal_enabled(&self) -> bool {
        self.journal_enabled
    }
}
