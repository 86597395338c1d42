use crate::decision::DenyReason;
use crate::grants::{GrantAction, GrantState};
use crate::identity::Actor;
use crate::journal::JournalError;
use crate::records::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ConsentError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("doctor is not eligible to hold or use access grants")]
    NotEligible,
    #[error("actor is not permitted to act on this grant")]
    Forbidden,
    #[error("a pending or active grant already exists for this doctor and patient")]
    DuplicateRequest,
    #[error("another grant for this doctor and patient is already active")]
    ConflictingGrant,
    #[error("cannot {action} a grant in state {from}")]
    InvalidTransition {
        from: GrantState,
        action: GrantAction,
    },
    #[error("access denied: {0}")]
    Denied(DenyReason),
    #[error("record storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type ConsentResult<T> = std::result::Result<T, ConsentError>;

/// Stable, machine-readable classification of a [`ConsentError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    NotEligible,
    Forbidden,
    DuplicateRequest,
    ConflictingGrant,
    InvalidTransition,
    Denied,
    /// Generic denial shown to doctors in place of the detailed kinds above.
    AccessDenied,
    StorageError,
    InvalidInput,
    Internal,
}

/// An error as it may be shown to a particular audience.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotEligible => "not_eligible",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::DuplicateRequest => "duplicate_request",
            ErrorKind::ConflictingGrant => "conflicting_grant",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Denied => "denied",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Internal => "internal",
        }
    }
}

impl ConsentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsentError::NotFound(_) => ErrorKind::NotFound,
            ConsentError::NotEligible => ErrorKind::NotEligible,
            ConsentError::Forbidden => ErrorKind::Forbidden,
            ConsentError::DuplicateRequest => ErrorKind::DuplicateRequest,
            ConsentError::ConflictingGrant => ErrorKind::ConflictingGrant,
            ConsentError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            ConsentError::Denied(_) => ErrorKind::Denied,
            ConsentError::Storage(_) => ErrorKind::StorageError,
            ConsentError::InvalidInput(_) => ErrorKind::InvalidInput,
            ConsentError::Journal(_) | ConsentError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Returns the view of this error that `audience` is allowed to see.
    ///
    /// Doctors get one generic denial for every outcome that could reveal whether a grant or
    /// patient exists, or why they are ineligible. Patients and admins see full detail.
    /// Internal failures never expose their cause to anyone.
    pub fn redacted_for(&self, audience: &Actor) -> ErrorReport {
        let hides_detail = matches!(
            self,
            ConsentError::NotFound(_)
                | ConsentError::NotEligible
                | ConsentError::Forbidden
                | ConsentError::ConflictingGrant
                | ConsentError::Denied(_)
        );

        if matches!(audience, Actor::Doctor(_)) && hides_detail {
            return ErrorReport {
                kind: ErrorKind::AccessDenied,
                message: "access denied".into(),
            };
        }

        match self.kind() {
            ErrorKind::Internal => ErrorReport {
                kind: ErrorKind::Internal,
                message: "internal error".into(),
            },
            kind => ErrorReport {
                kind,
                message: self.to_string(),
            },
        }
    }
}
