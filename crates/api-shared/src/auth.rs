//! Request authentication.
//!
//! Callers present the deployment API key in `x-api-key` and name the acting identity with
//! `x-actor-role` (`patient`, `doctor`, or `admin`) and `x-actor-id` (canonical 32-hex id).
//! The expected key is resolved once at startup and passed in; nothing here reads the
//! environment.

use lifetag_core::{Actor, AdminId, DoctorId, IdError, PatientId};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("invalid API key")]
    InvalidApiKey,
    #[error("missing actor headers")]
    MissingActor,
    #[error("invalid actor: {0}")]
    InvalidActor(String),
}

/// Validates the provided API key against the expected key.
pub fn validate_api_key(provided: Option<&str>, expected: &str) -> Result<(), AuthError> {
    let provided = provided.ok_or(AuthError::MissingApiKey)?;
    if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::InvalidApiKey)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Builds the acting identity from the role and id headers.
///
/// `system` is never accepted from a caller.
pub fn parse_actor(role: Option<&str>, id: Option<&str>) -> Result<Actor, AuthError> {
    let (role, id) = match (role, id) {
        (Some(role), Some(id)) => (role.trim().to_ascii_lowercase(), id.trim()),
        _ => return Err(AuthError::MissingActor),
    };
    let invalid_id = |e: IdError| {
        AuthError::InvalidActor(format!("{role} id: {e}"))
    };

    match role.as_str() {
        "patient" => PatientId::parse(id).map(Actor::Patient).map_err(invalid_id),
        "doctor" => DoctorId::parse(id).map(Actor::Doctor).map_err(invalid_id),
        "admin" => AdminId::parse(id).map(Actor::Admin).map_err(invalid_id),
        other => Err(AuthError::InvalidActor(format!("unknown role {other}"))),
    }
}
