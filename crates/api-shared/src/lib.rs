//! # API Shared
//!
//! Shared utilities and definitions for LifeTag APIs.
//!
//! Contains:
//! - Wire types for requests and responses (`dto` module), with OpenAPI schemas
//! - Shared services like `HealthService`
//! - Authentication utilities (API key and actor headers)
//!
//! Used by `api-rest` and the workspace runner.

pub mod auth;
pub mod dto;
pub mod health;

pub use auth::{AuthError, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER, API_KEY_HEADER};
pub use dto::*;
pub use health::HealthService;
