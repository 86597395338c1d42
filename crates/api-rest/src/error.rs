use api_shared::{AuthError, ErrorRes};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lifetag_core::{Actor, ConsentError, ErrorKind};

/// An error rendered as a JSON body with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorRes,
}

impl ApiError {
    /// Renders a core error for `audience`. Doctors get the redacted view, and the status code
    /// follows the redacted kind so it reveals nothing extra.
    pub fn consent(err: ConsentError, audience: &Actor) -> Self {
        let report = err.redacted_for(audience);
        let status = status_for(report.kind);
        if status.is_server_error() {
            tracing::error!(error = %err, actor = %audience, "request failed");
        } else {
            tracing::warn!(kind = err.kind().as_str(), actor = %audience, "request rejected");
        }
        Self {
            status,
            body: report.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorRes {
                kind: ErrorKind::InvalidInput.as_str().to_owned(),
                message: message.into(),
            },
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorRes {
                kind: ErrorKind::Internal.as_str().to_owned(),
                message: "internal error".into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::NotEligible
        | ErrorKind::Forbidden
        | ErrorKind::Denied
        | ErrorKind::AccessDenied => StatusCode::FORBIDDEN,
        ErrorKind::DuplicateRequest
        | ErrorKind::ConflictingGrant
        | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::StorageError => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let (status, kind) = match err {
            AuthError::MissingApiKey | AuthError::InvalidApiKey => {
                (StatusCode::UNAUTHORIZED, "unauthenticated")
            }
            AuthError::MissingActor | AuthError::InvalidActor(_) => {
                (StatusCode::BAD_REQUEST, "invalid_actor")
            }
        };
        Self {
            status,
            body: ErrorRes {
                kind: kind.to_owned(),
                message: err.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
