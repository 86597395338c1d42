use crate::error::ApiError;
use crate::AppState;
use api_shared::auth::{self, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER, API_KEY_HEADER};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use lifetag_core::Actor;

/// The caller's identity, taken from the actor headers once the API key checks out.
#[derive(Clone, Copy, Debug)]
pub struct AuthenticatedActor(pub Actor);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthenticatedActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        auth::validate_api_key(header(parts, API_KEY_HEADER), state.api_key())?;
        let actor = auth::parse_actor(
            header(parts, ACTOR_ROLE_HEADER),
            header(parts, ACTOR_ID_HEADER),
        )?;
        Ok(Self(actor))
    }
}
