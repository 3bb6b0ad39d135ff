//! Caller identity extraction.
//!
//! Credentials are issued and checked upstream; by the time a request reaches
//! this service the gateway has stamped it with the caller's id and role.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};
use uuid::Uuid;

use crate::models::{Actor, Role};

pub const ACTOR_ID_HEADER: &str = "X-Actor-Id";
pub const ACTOR_ROLE_HEADER: &str = "X-Actor-Role";

/// Reads the actor from the identity headers.
fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, (StatusCode, String)> {
    let id = headers
        .get(ACTOR_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing {} header", ACTOR_ID_HEADER);
            (StatusCode::UNAUTHORIZED, format!("Missing {} header", ACTOR_ID_HEADER))
        })?;
    let id = Uuid::parse_str(id.trim()).map_err(|_| {
        tracing::warn!("Invalid {} header", ACTOR_ID_HEADER);
        (StatusCode::UNAUTHORIZED, format!("Invalid {} header", ACTOR_ID_HEADER))
    })?;

    let role = headers
        .get(ACTOR_ROLE_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| Role::from_str(s.trim()))
        .ok_or_else(|| {
            tracing::warn!("Missing or unknown {} header", ACTOR_ROLE_HEADER);
            (
                StatusCode::UNAUTHORIZED,
                format!("Missing or unknown {} header", ACTOR_ROLE_HEADER),
            )
        })?;

    Ok(Actor { id, role })
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers)
    }
}

/// An actor that has been checked to hold the admin role.
#[derive(Debug, Clone, Copy)]
pub struct AdminActor(pub Actor);

impl<S> FromRequestParts<S> for AdminActor
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = actor_from_headers(&parts.headers)?;
        if actor.is_admin() {
            Ok(Self(actor))
        } else {
            tracing::warn!(actor_id = %actor.id, "Administrative route called by non-admin");
            Err((StatusCode::FORBIDDEN, "Administrator role required".to_string()))
        }
    }
}
