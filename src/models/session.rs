use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An academic year.
///
/// At most one session is active at a time. A session only becomes active as
/// part of activating one of its terms, and only becomes inactive when a term
/// of a different session is activated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a new session. Sessions are always created inactive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionInput {
    pub name: String,
}
