use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::Session;

/// A sub-period of a [`Session`], e.g. "First Term".
///
/// Terms are ordered within their session by `ordinal` and are never deleted,
/// since recorded scores keep referring to them after they stop being active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Term {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub active: bool,
    /// Position within the owning session, starting at 1.
    pub ordinal: i64,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a term under a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTermInput {
    pub name: String,
    /// Defaults to one past the highest ordinal already used in the session.
    #[serde(default)]
    pub ordinal: Option<i64>,
}

/// The session and term currently in force for new grading activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveTerm {
    pub session: Session,
    pub term: Term,
    /// Monotonic counter bumped by every committed activation.
    pub version: i64,
    pub activated_at: DateTime<Utc>,
}

/// Result of asking which term is active.
///
/// A fresh installation has no active term; that is a normal state rather
/// than an error, so it gets its own variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActiveTermState {
    Active(ActiveTerm),
    NoActiveTerm,
}

impl ActiveTermState {
    pub fn into_option(self) -> Option<ActiveTerm> {
        match self {
            Self::Active(active) => Some(active),
            Self::NoActiveTerm => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}
