use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The caller of an operation, as supplied by the identity collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

/// - `Admin`: manages sessions, terms, rules and assignments; may grade anything
/// - `Teacher`: may grade only what an active assignment covers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Teacher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "teacher" => Some(Self::Teacher),
            _ => None,
        }
    }
}

impl Actor {
    pub fn admin(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Admin,
        }
    }

    pub fn teacher(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Teacher,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
