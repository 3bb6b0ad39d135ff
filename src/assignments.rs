//! Which teacher may grade which (class, subject) in a session.
//!
//! Writes are keyed by the (teacher, class, subject, session) tuple and need
//! no coordination across tuples.

use uuid::Uuid;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Actor, Assignment, AssignmentKey};

#[derive(Clone)]
pub struct AssignmentIndex {
    db: Database,
}

impl AssignmentIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Whether an active assignment matches all four keys.
    pub async fn is_authorized(&self, key: AssignmentKey) -> Result<bool> {
        self.db.run(move |db| db.is_assigned(&key)).await
    }

    /// Creates the assignment or reactivates it. Assigning an already active
    /// tuple is a no-op.
    pub async fn assign(&self, key: AssignmentKey) -> Result<Assignment> {
        let assignment = self.db.run(move |db| db.assign(&key)).await?;
        tracing::info!(
            teacher_id = %key.teacher_id,
            class_id = %key.class_id,
            subject_id = %key.subject_id,
            session_id = %key.session_id,
            "Assigned teacher"
        );
        Ok(assignment)
    }

    /// Marks the matching assignment inactive. Nothing to unassign is not an
    /// error.
    pub async fn unassign(&self, key: AssignmentKey) -> Result<()> {
        let changed = self.db.run(move |db| db.unassign(&key)).await?;
        if changed {
            tracing::info!(
                teacher_id = %key.teacher_id,
                class_id = %key.class_id,
                subject_id = %key.subject_id,
                session_id = %key.session_id,
                "Unassigned teacher"
            );
        } else {
            tracing::debug!(teacher_id = %key.teacher_id, "Unassign matched no active assignment");
        }
        Ok(())
    }

    pub async fn get(&self, key: AssignmentKey) -> Result<Option<Assignment>> {
        self.db.run(move |db| db.get_assignment(&key)).await
    }

    pub async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<Assignment>> {
        self.db.run(move |db| db.list_assignments(session_id)).await
    }

    /// Checks that `actor` may grade `subject_id` of `class_id` in `session_id`.
    ///
    /// Administrators always may; teachers need an active assignment.
    pub async fn authorize(
        &self,
        actor: &Actor,
        class_id: Uuid,
        subject_id: Uuid,
        session_id: Uuid,
    ) -> Result<()> {
        if actor.is_admin() {
            return Ok(());
        }

        let key = AssignmentKey {
            teacher_id: actor.id,
            class_id,
            subject_id,
            session_id,
        };
        if self.is_authorized(key).await? {
            Ok(())
        } else {
            tracing::warn!(
                actor_id = %actor.id,
                class_id = %class_id,
                subject_id = %subject_id,
                "Actor is not assigned to grade this class and subject"
            );
            Err(Error::Forbidden(
                "not assigned to this class and subject in the active session".to_string(),
            ))
        }
    }
}
