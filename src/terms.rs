//! Term activation.
//!
//! Exactly one term, and the session that owns it, are active at a time. An
//! activation moves both in a single transaction guarded twice:
//!
//! - an activation lease in the store, so a second activation that starts
//!   while one is in flight fails fast with [`Error::Conflict`];
//! - the active pointer's version, read when the activation is staged and
//!   checked again at commit, so a commit that raced a newer one is rolled
//!   back and retried instead of overwriting it.

use std::time::Duration;

use uuid::Uuid;

use crate::config::{Config, RetryPolicy};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{ActiveTerm, ActiveTermState, CreateSessionInput, CreateTermInput, Session, Term};

#[derive(Clone)]
pub struct TermLifecycleManager {
    db: Database,
    retry: RetryPolicy,
    lease_ttl: Duration,
}

impl TermLifecycleManager {
    pub fn new(db: Database) -> Self {
        Self::with_config(db, &Config::default())
    }

    pub fn with_config(db: Database, config: &Config) -> Self {
        Self {
            db,
            retry: config.retry,
            lease_ttl: config.lease_ttl,
        }
    }

    /// Makes `term_id` the only active term and its session the only active
    /// session, returning the new active pair.
    ///
    /// The work runs on its own task: if the caller stops waiting, the
    /// activation still either commits in full or rolls back, and the lease
    /// is released either way.
    pub async fn activate(&self, term_id: Uuid) -> Result<ActiveTerm> {
        let db = self.db.clone();
        let retry = self.retry;
        let lease_ttl = self.lease_ttl;

        tokio::spawn(async move { activate_under_lease(db, term_id, retry, lease_ttl).await })
            .await?
    }

    /// The current active pair, or [`ActiveTermState::NoActiveTerm`] before
    /// the first activation.
    pub async fn get_active(&self) -> Result<ActiveTermState> {
        self.db.run(|db| db.get_active()).await
    }

    /// Terms owned by `session_id`, in ordinal order.
    pub async fn list_terms(&self, session_id: Uuid) -> Result<Vec<Term>> {
        self.db.run(move |db| db.list_terms(session_id)).await
    }

    pub async fn get_term(&self, id: Uuid) -> Result<Term> {
        self.db
            .run(move |db| db.get_term(id))
            .await?
            .ok_or_else(|| Error::not_found("term", id))
    }

    // ============================================================
    // Session and term administration
    // ============================================================

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.db.run(|db| db.list_sessions()).await
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Session> {
        self.db
            .run(move |db| db.get_session(id))
            .await?
            .ok_or_else(|| Error::not_found("session", id))
    }

    pub async fn create_session(&self, input: CreateSessionInput) -> Result<Session> {
        let session = self.db.run(move |db| db.create_session(input)).await?;
        tracing::info!(session_id = %session.id, "Created session {}", session.name);
        Ok(session)
    }

    /// Deletes a session that owns no terms or assignments and is not active.
    pub async fn delete_session(&self, id: Uuid) -> Result<()> {
        if self.db.run(move |db| db.delete_session(id)).await? {
            tracing::info!(session_id = %id, "Deleted session");
            Ok(())
        } else {
            Err(Error::not_found("session", id))
        }
    }

    pub async fn create_term(&self, session_id: Uuid, input: CreateTermInput) -> Result<Term> {
        let term = self
            .db
            .run(move |db| db.create_term(session_id, input))
            .await?;
        tracing::info!(term_id = %term.id, session_id = %session_id, "Created term {}", term.name);
        Ok(term)
    }
}

async fn activate_under_lease(
    db: Database,
    term_id: Uuid,
    retry: RetryPolicy,
    lease_ttl: Duration,
) -> Result<ActiveTerm> {
    let holder = Uuid::new_v4().to_string();

    let acquired = {
        let holder = holder.clone();
        db.run(move |db| db.try_acquire_activation_lease(&holder, lease_ttl))
            .await?
    };
    if !acquired {
        tracing::warn!(term_id = %term_id, "Rejected activation: another activation is in flight");
        return Err(Error::Conflict(
            "another term activation is already in flight".to_string(),
        ));
    }

    let result = activate_with_retry(&db, term_id, retry).await;

    let released = db
        .run(move |db| db.release_activation_lease(&holder))
        .await;
    match released {
        Ok(true) => {}
        Ok(false) => tracing::warn!(term_id = %term_id, "Activation lease was taken over before release"),
        Err(e) => tracing::error!(term_id = %term_id, "Failed to release activation lease: {}", e),
    }

    result
}

async fn activate_with_retry(db: &Database, term_id: Uuid, retry: RetryPolicy) -> Result<ActiveTerm> {
    for attempt in 0..=retry.retries {
        if attempt > 0 {
            tracing::debug!(term_id = %term_id, attempt, "Retrying activation after version conflict");
            tokio::time::sleep(retry.backoff_for(attempt)).await;
        }

        let committed = db
            .run(move |db| {
                if let ActiveTermState::Active(current) = db.get_active()? {
                    if current.term.id == term_id {
                        return Ok(Some(current));
                    }
                }
                let staged = db.stage_activation(term_id)?;
                db.commit_activation(&staged)
            })
            .await?;

        if let Some(active) = committed {
            tracing::info!(
                term_id = %active.term.id,
                session_id = %active.session.id,
                version = active.version,
                "Activated term {} of session {}",
                active.term.name,
                active.session.name
            );
            return Ok(active);
        }
    }

    tracing::warn!(term_id = %term_id, "Activation lost every retry to concurrent activations");
    Err(Error::Conflict(format!(
        "term activation conflicted with concurrent activations {} times",
        retry.retries + 1
    )))
}
