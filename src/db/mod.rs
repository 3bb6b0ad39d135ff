mod schema;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::*;

/// Handle to the system of record.
///
/// Cloning is cheap and every clone shares one connection. Nothing read from
/// the store is cached here: every call observes the current committed state.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// The target of an activation together with the active-pointer version it
/// was staged against.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedActivation {
    pub term: Term,
    pub version: i64,
}

const SESSION_COLUMNS: &str = "s.id, s.name, s.active, s.created_at";
const TERM_COLUMNS: &str = "t.id, t.session_id, t.name, t.active, t.ordinal, t.created_at";
const ASSIGNMENT_COLUMNS: &str =
    "id, teacher_id, class_id, subject_id, session_id, active, created_at, updated_at";
const RULE_COLUMNS: &str = "id, min_score, max_score, grade, remark, created_at, updated_at";
const SCORE_COLUMNS: &str =
    "id, student_id, class_id, subject_id, term_id, score, recorded_by, recorded_at";

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent).map_err(anyhow::Error::from)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::configure(conn)
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "registrar")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("registrar.db");
        Self::open(db_path)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        schema::run_migrations(&conn)?;
        Ok(())
    }

    /// Runs blocking store work on the blocking thread pool.
    ///
    /// The closure runs to completion even if the returned future is dropped,
    /// so a unit of work that was started is never abandoned half way.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal(anyhow::anyhow!("database lock poisoned")))
    }

    // ============================================================
    // Session operations
    // ============================================================

    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM academic_sessions s ORDER BY s.name"
        ))?;

        let sessions = stmt
            .query_map([], |row| session_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(sessions)
    }

    pub fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let conn = self.conn()?;
        query_session(&conn, id)
    }

    pub fn create_session(&self, input: CreateSessionInput) -> Result<Session> {
        let conn = self.conn()?;
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO academic_sessions (id, name, active, created_at) VALUES (?, ?, 0, ?)",
            (id.to_string(), &input.name, now.to_rfc3339()),
        )?;

        Ok(Session {
            id,
            name: input.name,
            active: false,
            created_at: now,
        })
    }

    /// Deletes an empty, inactive session. Returns `false` if it does not exist.
    pub fn delete_session(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn()?;
        let Some(session) = query_session(&conn, id)? else {
            return Ok(false);
        };

        if session.active {
            return Err(Error::Conflict("cannot delete the active session".to_string()));
        }

        let dependents: i64 = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM terms WHERE session_id = ?1)
                  + (SELECT COUNT(*) FROM assignments WHERE session_id = ?1)",
            [id.to_string()],
            |row| row.get(0),
        )?;
        if dependents > 0 {
            return Err(Error::Conflict(
                "session still has terms or assignments".to_string(),
            ));
        }

        let rows = conn.execute("DELETE FROM academic_sessions WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    // ============================================================
    // Term operations
    // ============================================================

    pub fn get_term(&self, id: Uuid) -> Result<Option<Term>> {
        let conn = self.conn()?;
        query_term(&conn, id)
    }

    /// Terms of a session in ordinal order.
    pub fn list_terms(&self, session_id: Uuid) -> Result<Vec<Term>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TERM_COLUMNS} FROM terms t WHERE t.session_id = ? ORDER BY t.ordinal"
        ))?;

        let terms = stmt
            .query_map([session_id.to_string()], |row| term_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(terms)
    }

    pub fn create_term(&self, session_id: Uuid, input: CreateTermInput) -> Result<Term> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if query_session(&tx, session_id)?.is_none() {
            return Err(Error::not_found("session", session_id));
        }

        let ordinal = match input.ordinal {
            Some(ordinal) => ordinal,
            None => tx.query_row(
                "SELECT COALESCE(MAX(ordinal), 0) + 1 FROM terms WHERE session_id = ?",
                [session_id.to_string()],
                |row| row.get(0),
            )?,
        };

        let id = Uuid::new_v4();
        let now = Utc::now();
        tx.execute(
            "INSERT INTO terms (id, session_id, name, active, ordinal, created_at)
             VALUES (?, ?, ?, 0, ?, ?)",
            (
                id.to_string(),
                session_id.to_string(),
                &input.name,
                ordinal,
                now.to_rfc3339(),
            ),
        )
        .map_err(|e| {
            constraint_conflict(e, || {
                format!("session already has a term with ordinal {}", ordinal)
            })
        })?;
        tx.commit()?;

        Ok(Term {
            id,
            session_id,
            name: input.name,
            active: false,
            ordinal,
            created_at: now,
        })
    }

    // ============================================================
    // Active term
    // ============================================================

    pub fn get_active(&self) -> Result<ActiveTermState> {
        let conn = self.conn()?;
        query_active(&conn)
    }

    /// Reads the activation target and the current pointer version together.
    pub fn stage_activation(&self, term_id: Uuid) -> Result<StagedActivation> {
        let conn = self.conn()?;
        let term = query_term(&conn, term_id)?.ok_or_else(|| Error::not_found("term", term_id))?;
        let version = conn.query_row("SELECT version FROM active_term WHERE id = 1", [], |row| {
            row.get(0)
        })?;
        Ok(StagedActivation { term, version })
    }

    /// Applies the activation cascade in one transaction.
    ///
    /// Returns `None` without changing anything when the active pointer has
    /// moved since `staged` was read.
    pub fn commit_activation(&self, staged: &StagedActivation) -> Result<Option<ActiveTerm>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now().to_rfc3339();
        let term_id = staged.term.id.to_string();
        let session_id = staged.term.session_id.to_string();

        let claimed = tx.execute(
            "UPDATE active_term SET session_id = ?, term_id = ?, version = version + 1, updated_at = ?
             WHERE id = 1 AND version = ?",
            (&session_id, &term_id, &now, staged.version),
        )?;
        if claimed == 0 {
            return Ok(None);
        }

        // Deactivate before activating: the single-active indexes reject a
        // second active row even inside the transaction.
        tx.execute("UPDATE terms SET active = 0 WHERE active = 1", [])?;
        tx.execute("UPDATE academic_sessions SET active = 0 WHERE active = 1", [])?;
        let sessions = tx.execute(
            "UPDATE academic_sessions SET active = 1 WHERE id = ?",
            [&session_id],
        )?;
        let terms = tx.execute("UPDATE terms SET active = 1 WHERE id = ?", [&term_id])?;
        if sessions != 1 || terms != 1 {
            return Err(Error::not_found("term", staged.term.id));
        }

        let active = query_active(&tx)?.into_option().ok_or_else(|| {
            Error::Internal(anyhow::anyhow!("active pointer unreadable after activation"))
        })?;
        tx.commit()?;

        Ok(Some(active))
    }

    /// Claims the in-flight activation slot for `holder`.
    ///
    /// Succeeds when the slot is free or its current claim is older than `ttl`.
    pub fn try_acquire_activation_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let conn = self.conn()?;
        let now_ms = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let stale_before = now_ms.saturating_sub(ttl_ms);

        let rows = conn.execute(
            "UPDATE activation_lease SET holder = ?, acquired_at_ms = ?
             WHERE id = 1 AND (holder IS NULL OR acquired_at_ms < ?)",
            (holder, now_ms, stale_before),
        )?;
        Ok(rows == 1)
    }

    /// Releases the activation slot if `holder` still owns it.
    pub fn release_activation_lease(&self, holder: &str) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE activation_lease SET holder = NULL, acquired_at_ms = NULL
             WHERE id = 1 AND holder = ?",
            [holder],
        )?;
        Ok(rows == 1)
    }

    pub fn activation_lease_holder(&self) -> Result<Option<String>> {
        let conn = self.conn()?;
        let holder = conn.query_row(
            "SELECT holder FROM activation_lease WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(holder)
    }

    // ============================================================
    // Assignment operations
    // ============================================================

    pub fn get_assignment(&self, key: &AssignmentKey) -> Result<Option<Assignment>> {
        let conn = self.conn()?;
        query_assignment(&conn, key)
    }

    pub fn list_assignments(&self, session_id: Uuid) -> Result<Vec<Assignment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE session_id = ?
             ORDER BY teacher_id, class_id, subject_id"
        ))?;

        let assignments = stmt
            .query_map([session_id.to_string()], assignment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(assignments)
    }

    /// Creates the assignment, or reactivates it if it exists. An already
    /// active assignment is left untouched.
    pub fn assign(&self, key: &AssignmentKey) -> Result<Assignment> {
        let conn = self.conn()?;
        if query_session(&conn, key.session_id)?.is_none() {
            return Err(Error::not_found("session", key.session_id));
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO assignments (id, teacher_id, class_id, subject_id, session_id, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
             ON CONFLICT (teacher_id, class_id, subject_id, session_id) DO UPDATE SET
                active = 1,
                updated_at = CASE WHEN assignments.active = 1
                                  THEN assignments.updated_at
                                  ELSE excluded.updated_at END",
            (
                Uuid::new_v4().to_string(),
                key.teacher_id.to_string(),
                key.class_id.to_string(),
                key.subject_id.to_string(),
                key.session_id.to_string(),
                &now,
            ),
        )?;

        query_assignment(&conn, key)?
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("assignment missing after upsert")))
    }

    /// Marks the assignment inactive. Returns whether an active row changed.
    pub fn unassign(&self, key: &AssignmentKey) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE assignments SET active = 0, updated_at = ?
             WHERE teacher_id = ? AND class_id = ? AND subject_id = ? AND session_id = ? AND active = 1",
            (
                Utc::now().to_rfc3339(),
                key.teacher_id.to_string(),
                key.class_id.to_string(),
                key.subject_id.to_string(),
                key.session_id.to_string(),
            ),
        )?;
        Ok(rows > 0)
    }

    pub fn is_assigned(&self, key: &AssignmentKey) -> Result<bool> {
        let conn = self.conn()?;
        let found: i64 = conn.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM assignments
                WHERE teacher_id = ? AND class_id = ? AND subject_id = ? AND session_id = ? AND active = 1
             )",
            (
                key.teacher_id.to_string(),
                key.class_id.to_string(),
                key.subject_id.to_string(),
                key.session_id.to_string(),
            ),
            |row| row.get(0),
        )?;
        Ok(found != 0)
    }

    // ============================================================
    // Grading rule operations
    // ============================================================

    /// Stored rules in descending order of minimum score.
    pub fn list_rules(&self) -> Result<Vec<GradingRule>> {
        let conn = self.conn()?;
        query_rules(&conn)
    }

    /// The stored rules and the rule-set version they were read at.
    pub fn rule_set_snapshot(&self) -> Result<(Vec<GradingRule>, i64)> {
        let conn = self.conn()?;
        let version = conn.query_row("SELECT version FROM rule_set_meta WHERE id = 1", [], |row| {
            row.get(0)
        })?;
        let rules = query_rules(&conn)?;
        Ok((rules, version))
    }

    /// Replaces the stored rules with `rules` if the rule set is still at
    /// `expected_version`. Returns the new version, or `None` on mismatch.
    ///
    /// Callers validate `rules` first; this only guarantees that what was
    /// validated is exactly what replaces the version it was derived from.
    pub fn commit_rule_set(
        &self,
        expected_version: i64,
        rules: &[GradingRule],
    ) -> Result<Option<i64>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let bumped = tx.execute(
            "UPDATE rule_set_meta SET version = version + 1, updated_at = ?
             WHERE id = 1 AND version = ?",
            (Utc::now().to_rfc3339(), expected_version),
        )?;
        if bumped == 0 {
            return Ok(None);
        }

        tx.execute("DELETE FROM grading_rules", [])?;
        for rule in rules {
            tx.execute(
                &format!("INSERT INTO grading_rules ({RULE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"),
                (
                    rule.id.to_string(),
                    rule.min_score,
                    rule.max_score,
                    &rule.grade,
                    &rule.remark,
                    rule.created_at.to_rfc3339(),
                    rule.updated_at.to_rfc3339(),
                ),
            )?;
        }
        tx.commit()?;

        Ok(Some(expected_version + 1))
    }

    // ============================================================
    // Score operations
    // ============================================================

    /// Writes a score for `term_id`, replacing any earlier score for the same
    /// student, class and subject in that term.
    ///
    /// Fails with [`Error::Conflict`] unless `term_id` is still the active term
    /// when the write commits.
    pub fn upsert_score(
        &self,
        term_id: Uuid,
        recorded_by: Uuid,
        input: &RecordScoreInput,
    ) -> Result<Score> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let active_term: Option<String> =
            tx.query_row("SELECT term_id FROM active_term WHERE id = 1", [], |row| {
                row.get(0)
            })?;
        if active_term.as_deref() != Some(term_id.to_string().as_str()) {
            return Err(Error::Conflict(
                "term is no longer active; score was not recorded".to_string(),
            ));
        }

        tx.execute(
            "INSERT INTO scores (id, student_id, class_id, subject_id, term_id, score, recorded_by, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (student_id, class_id, subject_id, term_id) DO UPDATE SET
                score = excluded.score,
                recorded_by = excluded.recorded_by,
                recorded_at = excluded.recorded_at",
            (
                Uuid::new_v4().to_string(),
                input.student_id.to_string(),
                input.class_id.to_string(),
                input.subject_id.to_string(),
                term_id.to_string(),
                input.score,
                recorded_by.to_string(),
                Utc::now().to_rfc3339(),
            ),
        )?;

        let score = tx.query_row(
            &format!(
                "SELECT {SCORE_COLUMNS} FROM scores
                 WHERE student_id = ? AND class_id = ? AND subject_id = ? AND term_id = ?"
            ),
            (
                input.student_id.to_string(),
                input.class_id.to_string(),
                input.subject_id.to_string(),
                term_id.to_string(),
            ),
            score_from_row,
        )?;
        tx.commit()?;
        Ok(score)
    }

    /// Scores of one class and subject in a term, ordered by student.
    pub fn list_scores(&self, term_id: Uuid, class_id: Uuid, subject_id: Uuid) -> Result<Vec<Score>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCORE_COLUMNS} FROM scores
             WHERE term_id = ? AND class_id = ? AND subject_id = ?
             ORDER BY student_id"
        ))?;

        let scores = stmt
            .query_map(
                (
                    term_id.to_string(),
                    class_id.to_string(),
                    subject_id.to_string(),
                ),
                score_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(scores)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

// ============================================================
// Queries shared by plain reads and transactions
// ============================================================

fn query_session(conn: &Connection, id: Uuid) -> Result<Option<Session>> {
    let session = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM academic_sessions s WHERE s.id = ?"),
            [id.to_string()],
            |row| session_from_row(row, 0),
        )
        .optional()?;
    Ok(session)
}

fn query_term(conn: &Connection, id: Uuid) -> Result<Option<Term>> {
    let term = conn
        .query_row(
            &format!("SELECT {TERM_COLUMNS} FROM terms t WHERE t.id = ?"),
            [id.to_string()],
            |row| term_from_row(row, 0),
        )
        .optional()?;
    Ok(term)
}

fn query_active(conn: &Connection) -> Result<ActiveTermState> {
    let active = conn
        .query_row(
            &format!(
                "SELECT a.version, a.updated_at, {SESSION_COLUMNS}, {TERM_COLUMNS}
                 FROM active_term a
                 JOIN academic_sessions s ON s.id = a.session_id
                 JOIN terms t ON t.id = a.term_id
                 WHERE a.id = 1"
            ),
            [],
            |row| {
                Ok(ActiveTerm {
                    version: row.get(0)?,
                    activated_at: parse_datetime(row.get::<_, String>(1)?),
                    session: session_from_row(row, 2)?,
                    term: term_from_row(row, 6)?,
                })
            },
        )
        .optional()?;

    Ok(match active {
        Some(active) => ActiveTermState::Active(active),
        None => ActiveTermState::NoActiveTerm,
    })
}

fn query_assignment(conn: &Connection, key: &AssignmentKey) -> Result<Option<Assignment>> {
    let assignment = conn
        .query_row(
            &format!(
                "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                 WHERE teacher_id = ? AND class_id = ? AND subject_id = ? AND session_id = ?"
            ),
            (
                key.teacher_id.to_string(),
                key.class_id.to_string(),
                key.subject_id.to_string(),
                key.session_id.to_string(),
            ),
            assignment_from_row,
        )
        .optional()?;
    Ok(assignment)
}

fn query_rules(conn: &Connection) -> Result<Vec<GradingRule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RULE_COLUMNS} FROM grading_rules ORDER BY min_score DESC"
    ))?;

    let rules = stmt
        .query_map([], |row| {
            Ok(GradingRule {
                id: parse_uuid(row.get::<_, String>(0)?),
                min_score: row.get(1)?,
                max_score: row.get(2)?,
                grade: row.get(3)?,
                remark: row.get(4)?,
                created_at: parse_datetime(row.get::<_, String>(5)?),
                updated_at: parse_datetime(row.get::<_, String>(6)?),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rules)
}

// ============================================================
// Row mapping
// ============================================================

fn session_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Session> {
    Ok(Session {
        id: parse_uuid(row.get::<_, String>(base)?),
        name: row.get(base + 1)?,
        active: row.get::<_, i32>(base + 2)? != 0,
        created_at: parse_datetime(row.get::<_, String>(base + 3)?),
    })
}

fn term_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Term> {
    Ok(Term {
        id: parse_uuid(row.get::<_, String>(base)?),
        session_id: parse_uuid(row.get::<_, String>(base + 1)?),
        name: row.get(base + 2)?,
        active: row.get::<_, i32>(base + 3)? != 0,
        ordinal: row.get(base + 4)?,
        created_at: parse_datetime(row.get::<_, String>(base + 5)?),
    })
}

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: parse_uuid(row.get::<_, String>(0)?),
        teacher_id: parse_uuid(row.get::<_, String>(1)?),
        class_id: parse_uuid(row.get::<_, String>(2)?),
        subject_id: parse_uuid(row.get::<_, String>(3)?),
        session_id: parse_uuid(row.get::<_, String>(4)?),
        active: row.get::<_, i32>(5)? != 0,
        created_at: parse_datetime(row.get::<_, String>(6)?),
        updated_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

fn score_from_row(row: &Row<'_>) -> rusqlite::Result<Score> {
    Ok(Score {
        id: parse_uuid(row.get::<_, String>(0)?),
        student_id: parse_uuid(row.get::<_, String>(1)?),
        class_id: parse_uuid(row.get::<_, String>(2)?),
        subject_id: parse_uuid(row.get::<_, String>(3)?),
        term_id: parse_uuid(row.get::<_, String>(4)?),
        score: row.get(5)?,
        recorded_by: parse_uuid(row.get::<_, String>(6)?),
        recorded_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

/// Maps a uniqueness violation to [`Error::Conflict`], passing anything else through.
fn constraint_conflict(e: rusqlite::Error, message: impl FnOnce() -> String) -> Error {
    match e {
        rusqlite::Error::SqliteFailure(ref failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(message())
        }
        other => Error::Storage(other),
    }
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::from_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
