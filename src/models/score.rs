use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A raw numeric score recorded for a student in one subject of one class,
/// during one term.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Score {
    pub id: Uuid,
    pub student_id: Uuid,
    pub class_id: Uuid,
    pub subject_id: Uuid,
    pub term_id: Uuid,
    pub score: f64,
    /// The actor who last wrote this score.
    pub recorded_by: Uuid,
    pub recorded_at: DateTime<Utc>,
}

/// Input for recording a score against the active term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordScoreInput {
    pub student_id: Uuid,
    pub class_id: Uuid,
    pub subject_id: Uuid,
    pub score: f64,
}

/// One line of a term report: a stored score with the grade it resolves to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportRow {
    pub student_id: Uuid,
    pub score: f64,
    pub grade: String,
    pub remark: String,
}
