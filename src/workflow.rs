//! Grading and reporting built on top of the three core components.
//!
//! Recording a score authorizes the actor against the active session, pins the
//! score to the active term, then writes it. Reporting loads the rule set once
//! and classifies every stored score of a class and subject in a term.

use uuid::Uuid;

use crate::assignments::AssignmentIndex;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::grading::{check_score, GradeResolutionEngine};
use crate::models::{ActiveTermState, Actor, RecordScoreInput, ReportRow, Score};
use crate::terms::TermLifecycleManager;

#[derive(Clone)]
pub struct GradingWorkflow {
    db: Database,
    assignments: AssignmentIndex,
    terms: TermLifecycleManager,
    grading: GradeResolutionEngine,
}

impl GradingWorkflow {
    pub fn new(
        db: Database,
        assignments: AssignmentIndex,
        terms: TermLifecycleManager,
        grading: GradeResolutionEngine,
    ) -> Self {
        Self {
            db,
            assignments,
            terms,
            grading,
        }
    }

    pub async fn record_score(&self, actor: &Actor, input: RecordScoreInput) -> Result<Score> {
        check_score(input.score)?;

        let active = match self.terms.get_active().await? {
            ActiveTermState::Active(active) => active,
            ActiveTermState::NoActiveTerm => {
                return Err(Error::Conflict("no active term to record scores against".to_string()));
            }
        };

        self.assignments
            .authorize(actor, input.class_id, input.subject_id, active.session.id)
            .await?;

        let term_id = active.term.id;
        let recorded_by = actor.id;
        let score = self
            .db
            .run(move |db| db.upsert_score(term_id, recorded_by, &input))
            .await?;

        tracing::debug!(
            student_id = %score.student_id,
            term_id = %term_id,
            actor_id = %recorded_by,
            "Recorded score {}",
            score.score
        );
        Ok(score)
    }

    /// Scores of a class and subject in `term_id`, each with its resolved grade.
    ///
    /// Works for any term, active or not: past terms stay reportable.
    pub async fn term_report(
        &self,
        term_id: Uuid,
        class_id: Uuid,
        subject_id: Uuid,
    ) -> Result<Vec<ReportRow>> {
        self.terms.get_term(term_id).await?;

        let scores = self
            .db
            .run(move |db| db.list_scores(term_id, class_id, subject_id))
            .await?;
        let grades = self
            .grading
            .resolve_batch(scores.iter().map(|s| s.score).collect::<Vec<_>>())
            .await?;

        scores
            .into_iter()
            .zip(grades)
            .map(|(score, grade)| {
                let rule = grade?;
                Ok(ReportRow {
                    student_id: score.student_id,
                    score: score.score,
                    grade: rule.grade,
                    remark: rule.remark,
                })
            })
            .collect()
    }
}
