use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::rule_set::{check_score, validate_rule_set, RuleBounds, RuleSet};
use crate::config::{Config, RetryPolicy};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CreateGradingRuleInput, GradingRule, UpdateGradingRuleInput};

/// Resolves scores against the stored rule set and guards every edit to it.
///
/// Edits are serialized through the rule-set version: the full candidate set
/// is derived from one snapshot, validated, and committed only if no other
/// edit committed in between. Two administrators moving the same boundary at
/// once therefore cannot both pass validation against a stale view.
#[derive(Clone)]
pub struct GradeResolutionEngine {
    db: Database,
    retry: RetryPolicy,
}

impl GradeResolutionEngine {
    pub fn new(db: Database) -> Self {
        Self::with_config(db, &Config::default())
    }

    pub fn with_config(db: Database, config: &Config) -> Self {
        Self {
            db,
            retry: config.retry,
        }
    }

    /// Checks a complete candidate rule set without touching the store.
    pub fn validate_rule_set<R: RuleBounds>(&self, rules: &[R]) -> Result<()> {
        validate_rule_set(rules).map_err(Error::InvalidRuleSet)
    }

    /// Loads and validates the rule set currently in force.
    pub async fn load(&self) -> Result<RuleSet> {
        let (rules, version) = self.db.run(|db| db.rule_set_snapshot()).await?;
        RuleSet::with_version(rules, version)
    }

    /// The rule whose range contains `score`.
    pub async fn resolve(&self, score: f64) -> Result<GradingRule> {
        let score = check_score(score)?;
        let rule_set = self.load().await?;
        rule_set.resolve(score).cloned()
    }

    /// Loads the rule set once and returns a lazy, in-order resolution of
    /// `scores` against it.
    pub async fn resolve_batch<I>(&self, scores: I) -> Result<ResolvedGrades<I::IntoIter>>
    where
        I: IntoIterator<Item = f64>,
    {
        let rule_set = self.load().await?;
        Ok(ResolvedGrades::new(Arc::new(rule_set), scores.into_iter()))
    }

    pub async fn list_rules(&self) -> Result<Vec<GradingRule>> {
        self.db.run(|db| db.list_rules()).await
    }

    // ============================================================
    // Rule edits
    // ============================================================

    /// Swaps the whole rule set. This is how an empty store gets its first
    /// rules, since no single rule can cover `[0, 100]` on its own edit.
    pub async fn replace_rules(&self, inputs: Vec<CreateGradingRuleInput>) -> Result<Vec<GradingRule>> {
        let now = Utc::now();
        let replacement: Vec<GradingRule> = inputs
            .into_iter()
            .map(|input| new_rule(Uuid::new_v4(), input, now))
            .collect();

        self.commit_edit("replace", move |_current| Ok(replacement.clone()))
            .await
    }

    pub async fn create_rule(&self, input: CreateGradingRuleInput) -> Result<GradingRule> {
        let rule = new_rule(Uuid::new_v4(), input, Utc::now());
        let id = rule.id;

        let rules = self
            .commit_edit("create", move |mut current| {
                current.push(rule.clone());
                Ok(current)
            })
            .await?;

        find_rule(rules, id)
    }

    pub async fn update_rule(&self, id: Uuid, input: UpdateGradingRuleInput) -> Result<GradingRule> {
        let now = Utc::now();

        let rules = self
            .commit_edit("update", move |mut current| {
                let rule = current
                    .iter_mut()
                    .find(|r| r.id == id)
                    .ok_or_else(|| Error::not_found("grading rule", id))?;
                if let Some(min_score) = input.min_score {
                    rule.min_score = min_score;
                }
                if let Some(max_score) = input.max_score {
                    rule.max_score = max_score;
                }
                if let Some(grade) = &input.grade {
                    rule.grade = grade.clone();
                }
                if let Some(remark) = &input.remark {
                    rule.remark = remark.clone();
                }
                rule.updated_at = now;
                Ok(current)
            })
            .await?;

        find_rule(rules, id)
    }

    pub async fn delete_rule(&self, id: Uuid) -> Result<()> {
        self.commit_edit("delete", move |mut current| {
            let before = current.len();
            current.retain(|r| r.id != id);
            if current.len() == before {
                return Err(Error::not_found("grading rule", id));
            }
            Ok(current)
        })
        .await?;
        Ok(())
    }

    /// Applies `edit` to a snapshot of the stored rules, validates the result
    /// and commits it against the snapshot's version, retrying on a lost race.
    async fn commit_edit<F>(&self, action: &'static str, edit: F) -> Result<Vec<GradingRule>>
    where
        F: Fn(Vec<GradingRule>) -> Result<Vec<GradingRule>> + Clone + Send + 'static,
    {
        for attempt in 0..=self.retry.retries {
            if attempt > 0 {
                tracing::debug!(action, attempt, "Retrying rule-set edit after version conflict");
                tokio::time::sleep(self.retry.backoff_for(attempt)).await;
            }

            let edit = edit.clone();
            let committed = self
                .db
                .run(move |db| {
                    let (current, version) = db.rule_set_snapshot()?;
                    let candidate = edit(current)?;
                    validate_rule_set(&candidate).map_err(Error::InvalidRuleSet)?;
                    Ok(db
                        .commit_rule_set(version, &candidate)?
                        .map(|new_version| (candidate, new_version)))
                })
                .await;

            match committed {
                Ok(Some((mut rules, version))) => {
                    tracing::info!(action, version, rules = rules.len(), "Committed rule-set edit");
                    rules.sort_by(|a, b| b.min_score.cmp(&a.min_score));
                    return Ok(rules);
                }
                Ok(None) => continue,
                Err(Error::InvalidRuleSet(violation)) => {
                    tracing::warn!(action, "Rejected rule-set edit: {}", violation);
                    return Err(Error::InvalidRuleSet(violation));
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(action, "Rule-set edit lost every retry to concurrent edits");
        Err(Error::Conflict(format!(
            "rule-set {} conflicted with concurrent edits {} times",
            action,
            self.retry.retries + 1
        )))
    }
}

fn new_rule(id: Uuid, input: CreateGradingRuleInput, now: chrono::DateTime<Utc>) -> GradingRule {
    GradingRule {
        id,
        min_score: input.min_score,
        max_score: input.max_score,
        grade: input.grade,
        remark: input.remark,
        created_at: now,
        updated_at: now,
    }
}

fn find_rule(rules: Vec<GradingRule>, id: Uuid) -> Result<GradingRule> {
    rules
        .into_iter()
        .find(|r| r.id == id)
        .ok_or_else(|| Error::not_found("grading rule", id))
}

/// Lazy resolution of a score sequence against one loaded rule set.
///
/// Cloning restarts from the clone point and shares the loaded rules.
#[derive(Debug, Clone)]
pub struct ResolvedGrades<I> {
    rule_set: Arc<RuleSet>,
    scores: I,
}

impl<I> ResolvedGrades<I> {
    pub fn new(rule_set: Arc<RuleSet>, scores: I) -> Self {
        Self { rule_set, scores }
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }
}

impl<I> Iterator for ResolvedGrades<I>
where
    I: Iterator<Item = f64>,
{
    type Item = Result<GradingRule>;

    fn next(&mut self) -> Option<Self::Item> {
        let score = self.scores.next()?;
        Some(self.rule_set.resolve(score).cloned())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.scores.size_hint()
    }
}
