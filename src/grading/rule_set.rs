//! Pure validation and lookup over a set of grading rules.
//!
//! A rule set is valid when its inclusive integer ranges partition the scoring
//! domain `[0, 100]`: sorted by minimum, each rule starts exactly one past the
//! previous rule's maximum. Validation happens on the whole candidate set
//! before anything is persisted, so a stored set is always resolvable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{CreateGradingRuleInput, GradingRule};

/// Upper bound of the scoring domain. The lower bound is 0.
pub const MAX_SCORE: u32 = 100;

/// Access to the bounds of anything that describes a score range, so that both
/// stored rules and raw administrator input can be validated.
pub trait RuleBounds {
    fn min_score(&self) -> u32;
    fn max_score(&self) -> Option<u32>;
}

impl RuleBounds for GradingRule {
    fn min_score(&self) -> u32 {
        self.min_score
    }

    fn max_score(&self) -> Option<u32> {
        self.max_score
    }
}

impl RuleBounds for CreateGradingRuleInput {
    fn min_score(&self) -> u32 {
        self.min_score
    }

    fn max_score(&self) -> Option<u32> {
        self.max_score
    }
}

/// An inclusive integer score range. `max = None` is unbounded above.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreRange {
    pub min: u32,
    pub max: Option<u32>,
}

impl ScoreRange {
    pub fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }

    pub fn closed(min: u32, max: u32) -> Self {
        Self::new(min, Some(max))
    }
}

impl fmt::Display for ScoreRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{},{}]", self.min, max),
            None => write!(f, "[{},∞)", self.min),
        }
    }
}

/// Why a candidate rule set was rejected, naming the offending sub-range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "range", rename_all = "snake_case")]
pub enum RuleSetViolation {
    /// Scores in the range resolve to no rule.
    Gap(ScoreRange),
    /// Scores in the range resolve to more than one rule.
    Overlap(ScoreRange),
    /// A rule whose maximum is below its minimum.
    Inverted(ScoreRange),
    /// A rule that starts above [`MAX_SCORE`].
    OutOfDomain(ScoreRange),
}

impl RuleSetViolation {
    pub fn range(&self) -> ScoreRange {
        match self {
            Self::Gap(r) | Self::Overlap(r) | Self::Inverted(r) | Self::OutOfDomain(r) => *r,
        }
    }
}

impl fmt::Display for RuleSetViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gap(r) => write!(f, "gap at {}: no rule covers these scores", r),
            Self::Overlap(r) => write!(f, "overlap at {}: more than one rule covers these scores", r),
            Self::Inverted(r) => write!(f, "inverted range {}: maximum is below minimum", r),
            Self::OutOfDomain(r) => write!(f, "range {} starts above {}", r, MAX_SCORE),
        }
    }
}

/// Checks that `rules` cover `[0, MAX_SCORE]` exactly once.
///
/// Reports the first violation found when walking the ranges in ascending
/// order. Adjacent rules abut correctly when `a.max + 1 == b.min`; a shared
/// boundary (`a.max == b.min`) is an overlap at that single score.
pub fn validate_rule_set<R: RuleBounds>(rules: &[R]) -> std::result::Result<(), RuleSetViolation> {
    let mut ranges = Vec::with_capacity(rules.len());
    for rule in rules {
        let range = ScoreRange::new(rule.min_score(), rule.max_score());
        if range.max.is_some_and(|max| max < range.min) {
            return Err(RuleSetViolation::Inverted(range));
        }
        if range.min > MAX_SCORE {
            return Err(RuleSetViolation::OutOfDomain(range));
        }
        ranges.push(range);
    }

    // Unbounded maxima sort after any bounded one with the same minimum.
    ranges.sort_by_key(|r| (r.min, r.max.map_or(u64::MAX, u64::from)));

    // First score not yet covered. `None` once an unbounded rule was seen.
    let mut next_uncovered = Some(0u32);
    for range in ranges {
        match next_uncovered {
            None => return Err(RuleSetViolation::Overlap(range)),
            Some(next) if range.min > next => {
                return Err(RuleSetViolation::Gap(ScoreRange::closed(next, range.min - 1)));
            }
            Some(next) if range.min < next => {
                let covered_to = next - 1;
                let end = range.max.map_or(covered_to, |max| max.min(covered_to));
                return Err(RuleSetViolation::Overlap(ScoreRange::closed(range.min, end)));
            }
            Some(_) => {}
        }
        // A rule reaching MAX_SCORE covers the rest of the domain.
        next_uncovered = match range.max {
            Some(max) if max < MAX_SCORE => Some(max + 1),
            _ => None,
        };
    }

    match next_uncovered {
        Some(next) if next <= MAX_SCORE => {
            Err(RuleSetViolation::Gap(ScoreRange::closed(next, MAX_SCORE)))
        }
        _ => Ok(()),
    }
}

/// Rejects scores outside `[0, MAX_SCORE]`, including NaN.
pub fn check_score(score: f64) -> Result<f64> {
    if (0.0..=f64::from(MAX_SCORE)).contains(&score) {
        Ok(score)
    } else {
        Err(Error::OutOfRange(score))
    }
}

/// A validated rule set, held in descending order of minimum score.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    rules: Vec<GradingRule>,
    version: i64,
}

impl RuleSet {
    pub fn new(rules: Vec<GradingRule>) -> Result<Self> {
        Self::with_version(rules, 0)
    }

    /// Builds a rule set tagged with the store version it was read at.
    pub fn with_version(mut rules: Vec<GradingRule>, version: i64) -> Result<Self> {
        validate_rule_set(&rules).map_err(Error::InvalidRuleSet)?;
        rules.sort_by(|a, b| b.min_score.cmp(&a.min_score));
        Ok(Self { rules, version })
    }

    pub fn rules(&self) -> &[GradingRule] {
        &self.rules
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns the single rule whose range contains `score`.
    ///
    /// Fractional scores between two integer boundaries belong to the lower
    /// rule: with `[0,39]` and `[40,59]`, 39.5 resolves to `[0,39]`.
    pub fn resolve(&self, score: f64) -> Result<&GradingRule> {
        let score = check_score(score)?;
        self.rules
            .iter()
            .find(|rule| f64::from(rule.min_score) <= score)
            .ok_or(Error::OutOfRange(score))
    }

    /// Lazily resolves `scores` in input order.
    pub fn resolve_batch<I>(&self, scores: I) -> ResolveBatch<'_, I::IntoIter>
    where
        I: IntoIterator<Item = f64>,
    {
        ResolveBatch {
            rule_set: self,
            scores: scores.into_iter(),
        }
    }
}

/// Iterator returned by [`RuleSet::resolve_batch`].
///
/// Each element is resolved independently, so an out-of-range score yields an
/// error for that element without ending the sequence.
#[derive(Debug, Clone)]
pub struct ResolveBatch<'a, I> {
    rule_set: &'a RuleSet,
    scores: I,
}

impl<'a, I> Iterator for ResolveBatch<'a, I>
where
    I: Iterator<Item = f64>,
{
    type Item = Result<&'a GradingRule>;

    fn next(&mut self) -> Option<Self::Item> {
        let score = self.scores.next()?;
        Some(self.rule_set.resolve(score))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.scores.size_hint()
    }
}
