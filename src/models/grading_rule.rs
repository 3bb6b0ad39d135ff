use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maps one contiguous, inclusive score range to a grade.
///
/// `max_score = None` leaves the range unbounded above; only the top rule of
/// a valid set can be unbounded without overlapping its neighbours.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradingRule {
    pub id: Uuid,
    pub min_score: u32,
    pub max_score: Option<u32>,
    pub grade: String,
    pub remark: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GradingRule {
    pub fn contains(&self, score: f64) -> bool {
        score >= f64::from(self.min_score)
            && self.max_score.map_or(true, |max| score < f64::from(max) + 1.0)
    }
}

/// Input for creating a grading rule, or one entry of a whole-set replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGradingRuleInput {
    pub min_score: u32,
    pub max_score: Option<u32>,
    pub grade: String,
    #[serde(default)]
    pub remark: String,
}

/// Partial update of a grading rule.
///
/// `max_score` uses a nested option: absent leaves it unchanged, `null` makes
/// the rule unbounded, a number sets the bound.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateGradingRuleInput {
    pub min_score: Option<u32>,
    #[serde(default, with = "double_option", skip_serializing_if = "Option::is_none")]
    pub max_score: Option<Option<u32>>,
    pub grade: Option<String>,
    pub remark: Option<String>,
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<Option<u32>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<u32>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u32>::deserialize(deserializer).map(Some)
    }
}
