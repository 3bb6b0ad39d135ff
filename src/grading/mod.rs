//! Score-to-grade resolution.
//!
//! [`RuleSet`] is the pure core: a validated, immutable rule set that resolves
//! scores. [`GradeResolutionEngine`] loads it from the store and is the only
//! path through which rule edits are committed.

mod engine;
mod rule_set;

pub use engine::*;
pub use rule_set::*;
