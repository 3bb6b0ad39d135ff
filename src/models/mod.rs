//! Domain models for the registrar.
//!
//! # Core Concepts
//!
//! - [`Session`]: an academic year. At most one is active.
//! - [`Term`]: a sub-period owned by a session. At most one term in the whole
//!   system is active, and its session is the active session.
//! - [`Assignment`]: authorizes a teacher to grade a (class, subject) pair
//!   within a session.
//! - [`GradingRule`]: one inclusive score range mapped to a grade and remark.
//!   The rules in force partition `[0, 100]` with no gaps or overlaps.
//! - [`Score`]: a raw mark recorded against a term.

mod actor;
mod assignment;
mod grading_rule;
mod score;
mod session;
mod term;

pub use actor::*;
pub use assignment::*;
pub use grading_rule::*;
pub use score::*;
pub use session::*;
pub use term::*;
