//! Registrar: the academic-calendar and grading core of a school-records
//! backend.
//!
//! - [`terms`] keeps exactly one session and one of its terms active.
//! - [`grading`] maps numeric scores to grades through a validated rule set.
//! - [`assignments`] answers whether a teacher may grade a class and subject.
//! - [`api`] exposes all of it over HTTP.

pub mod api;
pub mod assignments;
pub mod config;
pub mod db;
pub mod error;
pub mod grading;
pub mod models;
pub mod terms;
pub mod workflow;

pub use error::{Error, Result};
