#![forbid(unsafe_code)]

//! Core data model for benchmark evaluations.
//!
//! One [`InstanceRecord`] describes one (problem instance, solver setting)
//! execution: an identifying key, a solver [`Status`], and a bag of named raw
//! values. Records are produced by an external log collector and consumed
//! read-only by the evaluation engine through the [`Experiment`] trait.
//!
//! Values are carried as [`Value`], which has an explicit [`Value::Missing`]
//! sentinel. Missing data is ordinary data here: every numeric coercion is an
//! `Option`, and downstream consumers decide whether missing propagates,
//! is replaced, or is counted.

pub mod experiment;
pub mod record;
pub mod status;
pub mod value;

pub use experiment::Experiment;
pub use record::{InstanceRecord, RecordError, TestRunData};
pub use status::Status;
pub use value::{Value, ValueKey};
