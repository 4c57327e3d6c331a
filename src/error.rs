//! Error types for the allocation service.
//!
//! Solving outcomes (infeasible, budget exhausted) are data, not errors;
//! see [`crate::data::AllocationResult`].

use std::path::PathBuf;

use thiserror::Error;

use crate::data::{InternshipIndex, LocationIndex, StudentIndex};
use crate::jobs::JobId;

/// Malformed or inconsistent allocation input, reported before any solve starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("{field} has {actual} entries, expected {expected}")]
    LengthMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("{field} must not be negative (got {value})")]
    Negative { field: String, value: i64 },

    #[error("internship {0} has no locations")]
    EmptyInternship(InternshipIndex),

    #[error("{field} references unknown location {location}")]
    UnknownLocation {
        field: String,
        location: LocationIndex,
    },

    #[error("location name {0:?} is reserved for unassigned periods")]
    ReservedLocationName(String),

    #[error("allocation rule requires {required} periods but only {available} exist")]
    OverSubscribed { required: u64, available: usize },

    #[error("time budget must be a positive number of seconds (got {0})")]
    InvalidTimeBudget(f64),
}

impl ValidationError {
    pub(crate) fn length(field: impl Into<String>, expected: usize, actual: usize) -> Self {
        ValidationError::LengthMismatch {
            field: field.into(),
            expected,
            actual,
        }
    }

    pub(crate) fn preference_row(student: StudentIndex, expected: usize, actual: usize) -> Self {
        Self::length(format!("preferences[{student}]"), expected, actual)
    }
}

/// Failures of the durable result store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt result record {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors surfaced by the job manager.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("result store failure: {0}")]
    Storage(#[from] StoreError),
}
