use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// Type aliases for clarity
pub type StudentIndex = usize;
pub type PeriodIndex = usize;
pub type InternshipIndex = usize;
pub type LocationIndex = usize;

/// A placement site with one capacity entry per period.
///
/// Periods past the end of `capacities` have zero capacity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub name: String,
    #[serde(default)]
    pub capacities: Vec<i64>,
}

/// An internship is an ordered, non-empty set of locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Internship {
    pub locations: Vec<LocationIndex>,
}

/// The complete input for one allocation run.
///
/// All sequences are index-aligned: `allocation_rule[i]` is the number of
/// periods every student spends in `internships[i]`, and
/// `preferences[s][i]` ranks locations of internship `i` for student `s`,
/// most preferred first.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationInput {
    pub students: Vec<String>,
    pub periods: Vec<String>,
    pub locations: Vec<Location>,
    pub internships: Vec<Internship>,
    #[serde(default)]
    pub allocation_rule: Option<Vec<i64>>,
    #[serde(default)]
    pub preferences: Option<Vec<Vec<Vec<LocationIndex>>>>,
    #[serde(default)]
    pub time_budget_seconds: Option<f64>,
}

/// Outcome reported by the solving engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unknown,
    ModelInvalid,
}

impl SolveStatus {
    pub fn has_solution(self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SolveStatus::Optimal => "OPTIMAL",
            SolveStatus::Feasible => "FEASIBLE",
            SolveStatus::Infeasible => "INFEASIBLE",
            SolveStatus::Unknown => "UNKNOWN",
            SolveStatus::ModelInvalid => "MODEL_INVALID",
        };
        f.write_str(s)
    }
}

/// One uninterrupted stretch a student spends at the same location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRun {
    pub student: String,
    pub start_period: String,
    pub duration: usize,
    pub location: String,
    pub internship_index: InternshipIndex,
}

/// The final output of an allocation run.
///
/// Infeasibility and exhausted budgets are ordinary results with
/// `is_feasible == false` and no solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub status: SolveStatus,
    pub is_feasible: bool,
    pub is_optimal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<Vec<PlacementRun>>,
}

impl AllocationResult {
    /// A result carrying no solution and no verdict on feasibility.
    pub fn unknown(wall_time: Duration) -> Self {
        Self {
            status: SolveStatus::Unknown,
            is_feasible: false,
            is_optimal: false,
            objective: None,
            conflicts: None,
            branches: None,
            wall_time: Some(wall_time.as_secs_f64()),
            solution: None,
        }
    }
}

impl fmt::Display for AllocationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.objective, &self.solution) {
            (Some(objective), Some(runs)) => write!(
                f,
                "{}(objective={}, runs={})",
                self.status,
                objective,
                runs.len()
            ),
            _ => write!(f, "{}", self.status),
        }
    }
}
