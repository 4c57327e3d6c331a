use crate::data::{AllocationInput, AllocationResult, SolveStatus};
use crate::error::ValidationError;
use crate::extract::{DenseAssignment, extract_runs};
use crate::model::{AllocationModel, ObjectiveOptions, build_model};
use crate::normalize::{Problem, pad_horizon};
use good_lp::solvers::SolutionStatus;
use good_lp::{ResolutionError, Solution, SolverModel, default_solver};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// Budget used when neither the caller nor the configuration sets one.
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(55);

/// Counters reported by the engine alongside its status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolverStats {
    pub conflicts: Option<u64>,
    pub branches: Option<u64>,
    pub wall_time: Duration,
}

/// What an engine returns for one bounded attempt.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub status: SolveStatus,
    /// Decoded decision variables; present only with a solution.
    pub assignment: Option<DenseAssignment>,
    pub objective: Option<f64>,
    pub stats: SolverStats,
}

impl EngineOutcome {
    pub fn without_solution(status: SolveStatus, wall_time: Duration) -> Self {
        Self {
            status,
            assignment: None,
            objective: None,
            stats: SolverStats {
                wall_time,
                ..SolverStats::default()
            },
        }
    }
}

/// A bounded-time MILP engine. One call, one attempt, no retries.
pub trait SolveEngine: Send + Sync {
    fn solve(&self, model: AllocationModel, budget: Duration) -> EngineOutcome;
}

/// HiGHS through `good_lp`.
#[derive(Debug, Clone)]
pub struct HighsEngine {
    pub threads: i32,
    pub random_seed: i32,
}

impl Default for HighsEngine {
    fn default() -> Self {
        Self {
            threads: 1,        // limit to 1 thread for reproducibility
            random_seed: 1234, // set seed for reproducibility
        }
    }
}

impl SolveEngine for HighsEngine {
    fn solve(&self, model: AllocationModel, budget: Duration) -> EngineOutcome {
        let AllocationModel {
            variables,
            space,
            constraints,
            objective,
        } = model;

        let mut highs = variables
            .minimise(objective.clone())
            .using(default_solver)
            .set_option("threads", self.threads)
            .set_option("random_seed", self.random_seed)
            .set_option("time_limit", budget.as_secs_f64())
            .set_option("log_to_console", "false");
        for constraint in constraints {
            highs.add_constraint(constraint);
        }

        info!("Starting MILP solver with a {:.1?} budget...", budget);
        let started = Instant::now();
        let solved = highs.solve();
        let wall_time = started.elapsed();

        match solved {
            Ok(solution) => {
                let status = match solution.status() {
                    SolutionStatus::Optimal => SolveStatus::Optimal,
                    _ => SolveStatus::Feasible,
                };
                let assignment = space.decode(|var| solution.value(var));
                if assignment.is_none() {
                    info!("Solver stopped after {:.2?} without an incumbent", wall_time);
                    return EngineOutcome::without_solution(SolveStatus::Unknown, wall_time);
                }
                info!("Solution found in {:.2?} ({})", wall_time, status);
                EngineOutcome {
                    status,
                    assignment,
                    objective: Some(objective.eval_with(&solution)),
                    stats: SolverStats {
                        wall_time,
                        ..SolverStats::default()
                    },
                }
            }
            Err(e) => {
                let status = match &e {
                    ResolutionError::Infeasible => SolveStatus::Infeasible,
                    ResolutionError::Unbounded => SolveStatus::ModelInvalid,
                    ResolutionError::Other(reason)
                        if matches!(*reason, "ModelError" | "LoadError" | "ModelEmpty") =>
                    {
                        SolveStatus::ModelInvalid
                    }
                    _ => SolveStatus::Unknown,
                };
                info!("No solution after {:.2?}: {} ({})", wall_time, status, e);
                EngineOutcome::without_solution(status, wall_time)
            }
        }
    }
}

/// Pipeline settings shared by synchronous solves and background jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveSettings {
    pub time_budget: Duration,
    pub objective: ObjectiveOptions,
}

impl Default for SolveSettings {
    fn default() -> Self {
        Self {
            time_budget: DEFAULT_TIME_BUDGET,
            objective: ObjectiveOptions::default(),
        }
    }
}

/// A validated, normalized problem together with its solve budget.
#[derive(Debug, Clone)]
pub struct PreparedProblem {
    pub problem: Problem,
    pub time_budget: Duration,
}

/// Validates `input` and pads its horizon, without touching the caller's data.
pub fn prepare(
    input: &AllocationInput,
    settings: &SolveSettings,
) -> Result<PreparedProblem, ValidationError> {
    let problem = pad_horizon(Problem::from_input(input)?);
    let time_budget = input
        .time_budget_seconds
        .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
        .unwrap_or(settings.time_budget);
    Ok(PreparedProblem {
        problem,
        time_budget,
    })
}

/// Builds, solves and extracts one prepared problem.
///
/// Every solving outcome, including infeasibility and an exhausted budget,
/// comes back as an [`AllocationResult`].
pub fn run(
    prepared: &PreparedProblem,
    engine: &dyn SolveEngine,
    settings: &SolveSettings,
) -> AllocationResult {
    let problem = &prepared.problem;
    let model = build_model(problem, &settings.objective);

    if model.space.is_empty() {
        debug!("Nothing to allocate; returning the empty allocation");
        return AllocationResult {
            status: SolveStatus::Optimal,
            is_feasible: true,
            is_optimal: true,
            objective: Some(0.0),
            conflicts: None,
            branches: None,
            wall_time: Some(0.0),
            solution: Some(Vec::new()),
        };
    }

    let outcome = engine.solve(model, prepared.time_budget);

    let (status, runs) = match (outcome.status.has_solution(), &outcome.assignment) {
        (true, Some(assignment)) => match assignment.verify(problem) {
            Ok(()) => (outcome.status, Some(extract_runs(assignment))),
            Err(violation) => {
                warn!("Discarding engine solution: {}", violation);
                (SolveStatus::Unknown, None)
            }
        },
        (true, None) => (SolveStatus::Unknown, None),
        (false, _) => (outcome.status, None),
    };

    let is_feasible = runs.is_some();
    AllocationResult {
        status,
        is_feasible,
        is_optimal: status == SolveStatus::Optimal,
        objective: outcome.objective.filter(|_| is_feasible),
        conflicts: outcome.stats.conflicts,
        branches: outcome.stats.branches,
        wall_time: Some(outcome.stats.wall_time.as_secs_f64()),
        solution: runs.map(|runs| {
            runs.into_iter()
                .map(|run| run.to_placement(problem))
                .collect()
        }),
    }
}

/// The synchronous variant: validate, build, solve and extract inline.
pub fn solve(
    input: &AllocationInput,
    engine: &dyn SolveEngine,
    settings: &SolveSettings,
) -> Result<AllocationResult, ValidationError> {
    let prepared = prepare(input, settings)?;
    Ok(run(&prepared, engine, settings))
}
