//! Background allocation jobs.
//!
//! `submit` validates synchronously and returns a fresh identifier at once;
//! the solve runs on the blocking pool behind a concurrency limit and hands
//! exactly one result to the store. Callers observe completion by polling,
//! or by awaiting [`JobManager::wait`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::data::{AllocationInput, AllocationResult};
use crate::error::{JobError, ValidationError};
use crate::solver::{self, PreparedProblem, SolveEngine, SolveSettings};
use crate::store::ResultStore;

/// Opaque job identifier; always generated here, never taken from callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle of a job. Infeasible or timed-out solves still end in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Solving,
    Ready,
}

/// Answer to a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub exists: bool,
    pub ready: bool,
}

struct Inner {
    engine: Arc<dyn SolveEngine>,
    store: Arc<dyn ResultStore>,
    settings: SolveSettings,
    permits: Arc<Semaphore>,
    in_flight: Mutex<HashMap<JobId, watch::Receiver<JobState>>>,
}

/// Submits, tracks and answers queries about allocation jobs.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(
        engine: Arc<dyn SolveEngine>,
        store: Arc<dyn ResultStore>,
        settings: SolveSettings,
        max_concurrent: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                store,
                settings,
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Validates `input` and starts solving it in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, input: &AllocationInput) -> Result<JobId, ValidationError> {
        let prepared = solver::prepare(input, &self.inner.settings)?;
        let id = JobId::new();
        let (state, observer) = watch::channel(JobState::Submitted);
        self.in_flight().insert(id, observer);

        info!(
            "Submitted job {} ({} students, {} periods, budget {:.1?})",
            id,
            prepared.problem.students.len(),
            prepared.problem.periods.len(),
            prepared.time_budget
        );
        tokio::spawn(Arc::clone(&self.inner).execute(id, prepared, state));
        Ok(id)
    }

    /// Whether `id` is known and whether its result is stored.
    pub fn poll(&self, id: JobId) -> Result<JobStatus, JobError> {
        if let Some(state) = self.in_flight().get(&id).map(|rx| *rx.borrow()) {
            if state != JobState::Ready {
                return Ok(JobStatus {
                    exists: true,
                    ready: false,
                });
            }
        }
        if self.inner.store.contains(id)? {
            Ok(JobStatus {
                exists: true,
                ready: true,
            })
        } else {
            Err(JobError::NotFound(id))
        }
    }

    /// The stored result of `id`; `NotFound` while it is still solving.
    pub fn retrieve(&self, id: JobId) -> Result<AllocationResult, JobError> {
        self.inner.store.get(id)?.ok_or(JobError::NotFound(id))
    }

    /// Resolves once `id` is no longer solving.
    pub async fn wait(&self, id: JobId) {
        let observer = self.in_flight().get(&id).cloned();
        if let Some(mut observer) = observer {
            // a closed channel means the worker is gone either way
            let _ = observer.wait_for(|state| *state == JobState::Ready).await;
        }
    }

    /// Runs the pipeline inline and returns the result directly.
    pub fn solve_now(&self, input: &AllocationInput) -> Result<AllocationResult, ValidationError> {
        solver::solve(input, self.inner.engine.as_ref(), &self.inner.settings)
    }

    /// Periodically drops stored results older than `retention`.
    pub fn spawn_janitor(&self, retention: Duration, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.inner.store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let store = Arc::clone(&store);
                match tokio::task::spawn_blocking(move || store.purge_older_than(retention)).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(removed)) => info!("Purged {} stale results", removed),
                    Ok(Err(e)) => error!("Result purge failed: {}", e),
                    Err(e) => error!("Result purge task failed: {}", e),
                }
            }
        })
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, watch::Receiver<JobState>>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    async fn execute(
        self: Arc<Self>,
        id: JobId,
        prepared: PreparedProblem,
        state: watch::Sender<JobState>,
    ) {
        // the semaphore is never closed
        let _permit = Arc::clone(&self.permits).acquire_owned().await;
        state.send_replace(JobState::Solving);
        debug!("Job {} is solving", id);

        let worker = Arc::clone(&self);
        let started = Instant::now();
        let solved = tokio::task::spawn_blocking(move || {
            solver::run(&prepared, worker.engine.as_ref(), &worker.settings)
        })
        .await;

        let result = solved.unwrap_or_else(|e| {
            error!("Job {} worker failed: {}", id, e);
            AllocationResult::unknown(started.elapsed())
        });
        info!("Job {} finished: {}", id, result);

        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.put(id, &result)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Job {} result could not be stored: {}", id, e),
            Err(e) => error!("Job {} result store task failed: {}", id, e),
        }

        state.send_replace(JobState::Ready);
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SolveStatus;
    use crate::model::AllocationModel;
    use crate::normalize::tests::input;
    use crate::solver::tests::FixedEngine;
    use crate::solver::{EngineOutcome, HighsEngine};
    use crate::store::MemoryStore;
    use std::sync::mpsc;

    /// Blocks every solve until the test releases it.
    struct GatedEngine {
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl SolveEngine for GatedEngine {
        fn solve(&self, _model: AllocationModel, budget: Duration) -> EngineOutcome {
            let release = self.release.lock().unwrap();
            let _ = release.recv_timeout(budget);
            EngineOutcome::without_solution(SolveStatus::Unknown, Duration::from_millis(1))
        }
    }

    fn manager(engine: Arc<dyn SolveEngine>) -> JobManager {
        JobManager::new(engine, Arc::new(MemoryStore::new()), SolveSettings::default(), 2)
    }

    fn one_student() -> AllocationInput {
        input(&["ada"], 2, &[("ward", vec![1, 1])], &[vec![0]], &[2])
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_submit_returns_before_solve_finishes() {
        let (release, gate) = mpsc::channel();
        let jobs = manager(Arc::new(GatedEngine {
            release: Mutex::new(gate),
        }));

        let started = Instant::now();
        let id = jobs.submit(&one_student()).unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));

        assert_eq!(
            jobs.poll(id).unwrap(),
            JobStatus {
                exists: true,
                ready: false
            }
        );
        assert!(matches!(jobs.retrieve(id), Err(JobError::NotFound(_))));

        release.send(()).unwrap();
        jobs.wait(id).await;

        assert_eq!(
            jobs.poll(id).unwrap(),
            JobStatus {
                exists: true,
                ready: true
            }
        );
        let result = jobs.retrieve(id).unwrap();
        assert_eq!(result.status, SolveStatus::Unknown);
        assert!(!result.is_feasible);
    }

    #[tokio::test]
    async fn test_job_solves_and_stores_result() {
        let jobs = manager(Arc::new(HighsEngine::default()));
        let id = jobs.submit(&one_student()).unwrap();
        jobs.wait(id).await;

        let result = jobs.retrieve(id).unwrap();
        assert!(result.is_feasible);
        assert!(result.is_optimal);
        assert_eq!(result.solution.map(|runs| runs.len()), Some(1));
    }

    struct PanickingEngine;

    impl SolveEngine for PanickingEngine {
        fn solve(&self, _model: AllocationModel, _budget: Duration) -> EngineOutcome {
            panic!("engine crashed");
        }
    }

    #[tokio::test]
    async fn test_crashed_worker_still_stores_a_result() {
        let jobs = manager(Arc::new(PanickingEngine));
        let id = jobs.submit(&one_student()).unwrap();
        jobs.wait(id).await;

        assert_eq!(
            jobs.poll(id).unwrap(),
            JobStatus {
                exists: true,
                ready: true
            }
        );
        let result = jobs.retrieve(id).unwrap();
        assert_eq!(result.status, SolveStatus::Unknown);
        assert!(!result.is_feasible);
        assert!(result.solution.is_none());
    }

    #[tokio::test]
    async fn test_each_submission_gets_its_own_id() {
        let jobs = manager(Arc::new(FixedEngine(EngineOutcome::without_solution(
            SolveStatus::Infeasible,
            Duration::ZERO,
        ))));
        let a = jobs.submit(&one_student()).unwrap();
        let b = jobs.submit(&one_student()).unwrap();
        assert_ne!(a, b);

        jobs.wait(a).await;
        jobs.wait(b).await;
        assert_eq!(jobs.retrieve(a).unwrap().status, SolveStatus::Infeasible);
        assert_eq!(jobs.retrieve(b).unwrap().status, SolveStatus::Infeasible);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_before_spawning() {
        let jobs = manager(Arc::new(HighsEngine::default()));
        let mut raw = one_student();
        raw.allocation_rule = Some(vec![3]);
        assert!(matches!(
            jobs.submit(&raw),
            Err(ValidationError::OverSubscribed { .. })
        ));
        assert!(jobs.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let jobs = manager(Arc::new(HighsEngine::default()));
        let id = JobId::new();
        assert!(matches!(jobs.poll(id), Err(JobError::NotFound(_))));
        assert!(matches!(jobs.retrieve(id), Err(JobError::NotFound(_))));
        // waiting on an unknown job returns at once
        jobs.wait(id).await;
    }

    #[test]
    fn test_solve_now_runs_inline() {
        let jobs = manager(Arc::new(HighsEngine::default()));
        let result = jobs.solve_now(&one_student()).unwrap();
        assert!(result.is_optimal);
    }

    #[test]
    fn test_job_id_parses_its_display_form() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!("not-a-job".parse::<JobId>().is_err());
        assert_ne!(JobId::default(), JobId::default());
    }
}
