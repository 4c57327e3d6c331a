use crate::config::Config;
use crate::data::{AllocationInput, AllocationResult};
use crate::error::JobError;
use crate::jobs::{JobId, JobManager, JobStatus};
use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde_json::{Value, json};

type ApiError = (StatusCode, String);

async fn home() -> Json<Value> {
    Json(json!({ "message": "Allocation service is up and running" }))
}

async fn solve_handler(
    State(jobs): State<JobManager>,
    Json(input): Json<AllocationInput>,
) -> Result<Json<AllocationResult>, ApiError> {
    let solved = tokio::task::spawn_blocking(move || jobs.solve_now(&input))
        .await
        .map_err(|e| {
            error!("Synchronous solve failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    match solved {
        Ok(result) => Ok(Json(result)),
        Err(e) => Err((StatusCode::BAD_REQUEST, e.to_string())),
    }
}

async fn submit_handler(
    State(jobs): State<JobManager>,
    Json(input): Json<AllocationInput>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    match jobs.submit(&input) {
        Ok(id) => Ok((StatusCode::ACCEPTED, Json(json!({ "jobId": id })))),
        Err(e) => Err((StatusCode::BAD_REQUEST, e.to_string())),
    }
}

async fn poll_handler(
    State(jobs): State<JobManager>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    let id = parse_id(&id)?;
    jobs.poll(id).map(Json).map_err(job_error)
}

async fn result_handler(
    State(jobs): State<JobManager>,
    Path(id): Path<String>,
) -> Result<Json<AllocationResult>, ApiError> {
    let id = parse_id(&id)?;
    jobs.retrieve(id).map(Json).map_err(job_error)
}

fn parse_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| (StatusCode::NOT_FOUND, format!("job not found: {raw}")))
}

fn job_error(e: JobError) -> ApiError {
    match e {
        JobError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        JobError::Storage(_) => {
            error!("{}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub fn router(jobs: JobManager) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/v1/allocation/solve", post(solve_handler))
        .route("/v1/allocation/jobs", post(submit_handler))
        .route("/v1/allocation/jobs/:id", get(poll_handler))
        .route("/v1/allocation/jobs/:id/result", get(result_handler))
        .with_state(jobs)
}

pub async fn run_server(config: &Config, jobs: JobManager) -> anyhow::Result<()> {
    let app = router(jobs);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app).await.context("Server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{HighsEngine, SolveSettings};
    use crate::store::MemoryStore;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (JobManager, Router) {
        let jobs = JobManager::new(
            Arc::new(HighsEngine::default()),
            Arc::new(MemoryStore::new()),
            SolveSettings::default(),
            1,
        );
        (jobs.clone(), router(jobs))
    }

    fn body() -> Value {
        json!({
            "students": ["ada"],
            "periods": ["w1", "w2", "w3"],
            "locations": [{ "name": "ward", "capacities": [1, 1, 1] }],
            "internships": [{ "locations": [0] }],
            "allocationRule": [2],
            "timeBudgetSeconds": 5
        })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_synchronous_solve() {
        let (_, app) = app();
        let (status, result) = send(app, post_json("/v1/allocation/solve", &body())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["is_feasible"], true);
        assert_eq!(result["status"], "OPTIMAL");
        let solution = result["solution"].as_array().unwrap();
        assert_eq!(solution.len(), 2);
        assert!(solution.iter().any(|run| run["location"] == "NOT_A_LOCATION"));
    }

    #[tokio::test]
    async fn test_job_roundtrip() {
        let (jobs, app) = app();
        let (status, created) = send(app.clone(), post_json("/v1/allocation/jobs", &body())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = created["jobId"].as_str().unwrap().to_string();

        jobs.wait(id.parse().unwrap()).await;

        let poll = Request::get(format!("/v1/allocation/jobs/{id}")).body(Body::empty()).unwrap();
        let (status, polled) = send(app.clone(), poll).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(polled, json!({ "exists": true, "ready": true }));

        let fetch = Request::get(format!("/v1/allocation/jobs/{id}/result"))
            .body(Body::empty())
            .unwrap();
        let (status, result) = send(app, fetch).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["is_optimal"], true);
    }

    #[tokio::test]
    async fn test_invalid_input_is_bad_request() {
        let (_, app) = app();
        let mut input = body();
        input["allocationRule"] = json!([4]);
        let (status, _) = send(app, post_json("/v1/allocation/jobs", &input)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (_, app) = app();
        let unknown = JobId::new();
        for uri in [
            format!("/v1/allocation/jobs/{unknown}"),
            format!("/v1/allocation/jobs/{unknown}/result"),
            "/v1/allocation/jobs/garbage".to_string(),
        ] {
            let request = Request::get(uri).body(Body::empty()).unwrap();
            let (status, _) = send(app.clone(), request).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
    }
}
