// HTTP route handlers for the Arbiter API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use arbiter_common::grade::grade_solution;
use arbiter_common::store::{Repository, StoreError};
use arbiter_common::submission::{SubmitError, Submitter};
use arbiter_common::types::{SolutionState, Verdict};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub problem_id: Uuid,
    pub language: String,
    /// File name → base64-encoded content
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub solution_id: Uuid,
    pub state: SolutionState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TestRunView {
    pub test_case_id: u32,
    pub verdict: Verdict,
    pub elapsed_time_ms: u64,
}

/// What a learner may see about a solution. Program stderr and internal
/// error text stay server-side.
#[derive(Debug, Serialize, Deserialize)]
pub struct SolutionView {
    pub solution_id: Uuid,
    pub problem_id: Uuid,
    pub language: String,
    pub state: SolutionState,
    pub generation: u32,
    pub grade: Option<f64>,
    pub compile_output: Option<String>,
    pub test_runs: Vec<TestRunView>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn submitter(state: &AppState) -> Submitter<'_> {
    Submitter {
        repo: state.repo.as_ref(),
        blobs: state.blobs.as_ref(),
        queue: state.queue.as_ref(),
        languages: &state.languages,
        bucket: &state.bucket,
    }
}

fn submit_error_response(e: SubmitError) -> Response {
    let reason = match &e {
        SubmitError::UnknownProblem(_) => "unknown_problem",
        SubmitError::UnknownSolution(_) => "unknown_solution",
        SubmitError::UnsupportedLanguage(_) => "unsupported_language",
        SubmitError::NoFiles => "no_files",
        SubmitError::InvalidFileName(_) => "invalid_file_name",
        SubmitError::Store(_) => "storage",
    };
    metrics::REJECTED_SUBMISSIONS_TOTAL
        .with_label_values(&[reason])
        .inc();

    match e {
        SubmitError::UnknownProblem(_) | SubmitError::UnknownSolution(_) => {
            error_response(StatusCode::NOT_FOUND, e.to_string())
        }
        SubmitError::Store(inner) => {
            error!(error = %inner, "Storage failure while submitting");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal storage error")
        }
        _ => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

fn parse_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid solution ID format"))
}

/// POST /solutions - Store a solution and queue it for grading
pub async fn submit_solution(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    let mut files = BTreeMap::new();
    for (name, encoded) in payload.files {
        match STANDARD.decode(encoded.as_bytes()) {
            Ok(content) => {
                files.insert(name, content);
            }
            Err(e) => {
                metrics::REJECTED_SUBMISSIONS_TOTAL
                    .with_label_values(&["invalid_encoding"])
                    .inc();
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("File {:?} is not valid base64: {}", name, e),
                );
            }
        }
    }

    match submitter(&state)
        .submit(payload.problem_id, &payload.language, files)
        .await
    {
        Ok(solution) => {
            metrics::SUBMISSIONS_TOTAL
                .with_label_values(&[solution.language.as_str()])
                .inc();
            (
                StatusCode::CREATED,
                Json(SubmitResponse {
                    solution_id: solution.id,
                    state: solution.state,
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!(problem_id = %payload.problem_id, error = %e, "Submission rejected");
            submit_error_response(e)
        }
    }
}

/// GET /solutions/{id} - State, grade and per-test verdicts
pub async fn get_solution(
    State(state): State<Arc<AppState>>,
    Path(solution_id): Path<String>,
) -> Response {
    let id = match parse_id(&solution_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let solution = match state.repo.get_solution(id).await {
        Ok(Some(solution)) => solution,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Solution not found"),
        Err(e) => {
            error!(solution_id = %id, error = %e, "Failed to load solution");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal storage error");
        }
    };

    let loaded = async {
        let runs = state.repo.test_runs(id, solution.generation).await?;
        let grade = grade_solution(state.repo.as_ref(), id).await?;
        Ok::<_, StoreError>((runs, grade))
    }
    .await;

    let (runs, grade) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(solution_id = %id, error = %e, "Failed to load test runs");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal storage error");
        }
    };

    info!(solution_id = %id, state = ?solution.state, grade = ?grade, "Solution retrieved");

    Json(SolutionView {
        solution_id: solution.id,
        problem_id: solution.problem_id,
        language: solution.language,
        state: solution.state,
        generation: solution.generation,
        grade,
        compile_output: solution.compile_output,
        test_runs: runs
            .into_iter()
            .map(|run| TestRunView {
                test_case_id: run.test_case_id,
                verdict: run.verdict,
                elapsed_time_ms: run.elapsed_time_ms,
            })
            .collect(),
    })
    .into_response()
}

/// POST /solutions/{id}/regrade - Queue a fresh grading pass
pub async fn regrade_solution(
    State(state): State<Arc<AppState>>,
    Path(solution_id): Path<String>,
) -> Response {
    let id = match parse_id(&solution_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match submitter(&state).regrade(id).await {
        Ok(solution) => {
            metrics::REGRADES_TOTAL.inc();
            (
                StatusCode::ACCEPTED,
                Json(SubmitResponse {
                    solution_id: solution.id,
                    state: solution.state,
                }),
            )
                .into_response()
        }
        Err(e) => submit_error_response(e),
    }
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus text format
pub async fn metrics_handler() -> impl IntoResponse {
    metrics::export()
}
