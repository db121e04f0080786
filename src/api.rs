//! REST API endpoints.
//!
//! Two webhook endpoints consumed by students' external systems
//! (`/api/build`, `/api/evaluate`) plus the instructor dashboard CRUD
//! surface. Handlers validate and respond synchronously; the build and
//! evaluation pipelines run as detached tasks.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::verify_shared_secret;
use crate::build_worker::BuildPipeline;
use crate::eval_worker::EvalPipeline;
use crate::notify::NotifySender;
use crate::storage::Storage;
use crate::tasks::{dispatch_task, DispatchError, StudentTarget};
use crate::types::{
    Attachment, BuildRequest, EvaluateRequest, Evaluation, InstructorConfig, LogEntry, LogLevel,
    Submission, SubmissionStatus, TaskTemplate, MAX_BRIEF_SIZE, MAX_CHECKS,
};

const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 1000;

// ============================================================================
// SHARED STATE
// ============================================================================

/// API state shared across all handlers.
pub struct ApiState {
    pub storage: Arc<Storage>,
    pub notifier: NotifySender,
    pub build: BuildPipeline,
    pub eval: EvalPipeline,
}

// ============================================================================
// STUDENT-SYSTEM ENDPOINTS
// ============================================================================

#[derive(Debug, Serialize)]
pub struct BuildResponse {
    pub success: bool,
    #[serde(rename = "submissionId")]
    pub submission_id: Option<String>,
    pub error: Option<String>,
}

impl BuildResponse {
    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            submission_id: None,
            error: Some(message.into()),
        }
    }
}

/// POST /api/build - receive an authenticated project build request.
///
/// Verifies the shared secret, enforces round monotonicity per
/// `(email, task)`, records the submission as `received`, and schedules
/// the build pipeline.
pub async fn receive_build_request(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<BuildRequest>,
) -> Result<Json<BuildResponse>, (StatusCode, Json<BuildResponse>)> {
    let bad_request = |msg: String| (StatusCode::BAD_REQUEST, Json(BuildResponse::error(msg)));

    let config = state
        .storage
        .instructor_config()
        .map_err(|e| internal_build_error(e.to_string()))?
        .unwrap_or_default();

    if !verify_shared_secret(&config.shared_secret, &req.secret) {
        warn!("Rejected build request for {}: invalid secret", req.email);
        return Err(bad_request("Invalid secret".to_string()));
    }

    if req.email.is_empty() || req.task.is_empty() {
        return Err(bad_request("email and task are required".to_string()));
    }
    if req.round == 0 {
        return Err(bad_request("round must be at least 1".to_string()));
    }
    if req.round > config.max_rounds {
        return Err(bad_request(format!(
            "round {} exceeds the course limit of {}",
            req.round, config.max_rounds
        )));
    }
    if req.brief.is_empty() || req.brief.len() > MAX_BRIEF_SIZE {
        return Err(bad_request(format!(
            "brief must be 1..={MAX_BRIEF_SIZE} bytes"
        )));
    }
    if req.checks.len() > MAX_CHECKS {
        return Err(bad_request(format!("at most {MAX_CHECKS} checks allowed")));
    }
    if req.evaluation_url.is_empty() {
        return Err(bad_request("evaluation_url is required".to_string()));
    }

    // Rounds only ever move forward for a given (email, task).
    let max_round = state
        .storage
        .max_round(&req.email, &req.task)
        .map_err(|e| internal_build_error(e.to_string()))?;
    if let Some(max_round) = max_round {
        if req.round <= max_round {
            return Err(bad_request(format!(
                "round {} already submitted for this task (latest round: {})",
                req.round, max_round
            )));
        }
    }

    let submission = Submission {
        id: uuid::Uuid::new_v4().to_string(),
        email: req.email.clone(),
        task: req.task.clone(),
        round: req.round,
        nonce: req.nonce.clone(),
        brief: req.brief.clone(),
        checks: req.checks.clone(),
        evaluation_url: req.evaluation_url.clone(),
        attachments: req.attachments.clone(),
        status: SubmissionStatus::Received,
        repo_url: None,
        commit_sha: None,
        pages_url: None,
        error_message: None,
        created_at: chrono::Utc::now().timestamp(),
        completed_at: None,
    };
    state
        .storage
        .insert_submission(&submission)
        .map_err(|e| internal_build_error(e.to_string()))?;

    info!(
        "Received project request for {} (task {}, round {})",
        req.email, req.task, req.round
    );
    let _ = state.storage.append_log(
        LogLevel::Info,
        &format!(
            "Received project request for {}, task: {}, round: {}",
            req.email, req.task, req.round
        ),
        Some(&submission.id),
        Some(&req.email),
        Some(&req.task),
    );

    let pipeline = state.build.clone();
    let submission_id = submission.id.clone();
    tokio::spawn(async move {
        pipeline.run(&submission_id).await;
    });

    Ok(Json(BuildResponse {
        success: true,
        submission_id: Some(submission.id),
        error: None,
    }))
}

fn internal_build_error(message: String) -> (StatusCode, Json<BuildResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(BuildResponse::error(message)),
    )
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub success: bool,
    pub error: Option<String>,
}

/// POST /api/evaluate - receive a deployment notification and schedule the
/// evaluation pipeline for the matching submission.
pub async fn receive_evaluate_request(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, (StatusCode, Json<EvaluateResponse>)> {
    let bad_request = |msg: String| {
        (
            StatusCode::BAD_REQUEST,
            Json(EvaluateResponse {
                success: false,
                error: Some(msg),
            }),
        )
    };

    let config = state
        .storage
        .instructor_config()
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(EvaluateResponse {
                    success: false,
                    error: Some(e.to_string()),
                }),
            )
        })?
        .unwrap_or_default();

    if !verify_shared_secret(&config.shared_secret, &req.secret) {
        warn!(
            "Rejected evaluate notification for {}: invalid secret",
            req.email
        );
        return Err(bad_request("Invalid secret".to_string()));
    }

    let submission = state
        .storage
        .find_submission(&req.email, &req.task, req.round, &req.nonce)
        .map_err(|e| bad_request(e.to_string()))?
        .ok_or_else(|| bad_request("Submission not found".to_string()))?;

    info!(
        "Queued evaluation for {} (task {}, commit {})",
        req.email, req.task, req.commit_sha
    );
    let _ = state.storage.append_log(
        LogLevel::Info,
        &format!("Queued evaluation for {}, task: {}", req.email, req.task),
        Some(&submission.id),
        Some(&req.email),
        Some(&req.task),
    );

    let pipeline = state.eval.clone();
    tokio::spawn(async move {
        pipeline
            .run(&submission.id, &req.repo_url, &req.pages_url)
            .await;
    });

    Ok(Json(EvaluateResponse {
        success: true,
        error: None,
    }))
}

// ============================================================================
// DASHBOARD: SUBMISSIONS AND EVALUATIONS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmissionsQuery {
    pub email: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionsResponse {
    pub submissions: Vec<Submission>,
    pub total: usize,
}

/// GET /api/submissions - list submissions, optionally filtered by student.
pub async fn list_submissions(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SubmissionsQuery>,
) -> Result<Json<SubmissionsResponse>, (StatusCode, String)> {
    let limit = clamp_limit(query.limit);
    let submissions = match query.email.as_deref().filter(|e| !e.is_empty()) {
        Some(email) => state.storage.submissions_by_email(email),
        None => state.storage.recent_submissions(limit),
    }
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let total = submissions.len();
    Ok(Json(SubmissionsResponse { submissions, total }))
}

#[derive(Debug, Deserialize)]
pub struct EvaluationsQuery {
    pub task: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct EvaluationsResponse {
    pub evaluations: Vec<Evaluation>,
    pub total: usize,
}

/// GET /api/evaluations - list evaluations, optionally filtered by task.
pub async fn list_evaluations(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<EvaluationsQuery>,
) -> Result<Json<EvaluationsResponse>, (StatusCode, String)> {
    let limit = clamp_limit(query.limit);
    let evaluations = match query.task.as_deref().filter(|t| !t.is_empty()) {
        Some(task) => state.storage.evaluations_by_task(task),
        None => state.storage.recent_evaluations(limit),
    }
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let total = evaluations.len();
    Ok(Json(EvaluationsResponse { evaluations, total }))
}

// ============================================================================
// DASHBOARD: TASK TEMPLATES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub brief: String,
    pub checks: Vec<String>,
    #[serde(default)]
    pub functional_tests: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
pub struct CreateTemplateResponse {
    pub success: bool,
    pub template_id: Option<String>,
    pub error: Option<String>,
}

/// POST /api/templates - create a task template.
pub async fn create_template(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<Json<CreateTemplateResponse>, (StatusCode, Json<CreateTemplateResponse>)> {
    let bad_request = |msg: String| {
        (
            StatusCode::BAD_REQUEST,
            Json(CreateTemplateResponse {
                success: false,
                template_id: None,
                error: Some(msg),
            }),
        )
    };

    if req.name.is_empty() || req.brief.is_empty() {
        return Err(bad_request("name and brief are required".to_string()));
    }
    if req.checks.len() > MAX_CHECKS {
        return Err(bad_request(format!("at most {MAX_CHECKS} checks allowed")));
    }

    let template = TaskTemplate {
        id: uuid::Uuid::new_v4().to_string(),
        name: req.name,
        brief: req.brief,
        checks: req.checks,
        functional_tests: req.functional_tests,
        attachments: req.attachments,
        active: true,
        created_at: chrono::Utc::now().timestamp(),
    };
    state.storage.insert_template(&template).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(CreateTemplateResponse {
                success: false,
                template_id: None,
                error: Some(e.to_string()),
            }),
        )
    })?;

    Ok(Json(CreateTemplateResponse {
        success: true,
        template_id: Some(template.id),
        error: None,
    }))
}

#[derive(Debug, Serialize)]
pub struct TemplatesResponse {
    pub templates: Vec<TaskTemplate>,
    pub total: usize,
}

/// GET /api/templates - list active task templates.
pub async fn list_templates(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<TemplatesResponse>, (StatusCode, String)> {
    let templates = state
        .storage
        .active_templates()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let total = templates.len();
    Ok(Json(TemplatesResponse { templates, total }))
}

/// DELETE /api/templates/:id - deactivate a task template.
pub async fn deactivate_template(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let found = state
        .storage
        .deactivate_template(&id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if found {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("template not found: {id}")))
    }
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub students: Vec<StudentTarget>,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub success: bool,
    pub tasks_sent: u32,
    pub error: Option<String>,
}

/// POST /api/templates/:id/dispatch - send a task to a list of students.
pub async fn dispatch_template(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<DispatchRequest>,
) -> Result<Json<DispatchResponse>, (StatusCode, Json<DispatchResponse>)> {
    let fail = |status: StatusCode, msg: String| {
        (
            status,
            Json(DispatchResponse {
                success: false,
                tasks_sent: 0,
                error: Some(msg),
            }),
        )
    };

    if req.students.is_empty() {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            "at least one student is required".to_string(),
        ));
    }

    let template = state
        .storage
        .get_template(&id)
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, format!("template not found: {id}")))?;

    let tasks_sent = dispatch_task(&state.storage, &state.notifier, &template, &req.students)
        .map_err(|e| match e {
            DispatchError::MissingConfig => fail(StatusCode::BAD_REQUEST, e.to_string()),
            DispatchError::Storage(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })?;

    Ok(Json(DispatchResponse {
        success: true,
        tasks_sent,
        error: None,
    }))
}

// ============================================================================
// DASHBOARD: INSTRUCTOR CONFIG AND LOGS
// ============================================================================

/// GET /api/config - fetch the instructor configuration.
pub async fn get_instructor_config(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Option<InstructorConfig>>, (StatusCode, String)> {
    let config = state
        .storage
        .instructor_config()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(config))
}

#[derive(Debug, Serialize)]
pub struct UpdateConfigResponse {
    pub success: bool,
    pub error: Option<String>,
}

/// PUT /api/config - upsert the instructor configuration.
pub async fn update_instructor_config(
    State(state): State<Arc<ApiState>>,
    Json(config): Json<InstructorConfig>,
) -> Result<Json<UpdateConfigResponse>, (StatusCode, Json<UpdateConfigResponse>)> {
    let bad_request = |msg: String| {
        (
            StatusCode::BAD_REQUEST,
            Json(UpdateConfigResponse {
                success: false,
                error: Some(msg),
            }),
        )
    };

    if config.shared_secret.is_empty() {
        return Err(bad_request("shared_secret must not be empty".to_string()));
    }
    if config.max_rounds == 0 {
        return Err(bad_request("max_rounds must be at least 1".to_string()));
    }

    state
        .storage
        .upsert_instructor_config(&config)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UpdateConfigResponse {
                    success: false,
                    error: Some(e.to_string()),
                }),
            )
        })?;

    Ok(Json(UpdateConfigResponse {
        success: true,
        error: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LogEntry>,
    pub total: usize,
}

/// GET /api/logs - recent system log entries.
pub async fn list_logs(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, (StatusCode, String)> {
    let logs = state
        .storage
        .recent_logs(clamp_limit(query.limit))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let total = logs.len();
    Ok(Json(LogsResponse { logs, total }))
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)
}
