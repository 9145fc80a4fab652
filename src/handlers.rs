use crate::error::{AppError, EngineError};
use crate::models::{validate_quiz, QuizDraft};
use crate::state::{AppState, AssignmentScope};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};

/// Identity header stamped by the upstream gateway after authentication.
/// The engine trusts it and performs no credential checks of its own.
const USER_ID_HEADER: &str = "x-user-id";

static RATE_LIMIT: Lazy<DashMap<String, (u32, Instant)>> = Lazy::new(DashMap::new);

fn check_rate_limit(scope: &str, key: &str, limit_per_minute: u32) -> bool {
    let now = Instant::now();
    let full_key = format!("{scope}:{key}");
    if let Some(mut entry) = RATE_LIMIT.get_mut(&full_key) {
        if now.duration_since(entry.1) > Duration::from_secs(60) {
            *entry = (1, now);
            true
        } else if entry.0 >= limit_per_minute {
            false
        } else {
            entry.0 += 1;
            true
        }
    } else {
        RATE_LIMIT.insert(full_key, (1, now));
        true
    }
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn require_caller(headers: &HeaderMap) -> Result<(String, String), AppError> {
    let req_id = request_id_from_headers(headers);
    let caller = headers
        .get(USER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    match caller {
        Some(id) => Ok((id, req_id)),
        None => Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing caller identity",
            req_id,
        )),
    }
}

fn rate_limited(req_id: String) -> AppError {
    AppError::new(
        StatusCode::TOO_MANY_REQUESTS,
        "RATE_LIMITED",
        "too many requests",
        req_id,
    )
}

#[derive(Debug, Serialize)]
pub struct QuizIdResponse {
    pub quiz_id: i64,
}

/// Dry-run validation for the authoring UI. Persists nothing.
pub async fn validate_quiz_draft(
    headers: HeaderMap,
    Json(payload): Json<QuizDraft>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (_caller, req_id) = require_caller(&headers)?;
    validate_quiz(&payload)
        .map_err(|err| AppError::from_engine(EngineError::Validation(err), req_id))?;
    Ok(Json(json!({ "valid": true })))
}

pub async fn create_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<QuizDraft>,
) -> Result<(StatusCode, Json<QuizIdResponse>), AppError> {
    let (caller, req_id) = require_caller(&headers)?;
    if !check_rate_limit("quiz_create", &caller, 30) {
        return Err(rate_limited(req_id));
    }
    let quiz = validate_quiz(&payload)
        .map_err(|err| AppError::from_engine(EngineError::Validation(err), req_id.clone()))?;
    let id = state.create_quiz(&caller, quiz).await;
    Ok((StatusCode::CREATED, Json(QuizIdResponse { quiz_id: id })))
}

#[derive(Debug, Deserialize)]
pub struct QuizListQuery {
    #[serde(rename = "courseId")]
    pub course_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct QuizSummary {
    pub id: i64,
    pub title: String,
    pub course_id: Option<i64>,
    pub question_count: usize,
}

#[derive(Debug, Serialize)]
pub struct QuizListResponse {
    pub items: Vec<QuizSummary>,
    pub total: usize,
}

pub async fn list_quizzes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<QuizListQuery>,
) -> Result<Json<QuizListResponse>, AppError> {
    let (caller, _req_id) = require_caller(&headers)?;
    let items: Vec<QuizSummary> = state
        .list_quizzes(&caller, query.course_id)
        .await
        .into_iter()
        .map(|q| QuizSummary {
            id: q.id,
            title: q.title,
            course_id: q.course_id,
            question_count: q.questions.len(),
        })
        .collect();
    Ok(Json(QuizListResponse { total: items.len(), items }))
}

pub async fn get_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<crate::state::QuizRecord>, AppError> {
    let (caller, req_id) = require_caller(&headers)?;
    let quiz = state
        .get_quiz(id, &caller)
        .await
        .map_err(|err| AppError::from_engine(err, req_id))?;
    Ok(Json(quiz))
}

pub async fn update_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<QuizDraft>,
) -> Result<Json<QuizIdResponse>, AppError> {
    let (caller, req_id) = require_caller(&headers)?;
    let quiz = validate_quiz(&payload)
        .map_err(|err| AppError::from_engine(EngineError::Validation(err), req_id.clone()))?;
    state
        .update_quiz(id, &caller, quiz)
        .await
        .map_err(|err| AppError::from_engine(err, req_id))?;
    Ok(Json(QuizIdResponse { quiz_id: id }))
}

pub async fn delete_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let (caller, req_id) = require_caller(&headers)?;
    state
        .delete_quiz(id, &caller)
        .await
        .map_err(|err| AppError::from_engine(err, req_id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Copies a quiz into a fresh editable record; the way forward once the
/// original is locked by recorded results.
pub async fn clone_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let (caller, req_id) = require_caller(&headers)?;
    if !check_rate_limit("quiz_clone", &caller, 30) {
        return Err(rate_limited(req_id));
    }
    let quiz_id = state
        .clone_quiz(id, &caller)
        .await
        .map_err(|err| AppError::from_engine(err, req_id))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "quizId": quiz_id, "sourceQuizId": id })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CreateAssignmentPayload {
    #[serde(rename = "quizId")]
    pub quiz_id: i64,
    pub scope: AssignmentScope,
}

pub async fn create_assignment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateAssignmentPayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let (caller, req_id) = require_caller(&headers)?;
    if !check_rate_limit("assignment_create", &caller, 30) {
        return Err(rate_limited(req_id));
    }
    let record = state
        .assign(payload.quiz_id, &caller, payload.scope)
        .await
        .map_err(|err| AppError::from_engine(err, req_id))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "assignmentId": record.id,
            "quizId": record.quiz_id,
            "createdAt": record.created_at
        })),
    ))
}

/// The calling student's assignments, newest first.
pub async fn list_my_assignments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let (caller, req_id) = require_caller(&headers)?;
    let items = state
        .assignments_for_student(&caller)
        .await
        .map_err(|err| AppError::from_engine(err, req_id))?;
    Ok(Json(json!({ "total": items.len(), "items": items })))
}

/// Student view of one assignment: the questions with the correct option
/// indices withheld, so the answer key never leaves the server on this path.
pub async fn get_assignment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (caller, req_id) = require_caller(&headers)?;
    let assignment = state
        .get_assignment(id)
        .await
        .map_err(|err| AppError::from_engine(err, req_id.clone()))?;

    let quiz = state
        .db
        .quizzes
        .read()
        .await
        .get(&assignment.quiz_id)
        .cloned()
        .ok_or_else(|| AppError::from_engine(EngineError::QuizNotFound, req_id.clone()))?;
    let is_owner = quiz.owner_teacher_id == caller;
    let is_assignee = state
        .is_assignee(&assignment, &caller)
        .await
        .map_err(|err| AppError::from_engine(err, req_id.clone()))?;
    if !is_owner && !is_assignee {
        return Err(AppError::from_engine(EngineError::Forbidden, req_id));
    }

    let questions: Vec<_> = quiz
        .questions
        .iter()
        .map(|q| json!({ "text": q.text, "options": q.options }))
        .collect();
    Ok(Json(json!({
        "id": assignment.id,
        "quizId": quiz.id,
        "title": quiz.title,
        "createdAt": assignment.created_at,
        "questions": questions
    })))
}

#[derive(Debug, Deserialize)]
pub struct SubmitPayload {
    pub answers: Vec<Option<usize>>,
}

pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<SubmitPayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let (caller, req_id) = require_caller(&headers)?;
    if !check_rate_limit("submission", &caller, 30) {
        return Err(rate_limited(req_id));
    }
    let result = state
        .submit(id, &caller, payload.answers)
        .await
        .map_err(|err| AppError::from_engine(err, req_id))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "score": result.score,
            "total": result.total,
            "percentage": result.percentage
        })),
    ))
}

/// The calling student's own recorded result for an assignment.
pub async fn my_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (caller, req_id) = require_caller(&headers)?;
    let record = state
        .own_submission(id, &caller)
        .await
        .map_err(|err| AppError::from_engine(err, req_id))?;
    Ok(Json(json!({
        "score": record.result.score,
        "total": record.result.total,
        "percentage": record.result.percentage,
        "submittedAt": record.submitted_at
    })))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// Teacher report for an assignment: every eligible student, attempted or
/// not, with an optional name/email filter.
pub async fn assignment_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (caller, req_id) = require_caller(&headers)?;
    let rows = state
        .summarize(id, &caller, query.q.as_deref())
        .await
        .map_err(|err| AppError::from_engine(err, req_id))?;
    Ok(Json(json!({ "total": rows.len(), "items": rows })))
}
