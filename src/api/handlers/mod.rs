use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::middleware::AdminActor;
use super::AppState;
use crate::error::Error;
use crate::grading::RuleSetViolation;
use crate::models::*;

type ApiResult<T> = Result<T, (StatusCode, String)>;

// ============================================================
// Error Handling
// ============================================================

/// Maps a core error to a status and message.
///
/// Caller-facing errors are returned as-is. Storage and internal failures are
/// logged in full and answered with a generic message so internal details do
/// not leak to clients.
fn api_error(e: Error) -> (StatusCode, String) {
    let status = match &e {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::InvalidRuleSet(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::OutOfRange(_) => StatusCode::BAD_REQUEST,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::Storage(_) | Error::Internal(_) => {
            tracing::error!("Internal error: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
    };

    tracing::warn!("Request failed: {}", e);
    (status, e.to_string())
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Sessions
// ============================================================

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<Vec<Session>>> {
    state.terms.list_sessions().await.map(Json).map_err(api_error)
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Session>> {
    state.terms.get_session(id).await.map(Json).map_err(api_error)
}

pub async fn create_session(
    State(state): State<AppState>,
    _admin: AdminActor,
    Json(input): Json<CreateSessionInput>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    state
        .terms
        .create_session(input)
        .await
        .map(|s| (StatusCode::CREATED, Json(s)))
        .map_err(api_error)
}

pub async fn delete_session(
    State(state): State<AppState>,
    _admin: AdminActor,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .terms
        .delete_session(id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(api_error)
}

pub async fn list_session_terms(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Term>>> {
    // First verify session exists
    state.terms.get_session(session_id).await.map_err(api_error)?;

    state
        .terms
        .list_terms(session_id)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn create_term(
    State(state): State<AppState>,
    _admin: AdminActor,
    Path(session_id): Path<Uuid>,
    Json(input): Json<CreateTermInput>,
) -> ApiResult<(StatusCode, Json<Term>)> {
    state
        .terms
        .create_term(session_id, input)
        .await
        .map(|t| (StatusCode::CREATED, Json(t)))
        .map_err(api_error)
}

pub async fn list_session_assignments(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Assignment>>> {
    state.terms.get_session(session_id).await.map_err(api_error)?;

    state
        .assignments
        .list_for_session(session_id)
        .await
        .map(Json)
        .map_err(api_error)
}

// ============================================================
// Terms
// ============================================================

pub async fn get_term(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Term>> {
    state.terms.get_term(id).await.map(Json).map_err(api_error)
}

pub async fn activate_term(
    State(state): State<AppState>,
    AdminActor(admin): AdminActor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ActiveTerm>> {
    tracing::info!(actor_id = %admin.id, term_id = %id, "Activation requested");
    state.terms.activate(id).await.map(Json).map_err(api_error)
}

/// `active` is `null` when no term has been activated yet.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveTermResponse {
    pub active: Option<ActiveTerm>,
}

pub async fn get_active_term(State(state): State<AppState>) -> ApiResult<Json<ActiveTermResponse>> {
    state
        .terms
        .get_active()
        .await
        .map(|s| {
            Json(ActiveTermResponse {
                active: s.into_option(),
            })
        })
        .map_err(api_error)
}

/// Query parameters for a term report.
#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub class_id: Uuid,
    pub subject_id: Uuid,
}

pub async fn term_report(
    State(state): State<AppState>,
    Path(term_id): Path<Uuid>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<Vec<ReportRow>>> {
    state
        .workflow
        .term_report(term_id, query.class_id, query.subject_id)
        .await
        .map(Json)
        .map_err(api_error)
}

// ============================================================
// Grading rules
// ============================================================

pub async fn list_rules(State(state): State<AppState>) -> ApiResult<Json<Vec<GradingRule>>> {
    state.grading.list_rules().await.map(Json).map_err(api_error)
}

pub async fn replace_rules(
    State(state): State<AppState>,
    _admin: AdminActor,
    Json(inputs): Json<Vec<CreateGradingRuleInput>>,
) -> ApiResult<Json<Vec<GradingRule>>> {
    state
        .grading
        .replace_rules(inputs)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn create_rule(
    State(state): State<AppState>,
    _admin: AdminActor,
    Json(input): Json<CreateGradingRuleInput>,
) -> ApiResult<(StatusCode, Json<GradingRule>)> {
    state
        .grading
        .create_rule(input)
        .await
        .map(|r| (StatusCode::CREATED, Json(r)))
        .map_err(api_error)
}

pub async fn update_rule(
    State(state): State<AppState>,
    _admin: AdminActor,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateGradingRuleInput>,
) -> ApiResult<Json<GradingRule>> {
    state
        .grading
        .update_rule(id, input)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn delete_rule(
    State(state): State<AppState>,
    _admin: AdminActor,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .grading
        .delete_rule(id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(api_error)
}

/// Outcome of a dry-run validation.
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub valid: bool,
    pub violation: Option<RuleSetViolation>,
}

/// Validates a candidate rule set without storing it. Always answers 200; the
/// body says whether the set is valid and, if not, names the offending range.
pub async fn validate_rules(
    State(state): State<AppState>,
    Json(inputs): Json<Vec<CreateGradingRuleInput>>,
) -> ApiResult<Json<ValidationResponse>> {
    match state.grading.validate_rule_set(&inputs) {
        Ok(()) => Ok(Json(ValidationResponse {
            valid: true,
            violation: None,
        })),
        Err(Error::InvalidRuleSet(violation)) => Ok(Json(ValidationResponse {
            valid: false,
            violation: Some(violation),
        })),
        Err(e) => Err(api_error(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    pub score: f64,
}

pub async fn resolve_score(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
) -> ApiResult<Json<GradingRule>> {
    state
        .grading
        .resolve(query.score)
        .await
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct ResolveBatchInput {
    pub scores: Vec<f64>,
}

/// One resolved score. Out-of-range scores carry `error` instead of a grade.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResolvedScore {
    pub score: f64,
    pub grade: Option<String>,
    pub remark: Option<String>,
    pub error: Option<String>,
}

pub async fn resolve_batch(
    State(state): State<AppState>,
    Json(input): Json<ResolveBatchInput>,
) -> ApiResult<Json<Vec<ResolvedScore>>> {
    let grades = state
        .grading
        .resolve_batch(input.scores.clone())
        .await
        .map_err(api_error)?;

    let resolved = input
        .scores
        .into_iter()
        .zip(grades)
        .map(|(score, grade)| match grade {
            Ok(rule) => ResolvedScore {
                score,
                grade: Some(rule.grade),
                remark: Some(rule.remark),
                error: None,
            },
            Err(e) => ResolvedScore {
                score,
                grade: None,
                remark: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    Ok(Json(resolved))
}

// ============================================================
// Assignments
// ============================================================

pub async fn assign(
    State(state): State<AppState>,
    _admin: AdminActor,
    Json(key): Json<AssignmentKey>,
) -> ApiResult<Json<Assignment>> {
    state.assignments.assign(key).await.map(Json).map_err(api_error)
}

pub async fn unassign(
    State(state): State<AppState>,
    _admin: AdminActor,
    Json(key): Json<AssignmentKey>,
) -> ApiResult<StatusCode> {
    state
        .assignments
        .unassign(key)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(api_error)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub authorized: bool,
}

pub async fn check_assignment(
    State(state): State<AppState>,
    Query(key): Query<AssignmentKey>,
) -> ApiResult<Json<AuthorizationResponse>> {
    state
        .assignments
        .is_authorized(key)
        .await
        .map(|authorized| Json(AuthorizationResponse { authorized }))
        .map_err(api_error)
}

// ============================================================
// Scores
// ============================================================

pub async fn record_score(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<RecordScoreInput>,
) -> ApiResult<(StatusCode, Json<Score>)> {
    state
        .workflow
        .record_score(&actor, input)
        .await
        .map(|s| (StatusCode::CREATED, Json(s)))
        .map_err(api_error)
}
