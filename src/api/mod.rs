mod handlers;
pub mod middleware;

pub use handlers::{
    ActiveTermResponse, AuthorizationResponse, ResolvedScore, ValidationResponse,
};

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::assignments::AssignmentIndex;
use crate::config::Config;
use crate::db::Database;
use crate::grading::GradeResolutionEngine;
use crate::terms::TermLifecycleManager;
use crate::workflow::GradingWorkflow;

/// The components shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub terms: TermLifecycleManager,
    pub grading: GradeResolutionEngine,
    pub assignments: AssignmentIndex,
    pub workflow: GradingWorkflow,
}

impl AppState {
    pub fn new(db: Database, config: &Config) -> Self {
        let terms = TermLifecycleManager::with_config(db.clone(), config);
        let grading = GradeResolutionEngine::with_config(db.clone(), config);
        let assignments = AssignmentIndex::new(db.clone());
        let workflow = GradingWorkflow::new(db, assignments.clone(), terms.clone(), grading.clone());
        Self {
            terms,
            grading,
            assignments,
            workflow,
        }
    }
}

pub fn create_router(db: Database) -> Router {
    create_router_with_config(db, &Config::default())
}

pub fn create_router_with_config(db: Database, config: &Config) -> Router {
    let api = Router::new()
        // Sessions
        .route("/sessions", get(handlers::list_sessions).post(handlers::create_session))
        .route("/sessions/{id}", get(handlers::get_session).delete(handlers::delete_session))
        .route("/sessions/{id}/terms", get(handlers::list_session_terms).post(handlers::create_term))
        .route("/sessions/{id}/assignments", get(handlers::list_session_assignments))
        // Terms
        .route("/terms/active", get(handlers::get_active_term))
        .route("/terms/{id}", get(handlers::get_term))
        .route("/terms/{id}/activate", post(handlers::activate_term))
        .route("/terms/{id}/report", get(handlers::term_report))
        // Grading rules
        .route(
            "/grading-rules",
            get(handlers::list_rules)
                .put(handlers::replace_rules)
                .post(handlers::create_rule),
        )
        .route("/grading-rules/validate", post(handlers::validate_rules))
        .route(
            "/grading-rules/resolve",
            get(handlers::resolve_score).post(handlers::resolve_batch),
        )
        .route(
            "/grading-rules/{id}",
            put(handlers::update_rule).delete(handlers::delete_rule),
        )
        // Assignments
        .route("/assignments", post(handlers::assign))
        .route("/assignments/unassign", post(handlers::unassign))
        .route("/assignments/check", get(handlers::check_assignment))
        // Scores
        .route("/scores", post(handlers::record_score))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(db, config))
}
