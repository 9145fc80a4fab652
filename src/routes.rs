use crate::handlers;
use crate::state::AppState;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([HeaderValue::from_static("http://localhost:5173")])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("x-user-id"),
            axum::http::HeaderName::from_static("x-request-id"),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/api/v1/quizzes",
            post(handlers::create_quiz).get(handlers::list_quizzes),
        )
        .route("/api/v1/quizzes/validate", post(handlers::validate_quiz_draft))
        .route(
            "/api/v1/quizzes/:id",
            get(handlers::get_quiz)
                .put(handlers::update_quiz)
                .delete(handlers::delete_quiz),
        )
        .route("/api/v1/quizzes/:id/clone", post(handlers::clone_quiz))
        .route(
            "/api/v1/assignments",
            post(handlers::create_assignment).get(handlers::list_my_assignments),
        )
        .route("/api/v1/assignments/:id", get(handlers::get_assignment))
        .route("/api/v1/assignments/:id/submissions", post(handlers::submit))
        .route(
            "/api/v1/assignments/:id/submissions/mine",
            get(handlers::my_result),
        )
        .route(
            "/api/v1/assignments/:id/summary",
            get(handlers::assignment_summary),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
