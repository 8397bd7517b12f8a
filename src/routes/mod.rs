//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws`
/// - REST-ish API under `/api/v1/...`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    let sessions = Router::new()
        .route("/", post(http::http_start_session))
        .route("/:id", get(http::http_get_session).delete(http::http_end_session))
        .route("/:id/intro/next", post(http::http_advance_intro))
        .route("/:id/role/accept", post(http::http_accept_role))
        .route("/:id/tasks/:task_id/submit", post(http::http_submit_task))
        .route("/:id/playback/dismiss", post(http::http_dismiss_playback))
        .route("/:id/clues/:clue_id/open", post(http::http_open_clue))
        .route("/:id/chat", post(http::http_chat));

    let workshop = Router::new()
        .route("/curriculum", post(http::http_workshop_curriculum))
        .route("/outline", post(http::http_workshop_outline))
        .route("/roles", post(http::http_workshop_roles))
        .route("/scenes", post(http::http_workshop_scenes))
        .route("/quiz", post(http::http_workshop_quiz))
        .route("/refine", post(http::http_workshop_refine))
        .route("/image", post(http::http_workshop_image))
        .route("/assemble", post(http::http_workshop_assemble));

    let api = Router::new()
        .route("/health", get(http::http_health))
        .route("/settings", get(http::http_get_settings).put(http::http_put_settings))
        .route("/profile", get(http::http_get_profile).put(http::http_put_profile))
        .route("/progress", get(http::http_get_progress))
        .route("/scripts", get(http::http_list_scripts).post(http::http_publish_script))
        .route("/scripts/:id", get(http::http_get_script))
        .nest("/sessions", sessions)
        .route("/quiz/grade", post(http::http_grade_quiz))
        .route("/report", post(http::http_report))
        .nest("/workshop", workshop);

    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .nest("/api/v1", api)
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}
