//! Web server module.
//!
//! Routes:
//! - `GET /track/{id}`: tracking pixel, never fails
//! - `POST /emails`: register a sent email
//! - `GET /emails`: grouped listing (login gate)
//! - `GET /ws`: real-time open events (login gate)
//! - `POST /login`, `POST /logout`: dashboard session
//! - `GET /health`, `GET /`: liveness

pub mod client_ip;
pub mod handlers;
pub mod session;
pub mod ws;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

pub use client_ip::{resolve_client_ip, ClientIp};
pub use handlers::{
    create_email_log, health, list_emails, root, track, AppState, CreateEmailLogRequest,
    HealthResponse, ListEmailsQuery,
};
pub use session::{issue_session_token, require_session, verify_session_token};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let gate = middleware::from_fn_with_state(state.clone(), require_session);
    let static_dir = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/track", get(handlers::track_without_id))
        .route("/track/", get(handlers::track_without_id))
        .route("/track/:tracking_id", get(track))
        .route(
            "/emails",
            get(list_emails)
                .route_layer(gate.clone())
                .post(create_email_log),
        )
        .route("/ws", get(ws::observe).route_layer(gate))
        .route("/login", post(session::login))
        .route("/logout", post(session::logout))
        .fallback_service(static_dir)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
