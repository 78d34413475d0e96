//! API route definitions.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{follows, health, queries, trading};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        // Command API
        .route("/api/follows", post(follows::follow).put(follows::update_follow))
        .route(
            "/api/users/{user_id}/follows/{whale_id}",
            axum::routing::delete(follows::unfollow),
        )
        .route("/api/signals/{signal_id}/copy", post(trading::copy_signal))
        .route("/api/positions/{position_id}/close", post(trading::close_position))
        // Query API
        .route("/api/users/{user_id}/follows", get(follows::list_follows))
        .route("/api/users/{user_id}/trades", get(queries::list_trades))
        .route("/api/users/{user_id}/positions", get(queries::list_positions))
        .route("/api/users/{user_id}/portfolio", get(queries::portfolio))
        // Operator surface
        .route("/api/admin/dead-letters", get(queries::dead_letters))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
