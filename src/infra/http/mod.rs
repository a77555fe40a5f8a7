//! HTTP surface for likes, favorites and counters.

pub mod error;
mod handlers;
pub mod middleware;
mod state;

pub use error::{ApiError, codes};
pub use middleware::{USER_ID_HEADER, UserContext};
pub use state::AppState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};

use self::middleware::{log_responses, require_user, set_request_context};

pub fn build_router(state: AppState) -> Router {
    let user_routes = Router::new()
        .route(
            "/api/mods/{id}/likes",
            post(handlers::like_mod)
                .delete(handlers::unlike_mod)
                .get(handlers::like_status),
        )
        .route("/api/mod_favorites", post(handlers::create_favorite))
        .route(
            "/api/mod_favorites/check",
            get(handlers::check_favorite),
        )
        .route(
            "/api/mod_favorites/{mod_id}",
            delete(handlers::delete_favorite),
        )
        .layer(axum_middleware::from_fn(require_user));

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/mod_versions/count/{mod_id}/{id}",
            post(handlers::record_download),
        )
        .route(
            "/api/counts/{resource}/{id}/{field}",
            get(handlers::get_count),
        )
        .merge(user_routes)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
