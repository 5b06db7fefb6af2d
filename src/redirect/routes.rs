use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use super::handlers::{health_check, missing_slug, redirect_to_partner, RedirectState};
use super::middleware::record_request_start;

pub fn create_redirect_router(state: Arc<RedirectState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/out", get(missing_slug))
        .route("/out/", get(missing_slug))
        .route("/out/{slug}", get(redirect_to_partner))
        .layer(middleware::from_fn(record_request_start))
        .with_state(state)
}
