use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::auth::{auth_middleware, AuthService};
use crate::storage::Storage;

use super::handlers::{click_summary, get_tour, health_check, list_clicks, list_tours, AppState};

/// Reporting API, mounted under `/api`
pub fn create_api_router(storage: Arc<dyn Storage>, auth_service: Arc<AuthService>) -> Router {
    let state = Arc::new(AppState { storage });

    let protected_routes = Router::new()
        .route("/tours", get(list_tours))
        .route("/tours/{slug}", get(get_tour))
        .route("/clicks", get(list_clicks))
        .route("/clicks/summary", get(click_summary))
        .route_layer(middleware::from_fn_with_state(
            auth_service,
            auth_middleware,
        ))
        .with_state(state);

    let api = Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes);

    Router::new().nest("/api", api).layer(CorsLayer::permissive())
}
