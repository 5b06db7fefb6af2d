use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{normalize_slug, ClickAggregate, ClickEvent, ClickGroupBy, ClickQuery, Tour};
use crate::storage::Storage;

pub struct AppState {
    pub storage: Arc<dyn Storage>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "reporting API storage error");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Deserialize)]
pub struct ClickListQuery {
    pub tour_slug: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    #[serde(default = "default_click_limit")]
    pub limit: i64,
}

fn default_click_limit() -> i64 {
    100
}

#[derive(Deserialize)]
pub struct SummaryQuery {
    pub group_by: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    #[serde(default = "default_summary_limit")]
    pub limit: i64,
}

fn default_summary_limit() -> i64 {
    50
}

#[derive(Serialize)]
pub struct ClickSummaryResponse {
    pub group_by: ClickGroupBy,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    /// Sum over the returned groups
    pub total_clicks: i64,
    pub groups: Vec<ClickAggregate>,
}

fn check_time_range(start_time: Option<i64>, end_time: Option<i64>) -> Result<(), ApiError> {
    match (start_time, end_time) {
        (Some(start), Some(end)) if start > end => Err(api_error(
            StatusCode::BAD_REQUEST,
            "start_time must not be after end_time",
        )),
        _ => Ok(()),
    }
}

/// List tours ordered by slug
pub async fn list_tours(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Tour>>, ApiError> {
    let limit = query.limit.clamp(1, 500);
    let offset = query.offset.max(0);

    state
        .storage
        .list_tours(limit, offset)
        .await
        .map(Json)
        .map_err(internal_error)
}

/// Get one tour by slug
pub async fn get_tour(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<Tour>, ApiError> {
    let not_found = || api_error(StatusCode::NOT_FOUND, "Tour not found");
    let slug = normalize_slug(&slug).ok_or_else(not_found)?;

    match state.storage.get_tour_by_slug(&slug).await {
        Ok(Some(tour)) => Ok(Json(tour)),
        Ok(None) => Err(not_found()),
        Err(e) => Err(internal_error(e)),
    }
}

/// List click events, newest first
pub async fn list_clicks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClickListQuery>,
) -> Result<Json<Vec<ClickEvent>>, ApiError> {
    check_time_range(query.start_time, query.end_time)?;

    let tour_slug = match query.tour_slug.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(normalize_slug(raw).ok_or_else(|| {
            api_error(StatusCode::BAD_REQUEST, format!("invalid tour_slug '{raw}'"))
        })?),
    };

    let click_query = ClickQuery {
        tour_slug,
        start_time: query.start_time,
        end_time: query.end_time,
        limit: query.limit.clamp(1, 1000),
    };

    state
        .storage
        .list_clicks(&click_query)
        .await
        .map(Json)
        .map_err(internal_error)
}

/// Click counts grouped by a dimension
pub async fn click_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<ClickSummaryResponse>, ApiError> {
    check_time_range(query.start_time, query.end_time)?;

    let group_by = match query.group_by.as_deref() {
        None | Some("") => ClickGroupBy::default(),
        Some(raw) => raw
            .parse::<ClickGroupBy>()
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?,
    };

    let groups = state
        .storage
        .click_summary(
            group_by,
            query.start_time,
            query.end_time,
            query.limit.clamp(1, 1000),
        )
        .await
        .map_err(internal_error)?;

    Ok(Json(ClickSummaryResponse {
        group_by,
        start_time: query.start_time,
        end_time: query.end_time,
        total_clicks: groups.iter().map(|g| g.clicks).sum(),
        groups,
    }))
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
