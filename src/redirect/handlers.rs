use axum::{
    extract::{ConnectInfo, Path, RawQuery, State},
    http::{
        header::{self, HeaderMap, HeaderName, HeaderValue},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Extension, Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::middleware::RequestStart;
use crate::affiliate::{AffiliatePolicy, Placement, TrackedUrl, UtmFields};
use crate::config::ClientIpConfig;
use crate::models::{normalize_slug, ClickEvent, Tour};
use crate::rate_limit::{retry_after_secs, RateDecision, RateLimiter};
use crate::storage::{LookupMetadata, Storage};
use crate::tracking::{
    anonymize_ip, extract_client_ip, user_agent_hash, AttributionCookies, ClickLogger,
};

const CACHE_HIT_HEADER: HeaderName = HeaderName::from_static("x-tourlink-cache-hit");
const TIMING_TOTAL_HEADER: HeaderName = HeaderName::from_static("x-tourlink-timing-total-ms");
const TIMING_CACHE_HEADER: HeaderName = HeaderName::from_static("x-tourlink-timing-cache-ms");
const TIMING_DB_HEADER: HeaderName = HeaderName::from_static("x-tourlink-timing-db-ms");
const RATE_LIMIT_REMAINING_HEADER: HeaderName =
    HeaderName::from_static("x-ratelimit-remaining");
const ROBOTS_HEADER: HeaderName = HeaderName::from_static("x-robots-tag");

pub struct RedirectState {
    pub storage: Arc<dyn Storage>,
    pub policy: AffiliatePolicy,
    pub cookies: AttributionCookies,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub click_logger: ClickLogger,
    pub client_ip: ClientIpConfig,
}

/// Query parameters the redirect link may carry from the page it sits on.
/// The first occurrence of a repeated key wins; unknown keys are ignored.
#[derive(Debug)]
struct InboundParams {
    placement: Placement,
    utm: UtmFields,
}

impl InboundParams {
    fn parse(query: Option<&str>) -> Self {
        let mut ctx: Option<String> = None;
        let mut utm = UtmFields::default();

        for (key, value) in url::form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
            let slot = match key.as_ref() {
                "ctx" => &mut ctx,
                "utm_source" => &mut utm.utm_source,
                "utm_medium" => &mut utm.utm_medium,
                "utm_campaign" => &mut utm.utm_campaign,
                "utm_content" => &mut utm.utm_content,
                "utm_term" => &mut utm.utm_term,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }

        Self {
            placement: Placement::from_query(ctx.as_deref()),
            utm,
        }
    }
}

/// Where a redirect request ends up
enum Destination {
    Partner { tour: Tour, tracked: TrackedUrl },
    Fallback { url: Url, reason: &'static str },
}

/// Redirect a visitor to the partner page for a tour
pub async fn redirect_to_partner(
    State(state): State<Arc<RedirectState>>,
    Path(slug): Path<String>,
    RawQuery(query): RawQuery,
    Extension(RequestStart(request_start)): Extension<RequestStart>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let client_ip = extract_client_ip(&headers, addr.ip(), &state.client_ip);

    let remaining = match state.rate_limiter.check_and_increment(&client_ip.to_string()) {
        RateDecision::Allowed { remaining } => remaining,
        RateDecision::Limited { retry_after } => {
            warn!(client_ip = %anonymize_ip(client_ip), "redirect rate limit exceeded");
            return too_many_requests(retry_after);
        }
    };

    let raw_slug = slug.trim();
    if raw_slug.is_empty() {
        return missing_slug().await.into_response();
    }

    let inbound = InboundParams::parse(query.as_deref());
    let (destination, lookup) = resolve(&state, raw_slug, &inbound).await;

    let location = match destination {
        Destination::Partner { tour, tracked } => {
            let click = ClickEvent {
                click_id: tracked.click_id.clone(),
                tour_id: tour.id,
                tour_slug: tour.slug.clone(),
                ip_anonymized: Some(anonymize_ip(client_ip).to_string()),
                user_agent_hash: user_agent_hash(&headers),
                utm_source: tracked.utm.utm_source.clone(),
                utm_medium: tracked.utm.utm_medium.clone(),
                utm_campaign: tracked.utm.utm_campaign.clone(),
                utm_content: tracked.utm.utm_content.clone(),
                utm_term: tracked.utm.utm_term.clone(),
                placement: inbound.placement.as_str().to_string(),
                clicked_at: tracked.timestamp_ms,
            };
            state.click_logger.submit(click);

            info!(
                tour = %tour.slug,
                click_id = %tracked.click_id,
                placement = %inbound.placement,
                "redirecting to partner"
            );
            tracked.url
        }
        Destination::Fallback { url, reason } => {
            info!(slug = %raw_slug, reason, "redirecting to partner search");
            url
        }
    };

    let (jar, cookie_status) = state.cookies.apply(jar);
    debug!(cookie = ?cookie_status, "attribution cookie");

    let Ok(location) = HeaderValue::try_from(location.as_str()) else {
        error!(location = %location, "redirect target is not a valid header value");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::LOCATION, location);
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response_headers.insert(ROBOTS_HEADER, HeaderValue::from_static("noindex, nofollow"));
    response_headers.insert(
        CACHE_HIT_HEADER,
        HeaderValue::from_static(if lookup.cache_hit { "true" } else { "false" }),
    );
    response_headers.insert(
        TIMING_TOTAL_HEADER,
        HeaderValue::from(request_start.elapsed().as_millis() as u64),
    );
    response_headers.insert(
        TIMING_CACHE_HEADER,
        HeaderValue::from(lookup.cache_duration.unwrap_or_default().as_millis() as u64),
    );
    response_headers.insert(
        TIMING_DB_HEADER,
        HeaderValue::from(lookup.db_duration.unwrap_or_default().as_millis() as u64),
    );
    response_headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(remaining));

    (StatusCode::FOUND, jar, response_headers).into_response()
}

/// Look up and validate the destination. Every failure degrades to the
/// partner search page.
async fn resolve(
    state: &RedirectState,
    raw_slug: &str,
    inbound: &InboundParams,
) -> (Destination, LookupMetadata) {
    let fallback = |reason| Destination::Fallback {
        url: state.policy.fallback_for(raw_slug),
        reason,
    };

    let Some(slug) = normalize_slug(raw_slug) else {
        return (fallback("invalid_slug"), LookupMetadata::default());
    };

    let lookup = match state.storage.get_tour_with_metadata(&slug).await {
        Ok(lookup) => lookup,
        Err(e) => {
            error!(slug = %slug, error = %e, "tour lookup failed");
            return (fallback("lookup_error"), LookupMetadata::default());
        }
    };
    let metadata = lookup.metadata;

    let Some(tour) = lookup.tour else {
        return (fallback("not_found"), metadata);
    };
    let Some(raw_url) = tour.affiliate_url.as_deref() else {
        return (fallback("no_affiliate_url"), metadata);
    };

    match state.policy.validate(raw_url) {
        Ok(validated) => {
            let tracked = state
                .policy
                .track(&validated, &tour.slug, &inbound.utm, inbound.placement);
            (Destination::Partner { tour, tracked }, metadata)
        }
        Err(e) => {
            warn!(
                tour = %tour.slug,
                host = e.attempted_host().unwrap_or("-"),
                error = %e,
                "stored affiliate URL rejected"
            );
            (fallback("invalid_destination"), metadata)
        }
    }
}

fn too_many_requests(retry_after: Duration) -> Response {
    let secs = retry_after_secs(retry_after);
    let mut headers = HeaderMap::new();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    (
        StatusCode::TOO_MANY_REQUESTS,
        headers,
        format!("Too many requests, retry in {secs} seconds"),
    )
        .into_response()
}

/// `/out` without a tour slug
pub async fn missing_slug() -> impl IntoResponse {
    (StatusCode::BAD_REQUEST, "Missing tour slug")
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
