//! Redirect integration tests
//!
//! These tests drive the `/out/{slug}` router end to end against an
//! in-memory SQLite catalog: partner redirects, fallbacks, rate limiting,
//! the attribution cookie and click persistence.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tourlink::affiliate::AffiliatePolicy;
use tourlink::config::{ClientIpConfig, CookieConfig, PartnerConfig};
use tourlink::models::{ClickEvent, ClickQuery, NewTour};
use tourlink::rate_limit::FixedWindowLimiter;
use tourlink::redirect::{self, RedirectState};
use tourlink::storage::{SqliteStorage, Storage, StorageError, StorageResult};
use tourlink::tracking::{AttributionCookies, AttributionSigner, ClickLogger, ClickSink};
use tower::{Layer, ServiceExt};
use url::Url;

const COOKIE_KEY: &[u8] = b"integration-test-attribution-key-0123456789";

/// Helper layer to inject ConnectInfo for tests
#[derive(Clone)]
struct TestConnectInfoLayer;

impl<S> Layer<S> for TestConnectInfoLayer {
    type Service = TestConnectInfoMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TestConnectInfoMiddleware { inner }
    }
}

#[derive(Clone)]
struct TestConnectInfoMiddleware<S> {
    inner: S,
}

impl<S, B> tower::Service<Request<B>> for TestConnectInfoMiddleware<S>
where
    S: tower::Service<Request<B>> + Clone,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let addr = SocketAddr::from(([203, 0, 113, 77], 12345));
        req.extensions_mut()
            .insert(axum::extract::connect_info::ConnectInfo(addr));
        self.inner.call(req)
    }
}

/// Click sink that always fails
#[derive(Clone, Default)]
struct FailingSink {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl ClickSink for FailingSink {
    async fn insert_click(&self, _click: &ClickEvent) -> StorageResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Other(anyhow::anyhow!("connection refused")))
    }
}

struct TestApp {
    app: Router,
    storage: Arc<dyn Storage>,
    logger: ClickLogger,
    signer: AttributionSigner,
}

/// Helper to create test storage with a small catalog
async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();

    for (slug, url) in [
        (
            "blue-eye-spring",
            Some("https://www.bnadventure.com/tours/blue-eye-spring"),
        ),
        ("phished", Some("https://evil-phish.example/tours/blue-eye-spring")),
        ("no-booking-page", None),
    ] {
        storage
            .upsert_tour(&NewTour {
                slug: slug.to_string(),
                title: slug.replace('-', " "),
                affiliate_url: url.map(str::to_string),
                operator_name: "BNAdventure".to_string(),
            })
            .await
            .unwrap();
    }

    Arc::new(storage)
}

fn build_app(
    storage: Arc<dyn Storage>,
    logger: ClickLogger,
    max_requests: u32,
) -> (Router, AttributionSigner) {
    let signer = AttributionSigner::from_key(COOKIE_KEY).unwrap();
    let state = Arc::new(RedirectState {
        storage,
        policy: AffiliatePolicy::new(PartnerConfig::default()).unwrap(),
        cookies: AttributionCookies::new(signer.clone(), &CookieConfig::default()),
        rate_limiter: Arc::new(FixedWindowLimiter::new(
            max_requests,
            Duration::from_secs(60),
        )),
        click_logger: logger,
        client_ip: ClientIpConfig::default(),
    });

    let app = redirect::create_redirect_router(state).layer(TestConnectInfoLayer);
    (app, signer)
}

async fn setup() -> TestApp {
    setup_with_limit(100).await
}

async fn setup_with_limit(max_requests: u32) -> TestApp {
    let storage = create_test_storage().await;
    let logger = ClickLogger::spawn(Arc::clone(&storage), 64, Duration::from_secs(3));
    let (app, signer) = build_app(Arc::clone(&storage), logger.clone(), max_requests);
    TestApp {
        app,
        storage,
        logger,
        signer,
    }
}

async fn get(app: &Router, uri: &str) -> Response<Body> {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn location(response: &Response<Body>) -> Url {
    let raw = response.headers()[header::LOCATION].to_str().unwrap();
    Url::parse(raw).unwrap()
}

fn param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

async fn stored_clicks(storage: &Arc<dyn Storage>) -> Vec<ClickEvent> {
    storage
        .list_clicks(&ClickQuery {
            limit: 100,
            ..Default::default()
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_redirect_to_partner_with_tracking_params() {
    let test = setup().await;

    let response = get(&test.app, "/out/blue-eye-spring").await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let raw_location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(
        raw_location.starts_with("https://www.bnadventure.com/tours/blue-eye-spring?"),
        "unexpected location: {raw_location}"
    );

    let location = location(&response);
    assert_eq!(param(&location, "partner_id").as_deref(), Some("9"));
    assert_eq!(param(&location, "tid").as_deref(), Some("tourlink"));
    assert_eq!(param(&location, "utm_source").as_deref(), Some("tourlink"));
    assert_eq!(param(&location, "utm_medium").as_deref(), Some("affiliate"));
    assert_eq!(
        param(&location, "utm_campaign").as_deref(),
        Some("tour-booking")
    );
    assert_eq!(
        param(&location, "utm_content").as_deref(),
        Some("blue-eye-spring")
    );
    assert_eq!(
        param(&location, "placement").as_deref(),
        Some("server-redirect")
    );
    let click_id = param(&location, "click_id").expect("click_id parameter");
    assert!(!click_id.is_empty());
    assert!(param(&location, "timestamp").is_some());

    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(response.headers()["x-robots-tag"], "noindex, nofollow");
    for timing in [
        "x-tourlink-timing-total-ms",
        "x-tourlink-timing-cache-ms",
        "x-tourlink-timing-db-ms",
    ] {
        let value = response.headers()[timing].to_str().unwrap();
        assert!(value.parse::<u64>().is_ok(), "{timing} = {value}");
    }

    test.logger.flush().await;
    let clicks = stored_clicks(&test.storage).await;
    assert_eq!(clicks.len(), 1);
    assert_eq!(clicks[0].click_id, click_id);
    assert_eq!(clicks[0].tour_slug, "blue-eye-spring");
    assert_eq!(clicks[0].ip_anonymized.as_deref(), Some("203.0.113.0"));
    assert_eq!(
        clicks[0].clicked_at.to_string(),
        param(&location, "timestamp").unwrap()
    );
}

#[tokio::test]
async fn test_slug_is_normalized_before_lookup() {
    let test = setup().await;

    let response = get(&test.app, "/out/Blue-Eye-Spring").await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response).path(),
        "/tours/blue-eye-spring",
        "mixed-case slug should resolve to the tour"
    );
}

#[tokio::test]
async fn test_inbound_utm_and_context_pass_through() {
    let test = setup().await;

    let response = get(
        &test.app,
        "/out/blue-eye-spring?utm_source=newsletter&utm_term=hiking&ctx=tour-card&partner_id=666",
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let location = location(&response);
    assert_eq!(param(&location, "utm_source").as_deref(), Some("newsletter"));
    assert_eq!(param(&location, "utm_medium").as_deref(), Some("affiliate"));
    assert_eq!(param(&location, "utm_term").as_deref(), Some("hiking"));
    assert_eq!(param(&location, "placement").as_deref(), Some("tour-card"));
    // Inbound query cannot override the partner id
    assert_eq!(param(&location, "partner_id").as_deref(), Some("9"));

    test.logger.flush().await;
    let clicks = stored_clicks(&test.storage).await;
    assert_eq!(clicks.len(), 1);
    assert_eq!(clicks[0].utm_source.as_deref(), Some("newsletter"));
    assert_eq!(clicks[0].utm_term.as_deref(), Some("hiking"));
    assert_eq!(clicks[0].placement, "tour-card");
}

#[tokio::test]
async fn test_unknown_slug_falls_back_to_partner_search() {
    let test = setup().await;

    let response = get(&test.app, "/out/no-such-tour").await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let raw_location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(
        raw_location.contains("bnadventure.com/tours/?search=no-such-tour"),
        "unexpected location: {raw_location}"
    );
    let location = location(&response);
    assert_eq!(param(&location, "partner_id").as_deref(), Some("9"));
    assert!(param(&location, "click_id").is_none());

    test.logger.flush().await;
    assert!(stored_clicks(&test.storage).await.is_empty());
}

#[tokio::test]
async fn test_disallowed_destination_falls_back() {
    let test = setup().await;

    let response = get(&test.app, "/out/phished").await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let location = location(&response);
    assert_eq!(location.host_str(), Some("www.bnadventure.com"));
    assert_eq!(location.path(), "/tours/");
    assert_eq!(param(&location, "search").as_deref(), Some("phished"));
    assert!(!location.as_str().contains("evil-phish"));

    test.logger.flush().await;
    assert!(stored_clicks(&test.storage).await.is_empty());
}

#[tokio::test]
async fn test_tour_without_affiliate_url_falls_back() {
    let test = setup().await;

    let response = get(&test.app, "/out/no-booking-page").await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        param(&location(&response), "search").as_deref(),
        Some("no-booking-page")
    );
}

#[tokio::test]
async fn test_malformed_slug_falls_back_without_lookup() {
    let test = setup().await;

    let response = get(&test.app, "/out/%3Cscript%3E").await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let location = location(&response);
    assert_eq!(location.path(), "/tours/");
    assert_eq!(param(&location, "search").as_deref(), Some("<script>"));
}

#[tokio::test]
async fn test_missing_slug_is_bad_request() {
    let test = setup().await;

    for uri in ["/out", "/out/", "/out/%20%20"] {
        let response = get(&test.app, uri).await;
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "expected 400 for {uri}"
        );
        assert!(response.headers().get(header::LOCATION).is_none());
    }
}

#[tokio::test]
async fn test_rate_limit_returns_429_with_retry_after() {
    let test = setup_with_limit(2).await;

    for expected_remaining in ["1", "0"] {
        let response = get(&test.app, "/out/blue-eye-spring").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()["x-ratelimit-remaining"],
            expected_remaining
        );
    }

    let response = get(&test.app, "/out/blue-eye-spring").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    test.logger.flush().await;
    assert_eq!(stored_clicks(&test.storage).await.len(), 2);
}

#[tokio::test]
async fn test_attribution_cookie_is_issued_and_kept() {
    let test = setup().await;

    let response = get(&test.app, "/out/blue-eye-spring").await;
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("bna_attr="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("Secure"));
    assert!(set_cookie.contains("SameSite=Strict"));
    assert!(set_cookie.contains("Path=/"));
    assert!(set_cookie.contains("Max-Age=2592000"));

    // A valid cookie is left alone
    let value = test.signer.issue();
    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/out/blue-eye-spring")
                .header(header::COOKIE, format!("bna_attr={value}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    // A forged cookie is replaced
    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/out/no-such-tour")
                .header(header::COOKIE, "bna_attr=forged.cookie")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    let issued = set_cookie
        .trim_start_matches("bna_attr=")
        .split(';')
        .next()
        .unwrap();
    assert!(test.signer.verify(issued).is_some());
}

#[tokio::test]
async fn test_failing_click_sink_does_not_change_response() {
    let storage = create_test_storage().await;
    let sink = FailingSink::default();
    let logger = ClickLogger::spawn(sink.clone(), 64, Duration::from_secs(3));
    let (app, _signer) = build_app(storage, logger.clone(), 100);

    let response = get(&app, "/out/blue-eye-spring").await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(param(&location(&response), "click_id").is_some());

    logger.flush().await;
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_health_check() {
    let test = setup().await;

    let response = get(&test.app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "OK");
}
