use anyhow::{Context, Result};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tourlink::affiliate::AffiliatePolicy;
use tourlink::api;
use tourlink::auth::AuthService;
use tourlink::config::Config;
use tourlink::rate_limit::FixedWindowLimiter;
use tourlink::redirect::{self, RedirectState};
use tourlink::storage::{self, CachedStorage, Storage};
use tourlink::tracking::{AttributionCookies, ClickLogger};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tourlink=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    let backend = storage::connect(&config.database)
        .await
        .context("failed to open database")?;
    let storage: Arc<dyn Storage> = Arc::new(CachedStorage::new(
        backend,
        config.cache.max_entries,
        Duration::from_secs(config.cache.ttl_secs),
        Duration::from_secs(config.cache.miss_ttl_secs),
    ));

    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    let auth_service = Arc::new(AuthService::new(&config.auth));
    if auth_service.is_enabled() {
        info!("🔐 Reporting API requires an X-API-Key header");
    } else {
        info!("🔓 Authentication is disabled - all API requests are allowed");
    }

    let policy = AffiliatePolicy::new(config.partner.clone())
        .context("invalid partner configuration")?;
    let cookies = AttributionCookies::from_config(&config.cookie)?;
    let click_logger = ClickLogger::spawn(
        Arc::clone(&storage),
        config.click_log.buffer_size,
        Duration::from_millis(config.click_log.write_timeout_ms),
    );

    let redirect_state = Arc::new(RedirectState {
        storage: Arc::clone(&storage),
        policy,
        cookies,
        rate_limiter: Arc::new(FixedWindowLimiter::from_config(&config.rate_limit)),
        click_logger: click_logger.clone(),
        client_ip: config.client_ip.clone(),
    });

    // Create routers
    let api_router = api::create_api_router(Arc::clone(&storage), auth_service);
    let redirect_router = redirect::create_redirect_router(redirect_state);

    // Start API server
    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {api_addr}"))?;
    info!("🚀 API server listening on http://{}", api_addr);

    // Start redirect server
    let redirect_addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr)
        .await
        .with_context(|| format!("failed to bind redirect listener on {redirect_addr}"))?;
    info!("🚀 Redirect server listening on http://{}", redirect_addr);
    info!(
        "   - Partner links available at http://{}/out/{{slug}}",
        redirect_addr
    );

    // Run both servers concurrently until Ctrl-C
    tokio::try_join!(
        axum::serve(
            api_listener,
            api_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .into_future(),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .into_future(),
    )?;

    info!("Servers stopped, draining click log...");
    click_logger.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
