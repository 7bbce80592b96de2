use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::response::IntoResponse;
use clap::Parser;
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod broker;
mod cache;
mod config;
mod db;
mod events;
mod middleware;
mod notifications;

/// Bound on the startup pings to postgres and redis.
const STARTUP_PING_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "events_api=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let cfg = config::Config::parse();

    let session_secret = cfg
        .session_secret
        .clone()
        .context("SESSION_SECRET must be set")?;

    // Database connection
    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_max_open_conns)
        .min_connections(cfg.db_max_idle_conns.min(cfg.db_max_open_conns))
        .idle_timeout(cfg.db_max_idle_time)
        .acquire_timeout(Duration::from_secs(3))
        .connect_lazy(&cfg.db_dsn)
        .context("invalid database DSN")?;

    tokio::time::timeout(STARTUP_PING_TIMEOUT, sqlx::query("SELECT 1").execute(&pool))
        .await
        .context("database ping timed out")?
        .context("database ping failed")?;

    tracing::info!("database connection pool established");

    // Redis connection
    let redis_client = redis::Client::open(cfg.redis_dsn.clone()).context("invalid redis DSN")?;
    let redis = tokio::time::timeout(
        STARTUP_PING_TIMEOUT,
        ConnectionManager::new(redis_client.clone()),
    )
    .await
    .context("redis connection timed out")?
    .context("redis connection failed")?;

    {
        let mut conn = redis.clone();
        tokio::time::timeout(
            STARTUP_PING_TIMEOUT,
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .context("redis ping timed out")?
        .context("redis ping failed")?;
    }

    tracing::info!("redis connection established");

    // Event broker: subscribe before serving; a dead subscription at
    // startup is fatal.
    let broker = Arc::new(broker::Broker::new());
    let mut pubsub = redis_client
        .get_async_pubsub()
        .await
        .context("pub/sub connection failed")?;
    pubsub
        .subscribe(vec![
            events::POST_ADDED,
            events::COMMENT_ADDED,
            events::SUB_COMMENT_ADDED,
        ])
        .await
        .context("pub/sub subscription failed")?;
    tokio::spawn(broker::run_consumer(pubsub, Arc::clone(&broker)));

    tracing::info!("subscribed to event channels");

    // Notification router on the cross-process bus
    let registry =
        notifications::registry::ConnectionRegistry::new(redis.clone(), &cfg.table_name);
    let gateway = Arc::new(notifications::gateway::Gateway::new(cfg.webhook_dsn.clone()));

    let mut bus = redis_client
        .get_async_pubsub()
        .await
        .context("notification bus connection failed")?;
    bus.subscribe(&cfg.bus_name)
        .await
        .context("notification bus subscription failed")?;

    let router = Arc::new(notifications::router::NotificationRouter::new(
        pool.clone(),
        registry.clone(),
        Arc::clone(&gateway),
    ));
    tokio::spawn(router.run(bus));

    tracing::info!(bus = %cfg.bus_name, "notification router started");

    // Rate limiter and its eviction sweeper
    let limiter = Arc::new(middleware::RateLimiter::new(
        cfg.limiter_enabled,
        cfg.limiter_rps,
        cfg.limiter_burst,
    ));
    limiter.spawn_sweeper();

    let identity: Arc<dyn api::auth::IdentityProvider> = Arc::new(api::auth::GoogleProvider::new(
        cfg.google_client_id.clone().unwrap_or_default(),
        cfg.google_client_secret.clone().unwrap_or_default(),
        format!("http://localhost:{}/auth/callback?provider=google", cfg.port),
    ));

    let state = api::AppState {
        db: pool,
        redis: redis.clone(),
        cache: cache::CacheService::new(redis),
        broker,
        registry,
        gateway,
        identity,
        session_secret: session_secret.into(),
        bus_name: cfg.bus_name.clone().into(),
        env: cfg.env,
    };

    // CORS: trusted origins from config, credentials allowed
    let origins: Vec<HeaderValue> = cfg
        .cors_trusted_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    // Build router; outermost layer recovers panics, then tracing, CORS,
    // rate limiting, and finally session authentication.
    let app = Router::new()
        .nest("/v1", api::routes::v1_routes())
        .merge(api::routes::auth_routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&limiter),
            middleware::rate_limit::rate_limit,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.port).parse()?;
    tracing::info!(env = ?cfg.env, "starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Convert an escaped panic into a 500 that also tells the client to drop
/// the connection.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!(panic = %detail, "recovered from handler panic");

    let mut response = (
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(serde_json::json!({
            "error": "the server encountered a problem and could not process this request"
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
