pub mod auth;
pub mod config;
pub mod error;
pub mod proxy;
pub mod rate_limit;
pub mod router;

use crate::auth::TokenValidator;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::proxy::{proxy_handler, ProxyState};
use crate::rate_limit::{
    Clock, RateLimitStore, RateLimiter, RedisRateLimitStore, SystemClock,
};
use crate::router::RouteTable;
use axum::{
    http::{header, HeaderName, HeaderValue},
    response::IntoResponse,
    routing::{any, get},
    Json, Router as AxumRouter,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::info;

/// Assemble the gateway application: security headers, CORS, the global
/// admission middleware, the health endpoint, and the catch-all proxy route.
///
/// Split out from [`run`] so tests can drive the full middleware chain
/// in-process against mock upstreams.
pub fn build_app(state: ProxyState, global_limiter: Arc<RateLimiter>) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(health_check))
        .route("/*path", any(proxy_handler))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            global_limiter,
            rate_limit::middleware::global_rate_limit,
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Build the shared limiters and dispatcher state from configuration.
pub fn build_state(
    config: &GatewayConfig,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
) -> Result<(ProxyState, Arc<RateLimiter>)> {
    let global_limiter = Arc::new(RateLimiter::new(
        store.clone(),
        clock.clone(),
        "global",
        config.global_rate_limit,
        config.fail_policy,
    ));

    let entries = config.route_entries();
    let mut route_limiters = HashMap::new();
    for entry in &entries {
        if let Some(policy) = entry.rate_limit {
            route_limiters.insert(
                entry.name.clone(),
                Arc::new(RateLimiter::new(
                    store.clone(),
                    clock.clone(),
                    &format!("route:{}", entry.name),
                    policy,
                    config.fail_policy,
                )),
            );
        }
    }

    let routes = RouteTable::new(entries)?;
    let validator = TokenValidator::new(&config.auth_secret);
    let state = ProxyState::new(
        routes,
        validator,
        route_limiters,
        config.server.upstream_timeout,
        config.expose_error_details,
    )?;

    Ok((state, global_limiter))
}

/// Start the gateway and serve until a termination signal.
///
/// Shutdown is graceful: the listener stops accepting, in-flight proxied
/// calls drain bounded by the configured shutdown timeout, then the process
/// exits.
pub async fn run(config: GatewayConfig) -> Result<()> {
    config.validate()?;

    let store = RedisRateLimitStore::connect(&config.redis_url)
        .await
        .map_err(|e| {
            GatewayError::Config(format!("failed to connect to rate limit store: {}", e))
        })?;
    info!("connected to rate limit store");

    let (state, global_limiter) = build_state(
        &config,
        Arc::new(store),
        Arc::new(SystemClock),
    )?;
    info!(routes = state.routes.entries().len(), "route table loaded");

    let app = build_app(state, global_limiter);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| GatewayError::Config(format!("invalid listen address: {}", e)))?;

    info!(address = %addr, "gateway listening");

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let shutdown_timeout = config.server.shutdown_timeout;
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining in-flight requests");
        shutdown_handle.graceful_shutdown(Some(shutdown_timeout));
    });

    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(GatewayError::Io)?;

    info!("gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "social_gateway=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
