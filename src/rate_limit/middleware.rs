use super::limiter::RateLimiter;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

/// Paths that bypass global admission control so orchestrator probes are not
/// starved by an abusive client sharing the probe's source IP.
fn is_health_check_path(path: &str) -> bool {
    matches!(path, "/health" | "/healthz" | "/ready" | "/ping")
}

/// Client identity for IP-keyed limiters. Falls back to a fixed bucket when
/// connect info is unavailable (e.g. in-process test harnesses).
pub fn client_identity(connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Global admission middleware applied in front of every route.
///
/// Consults the shared-store limiter keyed by client IP; admitted requests
/// proceed and carry the remaining-count headers on their response, rejected
/// ones get the uniform 429 envelope without touching any upstream.
pub async fn global_rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if is_health_check_path(request.uri().path()) {
        return next.run(request).await;
    }

    let identity = client_identity(request.extensions().get::<ConnectInfo<SocketAddr>>());

    match limiter.check(&identity).await {
        Ok(decision) if decision.allowed => {
            let mut response = next.run(request).await;
            // A route-scoped limiter downstream may already have stamped its
            // (tighter) counters; keep those instead of the global ones.
            if !response.headers().contains_key("X-RateLimit-Limit") {
                decision.apply_headers(response.headers_mut());
            }
            response
        }
        Ok(decision) => {
            crate::error::GatewayError::AdmissionDenied(decision).into_response()
        }
        Err(e) => e.into_response(),
    }
}
