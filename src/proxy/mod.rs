use crate::auth::{AuthContext, TokenValidator};
use crate::error::{GatewayError, Result};
use crate::rate_limit::middleware::client_identity;
use crate::rate_limit::RateLimiter;
use crate::router::{HeaderInjection, RouteEntry, RouteTable};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, Response},
};
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared dispatcher state: the route table, the pooled upstream client, the
/// credential validator, and the per-route limiters. Constructed once at
/// startup and cloned per request; nothing here is mutable.
#[derive(Clone)]
pub struct ProxyState {
    pub routes: Arc<RouteTable>,
    pub client: reqwest::Client,
    pub validator: Arc<TokenValidator>,
    pub route_limiters: Arc<HashMap<String, Arc<RateLimiter>>>,
    pub expose_error_details: bool,
}

impl ProxyState {
    pub fn new(
        routes: RouteTable,
        validator: TokenValidator,
        route_limiters: HashMap<String, Arc<RateLimiter>>,
        upstream_timeout: Duration,
        expose_error_details: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(upstream_timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            routes: Arc::new(routes),
            client,
            validator: Arc::new(validator),
            route_limiters: Arc::new(route_limiters),
            expose_error_details,
        })
    }
}

/// Catch-all proxy handler: admission, auth, rewrite, forward, relay.
///
/// Every failure is converted to the uniform JSON envelope here; nothing
/// escapes as a bare status.
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<Body>,
) -> Response<Body> {
    let expose_detail = state.expose_error_details;
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match dispatch(&state, connect_info, req).await {
        Ok(response) => response,
        Err(e) => {
            warn!(
                method = %method,
                path = %path,
                status = %e.status_code(),
                error = %e,
                "request failed"
            );
            e.into_response_with(expose_detail)
        }
    }
}

/// Drive one request through the dispatch states:
/// received, admitted, authenticated, rewritten, forwarded, relayed.
async fn dispatch(
    state: &ProxyState,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<Body>,
) -> Result<Response<Body>> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path();
    let query = uri.query();
    let client_ip = client_identity(connect_info.as_ref());
    let request_id = Uuid::new_v4().to_string();

    info!(
        method = %method,
        path = %path,
        client_ip = %client_ip,
        request_id = %request_id,
        "received request"
    );

    let route = state.routes.resolve(path)?;

    // Route-specific admission for sensitive prefixes. The global limiter
    // already ran in middleware.
    let route_decision = match state.route_limiters.get(&route.name) {
        Some(limiter) => {
            let decision = limiter.check(&client_ip).await?;
            if !decision.allowed {
                return Err(GatewayError::AdmissionDenied(decision));
            }
            debug!(route = %route.name, remaining = decision.remaining, "route admission passed");
            Some(decision)
        }
        None => None,
    };

    // Credential validation short-circuits before any upstream contact.
    let auth_ctx = if route.requires_auth {
        let ctx = state.validator.validate(req.headers())?;
        debug!(route = %route.name, subject = %ctx.subject_id, "authenticated");
        Some(ctx)
    } else {
        None
    };

    let rewritten_path = route.rewrite_path(path);
    let upstream_url = route.upstream_url(&rewritten_path, query);
    let forward_headers = build_forward_headers(req.headers(), route, auth_ctx.as_ref(), &request_id);

    debug!(
        route = %route.name,
        upstream_url = %upstream_url,
        request_id = %request_id,
        "rewritten, forwarding"
    );

    let mut upstream_req = state
        .client
        .request(method.clone(), &upstream_url)
        .headers(forward_headers);

    // Upload routes stream the body unmodified; JSON routes buffer it so the
    // forwarded request carries a definite length.
    upstream_req = if route.raw_body {
        upstream_req.body(reqwest::Body::wrap_stream(req.into_body().into_data_stream()))
    } else {
        let body_bytes = req
            .into_body()
            .collect()
            .await
            .map_err(|e| GatewayError::Proxy(format!("failed to read request body: {}", e)))?
            .to_bytes();
        upstream_req.body(body_bytes)
    };

    let upstream_response = upstream_req.send().await.map_err(|e| {
        if e.is_timeout() {
            GatewayError::UpstreamTimeout(format!("upstream call timed out: {}", e))
        } else if e.is_connect() {
            GatewayError::UpstreamUnreachable(format!("failed to connect to upstream: {}", e))
        } else {
            GatewayError::Proxy(format!("upstream call failed: {}", e))
        }
    })?;

    let status = upstream_response.status();
    info!(
        route = %route.name,
        status = %status,
        request_id = %request_id,
        "relaying upstream response"
    );

    // Relay status, headers, and body verbatim, streaming the body through.
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        if !is_hop_by_hop_header(name.as_str()) {
            builder = builder.header(name, value);
        }
    }

    let mut response = builder
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .map_err(|e| GatewayError::Internal(format!("failed to build response: {}", e)))?;

    if let Some(decision) = route_decision {
        decision.apply_headers(response.headers_mut());
    }

    Ok(response)
}

/// Headers forwarded upstream: the inbound set minus hop-by-hop and
/// connection-scoped ones, plus the gateway's injections.
fn build_forward_headers(
    inbound: &HeaderMap,
    route: &RouteEntry,
    auth_ctx: Option<&AuthContext>,
    request_id: &str,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in inbound {
        let name_str = name.as_str();
        // Host and Content-Length are rewritten for the upstream call.
        if is_hop_by_hop_header(name_str) || name_str == "host" || name_str == "content-length" {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }

    if let Ok(v) = HeaderValue::from_str(request_id) {
        headers.insert("x-request-id", v);
    }

    if let Some(ctx) = auth_ctx {
        if let Ok(v) = HeaderValue::from_str(&ctx.subject_id) {
            headers.insert("x-user-id", v);
        }
    }

    // JSON routes always speak JSON to the upstream; multipart bodies keep
    // their original boundary-carrying content type.
    if !route.raw_body {
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/json"),
        );
    }

    for (name, injection) in &route.extra_headers {
        let value = match injection {
            HeaderInjection::Static(v) => Some(v.clone()),
            HeaderInjection::Subject => auth_ctx.map(|ctx| ctx.subject_id.clone()),
        };
        if let (Ok(name), Some(value)) = (HeaderName::try_from(name.as_str()), value) {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
    }

    headers
}

/// Hop-by-hop headers are connection-scoped and must not be forwarded.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
