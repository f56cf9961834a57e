use crate::error::{GatewayError, Result};
use crate::rate_limit::RateLimitPolicy;
use matchit::Router as MatchitRouter;

/// How an injected upstream header value is produced.
///
/// An explicit enum rather than arbitrary closures so the forwarding behavior
/// of every route is enumerable from configuration.
#[derive(Debug, Clone)]
pub enum HeaderInjection {
    /// Fixed value from configuration
    Static(String),
    /// The authenticated subject id (skipped on unauthenticated routes)
    Subject,
}

/// One upstream target. Immutable after startup.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// Route name, also the scope of its rate limiter
    pub name: String,
    /// Gateway-facing path prefix, e.g. "/v1/auth"
    pub prefix: String,
    /// Upstream base URL
    pub upstream: String,
    /// Upstream-facing prefix substituted for `prefix`, e.g. "/api/auth"
    pub rewrite_prefix: String,
    /// Whether a validated bearer credential is required
    pub requires_auth: bool,
    /// Stream the body unmodified (multipart uploads) instead of buffering
    /// it and forcing a JSON content type
    pub raw_body: bool,
    /// Additional headers injected into the upstream request
    pub extra_headers: Vec<(String, HeaderInjection)>,
    /// Route-specific admission policy for sensitive prefixes
    pub rate_limit: Option<RateLimitPolicy>,
}

impl RouteEntry {
    /// Strip the gateway-facing prefix and substitute the upstream-facing one.
    /// `/v1/auth/register` becomes `/api/auth/register`. Paths that do not
    /// carry the prefix pass through unchanged, which makes the rewrite
    /// idempotent.
    pub fn rewrite_path(&self, path: &str) -> String {
        match path.strip_prefix(&self.prefix) {
            Some(remainder) => format!("{}{}", self.rewrite_prefix, remainder),
            None => path.to_string(),
        }
    }

    /// Full upstream URL for the rewritten path plus the original query string.
    pub fn upstream_url(&self, rewritten_path: &str, query: Option<&str>) -> String {
        let mut url = format!("{}{}", self.upstream.trim_end_matches('/'), rewritten_path);
        if let Some(q) = query {
            url.push('?');
            url.push_str(q);
        }
        url
    }
}

/// Static prefix-to-upstream mapping, built once at startup and read-only
/// thereafter. The matcher guarantees at most one entry matches a path.
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    matcher: MatchitRouter<usize>,
}

impl RouteTable {
    pub fn new(entries: Vec<RouteEntry>) -> Result<Self> {
        let mut matcher = MatchitRouter::new();

        for (index, entry) in entries.iter().enumerate() {
            if !entry.prefix.starts_with('/') || entry.prefix.ends_with('/') {
                return Err(GatewayError::Config(format!(
                    "route '{}': prefix must start with '/' and not end with one: {}",
                    entry.name, entry.prefix
                )));
            }

            // Register the bare prefix and everything under it; matchit picks
            // the most specific pattern, which gives longest-prefix semantics
            // across overlapping routes.
            matcher.insert(entry.prefix.clone(), index).map_err(|e| {
                GatewayError::Config(format!("route '{}': {}", entry.name, e))
            })?;
            matcher
                .insert(format!("{}/{{*rest}}", entry.prefix), index)
                .map_err(|e| GatewayError::Config(format!("route '{}': {}", entry.name, e)))?;
        }

        Ok(Self { entries, matcher })
    }

    /// Resolve an inbound path to its route entry, or `RouteNotFound`.
    pub fn resolve(&self, path: &str) -> Result<&RouteEntry> {
        let matched = self
            .matcher
            .at(path)
            .map_err(|_| GatewayError::RouteNotFound(path.to_string()))?;
        Ok(&self.entries[*matched.value])
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }
}
