use crate::error::{GatewayError, Result};
use crate::rate_limit::{FailPolicy, RateLimitPolicy};
use crate::router::RouteEntry;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Main gateway configuration, assembled from the environment at startup.
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub upstreams: UpstreamConfig,
    /// Connection string for the shared rate-limit counter store
    pub redis_url: String,
    /// Shared secret verifying bearer credentials
    pub auth_secret: SecretString,
    /// Behavior when the counter store is unreachable
    pub fail_policy: FailPolicy,
    /// Per-IP limit applied in front of every route
    pub global_rate_limit: RateLimitPolicy,
    /// Tighter per-IP limit on the registration/login prefix
    pub auth_rate_limit: RateLimitPolicy,
    /// Tighter per-IP limit on the upload prefix
    pub media_rate_limit: RateLimitPolicy,
    /// Development mode: include upstream failure detail in 502/504 bodies
    pub expose_error_details: bool,
}

/// Listener and timeout settings.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bound on each upstream call; expiry maps to 504
    pub upstream_timeout: Duration,
    /// Bound on draining in-flight requests at shutdown
    pub shutdown_timeout: Duration,
}

/// Base URLs of the four backend services.
pub struct UpstreamConfig {
    pub identity: String,
    pub post: String,
    pub media: String,
    pub search: String,
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| {
        GatewayError::Config(format!("required environment variable {} is not set", name))
    })
}

fn optional(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| GatewayError::Config(format!("invalid value for {}: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

impl GatewayConfig {
    /// Assemble and validate configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            server: ServerConfig {
                host: optional("HOST", "0.0.0.0"),
                port: parsed("PORT", 3000)?,
                upstream_timeout: Duration::from_secs(parsed("UPSTREAM_TIMEOUT_SECS", 30)?),
                shutdown_timeout: Duration::from_secs(parsed("SHUTDOWN_TIMEOUT_SECS", 30)?),
            },
            upstreams: UpstreamConfig {
                identity: required("IDENTITY_SERVICE_URL")?,
                post: required("POST_SERVICE_URL")?,
                media: required("MEDIA_SERVICE_URL")?,
                search: required("SEARCH_SERVICE_URL")?,
            },
            redis_url: required("REDIS_URL")?,
            auth_secret: SecretString::new(required("JWT_SECRET")?),
            fail_policy: optional("RATE_LIMIT_FAIL_POLICY", "open")
                .parse()
                .map_err(GatewayError::Config)?,
            global_rate_limit: RateLimitPolicy {
                max_requests: parsed("GLOBAL_RATE_LIMIT_MAX", 100)?,
                window_ms: parsed("GLOBAL_RATE_LIMIT_WINDOW_SECS", 900u64)? * 1000,
            },
            auth_rate_limit: RateLimitPolicy {
                max_requests: parsed("AUTH_RATE_LIMIT_MAX", 50)?,
                window_ms: parsed("AUTH_RATE_LIMIT_WINDOW_SECS", 900u64)? * 1000,
            },
            media_rate_limit: RateLimitPolicy {
                max_requests: parsed("MEDIA_RATE_LIMIT_MAX", 20)?,
                window_ms: parsed("MEDIA_RATE_LIMIT_WINDOW_SECS", 300u64)? * 1000,
            },
            expose_error_details: parsed("EXPOSE_ERROR_DETAILS", false)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, base) in [
            ("IDENTITY_SERVICE_URL", &self.upstreams.identity),
            ("POST_SERVICE_URL", &self.upstreams.post),
            ("MEDIA_SERVICE_URL", &self.upstreams.media),
            ("SEARCH_SERVICE_URL", &self.upstreams.search),
        ] {
            let url = Url::parse(base)
                .map_err(|e| GatewayError::Config(format!("{}: invalid URL: {}", name, e)))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(GatewayError::Config(format!(
                    "{}: upstream URL must use http or https: {}",
                    name, base
                )));
            }
        }

        for (name, policy) in [
            ("global", &self.global_rate_limit),
            ("auth", &self.auth_rate_limit),
            ("media", &self.media_rate_limit),
        ] {
            if policy.max_requests == 0 {
                return Err(GatewayError::Config(format!(
                    "{} rate limit max must be > 0",
                    name
                )));
            }
            if policy.window_ms == 0 {
                return Err(GatewayError::Config(format!(
                    "{} rate limit window must be > 0",
                    name
                )));
            }
        }

        if self.auth_secret.expose_secret().is_empty() {
            return Err(GatewayError::Config("JWT_SECRET must not be empty".to_string()));
        }

        if self.server.upstream_timeout.is_zero() {
            return Err(GatewayError::Config(
                "UPSTREAM_TIMEOUT_SECS must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The static route table: one entry per backend service.
    ///
    /// Registration/login and media upload carry their own admission policies;
    /// uploads stream the request body unmodified.
    pub fn route_entries(&self) -> Vec<RouteEntry> {
        vec![
            RouteEntry {
                name: "identity".to_string(),
                prefix: "/v1/auth".to_string(),
                upstream: self.upstreams.identity.clone(),
                rewrite_prefix: "/api/auth".to_string(),
                requires_auth: false,
                raw_body: false,
                extra_headers: vec![],
                rate_limit: Some(self.auth_rate_limit),
            },
            RouteEntry {
                name: "post".to_string(),
                prefix: "/v1/post".to_string(),
                upstream: self.upstreams.post.clone(),
                rewrite_prefix: "/api/post".to_string(),
                requires_auth: true,
                raw_body: false,
                extra_headers: vec![],
                rate_limit: None,
            },
            RouteEntry {
                name: "media".to_string(),
                prefix: "/v1/media".to_string(),
                upstream: self.upstreams.media.clone(),
                rewrite_prefix: "/api/media".to_string(),
                requires_auth: true,
                raw_body: true,
                extra_headers: vec![],
                rate_limit: Some(self.media_rate_limit),
            },
            RouteEntry {
                name: "search".to_string(),
                prefix: "/v1/search".to_string(),
                upstream: self.upstreams.search.clone(),
                rewrite_prefix: "/api/search".to_string(),
                requires_auth: true,
                raw_body: false,
                extra_headers: vec![],
                rate_limit: None,
            },
        ]
    }
}
