//! Environment-variable configuration, loaded once at startup. There is no flag
//! parser here on purpose: every binary in this workspace is deployed as a
//! container with env vars injected by the orchestrator, the same shape the
//! trust-boundary crate's own `from_env` constructors expect.

use anyhow::{bail, Context, Result};
use gateway_core::{external_token::ExternalTokenVerifierConfig, middleware::RateLimitConfig, route_table::ServiceRoute};
use std::time::Duration;

const DEFAULT_JWKS_REFRESH_SECS: u64 = 300;
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BODY_LIMIT_BYTES: usize = 100 * 1024;

pub struct GatewayConfig {
    pub external: ExternalTokenVerifierConfig,
    pub internal_jwt_secret: Vec<u8>,
    pub internal_jwt_ttl_secs: i64,
    pub rate_limit: RateLimitConfig,
    pub routes: Vec<ServiceRoute>,
    pub backend_timeout: Duration,
    pub body_limit_bytes: usize,
    pub bind_addr: String,
    /// Origins allowed by the CORS layer (§4.3 item 5). Empty by default —
    /// no wildcard fallback.
    pub allowed_origins: Vec<String>,
}

// No trailing slash: `RouteTable::resolve` only matches at a path-segment
// boundary, so a prefix ending in `/` would never match `/api/daycount/v1/...`.
const SERVICE_BINDINGS: &[(&str, &str, &str)] = &[
    ("/api/daycount", "svc-daycount", "BACKEND_DAYCOUNT_URL"),
    ("/api/valuation", "svc-valuation", "BACKEND_VALUATION_URL"),
    ("/api/metrics", "svc-metrics", "BACKEND_METRICS_URL"),
    ("/api/pricing", "svc-pricing", "BACKEND_PRICING_URL"),
];

impl GatewayConfig {
    /// Exit code `1` per the configuration-error contract: missing or weak
    /// secret, or a binding that cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let issuer = require_env("EXTERNAL_ISSUER")?;
        let audience = require_env("EXTERNAL_AUDIENCE")?;
        let jwks_url = std::env::var("JWKS_URL")
            .unwrap_or_else(|_| format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/')));

        let secret_raw = require_env("INTERNAL_JWT_SECRET")?;
        let internal_jwt_secret = secret_raw.into_bytes();
        if internal_jwt_secret.len() < 32 {
            bail!("INTERNAL_JWT_SECRET must be at least 32 bytes");
        }

        let internal_jwt_ttl_secs = optional_env_parse("INTERNAL_JWT_TTL", 90i64)?;
        let window_ms = optional_env_parse("RATE_LIMIT_WINDOW_MS", 60_000u64)?;
        let max_requests = optional_env_parse("RATE_LIMIT_MAX", 100u64)?;
        let backend_timeout_secs =
            optional_env_parse("BACKEND_TIMEOUT_SECS", DEFAULT_BACKEND_TIMEOUT_SECS)?;
        let body_limit_bytes =
            optional_env_parse("BODY_LIMIT_BYTES", DEFAULT_BODY_LIMIT_BYTES)?;
        let jwks_refresh_secs =
            optional_env_parse("JWKS_REFRESH_SECS", DEFAULT_JWKS_REFRESH_SECS)?;
        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut routes = Vec::new();
        for (prefix, service_name, env_var) in SERVICE_BINDINGS {
            let upstream_url = require_env(env_var)?;
            routes.push(ServiceRoute {
                prefix: (*prefix).to_string(),
                service_name: (*service_name).to_string(),
                upstream_url,
            });
        }

        Ok(Self {
            external: ExternalTokenVerifierConfig {
                expected_issuer: issuer,
                expected_audience: audience,
                jwks_url,
                permissions_namespace: std::env::var("PERMISSIONS_NAMESPACE")
                    .unwrap_or_else(|_| "https://bondmath.dev".to_string()),
                clock_skew_secs: optional_env_parse("CLOCK_SKEW_SECS", 60i64)?,
                jwks_refresh_interval: Duration::from_secs(jwks_refresh_secs),
            },
            internal_jwt_secret,
            internal_jwt_ttl_secs,
            rate_limit: RateLimitConfig {
                window_ms,
                max_requests,
            },
            routes,
            backend_timeout: Duration::from_secs(backend_timeout_secs),
            body_limit_bytes,
            bind_addr,
            allowed_origins,
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {name}"))
}

fn optional_env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {name}: {e}")),
        Err(_) => Ok(default),
    }
}
