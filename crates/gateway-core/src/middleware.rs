//! The middleware chain (§4.3): request identity, security headers, timing,
//! structured logging and rate limiting, composed as a single explicit pipeline
//! rather than a registry of independently ordered layers. Composing them this
//! way is what lets the response header order stay deterministic even when a
//! request short-circuits on a rate-limit rejection.

use crate::error::GatewayError;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request values threaded explicitly through extensions rather than a
/// framework-global context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub started_at: Instant,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    window_start_epoch_ms: i64,
}

/// Fixed-window counter keyed by principal. A plain `parking_lot::RwLock` guards
/// the map; each bucket update only takes the lock for the duration of one
/// read-modify-write, never across a suspension point.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: parking_lot::RwLock<HashMap<String, Bucket>>,
}

pub struct RateLimitOutcome {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_epoch_secs: i64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn check(&self, principal: &str) -> RateLimitOutcome {
        let now_ms = now_epoch_ms();
        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(principal.to_string()).or_insert(Bucket {
            count: 0,
            window_start_epoch_ms: now_ms,
        });

        if now_ms - bucket.window_start_epoch_ms >= self.config.window_ms as i64 {
            bucket.window_start_epoch_ms = now_ms;
            bucket.count = 0;
        }
        bucket.count += 1;

        let allowed = bucket.count <= self.config.max_requests;
        let remaining = self.config.max_requests.saturating_sub(bucket.count);
        let reset_epoch_secs =
            (bucket.window_start_epoch_ms + self.config.window_ms as i64) / 1000;

        RateLimitOutcome {
            allowed,
            limit: self.config.max_requests,
            remaining: if allowed { remaining } else { 0 },
            reset_epoch_secs,
        }
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Shared pipeline state installed once per process and cloned into axum's
/// `State` extractor.
pub struct Pipeline {
    pub service_name: String,
    pub rate_limiter: RateLimiter,
}

impl Pipeline {
    #[must_use]
    pub fn new(service_name: impl Into<String>, rate_limit: RateLimitConfig) -> Self {
        Self {
            service_name: service_name.into(),
            rate_limiter: RateLimiter::new(rate_limit),
        }
    }
}

/// The single `axum::middleware::from_fn_with_state` entry point. Runs request-ID
/// resolution, then the rate-limit check (keyed by client IP, per the v1 choice
/// recorded for this deployment), then the inner handler, then attaches the
/// remaining headers in the fixed order: security headers, timing, rate-limit,
/// request-id.
pub async fn pipeline(
    State(pipeline): State<Arc<Pipeline>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let started_at = Instant::now();
    let request_id = resolve_request_id(req.headers());
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    tracing::info!(
        request_id = %request_id,
        service = %pipeline.service_name,
        method = %method,
        path = %path,
        "request received"
    );

    let ctx = RequestContext {
        request_id: request_id.clone(),
        started_at,
    };
    req.extensions_mut().insert(ctx);

    let principal = principal_key(&req, &peer);
    let outcome = pipeline.rate_limiter.check(&principal);

    let mut response = if outcome.allowed {
        next.run(req).await
    } else {
        GatewayError::rate_limited().into_response()
    };

    apply_response_headers(response.headers_mut(), &request_id, started_at, &outcome);

    tracing::info!(
        request_id = %request_id,
        service = %pipeline.service_name,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        dur_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

fn principal_key(req: &Request<Body>, peer: &SocketAddr) -> String {
    if let Some(actor) = req.extensions().get::<crate::claims::Actor>() {
        return actor.subject.clone();
    }
    peer.ip().to_string()
}

fn resolve_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| is_valid_request_id(s))
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn is_valid_request_id(s: &str) -> bool {
    (8..=128).contains(&s.len())
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Header insertion order is fixed by design: security headers, then timing,
/// then rate-limit, then request-id.
fn apply_response_headers(
    headers: &mut HeaderMap,
    request_id: &str,
    started_at: Instant,
    rate_limit: &RateLimitOutcome,
) {
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "x-xss-protection",
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    let dur_ms = started_at.elapsed().as_secs_f64() * 1000.0;
    if let Ok(value) = HeaderValue::from_str(&format!("total;dur={dur_ms:.3}")) {
        headers.insert("server-timing", value);
    }

    if let Ok(v) = HeaderValue::from_str(&rate_limit.limit.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&rate_limit.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&rate_limit.reset_epoch_secs.to_string()) {
        headers.insert("x-ratelimit-reset", v);
    }

    if let Ok(v) = HeaderValue::from_str(request_id) {
        headers.insert("x-request-id", v);
    }
}

/// Rejects a request whose body exceeds `limit_bytes`. Applied per-route, ahead
/// of JSON deserialization, via axum's `RequestBodyLimitLayer` in the binary
/// crates; exposed here only so the boundary condition has one canonical error.
#[must_use]
pub fn payload_too_large_response(limit_bytes: usize) -> Response {
    GatewayError::payload_too_large(limit_bytes).into_response()
}

#[must_use]
pub fn missing_authentication_response() -> Response {
    GatewayError::missing_authentication().into_response()
}

pub const fn unauthorized_status() -> StatusCode {
    StatusCode::UNAUTHORIZED
}
