//! Router wiring and the dispatch handler (§4.4). `/health` bypasses the
//! pipeline entirely; every other path goes through external-token
//! verification, longest-prefix route resolution, internal-token minting, and
//! forwarding to the matched backend.

use crate::config::GatewayConfig;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use gateway_core::{
    error::GatewayError,
    external_token::ExternalTokenVerifier,
    internal_token::{InternalTokenSigner, GATEWAY_ISSUER},
    middleware::{self, Pipeline, RequestContext},
    route_table::RouteTable,
};
use serde::Serialize;
use std::sync::Arc;

pub struct AppState {
    pub external_verifier: ExternalTokenVerifier,
    pub internal_signer: InternalTokenSigner,
    pub internal_jwt_ttl_secs: i64,
    pub routes: RouteTable,
    pub http: reqwest::Client,
    pub body_limit_bytes: usize,
    pub service_name: &'static str,
    pub version: &'static str,
}

impl AppState {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Arc<Self>> {
        let internal_signer =
            InternalTokenSigner::new(config.internal_jwt_secret.clone(), GATEWAY_ISSUER)
                .map_err(|_| anyhow::anyhow!("internal JWT secret failed validation"))?;

        Ok(Arc::new(Self {
            external_verifier: ExternalTokenVerifier::new(config.external.clone()),
            internal_signer,
            internal_jwt_ttl_secs: config.internal_jwt_ttl_secs,
            routes: RouteTable::new(config.routes.clone()),
            http: reqwest::Client::builder()
                .timeout(config.backend_timeout)
                .build()?,
            body_limit_bytes: config.body_limit_bytes,
            service_name: "gateway",
            version: env!("CARGO_PKG_VERSION"),
        }))
    }
}

pub fn build_router(state: Arc<AppState>, pipeline: Arc<Pipeline>) -> Router {
    let guarded = Router::new()
        .fallback(any(dispatch))
        .layer(axum::middleware::from_fn_with_state(
            pipeline,
            middleware::pipeline,
        ))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .with_state(state.clone())
        .merge(guarded)
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthBody {
        status: "healthy",
        service: state.service_name,
        version: state.version,
    })
}

async fn dispatch(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response {
    match dispatch_inner(state, req).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn dispatch_inner(state: Arc<AppState>, req: Request<Body>) -> Result<Response, GatewayError> {
    let request_id = req
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let path = req.uri().path().to_string();
    let method = req.method().clone();

    let token = extract_bearer(req.headers())?;
    let external_claims = state.external_verifier.verify(&token).await?;

    let route = state.routes.resolve(&path)?.clone();

    let actor = gateway_core::claims::Actor {
        issuer: external_claims.issuer.clone(),
        subject: external_claims.subject.clone(),
        role: external_claims.role.clone(),
        permissions: external_claims.permissions.clone(),
        organization: external_claims.org_id.clone(),
        internal_user_id: external_claims.user_id.clone(),
    };
    let internal_token = state.internal_signer.mint(
        &route.service_name,
        actor,
        &request_id,
        state.internal_jwt_ttl_secs,
    );

    let (parts, body) = req.into_parts();
    let body_bytes = to_bytes(body, state.body_limit_bytes)
        .await
        .map_err(|_| GatewayError::payload_too_large(state.body_limit_bytes))?;

    let upstream_url = format!("{}{}", route.upstream_url.trim_end_matches('/'), path);
    let mut outbound = state
        .http
        .request(method, &upstream_url)
        .body(body_bytes.to_vec());

    for (name, value) in &parts.headers {
        if name == header::AUTHORIZATION || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        outbound = outbound.header(name, value);
    }
    outbound = outbound
        .header(header::AUTHORIZATION, format!("Bearer {internal_token}"))
        .header("x-request-id", &request_id);

    let upstream_response = outbound
        .send()
        .await
        .map_err(|_| GatewayError::transient_auth_failure())?;

    to_axum_response(upstream_response, &request_id).await
}

async fn to_axum_response(
    upstream: reqwest::Response,
    request_id: &str,
) -> Result<Response, GatewayError> {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if let Ok(name) = HeaderName::from_bytes(name.as_str().as_bytes()) {
            headers.insert(name, value.clone());
        }
    }
    let body = upstream
        .bytes()
        .await
        .map_err(|_| GatewayError::transient_auth_failure())?;

    let mut response = (status, headers, body).into_response();
    if let Ok(v) = axum::http::HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", v);
    }
    Ok(response)
}

/// `Authorization: Bearer <token>` — case-insensitive scheme, single separating
/// whitespace, token body may contain `.`, `-`, `_`.
fn extract_bearer(headers: &HeaderMap) -> Result<String, GatewayError> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(GatewayError::missing_authentication)?
        .to_str()
        .map_err(|_| GatewayError::invalid_token_format("Authorization header is not valid UTF-8"))?;

    let mut parts = raw.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(GatewayError::missing_authentication());
    }
    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_extraction_is_case_insensitive_on_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "bearer abc.def.ghi".parse().unwrap());
        assert_eq!(extract_bearer(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn missing_header_is_missing_authentication() {
        let headers = HeaderMap::new();
        let err = extract_bearer(&headers).unwrap_err();
        assert_eq!(err.kind, gateway_core::error::ErrorKind::MissingAuthentication);
    }

    #[test]
    fn non_bearer_scheme_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert!(extract_bearer(&headers).is_err());
    }
}
