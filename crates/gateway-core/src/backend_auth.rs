//! The backend half of the trust boundary (§4.5): verify the internal token
//! minted by the gateway, stash the actor on the request, and enforce a scope
//! requirement before the business handler ever runs.

use crate::{
    claims::{Actor, InternalClaims},
    error::GatewayError,
    internal_token::InternalTokenVerifier,
    scope_guard::ScopeRequirement,
};
use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

pub struct BackendAuth {
    pub verifier: InternalTokenVerifier,
    pub requirement: ScopeRequirement,
}

impl BackendAuth {
    #[must_use]
    pub fn new(verifier: InternalTokenVerifier, requirement: ScopeRequirement) -> Arc<Self> {
        Arc::new(Self {
            verifier,
            requirement,
        })
    }
}

/// Installed ahead of every business route (never ahead of `/health`).
pub async fn require_auth(
    State(auth): State<Arc<BackendAuth>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match authenticate(&auth, &req) {
        Ok(claims) => {
            req.extensions_mut().insert(claims.actor.clone());
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

fn authenticate(auth: &BackendAuth, req: &Request<Body>) -> Result<InternalClaims, GatewayError> {
    let token = extract_bearer(req)?;
    let claims = auth.verifier.verify(&token)?;
    auth.requirement.check(&claims.actor)?;
    Ok(claims)
}

fn extract_bearer(req: &Request<Body>) -> Result<String, GatewayError> {
    let raw = req
        .headers()
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

/// Extracted by handlers that need the caller's identity. Cheap to clone; holds
/// no secret material.
pub type AuthenticatedActor = Actor;
