//! The problem-details error surface used uniformly across the gateway and every
//! backend. `ErrorKind` is the taxonomy fixed by the trust-boundary design; it is
//! a tagged sum rather than a class hierarchy so every call site can match on the
//! kind exhaustively instead of downcasting.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// One entry of the `errors` array in a Problem Details body.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// RFC 7807 Problem Details body, served with `Content-Type: application/problem+json`.
#[derive(Debug, Clone, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_uri: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

/// The full taxonomy from the error-handling design. Each variant maps to exactly
/// one HTTP status; the mapping never changes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingAuthentication,
    InvalidTokenFormat,
    InvalidSignature,
    Expired,
    InvalidIssuer,
    InvalidAudience,
    MissingActor,
    InsufficientScope,
    UnknownRoute,
    PayloadTooLarge,
    RateLimited,
    ValidationError,
    TransientAuthFailure,
    InternalError,
}

impl ErrorKind {
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::MissingAuthentication
            | Self::InvalidTokenFormat
            | Self::InvalidSignature
            | Self::Expired
            | Self::MissingActor => StatusCode::UNAUTHORIZED,
            Self::InvalidIssuer | Self::InvalidAudience | Self::InsufficientScope => {
                StatusCode::FORBIDDEN
            }
            Self::UnknownRoute => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::TransientAuthFailure => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::MissingAuthentication => "Missing Authentication",
            Self::InvalidTokenFormat => "Invalid Token Format",
            Self::InvalidSignature => "Invalid Signature",
            Self::Expired => "Expired",
            Self::InvalidIssuer => "Invalid Issuer",
            Self::InvalidAudience => "Invalid Audience",
            Self::MissingActor => "Missing Actor",
            Self::InsufficientScope => "Insufficient Scope",
            Self::UnknownRoute => "Unknown Route",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::RateLimited => "Rate Limited",
            Self::ValidationError => "Validation Error",
            Self::TransientAuthFailure => "Transient Auth Failure",
            Self::InternalError => "Internal Error",
        }
    }

    /// Stable documentation anchor. Not resolved at runtime; callers must not treat
    /// it as a fetchable URL.
    #[must_use]
    pub fn type_uri(self) -> String {
        let slug = match self {
            Self::MissingAuthentication => "missing-authentication",
            Self::InvalidTokenFormat => "invalid-token-format",
            Self::InvalidSignature => "invalid-signature",
            Self::Expired => "expired",
            Self::InvalidIssuer => "invalid-issuer",
            Self::InvalidAudience => "invalid-audience",
            Self::MissingActor => "missing-actor",
            Self::InsufficientScope => "insufficient-scope",
            Self::UnknownRoute => "unknown-route",
            Self::PayloadTooLarge => "payload-too-large",
            Self::RateLimited => "rate-limited",
            Self::ValidationError => "validation-error",
            Self::TransientAuthFailure => "transient-auth-failure",
            Self::InternalError => "internal-error",
        };
        format!("https://bondmath.dev/errors/{slug}")
    }
}

/// The error type returned from every fallible operation inside the trust
/// boundary. Carries enough context to render a Problem Details body without
/// ever leaking raw claims, secrets, or stack traces in `detail`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {detail}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub detail: String,
    pub errors: Vec<FieldError>,
}

impl GatewayError {
    #[must_use]
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_field_errors(mut self, errors: Vec<FieldError>) -> Self {
        self.errors = errors;
        self
    }

    #[must_use]
    pub fn missing_authentication() -> Self {
        Self::new(
            ErrorKind::MissingAuthentication,
            "request did not include an Authorization header",
        )
    }

    #[must_use]
    pub fn invalid_token_format(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTokenFormat, detail)
    }

    #[must_use]
    pub fn invalid_signature() -> Self {
        Self::new(ErrorKind::InvalidSignature, "token signature did not verify")
    }

    #[must_use]
    pub fn expired() -> Self {
        Self::new(ErrorKind::Expired, "token has expired")
    }

    #[must_use]
    pub fn invalid_issuer() -> Self {
        Self::new(ErrorKind::InvalidIssuer, "token issuer is not recognized")
    }

    #[must_use]
    pub fn invalid_audience() -> Self {
        Self::new(
            ErrorKind::InvalidAudience,
            "token audience does not match the expected recipient",
        )
    }

    #[must_use]
    pub fn missing_actor() -> Self {
        Self::new(
            ErrorKind::MissingActor,
            "internal token did not carry an actor subject",
        )
    }

    #[must_use]
    pub fn insufficient_scope(required: &str) -> Self {
        Self::new(
            ErrorKind::InsufficientScope,
            format!("this operation requires the '{required}' scope"),
        )
    }

    #[must_use]
    pub fn unknown_route() -> Self {
        Self::new(ErrorKind::UnknownRoute, "no backend is configured for this path")
    }

    #[must_use]
    pub fn payload_too_large(limit_bytes: usize) -> Self {
        Self::new(
            ErrorKind::PayloadTooLarge,
            format!("request body exceeds the {limit_bytes}-byte limit for this route"),
        )
    }

    #[must_use]
    pub fn rate_limited() -> Self {
        Self::new(ErrorKind::RateLimited, "too many requests in the current window")
    }

    #[must_use]
    pub fn validation_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, detail)
    }

    #[must_use]
    pub fn transient_auth_failure() -> Self {
        Self::new(
            ErrorKind::TransientAuthFailure,
            "could not verify the token signing key; try again shortly",
        )
    }

    /// Configuration and uncaught faults always render the same generic detail:
    /// never leak which internal check failed.
    #[must_use]
    pub fn internal_error() -> Self {
        Self::new(ErrorKind::InternalError, "an internal error occurred")
    }

    #[must_use]
    pub fn to_problem_details(&self) -> ProblemDetails {
        ProblemDetails {
            type_uri: self.kind.type_uri(),
            title: self.kind.title().to_string(),
            status: self.kind.status().as_u16(),
            detail: self.detail.clone(),
            errors: self.errors.clone(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        let body = self.to_problem_details();
        let mut response = (status, Json(body)).into_response();
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_and_issuer_violations_surface_as_forbidden() {
        assert_eq!(GatewayError::invalid_audience().kind.status(), StatusCode::FORBIDDEN);
        assert_eq!(GatewayError::invalid_issuer().kind.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn signature_and_expiry_violations_surface_as_unauthorized() {
        assert_eq!(GatewayError::invalid_signature().kind.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::expired().kind.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn insufficient_scope_detail_names_the_scope() {
        let err = GatewayError::insufficient_scope("daycount:write");
        assert!(err.detail.contains("daycount:write"));
    }

    #[test]
    fn problem_details_uses_stable_type_uri() {
        let err = GatewayError::unknown_route();
        let pd = err.to_problem_details();
        assert_eq!(pd.type_uri, "https://bondmath.dev/errors/unknown-route");
        assert_eq!(pd.status, 404);
    }
}
