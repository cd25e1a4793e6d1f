//! Shared trust-boundary primitives used by the gateway and every backend
//! service: OIDC verification, internal token minting/verification, path
//! dispatch, the middleware chain, scope enforcement, and the problem-details
//! error surface.

pub mod backend_auth;
pub mod claims;
pub mod error;
pub mod external_token;
pub mod internal_token;
pub mod middleware;
pub mod route_table;
pub mod scope_guard;

pub use backend_auth::{require_auth, BackendAuth};
pub use claims::{Actor, ExternalClaims, InternalClaims};
pub use error::{ErrorKind, FieldError, GatewayError, ProblemDetails};
pub use external_token::{ExternalTokenVerifier, ExternalTokenVerifierConfig};
pub use internal_token::{InternalTokenSigner, InternalTokenVerifier, MAX_TTL_SECS};
pub use middleware::{Pipeline, RateLimitConfig, RateLimiter, RequestContext};
pub use route_table::{RouteTable, ServiceRoute};
pub use scope_guard::ScopeRequirement;
