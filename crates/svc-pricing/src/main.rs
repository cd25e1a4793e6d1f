mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json, Router,
};
use gateway_core::{
    backend_auth::{require_auth, BackendAuth},
    internal_token::{InternalTokenVerifier, GATEWAY_ISSUER},
    scope_guard::ScopeRequirement,
};
use serde::Serialize;
use std::process::ExitCode;

const SERVICE_NAME: &str = "svc-pricing";
const BODY_LIMIT_BYTES: usize = 100 * 1024;

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_current_span(false))
        .init();
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "healthy",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let secret = match std::env::var("INTERNAL_JWT_SECRET") {
        Ok(s) => s.into_bytes(),
        Err(_) => {
            tracing::error!("missing required environment variable INTERNAL_JWT_SECRET");
            return ExitCode::from(1);
        }
    };

    let verifier = match InternalTokenVerifier::new(secret, SERVICE_NAME, GATEWAY_ISSUER) {
        Ok(v) => v,
        Err(_) => {
            tracing::error!("INTERNAL_JWT_SECRET failed validation (must be >= 32 bytes)");
            return ExitCode::from(1);
        }
    };

    let auth = BackendAuth::new(verifier, ScopeRequirement::require_all(["pricing:write"]));

    let business = Router::new()
        .route("/api/pricing/v1/price", post(handlers::price))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(axum::middleware::from_fn_with_state(auth, require_auth));

    let app = Router::new().route("/health", get(health)).merge(business);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9004".to_string());
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(err) => {
            tracing::error!(%err, "failed to bind listener");
            return ExitCode::from(1);
        }
    };

    tracing::info!(addr = %bind_addr, service = SERVICE_NAME, "backend listening");

    match axum::serve(listener, app).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "server exited with a fatal error");
            ExitCode::from(2)
        }
    }
}
