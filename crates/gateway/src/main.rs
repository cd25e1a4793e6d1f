use gateway::{app, config};
use gateway_core::middleware::Pipeline;
use std::{net::SocketAddr, process::ExitCode, sync::Arc, time::Duration};
use tower_http::cors::CorsLayer;

const STARTUP_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes each configured backend's `/health` endpoint once at startup.
/// An unreachable binding is a configuration error (§6: exit code 1), not a
/// runtime fault discovered on the first real request.
async fn probe_backends(routes: &[gateway_core::route_table::ServiceRoute]) -> anyhow::Result<()> {
    let client = reqwest::Client::builder().timeout(STARTUP_PROBE_TIMEOUT).build()?;
    for route in routes {
        let url = format!("{}/health", route.upstream_url.trim_end_matches('/'));
        client
            .get(&url)
            .send()
            .await
            .map_err(|err| anyhow::anyhow!("{} did not respond at {url}: {err}", route.service_name))?;
    }
    Ok(())
}

/// §4.3 item 5: CORS allows a configured list of origins, not every origin.
/// Unparseable entries in `ALLOWED_ORIGINS` are dropped rather than widening
/// the allow-list; an empty list means no cross-origin browser access until
/// an operator sets the variable.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<axum::http::HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::AUTHORIZATION])
        .allow_origin(origins)
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_current_span(false))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match config::GatewayConfig::from_env() {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(%err, "configuration error at startup");
            return ExitCode::from(1);
        }
    };

    let bind_addr: SocketAddr = match config.bind_addr.parse() {
        Ok(a) => a,
        Err(err) => {
            tracing::error!(%err, "invalid BIND_ADDR");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = probe_backends(&config.routes).await {
        tracing::error!(%err, "backend health probe failed at startup");
        return ExitCode::from(1);
    }

    let state = match app::AppState::new(&config) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(%err, "failed to construct gateway state");
            return ExitCode::from(1);
        }
    };

    let pipeline = Arc::new(Pipeline::new("gateway", config.rate_limit.clone()));

    let cors = build_cors_layer(&config.allowed_origins);

    let router = app::build_router(state, pipeline).layer(cors);

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(l) => l,
        Err(err) => {
            tracing::error!(%err, "failed to bind listener");
            return ExitCode::from(1);
        }
    };

    tracing::info!(addr = %bind_addr, "gateway listening");

    let serve_result = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;

    match serve_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "server exited with a fatal error");
            ExitCode::from(2)
        }
    }
}
