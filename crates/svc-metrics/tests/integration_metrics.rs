//! Drives the real `svc-metrics` binary over HTTP.

use gateway_core::{claims::Actor, internal_token::InternalTokenSigner};
use serde_json::json;
use std::{collections::HashSet, process::Command, time::Duration};
use test_support::{pick_unused_port, wait_http_ok, KillOnDrop};

const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

fn actor(permissions: &[&str]) -> Actor {
    Actor {
        issuer: "https://idp.example.com/".to_string(),
        subject: "user-1".to_string(),
        role: None,
        permissions: permissions.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
        organization: None,
        internal_user_id: None,
    }
}

async fn spawn_backend() -> anyhow::Result<(String, KillOnDrop)> {
    let port = pick_unused_port()?;
    let addr = format!("127.0.0.1:{port}");
    let bin = env!("CARGO_BIN_EXE_svc-metrics");
    let child = Command::new(bin)
        .env("INTERNAL_JWT_SECRET", std::str::from_utf8(SECRET).unwrap())
        .env("BIND_ADDR", &addr)
        .spawn()?;
    let base = format!("http://{addr}");
    wait_http_ok(&format!("{base}/health"), Duration::from_secs(5)).await?;
    Ok((base, KillOnDrop(child)))
}

#[tokio::test]
async fn zero_coupon_duration_equals_its_maturity() -> anyhow::Result<()> {
    let (base, _child) = spawn_backend().await?;
    let signer = InternalTokenSigner::new(SECRET.to_vec(), "https://gateway.internal")?;
    let token = signer.mint("svc-metrics", actor(&["metrics:write"]), "req-1", 30);

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/metrics/v1/duration"))
        .bearer_auth(&token)
        .json(&json!({
            "cash_flows": [{"time_years": 5.0, "amount": 100.0}],
            "discount_rate": 0.04,
        }))
        .send()
        .await?;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await?;
    let macaulay = body["macaulay_duration"].as_f64().unwrap();
    assert!((macaulay - 5.0).abs() < 1e-6);
    Ok(())
}

#[tokio::test]
async fn missing_scope_is_rejected_with_403() -> anyhow::Result<()> {
    let (base, _child) = spawn_backend().await?;
    let signer = InternalTokenSigner::new(SECRET.to_vec(), "https://gateway.internal")?;
    let token = signer.mint("svc-metrics", actor(&["metrics:read"]), "req-1", 30);

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/metrics/v1/duration"))
        .bearer_auth(&token)
        .json(&json!({"cash_flows": [{"time_years": 1.0, "amount": 100.0}], "discount_rate": 0.04}))
        .send()
        .await?;

    assert_eq!(resp.status(), 403);
    Ok(())
}
