//! Drives the real `svc-daycount` binary over HTTP: its own internal-token
//! verification and scope guard, not just the handler function in isolation.

use gateway_core::{claims::Actor, internal_token::InternalTokenSigner};
use serde_json::json;
use std::{
    collections::HashSet,
    process::Command,
    time::Duration,
};
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
    let bin = env!("CARGO_BIN_EXE_svc-daycount");
    let child = Command::new(bin)
        .env("INTERNAL_JWT_SECRET", std::str::from_utf8(SECRET).unwrap())
        .env("BIND_ADDR", &addr)
        .spawn()?;
    let base = format!("http://{addr}");
    wait_http_ok(&format!("{base}/health"), Duration::from_secs(5)).await?;
    Ok((base, KillOnDrop(child)))
}

#[tokio::test]
async fn computes_act_360_for_the_worked_example() -> anyhow::Result<()> {
    let (base, _child) = spawn_backend().await?;
    let signer = InternalTokenSigner::new(SECRET.to_vec(), "https://gateway.internal")?;
    let token = signer.mint("svc-daycount", actor(&["daycount:write"]), "req-1", 30);

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/daycount/v1/count"))
        .bearer_auth(&token)
        .json(&json!({
            "pairs": [{"start": "2025-01-01", "end": "2025-07-01"}],
            "convention": "ACT_360",
        }))
        .send()
        .await?;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["results"][0]["days"], 181);
    assert_eq!(body["results"][0]["basis"], 360);
    Ok(())
}

#[tokio::test]
async fn missing_scope_is_rejected_with_403() -> anyhow::Result<()> {
    let (base, _child) = spawn_backend().await?;
    let signer = InternalTokenSigner::new(SECRET.to_vec(), "https://gateway.internal")?;
    let token = signer.mint("svc-daycount", actor(&["daycount:read"]), "req-1", 30);

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/daycount/v1/count"))
        .bearer_auth(&token)
        .json(&json!({"pairs": [{"start": "2025-01-01", "end": "2025-07-01"}], "convention": "ACT_360"}))
        .send()
        .await?;

    assert_eq!(resp.status(), 403);
    Ok(())
}

#[tokio::test]
async fn wrong_audience_token_is_rejected() -> anyhow::Result<()> {
    let (base, _child) = spawn_backend().await?;
    let signer = InternalTokenSigner::new(SECRET.to_vec(), "https://gateway.internal")?;
    let token = signer.mint("svc-valuation", actor(&["daycount:write"]), "req-1", 30);

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/daycount/v1/count"))
        .bearer_auth(&token)
        .json(&json!({"pairs": [], "convention": "ACT_360"}))
        .send()
        .await?;

    assert_eq!(resp.status(), 403);
    Ok(())
}

#[tokio::test]
async fn missing_bearer_token_is_rejected_with_401() -> anyhow::Result<()> {
    let (base, _child) = spawn_backend().await?;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/daycount/v1/count"))
        .json(&json!({"pairs": [], "convention": "ACT_360"}))
        .send()
        .await?;

    assert_eq!(resp.status(), 401);
    Ok(())
}
