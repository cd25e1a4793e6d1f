//! Helpers shared by integration tests across this workspace: ephemeral ports,
//! readiness polling, an in-process mock JWKS endpoint, and signed test tokens
//! for both the external (RS256) and internal (HS256) token shapes.

use anyhow::Context as _;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rsa::{
    traits::PublicKeyParts, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::net::TcpListener;
use std::process::Child;
use std::time::{Duration, Instant};

pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
    }
}

/// Pick an unused TCP port on localhost.
///
/// Note: this does not reserve the port; it's still possible for another
/// process to bind it before you do.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// Poll an HTTP URL until it returns a success status (2xx/3xx).
pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if start.elapsed() > timeout_dur {
            anyhow::bail!("timed out waiting for {url}");
        }

        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
}

/// An in-process identity provider stand-in: holds an RSA keypair, serves its
/// JWKS over HTTP on an ephemeral port, and signs test access tokens.
pub struct TestOidcProvider {
    private_key: RsaPrivateKey,
    pub kid: String,
    pub issuer: String,
    pub jwks_url: String,
    _server: tokio::task::JoinHandle<()>,
}

impl TestOidcProvider {
    pub async fn spawn(issuer: &str) -> anyhow::Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, 2048).context("generate RSA test keypair")?;
        let public_key = RsaPublicKey::from(&private_key);
        let kid = "test-key-1".to_string();

        let jwks_body = jwks_document(&public_key, &kid);
        let port = pick_unused_port()?;
        let addr = format!("127.0.0.1:{port}");
        let jwks_url = format!("http://{addr}/.well-known/jwks.json");

        let app = axum::Router::new().route(
            "/.well-known/jwks.json",
            axum::routing::get(move || {
                let body = jwks_body.clone();
                async move { axum::Json(body) }
            }),
        );
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("bind mock JWKS server on {addr}"))?;
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        wait_http_ok(&jwks_url, Duration::from_secs(5)).await?;

        Ok(Self {
            private_key,
            kid,
            issuer: issuer.to_string(),
            jwks_url,
            _server: server,
        })
    }

    /// Sign a test OIDC access token with the given claims, overriding `kid` only
    /// when a test wants to exercise an unknown-key scenario.
    pub fn sign_token(&self, claims: &serde_json::Value, kid_override: Option<&str>) -> String {
        let kid = kid_override.unwrap_or(&self.kid);
        let header = serde_json::json!({ "alg": "RS256", "typ": "JWT", "kid": kid });
        sign_rs256(&self.private_key, &header, claims)
    }
}

fn jwks_document(public_key: &RsaPublicKey, kid: &str) -> serde_json::Value {
    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
    serde_json::json!({
        "keys": [
            { "kty": "RSA", "kid": kid, "use": "sig", "alg": "RS256", "n": n, "e": e }
        ]
    })
}

fn sign_rs256(private_key: &RsaPrivateKey, header: &serde_json::Value, payload: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).unwrap());
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
    let signing_input = format!("{header_b64}.{payload_b64}");

    let digest = Sha256::digest(signing_input.as_bytes());
    let signature = private_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .expect("RSA signing with a freshly generated test key never fails");
    let sig_b64 = URL_SAFE_NO_PAD.encode(signature);

    format!("{signing_input}.{sig_b64}")
}

/// Convenience builder for the claims body of a test external access token.
#[derive(Serialize)]
pub struct ExternalClaimsBuilder {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl ExternalClaimsBuilder {
    #[must_use]
    pub fn new(issuer: &str, subject: &str, audience: &str) -> Self {
        let now = now_unix();
        Self {
            iss: issuer.to_string(),
            sub: subject.to_string(),
            aud: audience.to_string(),
            exp: now + 3600,
            iat: now,
            permissions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|s| s.to_string()).collect();
        self
    }

    #[must_use]
    pub fn expired(mut self) -> Self {
        self.exp = now_unix() - 1;
        self
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("ExternalClaimsBuilder always serializes")
    }
}

fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
