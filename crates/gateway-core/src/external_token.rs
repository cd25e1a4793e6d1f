//! External Token Verifier (§4.1): verifies the third-party OIDC access token and
//! resolves its signing key from the identity provider's JWKS, with caching and
//! single-flight refresh coalescing.

use crate::claims::ExternalClaims;
use crate::error::GatewayError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::sync::RwLock;

/// Concurrent unknown-kid misses collapse onto this interval: at most one forced
/// refresh per window, so a stream of bad `kid`s cannot be used to hammer the
/// identity provider's JWKS endpoint.
const MIN_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const NBF_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct ExternalTokenVerifierConfig {
    pub expected_issuer: String,
    pub expected_audience: String,
    pub jwks_url: String,
    pub permissions_namespace: String,
    pub clock_skew_secs: i64,
    pub jwks_refresh_interval: Duration,
}

#[derive(Clone)]
pub struct ExternalTokenVerifier {
    inner: Arc<Inner>,
}

struct Inner {
    config: ExternalTokenVerifierConfig,
    http: reqwest::Client,
    jwks: RwLock<JwksCache>,
}

#[derive(Default)]
struct JwksCache {
    keys_by_kid: HashMap<String, DecodingKey>,
    fetched_at: Option<std::time::Instant>,
    last_forced_refresh: Option<std::time::Instant>,
    fetch_count: u64,
}

impl ExternalTokenVerifier {
    #[must_use]
    pub fn new(config: ExternalTokenVerifierConfig) -> Self {
        Self::with_client(
            config,
            reqwest::Client::builder()
                .timeout(JWKS_FETCH_TIMEOUT)
                .user_agent("bondmath-gateway/external-token-verifier")
                .build()
                .unwrap_or_default(),
        )
    }

    #[must_use]
    pub fn with_client(config: ExternalTokenVerifierConfig, http: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                http,
                jwks: RwLock::new(JwksCache::default()),
            }),
        }
    }

    /// Number of outbound JWKS fetches performed so far. Exposed for tests that
    /// assert single-flight coalescing (§8: "two concurrent misses ... exactly
    /// one outbound fetch").
    pub async fn jwks_fetch_count(&self) -> u64 {
        self.inner.jwks.read().await.fetch_count
    }

    /// Verify a bearer token end to end: format, claims, signature, then resolve
    /// permissions. Matches the six-step algorithm in §4.1.
    pub async fn verify(&self, token: &str) -> Result<ExternalClaims, GatewayError> {
        let (header_b64, payload_b64, _sig_b64) = split_jwt(token)?;

        let header = decode_json_segment::<JoseHeader>(header_b64)?;
        if header.alg != "RS256" {
            return Err(GatewayError::invalid_token_format(
                "unsupported signing algorithm; only RS256 is accepted",
            ));
        }
        if let Some(typ) = &header.typ {
            if !typ.eq_ignore_ascii_case("JWT") {
                return Err(GatewayError::invalid_token_format("unexpected token type"));
            }
        }
        let kid = header
            .kid
            .ok_or_else(|| GatewayError::invalid_token_format("token header is missing 'kid'"))?;

        let payload = decode_json_segment::<serde_json::Value>(payload_b64)?;
        self.check_claims(&payload)?;

        let key = self.resolve_key(&kid).await?;
        self.verify_signature(token, &key)?;

        Ok(self.build_claims(&payload))
    }

    fn check_claims(&self, payload: &serde_json::Value) -> Result<(), GatewayError> {
        let issuer = payload
            .get("iss")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::invalid_token_format("token is missing 'iss'"))?;
        if issuer != self.inner.config.expected_issuer {
            return Err(GatewayError::invalid_issuer());
        }

        let audiences = extract_audience(payload);
        if !audiences.iter().any(|a| a == &self.inner.config.expected_audience) {
            return Err(GatewayError::invalid_audience());
        }

        let now = now_unix();
        let exp = payload
            .get("exp")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| GatewayError::invalid_token_format("token is missing 'exp'"))?;
        if exp < now - self.inner.config.clock_skew_secs {
            return Err(GatewayError::expired());
        }

        if let Some(nbf) = payload.get("nbf").and_then(serde_json::Value::as_i64) {
            if nbf > now + NBF_SKEW_SECS {
                return Err(GatewayError::new(
                    crate::error::ErrorKind::Expired,
                    "token is not yet valid",
                ));
            }
        }

        Ok(())
    }

    fn build_claims(&self, payload: &serde_json::Value) -> ExternalClaims {
        let issuer = payload.get("iss").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let subject = payload.get("sub").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let audience = extract_audience(payload);
        let expires_at = payload.get("exp").and_then(serde_json::Value::as_i64).unwrap_or(0);
        let issued_at = payload.get("iat").and_then(serde_json::Value::as_i64).unwrap_or(0);
        let permissions =
            ExternalClaims::resolve_permissions(payload, &self.inner.config.permissions_namespace);
        let role = payload.get("role").and_then(|v| v.as_str()).map(str::to_string);
        let user_id = payload.get("user_id").and_then(|v| v.as_str()).map(str::to_string);
        let org_id = payload.get("org_id").and_then(|v| v.as_str()).map(str::to_string);

        ExternalClaims {
            issuer,
            subject,
            audience,
            expires_at,
            issued_at,
            permissions,
            role,
            user_id,
            org_id,
        }
    }

    fn verify_signature(&self, token: &str, key: &DecodingKey) -> Result<(), GatewayError> {
        let mut validation = Validation::new(Algorithm::RS256);
        // Claims are already hand-validated above (issuer/audience/exp use this
        // system's own precedence and skew rules); disable jsonwebtoken's
        // built-in claim checks so only the signature is re-verified here.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        jsonwebtoken::decode::<serde_json::Value>(token, key, &validation)
            .map(|_| ())
            .map_err(|_| GatewayError::invalid_signature())
    }

    async fn resolve_key(&self, kid: &str) -> Result<DecodingKey, GatewayError> {
        if let Some(key) = self.get_cached(kid).await {
            return Ok(key);
        }
        self.refresh(Some(kid)).await?;
        self.get_cached(kid).await.ok_or_else(GatewayError::invalid_signature)
    }

    async fn get_cached(&self, kid: &str) -> Option<DecodingKey> {
        let cache = self.inner.jwks.read().await;
        let stale = cache
            .fetched_at
            .is_none_or(|t| t.elapsed() > self.inner.config.jwks_refresh_interval);
        if stale {
            return None;
        }
        cache.keys_by_kid.get(kid).cloned()
    }

    async fn refresh(&self, forcing_kid: Option<&str>) -> Result<(), GatewayError> {
        let now = std::time::Instant::now();
        {
            let cache = self.inner.jwks.read().await;
            if let Some(kid) = forcing_kid {
                if let Some(last) = cache.last_forced_refresh {
                    if now.duration_since(last) < MIN_FORCED_REFRESH_INTERVAL
                        && cache.keys_by_kid.contains_key(kid)
                    {
                        return Ok(());
                    }
                }
            }
        }

        let mut cache = self.inner.jwks.write().await;
        // Re-check under the write lock: a racing waiter may have already
        // refreshed and populated the key we were missing (single-flight).
        if let Some(kid) = forcing_kid {
            if cache.keys_by_kid.contains_key(kid)
                && cache
                    .fetched_at
                    .is_some_and(|t| t.elapsed() <= self.inner.config.jwks_refresh_interval)
            {
                return Ok(());
            }
            if let Some(last) = cache.last_forced_refresh {
                if now.duration_since(last) < MIN_FORCED_REFRESH_INTERVAL {
                    return Ok(());
                }
            }
            cache.last_forced_refresh = Some(now);
        }

        let keys = fetch_jwks(&self.inner.http, &self.inner.config.jwks_url).await?;
        cache.keys_by_kid = keys;
        cache.fetched_at = Some(now);
        cache.fetch_count += 1;
        Ok(())
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn extract_audience(payload: &serde_json::Value) -> Vec<String> {
    match payload.get("aud") {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(arr)) => {
            arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect()
        }
        _ => Vec::new(),
    }
}

fn split_jwt(token: &str) -> Result<(&str, &str, &str), GatewayError> {
    let mut parts = token.split('.');
    let header = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::invalid_token_format("token is missing a header segment"))?;
    let payload = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::invalid_token_format("token is missing a payload segment"))?;
    let signature = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::invalid_token_format("token is missing a signature segment"))?;
    if parts.next().is_some() {
        return Err(GatewayError::invalid_token_format("token has too many segments"));
    }
    Ok((header, payload, signature))
}

fn decode_json_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, GatewayError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| GatewayError::invalid_token_format("token segment is not valid base64url"))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| GatewayError::invalid_token_format("token segment is not valid JSON"))
}

#[derive(Debug, Deserialize)]
struct JoseHeader {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
    #[serde(default)]
    kid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(rename = "use", default)]
    use_: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

async fn fetch_jwks(
    http: &reqwest::Client,
    jwks_url: &str,
) -> Result<HashMap<String, DecodingKey>, GatewayError> {
    let resp = http
        .get(jwks_url)
        .send()
        .await
        .map_err(|_| GatewayError::transient_auth_failure())?;
    if !resp.status().is_success() {
        return Err(GatewayError::transient_auth_failure());
    }
    let jwks: JwksResponse = resp
        .json()
        .await
        .map_err(|_| GatewayError::transient_auth_failure())?;

    let mut out = HashMap::new();
    for jwk in jwks.keys {
        if jwk.kty != "RSA" {
            continue;
        }
        if let Some(use_) = &jwk.use_ {
            if use_ != "sig" {
                continue;
            }
        }
        let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
            continue;
        };
        if let Ok(key) = DecodingKey::from_rsa_components(&n, &e) {
            out.insert(kid, key);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_audience_accepts_string_or_array() {
        assert_eq!(
            extract_audience(&serde_json::json!({"aud": "svc"})),
            vec!["svc".to_string()]
        );
        assert_eq!(
            extract_audience(&serde_json::json!({"aud": ["svc", "other"]})),
            vec!["svc".to_string(), "other".to_string()]
        );
        assert!(extract_audience(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn split_jwt_requires_exactly_three_segments() {
        assert!(split_jwt("a.b.c").is_ok());
        assert!(split_jwt("a.b").is_err());
        assert!(split_jwt("a.b.c.d").is_err());
        assert!(split_jwt("a..c").is_err());
    }
}
