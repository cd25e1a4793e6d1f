//! Internal Token Signer/Verifier (§4.2): short-lived HS256 tokens minted by the
//! gateway and independently verified by each backend, carrying the caller's
//! `Actor` so a backend can authorize as if the original caller had reached it
//! directly.

use crate::claims::{Actor, InternalClaims};
use crate::error::GatewayError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Internal tokens live at most this long. The gateway mints them with exactly
/// this TTL; backends reject anything that claims a longer one.
pub const MAX_TTL_SECS: i64 = 90;
const MIN_SECRET_LEN: usize = 32;
/// Version tag carried in the internal token header (§4.2). Bumped if the
/// claim shape ever changes in a way backends need to branch on; no
/// verifier in this codebase currently rejects on it.
const INTERNAL_TOKEN_VERSION: u8 = 1;

/// The fixed gateway identifier minted into every internal token's `issuer`
/// field. Backends compare against this but only warn on mismatch (§4.2
/// step 5), so a future issuer migration can roll out gradually.
pub const GATEWAY_ISSUER: &str = "https://gateway.internal";

#[derive(Clone)]
pub struct InternalTokenSigner {
    secret: Vec<u8>,
    issuer: String,
}

impl InternalTokenSigner {
    /// `secret` must be at least 32 bytes; a shorter key is a misconfiguration,
    /// not something the gateway should silently tolerate.
    pub fn new(secret: Vec<u8>, issuer: impl Into<String>) -> Result<Self, GatewayError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(GatewayError::internal_error());
        }
        Ok(Self {
            secret,
            issuer: issuer.into(),
        })
    }

    /// Mint a token for `audience` (the target backend's service name) carrying
    /// `actor` unchanged, valid for `ttl_secs` (clamped to [`MAX_TTL_SECS`]).
    #[must_use]
    pub fn mint(&self, audience: &str, actor: Actor, request_id: &str, ttl_secs: i64) -> String {
        let ttl = ttl_secs.clamp(1, MAX_TTL_SECS);
        let now = now_unix();
        let claims = InternalClaims {
            issuer: self.issuer.clone(),
            subject: actor.subject.clone(),
            audience: audience.to_string(),
            expires_at: now + ttl,
            request_id: request_id.to_string(),
            actor,
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &InternalClaims) -> String {
        let header = serde_json::json!({ "alg": "HS256", "typ": "JWT", "ver": INTERNAL_TOKEN_VERSION });
        let header_b64 = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&header).expect("static header always serializes"),
        );
        let payload_b64 = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(claims).expect("InternalClaims always serializes"),
        );
        let signing_input = format!("{header_b64}.{payload_b64}");
        let signature = self.mac_for(signing_input.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(signature);
        format!("{signing_input}.{sig_b64}")
    }

    fn mac_for(&self, signing_input: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(signing_input);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Verifies internal tokens. Constructed with the same shared secret as the
/// signer but held by a backend process, which never mints tokens itself.
#[derive(Clone)]
pub struct InternalTokenVerifier {
    secret: Vec<u8>,
    expected_audience: String,
    expected_issuer: String,
}

impl InternalTokenVerifier {
    pub fn new(
        secret: Vec<u8>,
        expected_audience: impl Into<String>,
        expected_issuer: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(GatewayError::internal_error());
        }
        Ok(Self {
            secret,
            expected_audience: expected_audience.into(),
            expected_issuer: expected_issuer.into(),
        })
    }

    pub fn verify(&self, token: &str) -> Result<InternalClaims, GatewayError> {
        let mut parts = token.split('.');
        let header_b64 = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::invalid_token_format("internal token is missing a header segment"))?;
        let payload_b64 = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::invalid_token_format("internal token is missing a payload segment"))?;
        let sig_b64 = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::invalid_token_format("internal token is missing a signature segment"))?;
        if parts.next().is_some() {
            return Err(GatewayError::invalid_token_format("internal token has too many segments"));
        }

        let header: JoseHeader = decode_json(header_b64)?;
        if header.alg != "HS256" {
            return Err(GatewayError::invalid_token_format(
                "unsupported signing algorithm; only HS256 is accepted",
            ));
        }

        let signing_input = format!("{header_b64}.{payload_b64}");
        let expected_sig = {
            let mut mac =
                HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
            mac.update(signing_input.as_bytes());
            mac
        };
        let given_sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| GatewayError::invalid_token_format("internal token signature is not valid base64url"))?;
        // `verify_slice` compares in constant time; no early return on byte mismatch.
        expected_sig
            .verify_slice(&given_sig)
            .map_err(|_| GatewayError::invalid_signature())?;

        let claims: InternalClaims = decode_json(payload_b64)?;

        if claims.audience != self.expected_audience {
            return Err(GatewayError::invalid_audience());
        }

        let now = now_unix();
        if claims.expires_at < now {
            return Err(GatewayError::expired());
        }
        if claims.expires_at - now > MAX_TTL_SECS {
            return Err(GatewayError::invalid_token_format(
                "internal token claims a lifetime longer than this deployment allows",
            ));
        }

        if claims.actor.subject.is_empty() {
            return Err(GatewayError::missing_actor());
        }

        if claims.issuer != self.expected_issuer {
            tracing::warn!(
                issuer = %claims.issuer,
                expected = %self.expected_issuer,
                "internal token issuer does not match this deployment's gateway identifier"
            );
        }

        Ok(claims)
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn decode_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, GatewayError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| GatewayError::invalid_token_format("internal token segment is not valid base64url"))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| GatewayError::invalid_token_format("internal token segment is not valid JSON"))
}

#[derive(Debug, Deserialize)]
struct JoseHeader {
    alg: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn test_actor() -> Actor {
        Actor {
            issuer: "https://idp.example.com/".to_string(),
            subject: "user-123".to_string(),
            role: Some("trader".to_string()),
            permissions: HashSet::from(["daycount:write".to_string()]),
            organization: Some("org-1".to_string()),
            internal_user_id: None,
        }
    }

    #[test]
    fn round_trips_a_freshly_minted_token() {
        let signer =
            InternalTokenSigner::new(vec![7u8; 32], "https://gateway.internal").unwrap();
        let verifier =
            InternalTokenVerifier::new(vec![7u8; 32], "svc-daycount", "https://gateway.internal").unwrap();

        let token = signer.mint("svc-daycount", test_actor(), "req-1", 30);
        let claims = verifier.verify(&token).unwrap();

        assert_eq!(claims.actor.subject, "user-123");
        assert_eq!(claims.audience, "svc-daycount");
        assert_eq!(claims.request_id, "req-1");
    }

    #[test]
    fn rejects_tokens_signed_with_a_different_secret() {
        let signer = InternalTokenSigner::new(vec![7u8; 32], "https://gateway.internal").unwrap();
        let verifier = InternalTokenVerifier::new(vec![9u8; 32], "svc-daycount", "https://gateway.internal").unwrap();

        let token = signer.mint("svc-daycount", test_actor(), "req-1", 30);
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn rejects_audience_mismatch() {
        let signer = InternalTokenSigner::new(vec![7u8; 32], "https://gateway.internal").unwrap();
        let verifier = InternalTokenVerifier::new(vec![7u8; 32], "svc-valuation", "https://gateway.internal").unwrap();

        let token = signer.mint("svc-daycount", test_actor(), "req-1", 30);
        assert!(matches!(
            verifier.verify(&token),
            Err(e) if e.kind == crate::error::ErrorKind::InvalidAudience
        ));
    }

    #[test]
    fn ttl_is_clamped_to_the_maximum() {
        let signer = InternalTokenSigner::new(vec![7u8; 32], "https://gateway.internal").unwrap();
        let verifier = InternalTokenVerifier::new(vec![7u8; 32], "svc-daycount", "https://gateway.internal").unwrap();

        let token = signer.mint("svc-daycount", test_actor(), "req-1", 10_000);
        let claims = verifier.verify(&token).unwrap();
        let now = now_unix();
        assert!(claims.expires_at - now <= MAX_TTL_SECS);
    }

    #[test]
    fn rejects_secrets_shorter_than_the_minimum() {
        assert!(InternalTokenSigner::new(vec![1u8; 8], "issuer").is_err());
        assert!(InternalTokenVerifier::new(vec![1u8; 8], "svc-daycount", "https://gateway.internal").is_err());
    }
}
