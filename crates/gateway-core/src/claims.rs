//! Claim shapes shared across the trust boundary.
//!
//! `ExternalClaims` is decoded from the third-party OIDC token; `InternalClaims`
//! (with its nested `Actor`) is minted by the gateway and independently verified
//! by every backend. Neither is ever logged in raw form — callers only log
//! derived fields such as `subject` or `request_id`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Claims decoded (and fully verified) from the inbound OIDC access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalClaims {
    pub issuer: String,
    pub subject: String,
    pub audience: Vec<String>,
    pub expires_at: i64,
    pub issued_at: i64,
    pub permissions: HashSet<String>,
    pub role: Option<String>,
    pub user_id: Option<String>,
    pub org_id: Option<String>,
}

impl ExternalClaims {
    /// Resolve `permissions` from a raw JWT payload using the precedence fixed by
    /// this system: namespaced custom claim > top-level `permissions` array >
    /// whitespace-split `scope` string > empty set.
    ///
    /// `namespace` is the configured custom-claim namespace (e.g.
    /// `https://bondmath.dev`), used to look up `<namespace>/permissions`.
    pub(crate) fn resolve_permissions(payload: &serde_json::Value, namespace: &str) -> HashSet<String> {
        let namespaced_key = format!("{namespace}/permissions");
        if let Some(values) = payload.get(namespaced_key).and_then(|v| v.as_array()) {
            return values
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect();
        }
        if let Some(values) = payload.get("permissions").and_then(|v| v.as_array()) {
            return values
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect();
        }
        if let Some(scope) = payload.get("scope").and_then(|v| v.as_str()) {
            return scope
                .split_whitespace()
                .map(str::to_string)
                .collect();
        }
        HashSet::new()
    }
}

/// The upstream principal, carried verbatim inside `InternalClaims` so backends can
/// authorize as if the original caller had called them directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub issuer: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: HashSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_user_id: Option<String>,
}

/// Claims minted by the gateway and independently verified by exactly one backend
/// audience. `actor.permissions` is the sole authorization source downstream —
/// backends must never consult any other field for scope checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalClaims {
    pub issuer: String,
    pub subject: String,
    pub audience: String,
    pub expires_at: i64,
    pub request_id: String,
    pub actor: Actor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn permissions_prefer_namespaced_claim() {
        let payload = json!({
            "https://bondmath.dev/permissions": ["daycount:write"],
            "permissions": ["other:write"],
            "scope": "yet:another",
        });
        let resolved = ExternalClaims::resolve_permissions(&payload, "https://bondmath.dev");
        assert_eq!(resolved, HashSet::from(["daycount:write".to_string()]));
    }

    #[test]
    fn permissions_fall_back_to_top_level_array() {
        let payload = json!({ "permissions": ["daycount:write", "metrics:write"] });
        let resolved = ExternalClaims::resolve_permissions(&payload, "https://bondmath.dev");
        assert_eq!(
            resolved,
            HashSet::from(["daycount:write".to_string(), "metrics:write".to_string()])
        );
    }

    #[test]
    fn permissions_fall_back_to_scope_string() {
        let payload = json!({ "scope": "daycount:write metrics:write" });
        let resolved = ExternalClaims::resolve_permissions(&payload, "https://bondmath.dev");
        assert_eq!(
            resolved,
            HashSet::from(["daycount:write".to_string(), "metrics:write".to_string()])
        );
    }

    #[test]
    fn permissions_default_to_empty() {
        let payload = json!({});
        let resolved = ExternalClaims::resolve_permissions(&payload, "https://bondmath.dev");
        assert!(resolved.is_empty());
    }
}
