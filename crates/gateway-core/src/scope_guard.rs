//! Backend-side authorization (§4.5): each backend independently enforces scope
//! checks against `actor.permissions` from the internal token. The gateway's own
//! routing decision is never treated as an authorization decision.

use crate::claims::Actor;
use crate::error::GatewayError;

/// A scope requirement attached to a backend operation.
#[derive(Debug, Clone)]
pub enum ScopeRequirement {
    /// The actor must hold every listed permission.
    RequireAll(Vec<String>),
    /// The actor must hold at least one listed permission.
    RequireAny(Vec<String>),
}

impl ScopeRequirement {
    #[must_use]
    pub fn require_all<I: IntoIterator<Item = S>, S: Into<String>>(scopes: I) -> Self {
        Self::RequireAll(scopes.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn require_any<I: IntoIterator<Item = S>, S: Into<String>>(scopes: I) -> Self {
        Self::RequireAny(scopes.into_iter().map(Into::into).collect())
    }

    /// Check `actor` against this requirement, returning the first missing scope
    /// (for `RequireAll`) or the full set (for `RequireAny`) in the error detail.
    pub fn check(&self, actor: &Actor) -> Result<(), GatewayError> {
        match self {
            Self::RequireAll(scopes) => {
                for scope in scopes {
                    if !actor.permissions.contains(scope) {
                        return Err(GatewayError::insufficient_scope(scope));
                    }
                }
                Ok(())
            }
            Self::RequireAny(scopes) => {
                if scopes.iter().any(|s| actor.permissions.contains(s)) {
                    Ok(())
                } else {
                    Err(GatewayError::insufficient_scope(&scopes.join(" or ")))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn actor(permissions: &[&str]) -> Actor {
        Actor {
            issuer: "https://idp.example.com/".into(),
            subject: "user-1".into(),
            role: None,
            permissions: permissions.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            organization: None,
            internal_user_id: None,
        }
    }

    #[test]
    fn require_all_fails_on_first_missing_scope() {
        let req = ScopeRequirement::require_all(["daycount:write", "metrics:write"]);
        let err = req.check(&actor(&["daycount:write"])).unwrap_err();
        assert!(err.detail.contains("metrics:write"));
    }

    #[test]
    fn require_all_passes_when_every_scope_present() {
        let req = ScopeRequirement::require_all(["daycount:write"]);
        assert!(req.check(&actor(&["daycount:write", "metrics:write"])).is_ok());
    }

    #[test]
    fn require_any_passes_with_a_single_match() {
        let req = ScopeRequirement::require_any(["daycount:write", "valuation:write"]);
        assert!(req.check(&actor(&["valuation:write"])).is_ok());
    }

    #[test]
    fn require_any_fails_with_no_match() {
        let req = ScopeRequirement::require_any(["daycount:write", "valuation:write"]);
        assert!(req.check(&actor(&["metrics:write"])).is_err());
    }
}
