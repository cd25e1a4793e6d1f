//! Path-prefix dispatch (§3, §4.4): maps an inbound request path onto exactly one
//! configured backend by longest matching prefix.

use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub struct ServiceRoute {
    pub prefix: String,
    pub service_name: String,
    pub upstream_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<ServiceRoute>,
}

impl RouteTable {
    #[must_use]
    pub fn new(mut routes: Vec<ServiceRoute>) -> Self {
        // Longest prefix first so `find` can return on the first match.
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes }
    }

    /// Resolve `path` to the backend whose prefix is the longest match. A prefix
    /// only matches at a path-segment boundary: `/daycount` matches
    /// `/daycount/compute` but not `/daycountother`.
    pub fn resolve(&self, path: &str) -> Result<&ServiceRoute, GatewayError> {
        self.routes
            .iter()
            .find(|r| prefix_matches(&r.prefix, path))
            .ok_or_else(GatewayError::unknown_route)
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    match path.as_bytes().get(prefix.len()) {
        None => true,
        Some(b'/') => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(vec![
            ServiceRoute {
                prefix: "/daycount".into(),
                service_name: "svc-daycount".into(),
                upstream_url: "http://127.0.0.1:9001".into(),
            },
            ServiceRoute {
                prefix: "/daycount/v2".into(),
                service_name: "svc-daycount-v2".into(),
                upstream_url: "http://127.0.0.1:9002".into(),
            },
        ])
    }

    #[test]
    fn picks_the_longest_matching_prefix() {
        let route = table().resolve("/daycount/v2/compute").unwrap();
        assert_eq!(route.service_name, "svc-daycount-v2");
    }

    #[test]
    fn falls_back_to_a_shorter_prefix() {
        let route = table().resolve("/daycount/compute").unwrap();
        assert_eq!(route.service_name, "svc-daycount");
    }

    #[test]
    fn does_not_match_on_a_bare_substring() {
        assert!(table().resolve("/daycountother").is_err());
    }

    #[test]
    fn unknown_paths_are_unknown_route() {
        let err = table().resolve("/nope").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UnknownRoute);
    }
}
