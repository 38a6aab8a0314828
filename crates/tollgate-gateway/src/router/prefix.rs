//! Longest-prefix path router implementing [`GatewayRouter`].
//!
//! Routes are kept in registration order.  Resolution performs a linear scan
//! and keeps the longest literal prefix of the request path; on equal length
//! the first-registered route wins.
//!
//! The table is immutable once the server starts, so lookups need no lock.

use tollgate_kernel::gateway::{GatewayError, GatewayRouter, RouteConfig, RouteMatch};

/// [`GatewayRouter`] implementation using longest-prefix matching.
#[derive(Debug, Default)]
pub struct PrefixRouter {
    routes: Vec<RouteConfig>,
}

impl PrefixRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a router from a route list, rejecting duplicate prefixes.
    pub fn from_routes(routes: impl IntoIterator<Item = RouteConfig>) -> Result<Self, GatewayError> {
        let mut router = Self::new();
        for route in routes {
            router.register(route)?;
        }
        Ok(router)
    }

    /// Path left after removing `prefix`, normalised to start with `/`.
    fn remaining_path(path: &str, prefix: &str) -> String {
        let rest = &path[prefix.len()..];
        if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{rest}")
        }
    }
}

impl GatewayRouter for PrefixRouter {
    fn register(&mut self, route: RouteConfig) -> Result<(), GatewayError> {
        if self.routes.iter().any(|r| r.prefix == route.prefix) {
            return Err(GatewayError::DuplicateRoute(route.prefix));
        }
        self.routes.push(route);
        Ok(())
    }

    fn resolve(&self, path: &str) -> Option<RouteMatch> {
        let path = path.split_once('?').map_or(path, |(p, _)| p);

        let mut best: Option<&RouteConfig> = None;
        for route in &self.routes {
            if !path.starts_with(route.prefix.as_str()) {
                continue;
            }
            // Strictly longer only: on a tie the earlier registration stays.
            if best.is_none_or(|b| route.prefix.len() > b.prefix.len()) {
                best = Some(route);
            }
        }

        best.map(|route| RouteMatch {
            prefix: route.prefix.clone(),
            backend: route.backend_name().to_string(),
            target: route.target.clone(),
            remaining_path: Self::remaining_path(path, &route.prefix),
            timeout_ms: route.timeout_ms,
        })
    }

    fn routes(&self) -> Vec<&RouteConfig> {
        self.routes.iter().collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn router(routes: &[(&str, &str)]) -> PrefixRouter {
        PrefixRouter::from_routes(
            routes
                .iter()
                .map(|(prefix, target)| RouteConfig::new(*prefix, *target)),
        )
        .unwrap()
    }

    #[test]
    fn longest_prefix_wins() {
        let r = router(&[("/users", "http://a"), ("/users/admin", "http://b")]);
        let m = r.resolve("/users/admin/1").unwrap();
        assert_eq!(m.target, "http://b");
        assert_eq!(m.remaining_path, "/1");
        assert_eq!(m.prefix, "/users/admin");
    }

    #[test]
    fn registration_order_does_not_affect_longest_match() {
        let r = router(&[("/users/admin", "http://b"), ("/users", "http://a")]);
        assert_eq!(r.resolve("/users/admin/1").unwrap().target, "http://b");
        assert_eq!(r.resolve("/users/42").unwrap().target, "http://a");
    }

    #[test]
    fn exact_match_leaves_root_path() {
        let r = router(&[("/users", "http://a")]);
        assert_eq!(r.resolve("/users").unwrap().remaining_path, "/");
    }

    #[test]
    fn query_string_is_ignored_for_matching() {
        let r = router(&[("/users", "http://a")]);
        let m = r.resolve("/users/7?expand=true").unwrap();
        assert_eq!(m.remaining_path, "/7");
    }

    #[test]
    fn prefixes_match_literally() {
        let r = router(&[("/api/", "http://a")]);
        assert_eq!(r.resolve("/api/v1").unwrap().remaining_path, "/v1");
        assert!(r.resolve("/api").is_none());
    }

    #[test]
    fn root_prefix_is_a_catch_all() {
        let r = router(&[("/", "http://fallback"), ("/orders", "http://orders")]);
        assert_eq!(r.resolve("/anything").unwrap().target, "http://fallback");
        assert_eq!(r.resolve("/orders/1").unwrap().target, "http://orders");
    }

    #[test]
    fn no_match_returns_none() {
        let r = router(&[("/users", "http://a")]);
        assert!(r.resolve("/orders").is_none());
        assert!(PrefixRouter::new().resolve("/").is_none());
    }

    #[test]
    fn backend_name_defaults_to_target() {
        let r = PrefixRouter::from_routes([
            RouteConfig::new("/a", "http://a"),
            RouteConfig::new("/b", "http://b")
                .with_backend("billing")
                .with_timeout_ms(250),
        ])
        .unwrap();
        assert_eq!(r.resolve("/a").unwrap().backend, "http://a");
        let b = r.resolve("/b/x").unwrap();
        assert_eq!(b.backend, "billing");
        assert_eq!(b.timeout_ms, Some(250));
    }

    #[test]
    fn duplicate_prefix_rejected() {
        let mut r = PrefixRouter::new();
        r.register(RouteConfig::new("/a", "http://a")).unwrap();
        let err = r.register(RouteConfig::new("/a", "http://b")).unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateRoute(ref p) if p == "/a"));
        assert_eq!(r.routes().len(), 1);
    }
}
