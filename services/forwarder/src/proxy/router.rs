//! Route table and routing decisions.
//!
//! Routes map the address a client typed into its game client to the
//! manager of one backend:
//! - a route matches on its canonical name or any of its aliases
//! - routes are checked in configuration order, the first match wins
//! - hostnames are normalized before comparison (NUL suffix stripped,
//!   lowercased, trailing dot trimmed)
//!
//! The table is built once at startup and never mutated.

use std::fmt;
use std::sync::Arc;

use mcfwd_packet::normalize_hostname;
use tracing::info;

use crate::manager::SharedManager;

/// One configured backend server.
#[derive(Clone)]
pub struct Route {
    /// Canonical hostname.
    pub name: String,
    /// Alternative hostnames, in configuration order.
    pub aliases: Vec<String>,
    /// Game port of the backend. Informational; not used for matching.
    pub port: u16,
    /// Lifecycle manager of the backend.
    pub manager: SharedManager,
}

impl Route {
    pub fn new(
        name: impl Into<String>,
        aliases: Vec<String>,
        port: u16,
        manager: SharedManager,
    ) -> Self {
        Self {
            name: normalize_hostname(&name.into()),
            aliases: aliases.iter().map(|a| normalize_hostname(a)).collect(),
            port,
            manager,
        }
    }

    /// Name first, then aliases. Expects a normalized hostname.
    fn matches(&self, hostname: &str) -> bool {
        self.name == hostname || self.aliases.iter().any(|alias| alias == hostname)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Result of a routing decision.
#[derive(Debug, Clone)]
pub enum RoutingDecision {
    /// Route found, proceed with the connection.
    Matched { route: Route },
    /// No matching route found.
    NoMatch { reason: String },
}

/// Immutable, ordered set of routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

/// Route table shared by every connection task.
pub type SharedRouteTable = Arc<RouteTable>;

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        info!(route_count = routes.len(), "Route table built");
        Self { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Resolve the address from a handshake. First match wins.
    pub fn resolve(&self, address: &str) -> RoutingDecision {
        let hostname = normalize_hostname(address);

        let matched = self.routes.iter().find(|route| route.matches(&hostname));

        match matched {
            Some(route) => RoutingDecision::Matched {
                route: route.clone(),
            },
            None => RoutingDecision::NoMatch {
                reason: format!("no route for hostname {:?}", hostname),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::UnmanagedManager;

    fn route(name: &str, aliases: &[&str]) -> Route {
        Route::new(
            name,
            aliases.iter().map(|a| a.to_string()).collect(),
            25565,
            Arc::new(UnmanagedManager::new()),
        )
    }

    fn matched_name(decision: RoutingDecision) -> Option<String> {
        match decision {
            RoutingDecision::Matched { route } => Some(route.name),
            RoutingDecision::NoMatch { .. } => None,
        }
    }

    #[test]
    fn test_exact_name_match() {
        let table = RouteTable::new(vec![route("play.example.com", &[])]);
        assert_eq!(
            matched_name(table.resolve("play.example.com")).as_deref(),
            Some("play.example.com")
        );
    }

    #[test]
    fn test_alias_resolves_to_same_manager() {
        let table = RouteTable::new(vec![
            route("survival.example.com", &["smp.example.com"]),
            route("creative.example.com", &["build.example.com", "cr.example.com"]),
        ]);

        let by_name = match table.resolve("creative.example.com") {
            RoutingDecision::Matched { route } => route,
            other => panic!("Expected match, got {:?}", other),
        };
        let by_alias = match table.resolve("cr.example.com") {
            RoutingDecision::Matched { route } => route,
            other => panic!("Expected match, got {:?}", other),
        };

        assert!(Arc::ptr_eq(&by_name.manager, &by_alias.manager));
    }

    #[test]
    fn test_hostname_normalization() {
        let table = RouteTable::new(vec![route("Play.Example.com.", &[])]);

        assert!(matched_name(table.resolve("PLAY.example.COM")).is_some());
        assert!(matched_name(table.resolve("play.example.com.")).is_some());
        assert!(matched_name(table.resolve("play.example.com\0FML\0")).is_some());
    }

    #[test]
    fn test_no_match() {
        let table = RouteTable::new(vec![route("play.example.com", &["mc.example.com"])]);

        match table.resolve("other.example.com") {
            RoutingDecision::NoMatch { reason } => assert!(reason.contains("other.example.com")),
            other => panic!("Expected NoMatch, got {:?}", other),
        }
        assert!(matched_name(table.resolve("example.com")).is_none());
    }

    #[test]
    fn test_earlier_alias_beats_later_name() {
        let table = RouteTable::new(vec![
            route("a.example.com", &["shared.example.com"]),
            route("shared.example.com", &[]),
        ]);

        assert_eq!(
            matched_name(table.resolve("shared.example.com")).as_deref(),
            Some("a.example.com")
        );
    }

    #[test]
    fn test_first_alias_match_wins() {
        let table = RouteTable::new(vec![
            route("a.example.com", &["dup.example.com"]),
            route("b.example.com", &["dup.example.com"]),
        ]);

        assert_eq!(
            matched_name(table.resolve("dup.example.com")).as_deref(),
            Some("a.example.com")
        );
    }
}
