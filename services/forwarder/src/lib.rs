//! Protocol-aware reverse proxy for game servers.
//!
//! Reads the client handshake, picks a backend by hostname and either
//! answers on the backend's behalf (status, login disconnect) or relays the
//! session once the backend is reachable. Dormant backends are booted on
//! the first login attempt.

pub mod config;
pub mod manager;
pub mod proxy;

pub use config::{Config, ForwarderConfig, Messages};
pub use manager::{Manager, ManagerError, ManagerState, SharedManager};
pub use proxy::{
    DispatchError, DispatchOutcome, Dispatcher, Listener, ListenerConfig, ListenerStats, Route,
    RouteTable, RoutingDecision, SharedRouteTable,
};
