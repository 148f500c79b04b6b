//! Client-facing proxy.
//!
//! This module provides:
//! - TCP listener management
//! - Hostname routing from the handshake
//! - State-dependent dispatch (status, disconnect or forward)
//! - Bidirectional session forwarding
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Dispatcher -> RouteTable -> Manager
//!                           |                          |
//!                    status / disconnect         dial (Running)
//!                                                      |
//!                                   Forwarder <--------+
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::{Dispatcher, Listener, ListenerConfig, RouteTable};
//!
//! let dispatcher = Arc::new(Dispatcher::new(Arc::new(route_table), messages));
//! let config = ListenerConfig::new("[::]:25565".parse()?);
//! let listener = Arc::new(Listener::bind(config, dispatcher).await?);
//! listener.run().await?;
//! ```

mod dispatch;
mod forward;
mod listener;
mod router;

pub use dispatch::{DispatchError, DispatchOutcome, Dispatcher};
pub use forward::{forward, ForwardStats};
pub use listener::{Listener, ListenerConfig, ListenerStats, DEFAULT_MAX_CONNECTIONS};
pub use router::{Route, RouteTable, RoutingDecision, SharedRouteTable};
