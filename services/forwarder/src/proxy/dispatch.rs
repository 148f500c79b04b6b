//! Per-connection dispatch.
//!
//! Reads the handshake, resolves the route and answers based on the
//! backend's lifecycle state:
//!
//! | state    | status phase          | login phase                         |
//! |----------|-----------------------|-------------------------------------|
//! | Stopped  | "stopped" response    | start, then "started"/"start failed"|
//! | Pending  | "pending" response    | "pending" disconnect                |
//! | Running  | forward               | forward                             |
//! | Stopping | "stopping" response   | "stopping" disconnect               |
//! | Obscure  | "obscure" response    | "obscure" disconnect                |
//!
//! Errors never reach the client as text; the connection is closed instead.

use std::io;
use std::sync::Arc;

use mcfwd_packet::{
    serve_disconnect, serve_status, Chat, Handshake, NextState, PacketError, StatusResponse,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::forward::{forward, ForwardStats};
use super::router::{RoutingDecision, SharedRouteTable};
use crate::config::Messages;
use crate::manager::{ManagerError, ManagerState};

const COLOR_FAILURE: &str = "red";
const COLOR_PENDING: &str = "gold";
const COLOR_SUCCESS: &str = "green";
const COLOR_OBSCURE: &str = "gray";

/// Errors that end a connection without a response.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Client did not send a valid handshake.
    #[error("invalid handshake: {0}")]
    Handshake(#[source] PacketError),

    /// Backend state could not be determined.
    #[error("state of {route} unavailable: {source}")]
    State {
        route: String,
        #[source]
        source: ManagerError,
    },

    /// Backend reported running but could not be reached.
    #[error("dial to {route} failed: {source}")]
    Dial {
        route: String,
        #[source]
        source: ManagerError,
    },

    /// Status or login sub-protocol failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] PacketError),

    /// Forwarded session failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// How a connection was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No route for the handshake address; closed silently.
    Unrouted,
    /// Status response describing a non-running backend.
    StatusServed(ManagerState),
    /// Login rejected with a disconnect describing a non-running backend.
    LoginRejected(ManagerState),
    /// Login against a stopped backend triggered a start.
    StartRequested { started: bool },
    /// Session handed to the running backend.
    Forwarded(ForwardStats),
}

/// Maps a connection's handshake to a response or a forwarded session.
pub struct Dispatcher {
    routes: SharedRouteTable,
    messages: Arc<Messages>,
}

impl Dispatcher {
    pub fn new(routes: SharedRouteTable, messages: Arc<Messages>) -> Self {
        Self { routes, messages }
    }

    /// Handle one client connection to completion.
    pub async fn dispatch<S>(&self, client: &mut S) -> Result<DispatchOutcome, DispatchError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let handshake = Handshake::read_from(client)
            .await
            .map_err(DispatchError::Handshake)?;

        debug!(
            address = %handshake.server_address,
            next_state = %handshake.next_state,
            protocol_version = handshake.protocol_version,
            "Handshake received"
        );

        let route = match self.routes.resolve(&handshake.server_address) {
            RoutingDecision::Matched { route } => route,
            RoutingDecision::NoMatch { reason } => {
                info!(reason = %reason, "Closing unrouted connection");
                let _ = client.shutdown().await;
                return Ok(DispatchOutcome::Unrouted);
            }
        };

        let state = route
            .manager
            .state()
            .await
            .map_err(|source| DispatchError::State {
                route: route.name.clone(),
                source,
            })?;

        debug!(route = %route.name, state = %state, "Backend state");

        match (state, handshake.next_state) {
            (ManagerState::Running, _) => {
                let mut backend =
                    route
                        .manager
                        .dial()
                        .await
                        .map_err(|source| DispatchError::Dial {
                            route: route.name.clone(),
                            source,
                        })?;

                info!(route = %route.name, "Forwarding session");
                let stats = forward(client, &mut backend, &handshake.encode()).await?;
                debug!(
                    route = %route.name,
                    bytes_to_backend = stats.bytes_to_backend,
                    bytes_from_backend = stats.bytes_from_backend,
                    "Session closed"
                );
                Ok(DispatchOutcome::Forwarded(stats))
            }
            (ManagerState::Stopped, NextState::Login) => {
                let started = match route.manager.start().await {
                    Ok(()) => {
                        info!(route = %route.name, "Backend start requested");
                        true
                    }
                    Err(e) => {
                        warn!(route = %route.name, error = %e, "Failed to start backend");
                        false
                    }
                };

                let reason = if started {
                    Chat::colored(&self.messages.started, COLOR_SUCCESS)
                } else {
                    Chat::colored(&self.messages.start_failed, COLOR_FAILURE)
                };
                serve_disconnect(client, &handshake, &reason).await?;
                Ok(DispatchOutcome::StartRequested { started })
            }
            (state, NextState::Status) => {
                serve_status(
                    client,
                    &handshake,
                    &StatusResponse::placeholder(self.describe(state)),
                )
                .await?;
                Ok(DispatchOutcome::StatusServed(state))
            }
            (state, NextState::Login) => {
                serve_disconnect(client, &handshake, &self.describe(state)).await?;
                Ok(DispatchOutcome::LoginRejected(state))
            }
        }
    }

    /// Message shown for a backend that is not serving.
    fn describe(&self, state: ManagerState) -> Chat {
        let messages = &self.messages;
        match state {
            ManagerState::Stopped => Chat::colored(&messages.stopped, COLOR_FAILURE),
            ManagerState::Pending => Chat::colored(&messages.pending, COLOR_PENDING),
            ManagerState::Stopping => Chat::colored(&messages.stopping, COLOR_FAILURE),
            ManagerState::Obscure | ManagerState::Running => {
                Chat::colored(&messages.obscure, COLOR_OBSCURE)
            }
        }
    }
}
