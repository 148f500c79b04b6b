//! TCP listener and connection handling.
//!
//! One listener per configured listen address. Every accepted connection
//! runs in its own task and is handed to the dispatcher.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};

use super::dispatch::{DispatchError, DispatchOutcome, Dispatcher};

/// Default maximum concurrent connections per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl ListenerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Total connections currently active.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Connections rejected due to max limit.
    pub connections_rejected: AtomicU64,
    /// Connections that never sent a valid handshake.
    pub handshake_failed: AtomicU64,
    /// Handshakes that resolved to a route.
    pub routes_matched: AtomicU64,
    /// Handshakes for an unknown hostname.
    pub routes_failed: AtomicU64,
    /// Status responses served for non-running backends.
    pub status_served: AtomicU64,
    /// Login attempts answered with a disconnect.
    pub logins_rejected: AtomicU64,
    /// Sessions forwarded to a running backend.
    pub sessions_forwarded: AtomicU64,
    /// Bytes proxied to backend.
    pub bytes_to_backend: AtomicU64,
    /// Bytes proxied from backend.
    pub bytes_from_backend: AtomicU64,
}

impl ListenerStats {
    fn record(&self, result: &Result<DispatchOutcome, DispatchError>) {
        let counter = match result {
            Ok(DispatchOutcome::Unrouted) => &self.routes_failed,
            Ok(DispatchOutcome::StatusServed(_)) => &self.status_served,
            Ok(DispatchOutcome::LoginRejected(_)) | Ok(DispatchOutcome::StartRequested { .. }) => {
                &self.logins_rejected
            }
            Ok(DispatchOutcome::Forwarded(stats)) => {
                self.bytes_to_backend
                    .fetch_add(stats.bytes_to_backend, Ordering::Relaxed);
                self.bytes_from_backend
                    .fetch_add(stats.bytes_from_backend, Ordering::Relaxed);
                &self.sessions_forwarded
            }
            Err(DispatchError::Handshake(_)) => &self.handshake_failed,
            Err(_) => {
                self.routes_matched.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if !matches!(
            result,
            Ok(DispatchOutcome::Unrouted) | Err(DispatchError::Handshake(_))
        ) {
            self.routes_matched.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A TCP listener for the forwarder.
pub struct Listener {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    /// Connection semaphore for limiting concurrent connections.
    conn_semaphore: Arc<Semaphore>,
    stats: Arc<ListenerStats>,
}

impl Listener {
    pub async fn bind(config: ListenerConfig, dispatcher: Arc<Dispatcher>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            listener,
            dispatcher,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Run the listener, accepting and handling connections.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let permit = match self.conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats
                                .connections_rejected
                                .fetch_add(1, Ordering::Relaxed);
                            warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
                            continue;
                        }
                    };

                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .connections_active
                        .fetch_add(1, Ordering::Relaxed);

                    let dispatcher = Arc::clone(&self.dispatcher);
                    let stats = Arc::clone(&self.stats);

                    tokio::spawn(
                        async move {
                            handle_connection(&dispatcher, &stats, stream).await;

                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    // Brief sleep to avoid tight loop on persistent errors
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection(dispatcher: &Dispatcher, stats: &ListenerStats, mut client: TcpStream) {
    if let Err(e) = client.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let result = dispatcher.dispatch(&mut client).await;
    stats.record(&result);

    match result {
        Ok(outcome) => debug!(outcome = ?outcome, "Connection handled"),
        Err(DispatchError::Handshake(e)) if e.is_eof() => {
            debug!("Client closed before completing the handshake");
        }
        Err(e @ DispatchError::State { .. }) | Err(e @ DispatchError::Dial { .. }) => {
            warn!(error = %e, "Connection aborted");
        }
        Err(e) => debug!(error = %e, "Connection error"),
    }
}
