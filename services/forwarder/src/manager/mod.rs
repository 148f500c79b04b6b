//! Backend lifecycle managers.
//!
//! A manager answers three questions for one configured server:
//! - what state is the backend in (`state`)
//! - boot it (`start`)
//! - give me a connection to it (`dial`)
//!
//! ## States
//!
//! ```text
//!              start()          probe ok
//!   Stopped ----------> Pending ---------> Running
//!      ^                                      |
//!      |  powered off                         | probe fails
//!      +------------------- Stopping <--------+
//! ```
//!
//! `Obscure` is reported whenever the state cannot be determined.
//! Transitions are observed by polling; the only commanded change is the
//! optimistic reset to `Stopped` at the start of a boot attempt.

mod compute;
mod control_plane;
mod unmanaged;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcfwd_packet::{query_status, PacketError};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;

pub use compute::{ComputeManager, ComputeSettings};
pub use control_plane::{
    ControlPlane, HttpControlPlane, HttpControlPlaneConfig, InstanceDescription, PowerState,
};
pub use unmanaged::UnmanagedManager;

/// Lifecycle state of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManagerState {
    /// State could not be determined.
    Obscure = -1,
    Stopped = 0,
    /// Infrastructure is booting or the application is not reachable yet.
    Pending = 1,
    Running = 2,
    /// Infrastructure is up but the application stopped answering.
    Stopping = 3,
}

impl ManagerState {
    pub fn code(self) -> i8 {
        self as i8
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Obscure => "obscure",
            Self::Stopped => "stopped",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Manager errors.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Returned by every operation of a backend without automation.
    #[error("backend lifecycle is not automated")]
    NotAutomated,

    /// Dial requested while the backend is not serving.
    #[error("backend is not running (state: {0})")]
    NotRunning(ManagerState),

    /// The control plane has not reported an address for the backend.
    #[error("backend address is not known")]
    AddressUnknown,

    /// No connection (or no status answer) within the configured timeout.
    #[error("timed out after {timeout:?} connecting to {addr}")]
    DialTimeout { addr: String, timeout: Duration },

    /// Connection refused or otherwise failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Connected, but the status exchange failed.
    #[error("status probe of {addr} failed: {source}")]
    Probe {
        addr: String,
        #[source]
        source: PacketError,
    },

    /// Control plane answered with an error.
    #[error("control plane error: {0}")]
    ControlPlane(String),

    /// Control plane request could not be performed.
    #[error("control plane request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Control plane does not know the instance.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Control plane credentials could not be loaded.
    #[error("credentials error: {0}")]
    Credentials(String),
}

impl ManagerError {
    /// Returns true for the dial-timeout kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DialTimeout { .. })
    }
}

/// Lifecycle controller for one backend server.
///
/// Implementations serialize their own operations; callers may invoke them
/// concurrently from any number of connection tasks.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Trigger a boot. Returns once the boot was requested, not completed.
    async fn start(&self) -> Result<(), ManagerError>;

    /// Observe the current state.
    async fn state(&self) -> Result<ManagerState, ManagerError>;

    /// Open a connection to the running backend.
    async fn dial(&self) -> Result<TcpStream, ManagerError>;
}

/// Shared manager reference.
pub type SharedManager = Arc<dyn Manager>;

fn display_addr(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Connect to `host:port`, failing with `DialTimeout` after `limit`.
pub(crate) async fn connect_timeout(
    host: &str,
    port: u16,
    limit: Duration,
) -> Result<TcpStream, ManagerError> {
    let addr = display_addr(host, port);
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ManagerError::Connect { addr, source }),
        Err(_) => Err(ManagerError::DialTimeout {
            addr,
            timeout: limit,
        }),
    }
}

/// Application-level reachability probe.
///
/// Connects to the game port and, with `validate_status`, runs a full
/// status exchange on that connection. The whole probe is bounded by `limit`.
pub(crate) async fn probe(
    host: &str,
    port: u16,
    limit: Duration,
    validate_status: bool,
) -> Result<(), ManagerError> {
    let addr = display_addr(host, port);
    let attempt = async {
        let mut stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ManagerError::Connect {
                addr: addr.clone(),
                source,
            })?;

        if validate_status {
            query_status(&mut stream, host, port)
                .await
                .map_err(|source| ManagerError::Probe {
                    addr: addr.clone(),
                    source,
                })?;
        }
        Ok::<(), ManagerError>(())
    };

    match timeout(limit, attempt).await {
        Ok(result) => result,
        Err(_) => Err(ManagerError::DialTimeout {
            addr,
            timeout: limit,
        }),
    }
}
