//! Forwarder configuration.
//!
//! Two layers:
//! - process environment (`Config::from_env`): where the config file lives,
//!   log level, connection cap
//! - JSON config file (`ForwarderConfig`): listen addresses, servers and
//!   their backend descriptors, client-facing messages
//!
//! A missing config file is created with the defaults.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::manager::{
    ComputeManager, ComputeSettings, HttpControlPlane, HttpControlPlaneConfig, ManagerError,
    SharedManager, UnmanagedManager,
};
use crate::proxy::{Route, RouteTable, DEFAULT_MAX_CONNECTIONS};

const DEFAULT_GAME_PORT: u16 = 25565;
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Forwarder process configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the JSON config file.
    pub config_path: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Maximum concurrent connections per listener.
    pub max_connections: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let config_path = std::env::var("FORWARDER_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./config.json"));

        let log_level =
            std::env::var("FORWARDER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let max_connections: usize = std::env::var("FORWARDER_MAX_CONNECTIONS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("FORWARDER_MAX_CONNECTIONS must be a positive integer.")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1);

        Ok(Self {
            config_path,
            log_level,
            max_connections,
        })
    }
}

/// Contents of the JSON config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Listen addresses; `:port` means all interfaces.
    pub listen: Vec<String>,
    pub servers: Vec<ServerConfig>,
    pub messages: Messages,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            listen: vec![format!(":{}", DEFAULT_GAME_PORT)],
            servers: vec![ServerConfig {
                name: "example.com".to_string(),
                aliases: vec!["mc.example.com".to_string()],
                port: DEFAULT_GAME_PORT,
                forward: ForwardConfig::Nop,
            }],
            messages: Messages::default(),
        }
    }
}

/// One logical server reachable through the forwarder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Canonical hostname clients connect with.
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_game_port")]
    pub port: u16,
    #[serde(default)]
    pub forward: ForwardConfig,
}

/// Backend descriptor, resolved once into a manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ForwardConfig {
    /// Externally managed backend.
    #[default]
    #[serde(alias = "unmanaged")]
    Nop,
    /// Backend on a compute instance powered on demand.
    #[serde(alias = "ec2")]
    Compute(ComputeForwardConfig),
}

/// Settings of a compute-backed server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeForwardConfig {
    /// Control plane base URL.
    pub endpoint: String,
    pub instance_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub profile: String,
    /// File holding a bearer token for the control plane.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
    /// Game port on the instance.
    #[serde(default = "default_game_port")]
    pub port: u16,
    /// Seconds; bounds dialing, probing and control plane requests.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    /// Seconds between boot watcher probes. Defaults to `timeout`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
    /// Run a status exchange as part of the reachability probe.
    #[serde(default = "default_true")]
    pub validate_status: bool,
}

/// Client-facing message texts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Messages {
    pub stopped: String,
    pub pending: String,
    pub stopping: String,
    pub obscure: String,
    pub started: String,
    pub start_failed: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            stopped: "STOPPED\nAttempt login to start it up".to_string(),
            pending: "PENDING...".to_string(),
            stopping: "STOPPING...".to_string(),
            obscure: "STATE OBSCURE".to_string(),
            started: "Successfully started the server!".to_string(),
            start_failed: "Failed to start the server!".to_string(),
        }
    }
}

fn default_game_port() -> u16 {
    DEFAULT_GAME_PORT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl ForwarderConfig {
    /// Read the config file, creating it with defaults if it does not exist.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            let config = Self::default();
            let rendered = serde_json::to_string_pretty(&config)?;
            std::fs::write(path, rendered + "\n").with_context(|| {
                format!("Failed to write default config file {}", path.display())
            })?;
            info!(path = %path.display(), "Wrote default config file");
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the rest of the forwarder relies on.
    pub fn validate(&self) -> Result<()> {
        if self.listen.is_empty() {
            bail!("At least one listen address is required.");
        }

        let mut names = HashSet::new();
        for server in &self.servers {
            let name = mcfwd_packet::normalize_hostname(&server.name);
            if name.is_empty() {
                bail!("Server names must not be empty.");
            }
            if !names.insert(name) {
                bail!("Duplicate server name {:?}.", server.name);
            }
            if let ForwardConfig::Compute(compute) = &server.forward {
                if compute.timeout == 0 {
                    bail!("Server {:?}: timeout must be at least 1 second.", server.name);
                }
                if compute.poll_interval == Some(0) {
                    bail!(
                        "Server {:?}: pollInterval must be at least 1 second.",
                        server.name
                    );
                }
                if compute.instance_id.is_empty() {
                    bail!("Server {:?}: instanceId is required.", server.name);
                }
            }
        }

        Ok(())
    }

    /// Resolve listen entries into socket addresses.
    pub fn listen_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.listen.iter().map(|entry| parse_listen_addr(entry)).collect()
    }

    /// Build the immutable route table, constructing one manager per server.
    pub fn build_route_table(&self) -> Result<RouteTable> {
        let mut routes = Vec::with_capacity(self.servers.len());
        for server in &self.servers {
            let manager = server
                .forward
                .build_manager()
                .with_context(|| format!("Failed to set up backend for {}", server.name))?;
            routes.push(Route::new(
                server.name.clone(),
                server.aliases.clone(),
                server.port,
                manager,
            ));
        }
        Ok(RouteTable::new(routes))
    }
}

impl ForwardConfig {
    pub fn build_manager(&self) -> Result<SharedManager, ManagerError> {
        match self {
            Self::Nop => Ok(Arc::new(UnmanagedManager::new())),
            Self::Compute(compute) => {
                let timeout = Duration::from_secs(compute.timeout);
                let control_plane = HttpControlPlane::new(HttpControlPlaneConfig {
                    endpoint: compute.endpoint.clone(),
                    region: compute.region.clone(),
                    profile: compute.profile.clone(),
                    credentials_path: compute.credentials_path.clone(),
                    timeout,
                })?;

                let settings = ComputeSettings {
                    instance_id: compute.instance_id.clone(),
                    port: compute.port,
                    timeout,
                    poll_interval: compute
                        .poll_interval
                        .map(Duration::from_secs)
                        .unwrap_or(timeout),
                    validate_status: compute.validate_status,
                };
                Ok(Arc::new(ComputeManager::new(
                    settings,
                    Arc::new(control_plane),
                )))
            }
        }
    }
}

/// Parse `host:port`, `[v6]:port` or `:port` (all interfaces).
pub fn parse_listen_addr(entry: &str) -> Result<SocketAddr> {
    if let Some(port) = entry.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .with_context(|| format!("Invalid port in listen address {:?}", entry))?;
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }
    entry
        .parse()
        .with_context(|| format!("Invalid listen address {:?}", entry))
}
