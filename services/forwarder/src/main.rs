//! mcfwd forwarder
//!
//! Protocol-aware reverse proxy that boots dormant game servers on demand.
//!
//! This service:
//! - Loads (or creates) the JSON config file
//! - Builds one lifecycle manager per configured server
//! - Accepts client connections on every listen address
//! - Answers status and login requests while a backend is down
//! - Forwards sessions to running backends

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcfwd_forwarder::{Config, Dispatcher, ForwarderConfig, Listener, ListenerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to FORWARDER_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting mcfwd forwarder");

    let app_config = ForwarderConfig::load_or_init(&config.config_path)?;
    let listen_addrs = app_config.listen_addrs()?;

    info!(
        config_path = %config.config_path.display(),
        listener_count = listen_addrs.len(),
        server_count = app_config.servers.len(),
        max_connections = config.max_connections,
        "Configuration loaded"
    );

    let route_table = Arc::new(app_config.build_route_table()?);
    let dispatcher = Arc::new(Dispatcher::new(
        route_table,
        Arc::new(app_config.messages.clone()),
    ));

    // Bind everything before accepting anywhere
    let mut listeners = Vec::with_capacity(listen_addrs.len());
    for bind_addr in listen_addrs {
        let mut listener_config = ListenerConfig::new(bind_addr);
        listener_config.max_connections = config.max_connections;

        let listener = Listener::bind(listener_config, Arc::clone(&dispatcher))
            .await
            .with_context(|| format!("Failed to bind listener on {}", bind_addr))?;
        listeners.push(Arc::new(listener));
    }

    let mut listener_handles = Vec::with_capacity(listeners.len());
    for listener in listeners {
        listener_handles.push(tokio::spawn(async move {
            if let Err(e) = listener.run().await {
                error!(error = %e, "Listener error");
            }
        }));
    }

    for handle in listener_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Listener task failed");
        }
    }

    Ok(())
}
