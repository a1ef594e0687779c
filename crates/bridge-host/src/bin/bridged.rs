//! Standalone bridge server for development and manual testing.
//!
//! Runs the bridge against a headless host: originals come from the
//! real filesystem, virtual documents live in memory, and diff views
//! are logged instead of rendered. Reviews opened against this host
//! stay pending until the agent closes them or disconnects.
//!
//! # Usage
//!
//! ```bash
//! # Start the server; the first line printed is "<scheme> <address>",
//! # the second is the shared secret.
//! bridged
//!
//! # Custom parent directory for the endpoint
//! bridged --socket-dir /run/user/1000
//! BRIDGE_SOCKET_DIR=/run/user/1000 bridged
//!
//! # Enable debug logging
//! RUST_LOG=bridge_host=debug bridged
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bridge_core::{SessionId, TerminalRef};
use bridge_host::diff::DiffStateManager;
use bridge_host::host::{EditorHost, HostError};
use bridge_host::lineage::SysinfoInspector;
use bridge_host::registry::spawn_registry;
use bridge_host::server::{BridgeServer, ServerConfig};
use bridge_protocol::{DiagnosticsPayload, HostInfo, SelectionPayload};

/// Headless agent-bridge server
#[derive(Parser, Debug)]
#[command(name = "bridged", version, about)]
struct Args {
    /// Parent directory for the per-run endpoint directory
    #[arg(long)]
    socket_dir: Option<PathBuf>,
}

/// Host implementation with no editor attached.
#[derive(Default)]
struct HeadlessHost {
    virtual_docs: Mutex<HashMap<String, String>>,
}

impl EditorHost for HeadlessHost {
    fn on_session_initialized(&self, session_id: &SessionId) -> Result<(), HostError> {
        info!(session_id = %session_id, "session initialized (headless)");
        Ok(())
    }

    fn set_virtual_content(&self, uri: &str, contents: &str) {
        if let Ok(mut docs) = self.virtual_docs.lock() {
            docs.insert(uri.to_string(), contents.to_string());
        }
    }

    fn clear_virtual_content(&self, uri: &str) {
        if let Ok(mut docs) = self.virtual_docs.lock() {
            docs.remove(uri);
        }
    }

    fn open_diff_view(&self, original_uri: &str, modified_uri: &str, title: &str) {
        info!(
            original = original_uri,
            modified = modified_uri,
            title,
            "diff review opened; close it via close_diff or by disconnecting"
        );
    }

    fn close_diff_view(&self, title: &str) {
        info!(title, "diff review closed");
    }

    fn read_original(&self, path: &str) -> std::io::Result<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_terminals(&self) -> Vec<TerminalRef> {
        Vec::new()
    }

    fn current_selection(&self) -> Option<SelectionPayload> {
        None
    }

    fn current_diagnostics(&self, _uri: Option<&str>) -> Vec<DiagnosticsPayload> {
        Vec::new()
    }

    fn host_info(&self) -> HostInfo {
        HostInfo {
            name: "bridged".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("bridge_host=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let socket_dir = args
        .socket_dir
        .or_else(|| std::env::var("BRIDGE_SOCKET_DIR").ok().map(PathBuf::from));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "bridged starting"
    );

    let cancel = CancellationToken::new();
    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "error waiting for shutdown signal");
        }
        info!("shutdown signal received");
        shutdown_token.cancel();
    });

    let host: Arc<dyn EditorHost> = Arc::new(HeadlessHost::default());
    let inspector = Arc::new(SysinfoInspector);
    let registry = spawn_registry(Arc::clone(&host), inspector);
    let diffs = Arc::new(DiffStateManager::new());

    let (server, endpoint) = BridgeServer::bind(
        ServerConfig { socket_dir },
        registry,
        diffs,
        host,
        cancel,
    )
    .context("failed to bind bridge endpoint")?;

    // Out-of-band discovery: agents read these two lines.
    println!("{} {}", endpoint.scheme, endpoint.address.display());
    println!("{}", endpoint.secret);

    server.run().await;

    info!("bridged stopped");
    Ok(())
}

/// Waits for SIGTERM or SIGINT.
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
