//! Unix socket server multiplexing agent sessions.
//!
//! One listener per editor instance, bound inside a fresh owner-only
//! temporary directory. Each accepted connection gets a
//! [`ConnectionHandler`]; each initialized session gets a per-session
//! transport in the shared map, which is what `send_to_session` and
//! `broadcast` write through.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   BridgeServer   │
//! │   UnixListener   │
//! └────────┬─────────┘
//!          │ accept()
//!          ▼
//! ┌──────────────────┐      ┌──────────────────┐
//! │ConnectionHandler │─────▶│  RegistryHandle  │
//! │   (per agent)    │      └──────────────────┘
//! └────────┬─────────┘
//!          │ initialize
//!          ▼
//! ┌──────────────────┐      ┌──────────────────┐
//! │  transports map  │◀─────│   ServerHandle   │
//! │ (session→writer) │      │ send / broadcast │
//! └──────────────────┘      └──────────────────┘
//! ```

mod connection;

pub use connection::ConnectionHandler;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixListener;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bridge_core::SessionId;
use bridge_protocol::{DiagnosticsPayload, PushNotification, SelectionPayload, ServerMessage};

use crate::debounce::Debouncer;
use crate::diff::DiffStateManager;
use crate::host::EditorHost;
use crate::registry::RegistryHandle;

/// Socket file name inside the per-run endpoint directory.
const SOCKET_FILE_NAME: &str = "bridge.sock";

/// Write timeout for outbound sends.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared handle to one connection's write half.
pub type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Server configuration.
#[derive(Debug, Default)]
pub struct ServerConfig {
    /// Parent directory for the per-run endpoint directory. Defaults
    /// to the system temp dir.
    pub socket_dir: Option<PathBuf>,
}

/// Transport scheme of a bound endpoint.
///
/// Only `unix` is implemented on this target; `pipe` is the
/// discriminator reserved for a Windows named-pipe transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointScheme {
    Unix,
    Pipe,
}

impl fmt::Display for EndpointScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix => write!(f, "unix"),
            Self::Pipe => write!(f, "pipe"),
        }
    }
}

/// Address and secret returned by [`BridgeServer::bind`] for
/// out-of-band discovery by agent processes.
#[derive(Debug, Clone)]
pub struct BoundEndpoint {
    pub address: PathBuf,
    pub scheme: EndpointScheme,
    pub secret: String,
}

/// Per-session transport: the write half of whichever connection
/// initialized the session.
pub(crate) struct SessionTransport {
    pub(crate) writer: SharedWriter,
}

/// State shared between the accept loop, connection handlers, and
/// [`ServerHandle`]s.
pub(crate) struct ServerShared {
    pub(crate) secret: String,
    pub(crate) registry: RegistryHandle,
    pub(crate) diffs: Arc<DiffStateManager>,
    pub(crate) host: Arc<dyn EditorHost>,
    pub(crate) transports: RwLock<HashMap<SessionId, SessionTransport>>,
    pub(crate) cancel: CancellationToken,
}

/// Errors binding the endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to set up endpoint at {path}: {source}")]
    EndpointSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The bridge's local RPC server.
///
/// One instance, one listener: `bind` is not idempotent and a second
/// server requires a second instance with its own endpoint.
pub struct BridgeServer {
    shared: Arc<ServerShared>,
    listener: UnixListener,
    endpoint_dir: TempDir,
    socket_path: PathBuf,
    connection_counter: AtomicU64,
}

impl BridgeServer {
    /// Binds a freshly generated endpoint and returns the server plus
    /// the address/secret pair for out-of-band discovery.
    ///
    /// The endpoint lives in a new temporary directory created with
    /// owner-only permissions; the shared secret is 16 random bytes,
    /// hex encoded, valid for this process lifetime only.
    pub fn bind(
        config: ServerConfig,
        registry: RegistryHandle,
        diffs: Arc<DiffStateManager>,
        host: Arc<dyn EditorHost>,
        cancel: CancellationToken,
    ) -> Result<(Self, BoundEndpoint), ServerError> {
        let endpoint_dir = match &config.socket_dir {
            Some(dir) => tempfile::Builder::new().prefix("bridge-").tempdir_in(dir),
            None => tempfile::Builder::new().prefix("bridge-").tempdir(),
        }
        .map_err(|source| ServerError::EndpointSetup {
            path: config
                .socket_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                endpoint_dir.path(),
                std::fs::Permissions::from_mode(0o700),
            )
            .map_err(|source| ServerError::EndpointSetup {
                path: endpoint_dir.path().to_path_buf(),
                source,
            })?;
        }

        let socket_path = endpoint_dir.path().join(SOCKET_FILE_NAME);
        let listener =
            UnixListener::bind(&socket_path).map_err(|source| ServerError::EndpointSetup {
                path: socket_path.clone(),
                source,
            })?;

        let secret = generate_secret();

        info!(socket = %socket_path.display(), "bridge endpoint bound");

        let shared = Arc::new(ServerShared {
            secret: secret.clone(),
            registry,
            diffs,
            host,
            transports: RwLock::new(HashMap::new()),
            cancel,
        });

        let endpoint = BoundEndpoint {
            address: socket_path.clone(),
            scheme: EndpointScheme::Unix,
            secret,
        };

        Ok((
            Self {
                shared,
                listener,
                endpoint_dir,
                socket_path,
                connection_counter: AtomicU64::new(0),
            },
            endpoint,
        ))
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns a cheap-to-clone handle for sends, broadcasts, and
    /// shutdown.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Accepts connections until the cancellation token fires, then
    /// tears everything down. Cleanup is best-effort throughout: this
    /// never fails, even when shutdown races a half-finished start.
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => {
                    info!("server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_nr = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            let shared = Arc::clone(&self.shared);
                            tokio::spawn(async move {
                                ConnectionHandler::new(stream, shared, conn_nr).run().await;
                            });
                        }
                        Err(e) => {
                            // Keep accepting; one bad accept must not
                            // kill the listener.
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup().await;
    }

    async fn cleanup(self) {
        let transports: Vec<(SessionId, SessionTransport)> = {
            let mut map = self.shared.transports.write().await;
            map.drain().collect()
        };

        for (session_id, transport) in transports {
            let mut writer = transport.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!(session_id = %session_id, error = %e, "transport already closed");
            }
        }

        drop(self.listener);

        let path = self.endpoint_dir.path().to_path_buf();
        if let Err(e) = self.endpoint_dir.close() {
            warn!(path = %path.display(), error = %e, "failed to remove endpoint directory");
        }

        info!("server cleanup complete");
    }
}

/// Cheap-to-clone handle over a running server.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<ServerShared>,
}

impl ServerHandle {
    /// Sends a notification to one session. Best-effort: an unknown
    /// session or a failed send is logged and dropped, never surfaced
    /// to the caller - the remote side may simply have disconnected
    /// mid-flight.
    pub async fn send_to_session(&self, session_id: &SessionId, notification: PushNotification) {
        let writer = {
            let transports = self.shared.transports.read().await;
            match transports.get(session_id) {
                Some(transport) => Arc::clone(&transport.writer),
                None => {
                    debug!(session_id = %session_id, "send to unknown session dropped");
                    return;
                }
            }
        };

        let Some(json) = encode(&ServerMessage::notification(notification)) else {
            return;
        };

        if let Err(e) = write_line(&writer, &json).await {
            debug!(session_id = %session_id, error = %e, "notification send failed, dropping");
        }
    }

    /// Sends a notification to every session connected at call time.
    ///
    /// The session set is snapshotted first: sessions that connect
    /// while the broadcast is in flight do not receive it, and one
    /// failed delivery never blocks the rest.
    pub async fn broadcast(&self, notification: PushNotification) {
        let Some(json) = encode(&ServerMessage::notification(notification)) else {
            return;
        };

        let snapshot: Vec<(SessionId, SharedWriter)> = {
            let transports = self.shared.transports.read().await;
            transports
                .iter()
                .map(|(id, t)| (id.clone(), Arc::clone(&t.writer)))
                .collect()
        };

        let mut failed = Vec::new();
        for (session_id, writer) in snapshot {
            if let Err(e) = write_line(&writer, &json).await {
                debug!(session_id = %session_id, error = %e, "broadcast delivery failed");
                failed.push(session_id);
            }
        }

        if !failed.is_empty() {
            let mut transports = self.shared.transports.write().await;
            for session_id in failed {
                transports.remove(&session_id);
            }
        }
    }

    /// Requests shutdown of the server this handle belongs to.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    /// Number of currently connected sessions.
    pub async fn session_count(&self) -> usize {
        self.shared.transports.read().await.len()
    }

    /// Creates the debounced front end for host change events.
    pub fn change_notifier(&self, window: Duration) -> ChangeNotifier {
        ChangeNotifier::new(self.clone(), window)
    }
}

/// Debounced entry point for host change events.
///
/// Selection and diagnostics bursts are coalesced independently; only
/// the last event inside each quiescence window is broadcast.
pub struct ChangeNotifier {
    selection: Debouncer<SelectionPayload>,
    diagnostics: Debouncer<DiagnosticsPayload>,
}

impl ChangeNotifier {
    fn new(handle: ServerHandle, window: Duration) -> Self {
        let (selection, mut selection_rx) = Debouncer::new(window);
        let (diagnostics, mut diagnostics_rx) = Debouncer::new(window);

        let selection_handle = handle.clone();
        tokio::spawn(async move {
            while let Some(payload) = selection_rx.recv().await {
                selection_handle
                    .broadcast(PushNotification::SelectionChanged(payload))
                    .await;
            }
        });

        tokio::spawn(async move {
            while let Some(payload) = diagnostics_rx.recv().await {
                handle
                    .broadcast(PushNotification::DiagnosticsChanged(payload))
                    .await;
            }
        });

        Self {
            selection,
            diagnostics,
        }
    }

    /// Records a selection change.
    pub fn selection_changed(&self, payload: SelectionPayload) {
        self.selection.push(payload);
    }

    /// Records a diagnostics change.
    pub fn diagnostics_changed(&self, payload: DiagnosticsPayload) {
        self.diagnostics.push(payload);
    }
}

fn encode(msg: &ServerMessage) -> Option<String> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(json),
        Err(e) => {
            error!(error = %e, "failed to serialize server message");
            None
        }
    }
}

/// Writes one message line with the write timeout applied.
pub(crate) async fn write_line(writer: &SharedWriter, json: &str) -> std::io::Result<()> {
    let mut writer = writer.lock().await;
    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write timed out",
        )),
    }
}

/// Per-process-lifetime shared secret: 16 random bytes, hex encoded.
fn generate_secret() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_32_hex_chars() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 32);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn secrets_are_unique_per_call() {
        assert_ne!(generate_secret(), generate_secret());
    }

    #[test]
    fn endpoint_scheme_display() {
        assert_eq!(EndpointScheme::Unix.to_string(), "unix");
        assert_eq!(EndpointScheme::Pipe.to_string(), "pipe");
    }

    #[test]
    fn server_error_display() {
        let err = ServerError::EndpointSetup {
            path: PathBuf::from("/tmp/bridge-x"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/tmp/bridge-x"));
        assert!(err.to_string().contains("denied"));
    }
}
