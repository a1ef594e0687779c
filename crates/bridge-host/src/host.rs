//! Traits the embedding editor implements.
//!
//! Everything the bridge needs from the host is funneled through
//! [`EditorHost`]: diff presentation, virtual read-only documents,
//! terminal enumeration, and the selection/diagnostics accessors. All
//! of these are thin wrappers around host APIs on the editor side; the
//! bridge treats them as opaque collaborators.

use bridge_core::{SessionId, TerminalRef};
use bridge_protocol::{DiagnosticsPayload, HostInfo, SelectionPayload};
use thiserror::Error;

/// Errors the host can surface back into the bridge.
#[derive(Debug, Error)]
pub enum HostError {
    /// Registering the per-session tool surface failed. Reported to the
    /// initializing client as an internal error; the session is not
    /// registered.
    #[error("tool surface registration failed: {0}")]
    ToolSurface(String),
}

/// The editor-side collaborator surface.
///
/// Implementations must be cheap to call from async tasks; none of
/// these methods may block for user input.
pub trait EditorHost: Send + Sync + 'static {
    /// Called once per session when its initialization call completes.
    /// The host wires any session-scoped commands here. An error aborts
    /// the initialization.
    fn on_session_initialized(&self, session_id: &SessionId) -> Result<(), HostError>;

    /// Stores content for a synthetic read-only document identity.
    fn set_virtual_content(&self, uri: &str, contents: &str);

    /// Releases content previously stored for `uri`. Clearing an
    /// unknown uri is a no-op.
    fn clear_virtual_content(&self, uri: &str);

    /// Opens a two-pane comparison view over two virtual documents.
    fn open_diff_view(&self, original_uri: &str, modified_uri: &str, title: &str);

    /// Closes the comparison view with the given title, if still open.
    fn close_diff_view(&self, title: &str);

    /// Reads the current on-disk contents of `path`.
    ///
    /// Returns `Ok(None)` when the file does not exist - the legitimate
    /// new-file case. Any other failure is an error the caller surfaces
    /// to the agent.
    fn read_original(&self, path: &str) -> std::io::Result<Option<String>>;

    /// Snapshot of currently open terminals.
    fn list_terminals(&self) -> Vec<TerminalRef>;

    /// Current text selection, if any.
    fn current_selection(&self) -> Option<SelectionPayload>;

    /// Current diagnostics, optionally scoped to one document.
    fn current_diagnostics(&self, uri: Option<&str>) -> Vec<DiagnosticsPayload>;

    /// Editor name/version/pid.
    fn host_info(&self) -> HostInfo;
}
