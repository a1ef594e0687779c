//! Registry actor commands, errors, and events.

use bridge_core::{ProcessIdentity, SessionId, SessionRecord, TerminalId, TerminalRef};
use thiserror::Error;
use tokio::sync::oneshot;

/// Commands sent to the registry actor.
///
/// Lookups use a oneshot channel for the response; mutations that no
/// caller ever needs to observe are fire-and-forget.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a session, replacing any previous registration under
    /// the same id. Responds with the generation number identifying
    /// this particular registration.
    Register {
        session_id: SessionId,
        identity: ProcessIdentity,
        respond_to: oneshot::Sender<u64>,
    },

    /// Remove a registration, but only if `generation` still names the
    /// current one. A stale generation (the registration was replaced)
    /// is a no-op, so disposing a superseded handle cannot tear down
    /// its successor.
    Deregister {
        session_id: SessionId,
        generation: u64,
    },

    /// Assign a display name.
    SetDisplayName { session_id: SessionId, name: String },

    /// Fetch the display label (falls back to the generic label).
    GetDisplayName {
        session_id: SessionId,
        respond_to: oneshot::Sender<String>,
    },

    /// Fetch one session record.
    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionRecord>>,
    },

    /// Fetch all session records.
    ListSessions {
        respond_to: oneshot::Sender<Vec<SessionRecord>>,
    },

    /// Record a direct terminal association. Always wins over
    /// process-lineage resolution.
    SetTerminal {
        session_id: SessionId,
        terminal: TerminalRef,
    },

    /// The host reports a terminal closed; direct associations to it
    /// are cleared.
    TerminalClosed { terminal_id: TerminalId },

    /// Resolve the terminal owning a session, walking the process tree
    /// if necessary.
    ResolveTerminal {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<TerminalRef>>,
    },
}

/// Errors that can occur when talking to the registry.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The actor has shut down.
    #[error("registry channel closed")]
    ChannelClosed,
}

/// Lifecycle events published to subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session completed its handshake.
    Connected { session_id: SessionId },

    /// A session's registration was removed.
    Disconnected { session_id: SessionId },
}
