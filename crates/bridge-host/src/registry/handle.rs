//! Client interface for interacting with the registry actor.

use bridge_core::{
    ProcessIdentity, SessionId, SessionRecord, TerminalId, TerminalRef, DEFAULT_SESSION_LABEL,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use super::commands::{RegistryCommand, RegistryError, SessionEvent};

/// Cheap-to-clone handle for sending commands to the registry actor
/// and subscribing to session events.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
    event_sender: broadcast::Sender<SessionEvent>,
}

impl RegistryHandle {
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Registers a session, replacing any previous registration under
    /// the same id, and returns the handle that revokes exactly this
    /// registration.
    pub async fn register(
        &self,
        session_id: SessionId,
        identity: ProcessIdentity,
    ) -> Result<RegistrationHandle, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                session_id: session_id.clone(),
                identity,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        let generation = rx.await.map_err(|_| RegistryError::ChannelClosed)?;

        Ok(RegistrationHandle {
            session_id,
            generation,
            sender: self.sender.clone(),
        })
    }

    /// Assigns a display name. Fire-and-forget.
    pub async fn set_display_name(&self, session_id: SessionId, name: String) {
        let _ = self
            .sender
            .send(RegistryCommand::SetDisplayName { session_id, name })
            .await;
    }

    /// Returns the display label for a session.
    ///
    /// Unknown sessions and a stopped actor both fall back to the
    /// generic label; raw internal identifiers are never returned.
    pub async fn display_name(&self, session_id: SessionId) -> String {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::GetDisplayName {
                session_id,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return DEFAULT_SESSION_LABEL.to_string();
        }

        rx.await
            .unwrap_or_else(|_| DEFAULT_SESSION_LABEL.to_string())
    }

    /// Fetches one session record.
    pub async fn session(&self, session_id: SessionId) -> Option<SessionRecord> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::GetSession {
                session_id,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Fetches all session records.
    pub async fn sessions(&self) -> Vec<SessionRecord> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::ListSessions { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Records a direct terminal association for a session.
    pub async fn set_terminal(&self, session_id: SessionId, terminal: TerminalRef) {
        let _ = self
            .sender
            .send(RegistryCommand::SetTerminal {
                session_id,
                terminal,
            })
            .await;
    }

    /// Tells the registry a terminal closed so direct associations to
    /// it are cleared. Wired to the host's terminal-close event.
    pub async fn terminal_closed(&self, terminal_id: TerminalId) {
        let _ = self
            .sender
            .send(RegistryCommand::TerminalClosed { terminal_id })
            .await;
    }

    /// Resolves the terminal owning a session, walking the process
    /// tree when there is no direct match. Returns `None` for unknown
    /// sessions, unresolvable lineage, or a stopped actor.
    pub async fn resolve_terminal(&self, session_id: SessionId) -> Option<TerminalRef> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::ResolveTerminal {
                session_id,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Subscribes to session connect/disconnect events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_sender.subscribe()
    }

    /// Whether the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Revocation handle for one particular registration.
///
/// Revoking removes the session entry, its display name, its direct
/// terminal mapping, and its ancestor-pid cache - but only if this
/// handle still names the current registration. A handle superseded by
/// a re-registration under the same id becomes a harmless no-op, and
/// revoking consumes the handle, so double disposal cannot occur.
#[derive(Debug)]
pub struct RegistrationHandle {
    session_id: SessionId,
    generation: u64,
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistrationHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Removes this registration from the registry.
    pub async fn revoke(self) {
        if self
            .sender
            .send(RegistryCommand::Deregister {
                session_id: self.session_id.clone(),
                generation: self.generation,
            })
            .await
            .is_err()
        {
            debug!(session_id = %self.session_id, "registry already stopped during revoke");
        }
    }
}
