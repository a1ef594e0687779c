//! Session identity and the per-session record kept by the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label shown for sessions that never supplied a display name.
///
/// Internal identifiers (session ids, pids) are never used as a
/// fallback label; they are not meant for display.
pub const DEFAULT_SESSION_LABEL: &str = "Agent";

/// Unique identifier for one connected agent session.
///
/// Assigned by the client during the transport handshake and carried in
/// the metadata of every subsequent call. Opaque: independent of any OS
/// process id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form (first 8 characters) for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Process identity supplied by the client on its initialization call.
///
/// Both fields are optional: an agent launched by something other than
/// a shell may not know them, and the bridge degrades to "no terminal
/// association" rather than rejecting the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    /// OS process id of the agent itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Parent process id, the starting point for terminal resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ppid: Option<u32>,
}

impl ProcessIdentity {
    pub fn new(pid: Option<u32>, ppid: Option<u32>) -> Self {
        Self { pid, ppid }
    }
}

/// One connected session as tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque session id from the handshake.
    pub id: SessionId,

    /// Client-reported process identity.
    pub identity: ProcessIdentity,

    /// User-assigned display name, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// When the transport handshake completed.
    pub connected_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(id: SessionId, identity: ProcessIdentity) -> Self {
        Self {
            id,
            identity,
            display_name: None,
            connected_at: Utc::now(),
        }
    }

    /// The human-readable label for this session.
    ///
    /// Falls back to [`DEFAULT_SESSION_LABEL`] when no display name was
    /// ever assigned.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SESSION_LABEL)
    }
}
