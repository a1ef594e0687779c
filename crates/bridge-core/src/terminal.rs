//! References to editor-visible terminals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Host-assigned identifier for an open terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerminalId(String);

impl TerminalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A snapshot of one open terminal as reported by the host.
///
/// The shell pid may be absent while the host is still spawning the
/// terminal's process; such terminals can be associated directly but
/// never matched by process lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalRef {
    pub id: TerminalId,

    /// OS process id of the terminal's shell, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Title shown in the terminal tab.
    pub title: String,
}

impl TerminalRef {
    pub fn new(id: impl Into<String>, pid: Option<u32>, title: impl Into<String>) -> Self {
        Self {
            id: TerminalId::new(id),
            pid,
            title: title.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_ref_roundtrip() {
        let term = TerminalRef::new("term-3", Some(9999), "zsh");
        let json = serde_json::to_string(&term).unwrap();
        let parsed: TerminalRef = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, term);
    }

    #[test]
    fn absent_pid_is_omitted() {
        let term = TerminalRef::new("term-1", None, "bash");
        let json = serde_json::to_string(&term).unwrap();
        assert!(!json.contains("pid"));
    }
}
