//! Diff-review identity and verdict model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rejection reason recorded when a session disconnects with reviews
/// still open.
pub const CLIENT_DISCONNECTED_REASON: &str = "client disconnected";

/// Unique identifier for one pending diff review.
///
/// Derived from the identity of the virtual document created for the
/// proposed content, so two simultaneous reviews can never collide even
/// when they share a tab name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiffId(String);

impl DiffId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the id from the modified-side virtual document URI.
    pub fn from_modified_uri(uri: &str) -> Self {
        Self(uri.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The terminal outcome of a diff review.
///
/// A review that is abandoned (tab closed without a verdict) never
/// produces one of these; the waiting call is simply left unanswered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum DiffVerdict {
    /// The user accepted the proposed contents.
    Saved,

    /// The user (or a disconnect) rejected the proposal.
    Rejected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl DiffVerdict {
    /// A rejection with no particular reason attached.
    pub fn rejected() -> Self {
        Self::Rejected { reason: None }
    }

    /// A rejection carrying a reason string.
    pub fn rejected_because(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: Some(reason.into()),
        }
    }

    /// The rejection used when the owning session disconnects.
    pub fn client_disconnected() -> Self {
        Self::rejected_because(CLIENT_DISCONNECTED_REASON)
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_wire_shape() {
        let json = serde_json::to_string(&DiffVerdict::Saved).unwrap();
        assert_eq!(json, r#"{"verdict":"saved"}"#);

        let json = serde_json::to_string(&DiffVerdict::client_disconnected()).unwrap();
        assert_eq!(
            json,
            r#"{"verdict":"rejected","reason":"client disconnected"}"#
        );

        let json = serde_json::to_string(&DiffVerdict::rejected()).unwrap();
        assert_eq!(json, r#"{"verdict":"rejected"}"#);
    }

    #[test]
    fn verdict_roundtrip() {
        let parsed: DiffVerdict = serde_json::from_str(r#"{"verdict":"rejected"}"#).unwrap();
        assert_eq!(parsed, DiffVerdict::rejected());
    }

    #[test]
    fn diff_id_from_uri() {
        let id = DiffId::from_modified_uri("bridge-diff://review/42/src%2Fmain.rs");
        assert_eq!(id.as_str(), "bridge-diff://review/42/src%2Fmain.rs");
    }
}
