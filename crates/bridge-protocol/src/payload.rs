//! Payload schemas for tool calls, results, and push notifications.
//!
//! Parameter structs deny unknown fields so a malformed caller fails
//! loudly at the boundary instead of propagating half-empty data
//! inward.

use bridge_core::SessionId;
use serde::{Deserialize, Serialize};

/// Zero-based position inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Half-open range inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// Diagnostic severity, mirroring the host editor's levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Information,
    Hint,
}

/// One diagnostic attached to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: DiagnosticSeverity,
    pub message: String,

    /// Producer of the diagnostic (e.g. a language server name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Producer-specific code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Diagnostics for one document, pushed on change and returned by
/// `get_diagnostics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsPayload {
    pub uri: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Current selection, pushed on change and returned by `get_selection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionPayload {
    pub file_path: String,
    pub text: String,
    pub selection: Range,
}

/// Parameters for `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitializeParams {
    /// Optional display name to assign immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Result of `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    pub session_id: SessionId,

    /// Label the host will show for this session.
    pub display_name: String,
}

/// Parameters for `open_diff`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenDiffParams {
    /// Workspace path of the file being changed.
    pub file_path: String,

    /// Proposed file contents.
    pub new_contents: String,

    /// Title for the review tab.
    pub tab_name: String,
}

/// Parameters for `close_diff`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloseDiffParams {
    pub tab_name: String,
}

/// Result of `close_diff`.
///
/// `closed: false` means no review by that name was open — an expected
/// idempotent outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseDiffResult {
    pub closed: bool,
}

/// Parameters for `set_session_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetSessionNameParams {
    pub name: String,
}

/// Parameters for `get_diagnostics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetDiagnosticsParams {
    /// Restrict to one document; absent means all open documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Result of `get_host_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Editor product name.
    pub name: String,

    /// Editor version string.
    pub version: String,

    /// OS process id of the host.
    pub pid: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_optional_fields_omitted() {
        let diag = Diagnostic {
            range: Range {
                start: Position { line: 3, character: 0 },
                end: Position { line: 3, character: 10 },
            },
            severity: DiagnosticSeverity::Warning,
            message: "unused variable".to_string(),
            source: None,
            code: None,
        };
        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains(r#""severity":"warning""#));
        assert!(!json.contains("source"));
        assert!(!json.contains("code"));
    }

    #[test]
    fn diagnostic_with_source_and_code() {
        let json = r#"{
            "range": {"start": {"line": 1, "character": 0}, "end": {"line": 1, "character": 4}},
            "severity": "error",
            "message": "cannot find value",
            "source": "rustc",
            "code": "E0425"
        }"#;
        let diag: Diagnostic = serde_json::from_str(json).unwrap();
        assert_eq!(diag.source.as_deref(), Some("rustc"));
        assert_eq!(diag.code.as_deref(), Some("E0425"));
    }

    #[test]
    fn open_diff_params_require_all_fields() {
        let json = r#"{"file_path": "/w/a.rs", "new_contents": "x"}"#;
        assert!(serde_json::from_str::<OpenDiffParams>(json).is_err());
    }

    #[test]
    fn get_diagnostics_params_default_to_all_documents() {
        let params: GetDiagnosticsParams = serde_json::from_str("{}").unwrap();
        assert!(params.uri.is_none());
    }
}
