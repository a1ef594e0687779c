//! Request/response envelopes and the tool-call surface.

use crate::payload::{
    CloseDiffParams, DiagnosticsPayload, GetDiagnosticsParams, InitializeParams, OpenDiffParams,
    SelectionPayload, SetSessionNameParams,
};
use bridge_core::SessionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One inbound call from an agent process.
///
/// Every call carries the shared secret issued at server start. The
/// session id is required on everything except the very first
/// `initialize` call, where it names the session being created; the
/// pid/ppid headers are only meaningful on `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Per-process-lifetime shared secret (bearer-style).
    pub secret: String,

    /// Request id, echoed verbatim on the response.
    pub id: u64,

    /// Session the call belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    /// Client process id (initialize only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Client parent process id (initialize only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<u32>,

    /// The tool call itself.
    #[serde(flatten)]
    pub call: ToolCall,
}

/// The session-scoped tool surface.
///
/// Method names and payload schemas are fixed at this boundary;
/// anything that does not deserialize into one of these is rejected as
/// a bad request rather than forwarded with missing fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ToolCall {
    /// Session handshake. Creates the per-session transport.
    Initialize(InitializeParams),

    /// Open a diff review and block until the user delivers a verdict.
    OpenDiff(OpenDiffParams),

    /// Close a diff review by tab name. Closing an unknown review is a
    /// successful no-op reported via the `closed` flag.
    CloseDiff(CloseDiffParams),

    /// Update this session's display name.
    SetSessionName(SetSessionNameParams),

    /// Fetch current diagnostics, optionally scoped to one document.
    GetDiagnostics(GetDiagnosticsParams),

    /// Fetch the current text selection.
    GetSelection,

    /// Fetch host environment info (editor name, version, pid).
    GetHostInfo,
}

impl ToolCall {
    /// Whether this call is the session-initialization call.
    pub fn is_initialize(&self) -> bool {
        matches!(self, Self::Initialize(_))
    }

    /// Wire name of the method, for log lines.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::OpenDiff(_) => "open_diff",
            Self::CloseDiff(_) => "close_diff",
            Self::SetSessionName(_) => "set_session_name",
            Self::GetDiagnostics(_) => "get_diagnostics",
            Self::GetSelection => "get_selection",
            Self::GetHostInfo => "get_host_info",
        }
    }
}

/// Protocol-level error classes surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Missing or incorrect shared secret.
    Unauthorized,

    /// Malformed envelope, unknown method, or a session-scoped call
    /// without a known session.
    BadRequest,

    /// Duplicate session initialization.
    Conflict,

    /// Handler failure (tool-surface registration, unreadable file).
    Internal,
}

/// Structured error carried inside a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

impl WireError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Server-initiated push notifications.
///
/// Exactly the two change feeds the host produces; each carries the
/// changed resource identifiers and a structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum PushNotification {
    SelectionChanged(SelectionPayload),
    DiagnosticsChanged(DiagnosticsPayload),
}

/// One outbound line from the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a tool call.
    Response {
        /// Request id being answered.
        id: u64,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },

    /// Server-initiated notification.
    Notification {
        #[serde(flatten)]
        notification: PushNotification,
    },
}

impl ServerMessage {
    /// Creates a success response.
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self::Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    pub fn error(id: u64, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Response {
            id,
            result: None,
            error: Some(WireError::new(code, message)),
        }
    }

    /// Wraps a push notification.
    pub fn notification(notification: PushNotification) -> Self {
        Self::Notification { notification }
    }
}

/// Errors raised while decoding an inbound line.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("request line is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request line exceeds {max} bytes (got {size})")]
    TooLarge { size: usize, max: usize },
}

/// Maximum accepted request line length (1 MiB).
pub const MAX_REQUEST_BYTES: usize = 1_048_576;

/// Decodes one request line, enforcing the size bound before parsing.
pub fn parse_request(line: &str) -> Result<RequestEnvelope, ParseError> {
    if line.len() > MAX_REQUEST_BYTES {
        return Err(ParseError::TooLarge {
            size: line.len(),
            max: MAX_REQUEST_BYTES,
        });
    }
    Ok(serde_json::from_str(line)?)
}
