//! Wire protocol for the agent-bridge local RPC server.
//!
//! Newline-delimited JSON in both directions. Clients send
//! [`RequestEnvelope`] lines carrying the shared secret, session
//! metadata, and one tool call; the server answers with
//! [`ServerMessage::Response`] lines matched by request id and pushes
//! [`ServerMessage`] notification lines at any time.

pub mod envelope;
pub mod payload;

pub use envelope::{
    parse_request, ErrorCode, ParseError, PushNotification, RequestEnvelope, ServerMessage,
    ToolCall, WireError,
};
pub use payload::{
    CloseDiffParams, CloseDiffResult, Diagnostic, DiagnosticSeverity, DiagnosticsPayload,
    GetDiagnosticsParams, HostInfo, InitializeParams, InitializeResult, OpenDiffParams, Position,
    Range, SelectionPayload, SetSessionNameParams,
};
