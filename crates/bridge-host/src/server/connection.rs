//! Connection handler for individual agent connections.
//!
//! Each accepted connection gets its own handler that authenticates
//! every request, services the session-initialization handshake, and
//! dispatches tool calls. Handler failures become protocol-level error
//! responses; nothing a client sends can take the listener down.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader, BufWriter};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use bridge_core::{ProcessIdentity, SessionId};
use bridge_protocol::{
    parse_request, ErrorCode, InitializeParams, InitializeResult, RequestEnvelope, ServerMessage,
    ToolCall,
};

use super::{write_line, ServerShared, SessionTransport, SharedWriter};
use crate::registry::RegistrationHandle;
use crate::review::{close_review_by_name, open_review, OpenReviewError};

/// Handles one agent connection from accept to disconnect.
pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: SharedWriter,
    shared: Arc<ServerShared>,

    /// Session this connection initialized, once it has.
    session_id: Option<SessionId>,

    /// Registry registration owned by this connection.
    registration: Option<RegistrationHandle>,

    connection_number: u64,
}

impl ConnectionHandler {
    pub(crate) fn new(stream: UnixStream, shared: Arc<ServerShared>, connection_number: u64) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            shared,
            session_id: None,
            registration: None,
            connection_number,
        }
    }

    /// Runs the request loop, then tears the session down on exit.
    pub async fn run(mut self) {
        debug!(connection = self.connection_number, "agent connected");

        if let Err(e) = self.process().await {
            debug!(
                connection = self.connection_number,
                session_id = ?self.session_id,
                error = %e,
                "connection closed"
            );
        }

        self.disconnect().await;
    }

    async fn process(&mut self) -> std::io::Result<()> {
        loop {
            let mut line = String::new();
            let bytes_read = tokio::select! {
                _ = self.shared.cancel.cancelled() => return Ok(()),
                result = self.reader.read_line(&mut line) => result?,
            };
            if bytes_read == 0 {
                return Ok(());
            }

            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            let request = match parse_request(line) {
                Ok(request) => request,
                Err(e) => {
                    warn!(
                        connection = self.connection_number,
                        error = %e,
                        "malformed request line"
                    );
                    // No usable request id on a line that never parsed.
                    self.respond(ServerMessage::error(0, ErrorCode::BadRequest, e.to_string()))
                        .await?;
                    continue;
                }
            };

            self.handle_request(request).await?;
        }
    }

    async fn handle_request(&mut self, request: RequestEnvelope) -> std::io::Result<()> {
        let RequestEnvelope {
            secret,
            id,
            session_id,
            pid,
            ppid,
            call,
        } = request;

        // Authentication gate: nothing below runs without the shared
        // secret, and a failed check mutates no session state.
        if secret != self.shared.secret {
            warn!(
                connection = self.connection_number,
                method = call.method_name(),
                "request with missing or incorrect secret rejected"
            );
            return self
                .respond(ServerMessage::error(
                    id,
                    ErrorCode::Unauthorized,
                    "missing or incorrect secret",
                ))
                .await;
        }

        if let ToolCall::Initialize(params) = call {
            return self
                .handle_initialize(id, session_id, ProcessIdentity::new(pid, ppid), params)
                .await;
        }

        let Some(session_id) = session_id else {
            return self
                .respond(ServerMessage::error(
                    id,
                    ErrorCode::BadRequest,
                    "missing session id",
                ))
                .await;
        };

        if !self
            .shared
            .transports
            .read()
            .await
            .contains_key(&session_id)
        {
            return self
                .respond(ServerMessage::error(
                    id,
                    ErrorCode::BadRequest,
                    format!("unknown session {session_id}"),
                ))
                .await;
        }

        self.dispatch_tool(id, session_id, call).await
    }

    /// Services the session-initialization handshake.
    ///
    /// Order matters: the per-session transport is reserved first (the
    /// duplicate-id conflict check), then the host registers the tool
    /// surface, then the registry is informed. A failure at any step
    /// unwinds the reservation and leaves no session behind.
    async fn handle_initialize(
        &mut self,
        request_id: u64,
        session_id: Option<SessionId>,
        identity: ProcessIdentity,
        params: InitializeParams,
    ) -> std::io::Result<()> {
        let Some(session_id) = session_id else {
            return self
                .respond(ServerMessage::error(
                    request_id,
                    ErrorCode::BadRequest,
                    "initialize requires a session id",
                ))
                .await;
        };

        if self.session_id.is_some() {
            return self
                .respond(ServerMessage::error(
                    request_id,
                    ErrorCode::Conflict,
                    "connection already owns a session",
                ))
                .await;
        }

        let duplicate = {
            let mut transports = self.shared.transports.write().await;
            if transports.contains_key(&session_id) {
                true
            } else {
                transports.insert(
                    session_id.clone(),
                    SessionTransport {
                        writer: Arc::clone(&self.writer),
                    },
                );
                false
            }
        };
        if duplicate {
            warn!(session_id = %session_id, "duplicate session initialization rejected");
            return self
                .respond(ServerMessage::error(
                    request_id,
                    ErrorCode::Conflict,
                    format!("session {session_id} already initialized"),
                ))
                .await;
        }

        if let Err(e) = self.shared.host.on_session_initialized(&session_id) {
            self.shared.transports.write().await.remove(&session_id);
            warn!(session_id = %session_id, error = %e, "tool surface registration failed");
            return self
                .respond(ServerMessage::error(
                    request_id,
                    ErrorCode::Internal,
                    e.to_string(),
                ))
                .await;
        }

        let registration = match self
            .shared
            .registry
            .register(session_id.clone(), identity)
            .await
        {
            Ok(registration) => registration,
            Err(e) => {
                self.shared.transports.write().await.remove(&session_id);
                return self
                    .respond(ServerMessage::error(
                        request_id,
                        ErrorCode::Internal,
                        e.to_string(),
                    ))
                    .await;
            }
        };

        if let Some(name) = params.display_name {
            self.shared
                .registry
                .set_display_name(session_id.clone(), name)
                .await;
        }

        let display_name = self.shared.registry.display_name(session_id.clone()).await;

        self.session_id = Some(session_id.clone());
        self.registration = Some(registration);

        info!(
            session_id = %session_id,
            connection = self.connection_number,
            pid = ?identity.pid,
            ppid = ?identity.ppid,
            "agent session initialized"
        );

        self.respond_ok(
            request_id,
            &InitializeResult {
                session_id,
                display_name,
            },
        )
        .await
    }

    async fn dispatch_tool(
        &mut self,
        request_id: u64,
        session_id: SessionId,
        call: ToolCall,
    ) -> std::io::Result<()> {
        debug!(
            session_id = %session_id,
            method = call.method_name(),
            "tool call"
        );

        match call {
            // Routed to handle_initialize before dispatch; reaching
            // this arm means the session already exists.
            ToolCall::Initialize(_) => {
                self.respond(ServerMessage::error(
                    request_id,
                    ErrorCode::Conflict,
                    format!("session {session_id} already initialized"),
                ))
                .await
            }

            ToolCall::OpenDiff(params) => {
                match open_review(
                    &self.shared.host,
                    &self.shared.diffs,
                    Some(session_id),
                    params,
                ) {
                    Ok(verdict_rx) => {
                        // The verdict may be minutes away; answer from
                        // a separate task so this connection keeps
                        // processing calls in the meantime.
                        let writer = Arc::clone(&self.writer);
                        tokio::spawn(async move {
                            match verdict_rx.await {
                                Ok(verdict) => {
                                    let msg = match serde_json::to_value(&verdict) {
                                        Ok(value) => ServerMessage::ok(request_id, value),
                                        Err(e) => ServerMessage::error(
                                            request_id,
                                            ErrorCode::Internal,
                                            e.to_string(),
                                        ),
                                    };
                                    send_from_task(&writer, msg).await;
                                }
                                Err(_) => {
                                    // Review abandoned: the tab was
                                    // closed without a verdict. The
                                    // call deliberately stays pending.
                                    debug!(
                                        request_id,
                                        "diff review abandoned, leaving call unanswered"
                                    );
                                }
                            }
                        });
                        Ok(())
                    }
                    Err(e @ OpenReviewError::UnreadableOriginal { .. }) => {
                        self.respond(ServerMessage::error(
                            request_id,
                            ErrorCode::Internal,
                            e.to_string(),
                        ))
                        .await
                    }
                }
            }

            ToolCall::CloseDiff(params) => {
                let result = close_review_by_name(&self.shared.diffs, &params.tab_name);
                self.respond_ok(request_id, &result).await
            }

            ToolCall::SetSessionName(params) => {
                self.shared
                    .registry
                    .set_display_name(session_id.clone(), params.name)
                    .await;
                let display_name = self.shared.registry.display_name(session_id).await;
                self.respond_ok(request_id, &serde_json::json!({ "display_name": display_name }))
                    .await
            }

            ToolCall::GetDiagnostics(params) => {
                let diagnostics = self.shared.host.current_diagnostics(params.uri.as_deref());
                self.respond_ok(request_id, &diagnostics).await
            }

            ToolCall::GetSelection => {
                let selection = self.shared.host.current_selection();
                self.respond_ok(request_id, &selection).await
            }

            ToolCall::GetHostInfo => {
                let info = self.shared.host.host_info();
                self.respond_ok(request_id, &info).await
            }
        }
    }

    async fn respond_ok<T: Serialize>(&self, request_id: u64, value: &T) -> std::io::Result<()> {
        let msg = match serde_json::to_value(value) {
            Ok(value) => ServerMessage::ok(request_id, value),
            Err(e) => {
                error!(request_id, error = %e, "failed to serialize tool result");
                ServerMessage::error(request_id, ErrorCode::Internal, e.to_string())
            }
        };
        self.respond(msg).await
    }

    async fn respond(&self, msg: ServerMessage) -> std::io::Result<()> {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failed to serialize response");
                return Ok(());
            }
        };
        write_line(&self.writer, &json).await
    }

    /// Tears down whatever this connection owned: open reviews resolve
    /// as rejected, the transport entry goes away, and the registry
    /// registration is revoked. Safe when the connection never
    /// initialized a session.
    async fn disconnect(&mut self) {
        let Some(session_id) = self.session_id.take() else {
            debug!(
                connection = self.connection_number,
                "connection closed before initialization"
            );
            return;
        };

        self.shared.diffs.close_all_for_session(&session_id);
        self.shared.transports.write().await.remove(&session_id);

        if let Some(registration) = self.registration.take() {
            registration.revoke().await;
        }

        info!(session_id = %session_id, "agent session disconnected");
    }
}

/// Sends one message from a detached task, where there is no caller
/// left to surface errors to.
async fn send_from_task(writer: &SharedWriter, msg: ServerMessage) {
    let json = match serde_json::to_string(&msg) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "failed to serialize response");
            return;
        }
    };
    if let Err(e) = write_line(writer, &json).await {
        debug!(error = %e, "failed to deliver deferred response");
    }
}
