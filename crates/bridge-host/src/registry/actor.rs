//! Registry actor - owns all session state and processes commands.
//!
//! The actor is the single owner of the session map and every
//! per-session ancestor-pid cache. It processes commands sequentially
//! from one task, so registration, lookup, and disposal can interleave
//! across concurrent inbound calls and UI callbacks without locking.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use bridge_core::{
    ProcessIdentity, SessionId, SessionRecord, TerminalId, TerminalRef, DEFAULT_SESSION_LABEL,
};

use super::commands::{RegistryCommand, SessionEvent};
use crate::host::EditorHost;
use crate::lineage::ProcessInspector;

/// Maximum generations walked above a session's reported parent pid.
///
/// Acts as the walk's cancellation-by-budget: at most this many
/// parent-pid queries per session lifetime, since every discovered
/// ancestor is cached.
pub const MAX_ANCESTOR_HOPS: usize = 4;

/// One registered session plus its resolution state.
struct SessionEntry {
    record: SessionRecord,

    /// Which registration this is. Deregistration carries the
    /// generation it was issued for; a mismatch means the handle was
    /// superseded and must not touch this entry.
    generation: u64,

    /// Explicitly assigned terminal. Wins over lineage resolution.
    terminal: Option<TerminalRef>,

    /// Ancestor pids discovered by previous walks, oldest first.
    /// Grows monotonically up to [`MAX_ANCESTOR_HOPS`]; discarded with
    /// the entry.
    ancestor_pids: Vec<u32>,
}

/// The registry actor - owns all session state.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    sessions: HashMap<SessionId, SessionEntry>,
    next_generation: u64,
    event_publisher: broadcast::Sender<SessionEvent>,
    host: Arc<dyn EditorHost>,
    inspector: Arc<dyn ProcessInspector>,
}

impl RegistryActor {
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<SessionEvent>,
        host: Arc<dyn EditorHost>,
        inspector: Arc<dyn ProcessInspector>,
    ) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            next_generation: 0,
            event_publisher,
            host,
            inspector,
        }
    }

    /// Runs the actor event loop until all senders are dropped.
    pub async fn run(mut self) {
        debug!("registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        debug!(sessions = self.sessions.len(), "registry actor stopped");
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                session_id,
                identity,
                respond_to,
            } => {
                let generation = self.handle_register(session_id, identity);
                let _ = respond_to.send(generation);
            }
            RegistryCommand::Deregister {
                session_id,
                generation,
            } => {
                self.handle_deregister(&session_id, generation);
            }
            RegistryCommand::SetDisplayName { session_id, name } => {
                if let Some(entry) = self.sessions.get_mut(&session_id) {
                    entry.record.display_name = Some(name);
                }
            }
            RegistryCommand::GetDisplayName {
                session_id,
                respond_to,
            } => {
                let label = self
                    .sessions
                    .get(&session_id)
                    .map(|entry| entry.record.label().to_string())
                    .unwrap_or_else(|| DEFAULT_SESSION_LABEL.to_string());
                let _ = respond_to.send(label);
            }
            RegistryCommand::GetSession {
                session_id,
                respond_to,
            } => {
                let record = self
                    .sessions
                    .get(&session_id)
                    .map(|entry| entry.record.clone());
                let _ = respond_to.send(record);
            }
            RegistryCommand::ListSessions { respond_to } => {
                let records = self
                    .sessions
                    .values()
                    .map(|entry| entry.record.clone())
                    .collect();
                let _ = respond_to.send(records);
            }
            RegistryCommand::SetTerminal {
                session_id,
                terminal,
            } => {
                if let Some(entry) = self.sessions.get_mut(&session_id) {
                    debug!(session_id = %session_id, terminal = %terminal.id, "direct terminal set");
                    entry.terminal = Some(terminal);
                }
            }
            RegistryCommand::TerminalClosed { terminal_id } => {
                self.handle_terminal_closed(&terminal_id);
            }
            RegistryCommand::ResolveTerminal {
                session_id,
                respond_to,
            } => {
                let terminal = self.handle_resolve_terminal(&session_id);
                let _ = respond_to.send(terminal);
            }
        }
    }

    /// Registers a session, replacing any previous registration.
    ///
    /// The replaced entry's display name, terminal association, and
    /// ancestor cache all go with it; the new entry starts clean.
    fn handle_register(&mut self, session_id: SessionId, identity: ProcessIdentity) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;

        let entry = SessionEntry {
            record: SessionRecord::new(session_id.clone(), identity),
            generation,
            terminal: None,
            ancestor_pids: Vec::new(),
        };

        if self.sessions.insert(session_id.clone(), entry).is_some() {
            info!(session_id = %session_id, "session re-registered, previous entry replaced");
            let _ = self.event_publisher.send(SessionEvent::Disconnected {
                session_id: session_id.clone(),
            });
        } else {
            info!(
                session_id = %session_id,
                pid = ?identity.pid,
                ppid = ?identity.ppid,
                total_sessions = self.sessions.len(),
                "session registered"
            );
        }

        let _ = self
            .event_publisher
            .send(SessionEvent::Connected { session_id });

        generation
    }

    /// Removes a registration if `generation` is still current.
    ///
    /// A stale generation means the handle being disposed was already
    /// superseded by a re-registration; the current entry is untouched.
    fn handle_deregister(&mut self, session_id: &SessionId, generation: u64) {
        match self.sessions.get(session_id) {
            Some(entry) if entry.generation == generation => {
                self.sessions.remove(session_id);
                info!(
                    session_id = %session_id,
                    remaining_sessions = self.sessions.len(),
                    "session deregistered"
                );
                let _ = self.event_publisher.send(SessionEvent::Disconnected {
                    session_id: session_id.clone(),
                });
            }
            Some(_) => {
                debug!(
                    session_id = %session_id,
                    generation,
                    "stale deregistration ignored"
                );
            }
            None => {
                debug!(session_id = %session_id, "deregistration for unknown session");
            }
        }
    }

    fn handle_terminal_closed(&mut self, terminal_id: &TerminalId) {
        for entry in self.sessions.values_mut() {
            if entry.terminal.as_ref().map(|t| &t.id) == Some(terminal_id) {
                debug!(
                    session_id = %entry.record.id,
                    terminal = %terminal_id,
                    "direct terminal association cleared (terminal closed)"
                );
                entry.terminal = None;
            }
        }
    }

    /// Resolves the terminal owning a session.
    ///
    /// Resolution order: direct association, exact ppid match among
    /// open terminals, then the ancestor walk - cached pids first, then
    /// at most enough new parent-pid queries to fill the cache to
    /// [`MAX_ANCESTOR_HOPS`]. The walk stops at the first query
    /// failure. Unresolvable lookups return `None`; nothing here
    /// errors.
    fn handle_resolve_terminal(&mut self, session_id: &SessionId) -> Option<TerminalRef> {
        let entry = self.sessions.get_mut(session_id)?;

        if let Some(terminal) = &entry.terminal {
            return Some(terminal.clone());
        }

        let ppid = entry.record.identity.ppid?;

        let terminals = self.host.list_terminals();
        let by_pid: HashMap<u32, &TerminalRef> = terminals
            .iter()
            .filter_map(|t| t.pid.map(|pid| (pid, t)))
            .collect();

        if let Some(terminal) = by_pid.get(&ppid) {
            return Some((*terminal).clone());
        }

        // Cached ancestors first: generations already resolved cost no
        // OS queries.
        for ancestor in &entry.ancestor_pids {
            if let Some(terminal) = by_pid.get(ancestor) {
                return Some((*terminal).clone());
            }
        }

        // Continue the walk where the cache left off.
        let mut current = entry.ancestor_pids.last().copied().unwrap_or(ppid);
        while entry.ancestor_pids.len() < MAX_ANCESTOR_HOPS {
            let Some(parent) = self.inspector.parent_pid(current) else {
                // Treated as "no further ancestors".
                debug!(
                    session_id = %session_id,
                    pid = current,
                    "parent lookup failed, stopping walk"
                );
                break;
            };

            entry.ancestor_pids.push(parent);
            if let Some(terminal) = by_pid.get(&parent) {
                debug!(
                    session_id = %session_id,
                    terminal = %terminal.id,
                    depth = entry.ancestor_pids.len(),
                    "terminal resolved via ancestor walk"
                );
                return Some((*terminal).clone());
            }
            current = parent;
        }

        None
    }

    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostError;
    use bridge_protocol::{DiagnosticsPayload, HostInfo, SelectionPayload};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Host double exposing a configurable terminal list.
    #[derive(Default)]
    struct TerminalHost {
        terminals: Mutex<Vec<TerminalRef>>,
    }

    impl TerminalHost {
        fn with_terminals(terminals: Vec<TerminalRef>) -> Self {
            Self {
                terminals: Mutex::new(terminals),
            }
        }
    }

    impl EditorHost for TerminalHost {
        fn on_session_initialized(&self, _session_id: &SessionId) -> Result<(), HostError> {
            Ok(())
        }
        fn set_virtual_content(&self, _uri: &str, _contents: &str) {}
        fn clear_virtual_content(&self, _uri: &str) {}
        fn open_diff_view(&self, _original_uri: &str, _modified_uri: &str, _title: &str) {}
        fn close_diff_view(&self, _title: &str) {}
        fn read_original(&self, _path: &str) -> std::io::Result<Option<String>> {
            Ok(None)
        }
        fn list_terminals(&self) -> Vec<TerminalRef> {
            self.terminals.lock().unwrap().clone()
        }
        fn current_selection(&self) -> Option<SelectionPayload> {
            None
        }
        fn current_diagnostics(&self, _uri: Option<&str>) -> Vec<DiagnosticsPayload> {
            Vec::new()
        }
        fn host_info(&self) -> HostInfo {
            HostInfo {
                name: "test".into(),
                version: "0".into(),
                pid: 1,
            }
        }
    }

    /// Inspector double with a fixed parent chain and a query counter.
    struct ChainInspector {
        parents: HashMap<u32, u32>,
        queries: AtomicUsize,
    }

    impl ChainInspector {
        fn new(chain: &[(u32, u32)]) -> Self {
            Self {
                parents: chain.iter().copied().collect(),
                queries: AtomicUsize::new(0),
            }
        }

        fn query_count(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    impl ProcessInspector for ChainInspector {
        fn parent_pid(&self, pid: u32) -> Option<u32> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.parents.get(&pid).copied()
        }
    }

    fn make_actor(
        host: Arc<dyn EditorHost>,
        inspector: Arc<dyn ProcessInspector>,
    ) -> (RegistryActor, broadcast::Receiver<SessionEvent>) {
        let (_cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(16);
        (
            RegistryActor::new(cmd_rx, event_tx, host, inspector),
            event_rx,
        )
    }

    fn register(actor: &mut RegistryActor, id: &str, identity: ProcessIdentity) -> u64 {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Register {
            session_id: SessionId::new(id),
            identity,
            respond_to: tx,
        });
        rx.try_recv().expect("register responds synchronously")
    }

    fn resolve(actor: &mut RegistryActor, id: &str) -> Option<TerminalRef> {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::ResolveTerminal {
            session_id: SessionId::new(id),
            respond_to: tx,
        });
        rx.try_recv().expect("resolve responds synchronously")
    }

    #[tokio::test]
    async fn register_then_deregister() {
        let host = Arc::new(TerminalHost::default());
        let inspector = Arc::new(ChainInspector::new(&[]));
        let (mut actor, mut events) = make_actor(host, inspector);

        let generation = register(&mut actor, "s1", ProcessIdentity::default());
        assert_eq!(actor.session_count(), 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Connected { .. }
        ));

        actor.handle_command(RegistryCommand::Deregister {
            session_id: SessionId::new("s1"),
            generation,
        });
        assert_eq!(actor.session_count(), 0);
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Disconnected { .. }
        ));
    }

    #[tokio::test]
    async fn stale_handle_does_not_remove_replacement() {
        let host = Arc::new(TerminalHost::default());
        let inspector = Arc::new(ChainInspector::new(&[]));
        let (mut actor, _events) = make_actor(host, inspector);

        let first = register(&mut actor, "s1", ProcessIdentity::default());
        let second = register(&mut actor, "s1", ProcessIdentity::new(Some(99), None));
        assert_ne!(first, second);
        assert_eq!(actor.session_count(), 1);

        // Disposing the superseded registration must not touch the
        // current one.
        actor.handle_command(RegistryCommand::Deregister {
            session_id: SessionId::new("s1"),
            generation: first,
        });
        assert_eq!(actor.session_count(), 1);

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::GetSession {
            session_id: SessionId::new("s1"),
            respond_to: tx,
        });
        let record = rx.try_recv().unwrap().unwrap();
        assert_eq!(record.identity.pid, Some(99));
    }

    #[tokio::test]
    async fn display_name_falls_back_for_unknown_session() {
        let host = Arc::new(TerminalHost::default());
        let inspector = Arc::new(ChainInspector::new(&[]));
        let (mut actor, _events) = make_actor(host, inspector);

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::GetDisplayName {
            session_id: SessionId::new("ghost"),
            respond_to: tx,
        });
        assert_eq!(rx.try_recv().unwrap(), DEFAULT_SESSION_LABEL);
    }

    #[tokio::test]
    async fn display_name_set_and_get() {
        let host = Arc::new(TerminalHost::default());
        let inspector = Arc::new(ChainInspector::new(&[]));
        let (mut actor, _events) = make_actor(host, inspector);

        register(&mut actor, "s1", ProcessIdentity::default());
        actor.handle_command(RegistryCommand::SetDisplayName {
            session_id: SessionId::new("s1"),
            name: "refactorer".to_string(),
        });

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::GetDisplayName {
            session_id: SessionId::new("s1"),
            respond_to: tx,
        });
        assert_eq!(rx.try_recv().unwrap(), "refactorer");
    }

    #[tokio::test]
    async fn resolve_prefers_direct_terminal() {
        let host = Arc::new(TerminalHost::with_terminals(vec![TerminalRef::new(
            "term-ppid",
            Some(5678),
            "zsh",
        )]));
        let inspector = Arc::new(ChainInspector::new(&[]));
        let (mut actor, _events) = make_actor(host, Arc::clone(&inspector) as _);

        register(&mut actor, "s1", ProcessIdentity::new(Some(1234), Some(5678)));
        actor.handle_command(RegistryCommand::SetTerminal {
            session_id: SessionId::new("s1"),
            terminal: TerminalRef::new("term-direct", None, "direct"),
        });

        let terminal = resolve(&mut actor, "s1").unwrap();
        assert_eq!(terminal.id.as_str(), "term-direct");
        assert_eq!(inspector.query_count(), 0);
    }

    #[tokio::test]
    async fn resolve_matches_ppid_without_os_queries() {
        let host = Arc::new(TerminalHost::with_terminals(vec![TerminalRef::new(
            "term-1",
            Some(5678),
            "zsh",
        )]));
        let inspector = Arc::new(ChainInspector::new(&[(5678, 1)]));
        let (mut actor, _events) = make_actor(host, Arc::clone(&inspector) as _);

        register(&mut actor, "s1", ProcessIdentity::new(Some(1234), Some(5678)));

        let terminal = resolve(&mut actor, "s1").unwrap();
        assert_eq!(terminal.id.as_str(), "term-1");
        assert_eq!(inspector.query_count(), 0);
    }

    #[tokio::test]
    async fn resolve_walks_ancestors_and_caches() {
        // No terminal owns 5678 directly, but 5678's parent 9999 owns
        // one. The first resolution walks one generation; the second
        // must hit the cache and issue zero OS queries.
        let host = Arc::new(TerminalHost::with_terminals(vec![TerminalRef::new(
            "term-9999",
            Some(9999),
            "bash",
        )]));
        let inspector = Arc::new(ChainInspector::new(&[(5678, 9999)]));
        let (mut actor, _events) = make_actor(host, Arc::clone(&inspector) as _);

        register(&mut actor, "s1", ProcessIdentity::new(Some(1234), Some(5678)));

        let terminal = resolve(&mut actor, "s1").unwrap();
        assert_eq!(terminal.id.as_str(), "term-9999");
        assert_eq!(inspector.query_count(), 1);

        let terminal = resolve(&mut actor, "s1").unwrap();
        assert_eq!(terminal.id.as_str(), "term-9999");
        assert_eq!(inspector.query_count(), 1, "second resolve must be cache-only");
    }

    #[tokio::test]
    async fn walk_is_bounded_to_four_queries() {
        // Long chain, no terminal anywhere: the walk must stop after
        // four parent lookups and never exceed the budget on retries.
        let host = Arc::new(TerminalHost::default());
        let inspector = Arc::new(ChainInspector::new(&[
            (5678, 100),
            (100, 101),
            (101, 102),
            (102, 103),
            (103, 104),
        ]));
        let (mut actor, _events) = make_actor(host, Arc::clone(&inspector) as _);

        register(&mut actor, "s1", ProcessIdentity::new(None, Some(5678)));

        assert!(resolve(&mut actor, "s1").is_none());
        assert_eq!(inspector.query_count(), MAX_ANCESTOR_HOPS);

        // The cache is full; another attempt issues nothing new.
        assert!(resolve(&mut actor, "s1").is_none());
        assert_eq!(inspector.query_count(), MAX_ANCESTOR_HOPS);
    }

    #[tokio::test]
    async fn walk_stops_on_first_query_failure() {
        let host = Arc::new(TerminalHost::default());
        // 5678 -> 100, then 100 has no known parent.
        let inspector = Arc::new(ChainInspector::new(&[(5678, 100)]));
        let (mut actor, _events) = make_actor(host, Arc::clone(&inspector) as _);

        register(&mut actor, "s1", ProcessIdentity::new(None, Some(5678)));

        assert!(resolve(&mut actor, "s1").is_none());
        assert_eq!(inspector.query_count(), 2);
    }

    #[tokio::test]
    async fn resolve_without_ppid_returns_none() {
        let host = Arc::new(TerminalHost::default());
        let inspector = Arc::new(ChainInspector::new(&[]));
        let (mut actor, _events) = make_actor(host, Arc::clone(&inspector) as _);

        register(&mut actor, "s1", ProcessIdentity::new(Some(1234), None));

        assert!(resolve(&mut actor, "s1").is_none());
        assert_eq!(inspector.query_count(), 0);
    }

    #[tokio::test]
    async fn closed_terminal_clears_direct_association() {
        let host = Arc::new(TerminalHost::default());
        let inspector = Arc::new(ChainInspector::new(&[]));
        let (mut actor, _events) = make_actor(host, inspector);

        register(&mut actor, "s1", ProcessIdentity::default());
        actor.handle_command(RegistryCommand::SetTerminal {
            session_id: SessionId::new("s1"),
            terminal: TerminalRef::new("term-x", None, "zsh"),
        });
        assert!(resolve(&mut actor, "s1").is_some());

        actor.handle_command(RegistryCommand::TerminalClosed {
            terminal_id: TerminalId::new("term-x"),
        });
        assert!(resolve(&mut actor, "s1").is_none());
    }
}
