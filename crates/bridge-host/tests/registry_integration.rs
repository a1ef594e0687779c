//! Integration tests for the session registry actor.
//!
//! Drive the spawned actor through its public handle: registration
//! lifecycles, display names, and terminal resolution via the
//! process-lineage walk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bridge_core::{
    ProcessIdentity, SessionId, TerminalId, TerminalRef, DEFAULT_SESSION_LABEL,
};
use bridge_host::host::{EditorHost, HostError};
use bridge_host::lineage::ProcessInspector;
use bridge_host::registry::{spawn_registry, SessionEvent};
use bridge_protocol::{DiagnosticsPayload, HostInfo, SelectionPayload};

// ============================================================================
// Test Helpers
// ============================================================================

/// Host double exposing a mutable terminal list.
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
            name: "test".to_string(),
            version: "0".to_string(),
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

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn lifecycle_events_are_published() {
    let host = Arc::new(TerminalHost::default());
    let registry = spawn_registry(host, Arc::new(ChainInspector::new(&[])));
    let mut events = registry.subscribe();

    let registration = registry
        .register(SessionId::new("s1"), ProcessIdentity::default())
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        SessionEvent::Connected { session_id } => assert_eq!(session_id.as_str(), "s1"),
        other => panic!("expected connect event, got {other:?}"),
    }

    registration.revoke().await;

    match events.recv().await.unwrap() {
        SessionEvent::Disconnected { session_id } => assert_eq!(session_id.as_str(), "s1"),
        other => panic!("expected disconnect event, got {other:?}"),
    }

    assert!(registry.session(SessionId::new("s1")).await.is_none());
}

#[tokio::test]
async fn stale_handle_cannot_revoke_replacement() {
    let host = Arc::new(TerminalHost::default());
    let registry = spawn_registry(host, Arc::new(ChainInspector::new(&[])));

    let first = registry
        .register(SessionId::new("s1"), ProcessIdentity::default())
        .await
        .unwrap();
    let _second = registry
        .register(SessionId::new("s1"), ProcessIdentity::new(Some(99), None))
        .await
        .unwrap();

    first.revoke().await;

    // The replacement registration is still there.
    let record = registry.session(SessionId::new("s1")).await.unwrap();
    assert_eq!(record.identity.pid, Some(99));
}

#[tokio::test]
async fn display_name_round_trip_with_fallback() {
    let host = Arc::new(TerminalHost::default());
    let registry = spawn_registry(host, Arc::new(ChainInspector::new(&[])));

    let _registration = registry
        .register(SessionId::new("s1"), ProcessIdentity::default())
        .await
        .unwrap();

    assert_eq!(
        registry.display_name(SessionId::new("s1")).await,
        DEFAULT_SESSION_LABEL
    );

    registry
        .set_display_name(SessionId::new("s1"), "fixer".to_string())
        .await;
    assert_eq!(registry.display_name(SessionId::new("s1")).await, "fixer");

    // Unknown ids also fall back, never leaking raw identifiers.
    assert_eq!(
        registry.display_name(SessionId::new("ghost")).await,
        DEFAULT_SESSION_LABEL
    );
}

#[tokio::test]
async fn resolve_walks_lineage_then_hits_cache() {
    // No open terminal owns ppid 5678, but its parent 9999 owns one.
    let host = Arc::new(TerminalHost::with_terminals(vec![TerminalRef::new(
        "term-9999",
        Some(9999),
        "bash",
    )]));
    let inspector = Arc::new(ChainInspector::new(&[(5678, 9999)]));
    let registry = spawn_registry(host, Arc::clone(&inspector) as _);

    let _registration = registry
        .register(
            SessionId::new("s1"),
            ProcessIdentity::new(Some(1234), Some(5678)),
        )
        .await
        .unwrap();

    let terminal = registry
        .resolve_terminal(SessionId::new("s1"))
        .await
        .expect("terminal resolves via ancestor walk");
    assert_eq!(terminal.id.as_str(), "term-9999");
    assert_eq!(inspector.query_count(), 1);

    // Second resolution is served from the ancestor cache.
    let terminal = registry
        .resolve_terminal(SessionId::new("s1"))
        .await
        .expect("terminal still resolves");
    assert_eq!(terminal.id.as_str(), "term-9999");
    assert_eq!(inspector.query_count(), 1);
}

#[tokio::test]
async fn direct_terminal_wins_and_clears_on_close() {
    let host = Arc::new(TerminalHost::with_terminals(vec![TerminalRef::new(
        "term-lineage",
        Some(5678),
        "zsh",
    )]));
    let inspector = Arc::new(ChainInspector::new(&[]));
    let registry = spawn_registry(host, Arc::clone(&inspector) as _);

    let _registration = registry
        .register(
            SessionId::new("s1"),
            ProcessIdentity::new(Some(1234), Some(5678)),
        )
        .await
        .unwrap();

    registry
        .set_terminal(
            SessionId::new("s1"),
            TerminalRef::new("term-direct", None, "direct"),
        )
        .await;

    let terminal = registry.resolve_terminal(SessionId::new("s1")).await.unwrap();
    assert_eq!(terminal.id.as_str(), "term-direct");

    // Closing the directly-associated terminal falls back to lineage.
    registry.terminal_closed(TerminalId::new("term-direct")).await;
    let terminal = registry.resolve_terminal(SessionId::new("s1")).await.unwrap();
    assert_eq!(terminal.id.as_str(), "term-lineage");
}

#[tokio::test]
async fn revoking_discards_ancestor_cache() {
    let host = Arc::new(TerminalHost::default());
    let inspector = Arc::new(ChainInspector::new(&[(5678, 9999)]));
    let registry = spawn_registry(host, Arc::clone(&inspector) as _);

    let registration = registry
        .register(SessionId::new("s1"), ProcessIdentity::new(None, Some(5678)))
        .await
        .unwrap();

    // Unresolvable, but the walk populated the cache.
    assert!(registry.resolve_terminal(SessionId::new("s1")).await.is_none());
    let after_first = inspector.query_count();
    assert!(after_first >= 1);

    registration.revoke().await;

    // A fresh registration starts with an empty cache and walks again.
    let _registration = registry
        .register(SessionId::new("s1"), ProcessIdentity::new(None, Some(5678)))
        .await
        .unwrap();
    assert!(registry.resolve_terminal(SessionId::new("s1")).await.is_none());
    assert!(inspector.query_count() > after_first);
}

#[tokio::test]
async fn resolving_unknown_session_returns_none() {
    let host = Arc::new(TerminalHost::default());
    let registry = spawn_registry(host, Arc::new(ChainInspector::new(&[])));

    assert!(registry.resolve_terminal(SessionId::new("ghost")).await.is_none());
}
