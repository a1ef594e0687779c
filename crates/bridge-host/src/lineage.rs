//! Parent-pid lookups behind a testable trait.
//!
//! The resolver is a pure, stateless query: one pid in, its parent pid
//! out. Every failure mode - process gone, permission denied, platform
//! oddity - collapses to `None`. Caching of discovered ancestors is
//! owned by the session registry, not by this module.

use sysinfo::{Pid, ProcessesToUpdate, System};

/// One parent-pid query against the OS.
pub trait ProcessInspector: Send + Sync + 'static {
    /// Returns the parent pid of `pid`, or `None` if the process does
    /// not exist or the query fails.
    fn parent_pid(&self, pid: u32) -> Option<u32>;
}

/// Production inspector backed by the `sysinfo` crate.
///
/// Refreshes exactly the queried process, so each call is a single
/// bounded OS probe rather than a full process-table scan.
pub struct SysinfoInspector;

impl ProcessInspector for SysinfoInspector {
    fn parent_pid(&self, pid: u32) -> Option<u32> {
        let target = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        system.process(target)?.parent().map(|p| p.as_u32())
    }
}
