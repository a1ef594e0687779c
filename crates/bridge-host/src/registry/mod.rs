//! Session registry using the actor pattern.
//!
//! The registry is the single source of truth for "which sessions are
//! currently connected" plus the best-effort mapping from a session to
//! the terminal that spawned it. It receives commands over an mpsc
//! channel, mutates its maps from that one task, and publishes
//! connect/disconnect events on a broadcast channel.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::host::EditorHost;
use crate::lineage::ProcessInspector;

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, MAX_ANCESTOR_HOPS};
pub use commands::{RegistryCommand, RegistryError, SessionEvent};
pub use handle::{RegistrationHandle, RegistryHandle};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawns the registry actor and returns a handle for interaction.
pub fn spawn_registry(
    host: Arc<dyn EditorHost>,
    inspector: Arc<dyn ProcessInspector>,
) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), host, inspector);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
