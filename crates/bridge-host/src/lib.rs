//! Editor-embedded bridge server for command-line agents.
//!
//! This crate provides the infrastructure an editor embeds to talk to
//! external agent processes:
//! - `server` - Unix socket listener, per-session transports, auth gate
//! - `registry` - session registry actor with terminal resolution
//! - `lineage` - parent-pid queries behind a testable trait
//! - `diff` - in-flight diff-review registry with exactly-once resolution
//! - `review` - the diff-review flow and its UI trigger sites
//! - `debounce` - burst coalescer feeding the broadcast primitive
//! - `host` - the traits the embedding editor implements
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────────────────┐
//! │   BridgeServer   │─────▶│      RegistryActor       │
//! │  (Unix socket)   │      │  (session state owner)   │
//! └────────┬─────────┘      └────────────┬─────────────┘
//!          │ connections                 │ terminal lookups
//!          ▼                             ▼
//! ┌──────────────────┐      ┌──────────────────────────┐
//! │ConnectionHandler │      │ EditorHost / Inspector   │
//! │  (per agent)     │      │ (embedding editor)       │
//! └────────┬─────────┘      └──────────────────────────┘
//!          │ open_diff
//!          ▼
//! ┌──────────────────┐
//! │ DiffStateManager │◀──── UI triggers (accept/reject/dismiss)
//! └──────────────────┘
//! ```

pub mod debounce;
pub mod diff;
pub mod host;
pub mod lineage;
pub mod registry;
pub mod review;
pub mod server;
