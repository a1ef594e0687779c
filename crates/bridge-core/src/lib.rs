//! Core domain types shared between the bridge server and its wire protocol.
//!
//! This crate holds the vocabulary of the system: session identities,
//! terminal references, and the diff-review verdict model. It has no I/O
//! and no async machinery; everything here is plain data.

pub mod diff;
pub mod session;
pub mod terminal;

// Re-exports for convenience
pub use diff::{DiffId, DiffVerdict, CLIENT_DISCONNECTED_REASON};
pub use session::{ProcessIdentity, SessionId, SessionRecord, DEFAULT_SESSION_LABEL};
pub use terminal::{TerminalId, TerminalRef};
