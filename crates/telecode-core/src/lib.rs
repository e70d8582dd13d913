//! telecode-core - Sessions and CLI assistants behind a chat workspace
//!
//! This crate provides:
//! - Executors that build argv for the `claude` and `opencode` CLIs and read
//!   session ids back out of their output
//! - A timed subprocess runner with terminal-sequence sanitizing
//! - Per-chat backend/model settings and session continuity
//! - Command routing and the per-workspace message handler

pub mod controller;
pub mod error;
pub mod executors;
pub mod handler;
pub mod router;
pub mod runner;
pub mod sanitize;
pub mod session;
pub mod types;
pub mod workspace;

// Re-export main types for convenience
pub use controller::{ChatSessionController, ChatSettings, ChatStatus};
pub use error::{Result, TelecodeError};
pub use executors::{
    BinaryLocator, ClaudeExecutor, CommandRequest, Executor, ExecutorRegistry, OpenCodeExecutor,
    PathLocator,
};
pub use handler::{TurnReport, WorkspaceHandler};
pub use router::ChatCommand;
pub use runner::{CommandOutcome, CommandRunner, ProcessRunner};
pub use sanitize::strip_terminal_sequences;
pub use session::SessionStore;
pub use types::{ChatId, ImageAttachment, IncomingMessage, MessageKind, OutgoingMessage};
pub use workspace::{Workspace, mask_secret};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _ = std::mem::size_of::<ChatSessionController>();
        let _ = std::mem::size_of::<ExecutorRegistry>();
        let _ = std::mem::size_of::<WorkspaceHandler>();
        let _ = std::mem::size_of::<IncomingMessage>();
        let _ = std::mem::size_of::<OutgoingMessage>();
    }
}
