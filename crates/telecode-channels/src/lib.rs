//! Chat transports and workspace loops for telecode
//!
//! This crate provides the transport seam, the Telegram Bot API adapter and
//! the dispatcher that runs one processing loop per workspace.

pub mod bus;
pub mod dispatcher;
pub mod telegram;

// Re-export main types
pub use bus::MessageChannel;
pub use dispatcher::{WorkspaceDispatcher, WorkspaceRuntime, run_workspace};
pub use telegram::TelegramChannel;
