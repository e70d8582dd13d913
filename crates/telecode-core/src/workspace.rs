//! Workspace definition: one isolated tenant

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::runner::DEFAULT_TURN_TIMEOUT;
use crate::types::ChatId;

pub const DEFAULT_BACKEND: &str = "claude";

/// Immutable per-workspace configuration
#[derive(Clone)]
pub struct Workspace {
    pub name: String,
    pub working_dir: PathBuf,
    pub bot_token: String,
    pub allowed_chats: HashSet<ChatId>,
    pub default_backend: String,
    pub default_model: Option<String>,
    pub command_timeout: Duration,
}

impl Workspace {
    pub fn new(
        name: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        bot_token: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            working_dir: working_dir.into(),
            bot_token: bot_token.into(),
            allowed_chats: HashSet::new(),
            default_backend: DEFAULT_BACKEND.to_string(),
            default_model: None,
            command_timeout: DEFAULT_TURN_TIMEOUT,
        }
    }

    pub fn with_allowed_chats(mut self, chats: impl IntoIterator<Item = ChatId>) -> Self {
        self.allowed_chats = chats.into_iter().collect();
        self
    }

    pub fn with_default_backend(mut self, backend: impl Into<String>) -> Self {
        self.default_backend = backend.into();
        self
    }

    pub fn with_default_model(mut self, model: Option<String>) -> Self {
        self.default_model = model;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Only chats on the allow-list may talk to the workspace
    pub fn is_allowed(&self, chat_id: ChatId) -> bool {
        self.allowed_chats.contains(&chat_id)
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("name", &self.name)
            .field("working_dir", &self.working_dir)
            .field("bot_token", &mask_secret(&self.bot_token))
            .field("allowed_chats", &self.allowed_chats)
            .field("default_backend", &self.default_backend)
            .field("default_model", &self.default_model)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

/// Mask a secret for Debug output and logs: first 3 and last 4 chars of long
/// values, "***" otherwise. Slices on char boundaries.
pub fn mask_secret(secret: &str) -> String {
    const HEAD: usize = 3;
    const TAIL: usize = 4;

    match secret.chars().count() {
        0 => "(empty)".to_string(),
        len if len <= HEAD + TAIL => "***".to_string(),
        len => {
            let head: String = secret.chars().take(HEAD).collect();
            let tail: String = secret.chars().skip(len - TAIL).collect();
            format!("{}...{}", head, tail)
        }
    }
}
