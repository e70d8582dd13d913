//! Per-chat backend/model settings and session continuity

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, TelecodeError};
use crate::executors::{BinaryLocator, CommandRequest, Executor, ExecutorRegistry, PathLocator};
use crate::session::SessionStore;
use crate::types::ChatId;

/// Per-chat overrides. `None` inherits the workspace defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    pub backend: Option<String>,
    pub model: Option<String>,
}

/// Snapshot reported by `/status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatStatus {
    pub backend: String,
    pub session: Option<String>,
    pub model: Option<String>,
}

impl std::fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CLI: {}\nSession: {}\nModel: {}",
            self.backend,
            self.session.as_deref().unwrap_or("none"),
            self.model.as_deref().unwrap_or("default")
        )
    }
}

/// Owns the chat settings and session maps of one workspace
pub struct ChatSessionController {
    default_backend: String,
    default_model: Option<String>,
    settings: RwLock<HashMap<ChatId, ChatSettings>>,
    sessions: SessionStore,
    executors: Arc<ExecutorRegistry>,
    locator: Arc<dyn BinaryLocator>,
    turn_locks: DashMap<ChatId, Arc<Mutex<()>>>,
}

impl ChatSessionController {
    pub fn new(default_backend: impl Into<String>, executors: Arc<ExecutorRegistry>) -> Self {
        Self {
            default_backend: default_backend.into(),
            default_model: None,
            settings: RwLock::new(HashMap::new()),
            sessions: SessionStore::new(),
            executors,
            locator: Arc::new(PathLocator),
            turn_locks: DashMap::new(),
        }
    }

    /// Workspace-wide model used when a chat hasn't picked one
    pub fn with_default_model(mut self, model: Option<String>) -> Self {
        self.default_model = model.filter(|m| !m.is_empty());
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn BinaryLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    pub fn executor(&self, name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(name)
    }

    /// Backend a chat runs with: its override, else the workspace default
    pub async fn backend(&self, chat_id: ChatId) -> String {
        self.settings
            .read()
            .await
            .get(&chat_id)
            .and_then(|s| s.backend.clone())
            .unwrap_or_else(|| self.default_backend.clone())
    }

    /// Switch a chat to another backend. The session is always cleared since
    /// continuation tokens only mean something to the backend that issued them.
    pub async fn set_backend(&self, chat_id: ChatId, name: &str) -> Result<()> {
        let executor = self.executors.get(name).ok_or_else(|| {
            warn!("Chat {} asked for unknown CLI {}", chat_id, name);
            TelecodeError::UnknownBackend {
                backend: name.to_string(),
            }
        })?;

        if self.locator.locate(executor.binary()).is_none() {
            warn!("Chat {} asked for {} but it is not installed", chat_id, name);
            return Err(TelecodeError::BackendNotInstalled {
                backend: name.to_string(),
            });
        }

        {
            let mut settings = self.settings.write().await;
            settings.entry(chat_id).or_default().backend = Some(name.to_string());
        }
        self.sessions.delete(chat_id).await;
        info!("Chat {} switched to {}", chat_id, name);
        Ok(())
    }

    /// Model a chat runs with: its override, else the workspace default
    pub async fn model(&self, chat_id: ChatId) -> Option<String> {
        self.settings
            .read()
            .await
            .get(&chat_id)
            .and_then(|s| s.model.clone())
            .or_else(|| self.default_model.clone())
    }

    /// Set (or with `None`/empty, reset) the chat's model
    pub async fn set_model(&self, chat_id: ChatId, model: Option<&str>) {
        let model = model.map(str::trim).filter(|m| !m.is_empty());
        let mut settings = self.settings.write().await;
        settings.entry(chat_id).or_default().model = model.map(str::to_string);
        debug!("Chat {} model set to {:?}", chat_id, model);
    }

    pub async fn settings(&self, chat_id: ChatId) -> ChatSettings {
        self.settings
            .read()
            .await
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn session_id(&self, chat_id: ChatId) -> Option<String> {
        self.sessions.get(chat_id).await
    }

    /// Drop the continuation; settings are untouched
    pub async fn new_session(&self, chat_id: ChatId) {
        self.sessions.delete(chat_id).await;
        info!("Chat {} started a new session", chat_id);
    }

    /// Record the session id found in `output`, unless the chat already has one.
    /// Returns whether a token was stored.
    pub async fn update_session_from_output(
        &self,
        chat_id: ChatId,
        backend: &str,
        output: &str,
    ) -> bool {
        if self.sessions.exists(chat_id).await {
            return false;
        }

        let Some(executor) = self.executors.get(backend) else {
            return false;
        };

        match executor.parse_session_id(output) {
            Some(token) if !token.is_empty() => {
                let stored = self.sessions.set_if_absent(chat_id, token).await;
                if stored {
                    info!("Chat {} now continues a {} session", chat_id, backend);
                }
                stored
            }
            _ => {
                debug!("No {} session id in output for chat {}", backend, chat_id);
                false
            }
        }
    }

    /// Resolve backend, session and model for a chat and build its argv
    pub async fn build_command(
        &self,
        chat_id: ChatId,
        prompt: &str,
        image_path: Option<&Path>,
    ) -> Result<Vec<String>> {
        let backend = self.backend(chat_id).await;
        let executor = self
            .executors
            .get(&backend)
            .ok_or(TelecodeError::UnknownBackend { backend })?;

        let session_id = self.session_id(chat_id).await;
        let model = self.model(chat_id).await;

        let request = CommandRequest::new(prompt)
            .with_session(session_id.as_deref())
            .with_model(model.as_deref())
            .with_image(image_path);

        Ok(executor.build_command(&request))
    }

    pub async fn list_models(&self, chat_id: ChatId) -> Result<Vec<String>> {
        let executor = self.active_executor(chat_id).await?;
        Ok(executor.list_models().await)
    }

    pub async fn stats(&self, chat_id: ChatId) -> Result<String> {
        let executor = self.active_executor(chat_id).await?;
        executor.stats().await
    }

    pub async fn status(&self, chat_id: ChatId) -> ChatStatus {
        ChatStatus {
            backend: self.backend(chat_id).await,
            session: self.session_id(chat_id).await,
            model: self.model(chat_id).await,
        }
    }

    /// Lock held for the duration of an assistant turn so two turns of the same
    /// chat never race on the session token
    pub fn turn_lock(&self, chat_id: ChatId) -> Arc<Mutex<()>> {
        self.turn_locks
            .entry(chat_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn active_executor(&self, chat_id: ChatId) -> Result<Arc<dyn Executor>> {
        let backend = self.backend(chat_id).await;
        self.executors
            .get(&backend)
            .ok_or(TelecodeError::UnknownBackend { backend })
    }
}
