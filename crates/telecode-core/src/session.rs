//! Session store holding one continuation token per chat

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::ChatId;

/// Tracks the opaque continuation token each chat resumes with.
///
/// Tokens are only meaningful to the backend that issued them; callers are
/// responsible for clearing a chat's token when its backend changes.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<ChatId, String>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a chat, `None` when the next turn starts fresh
    pub async fn get(&self, chat_id: ChatId) -> Option<String> {
        self.sessions.read().await.get(&chat_id).cloned()
    }

    pub async fn set(&self, chat_id: ChatId, token: impl Into<String>) {
        let token = token.into();
        debug!("Storing session {} for chat {}", token, chat_id);
        self.sessions.write().await.insert(chat_id, token);
    }

    /// Store `token` only if the chat has none yet. Returns whether it was stored.
    pub async fn set_if_absent(&self, chat_id: ChatId, token: impl Into<String>) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&chat_id) {
            return false;
        }
        let token = token.into();
        debug!("Storing session {} for chat {}", token, chat_id);
        sessions.insert(chat_id, token);
        true
    }

    pub async fn delete(&self, chat_id: ChatId) {
        if self.sessions.write().await.remove(&chat_id).is_some() {
            debug!("Cleared session for chat {}", chat_id);
        }
    }

    pub async fn exists(&self, chat_id: ChatId) -> bool {
        self.sessions.read().await.contains_key(&chat_id)
    }

    /// Number of chats holding a token
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
