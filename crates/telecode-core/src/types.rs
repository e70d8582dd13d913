//! Shared types for telecode-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat identifier as issued by the transport
pub type ChatId = i64;

/// Incoming message from a workspace's transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    pub chat_id: ChatId,
    pub sender: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,
    pub timestamp: DateTime<Utc>,
}

impl IncomingMessage {
    /// Build a plain text message, mostly useful for tests and internal replays
    pub fn text(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self {
            id: format!("{}_{}", chat_id, Utc::now().timestamp_millis()),
            chat_id,
            sender: chat_id.to_string(),
            content: content.into(),
            image: None,
            timestamp: Utc::now(),
        }
    }
}

/// Reference to an image the transport can fetch on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// Transport-specific handle (Telegram `file_id`)
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// What kind of outgoing message this is
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Normal reply text
    #[default]
    Response,
    /// Typing indicator while an assistant turn is running
    Acknowledgment,
}

/// Outgoing message to be sent back to a chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub chat_id: ChatId,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>, // original message id
    #[serde(default)]
    pub kind: MessageKind,
}

impl OutgoingMessage {
    pub fn reply(msg: &IncomingMessage, content: impl Into<String>) -> Self {
        Self {
            chat_id: msg.chat_id,
            content: content.into(),
            reply_to: Some(msg.id.clone()),
            kind: MessageKind::Response,
        }
    }

    pub fn acknowledgment(msg: &IncomingMessage) -> Self {
        Self {
            chat_id: msg.chat_id,
            content: String::new(),
            reply_to: Some(msg.id.clone()),
            kind: MessageKind::Acknowledgment,
        }
    }
}
