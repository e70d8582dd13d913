//! Telegram channel adapter using Bot API long polling

use crate::bus::MessageChannel;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use telecode_core::TelecodeError;
use telecode_core::types::{ImageAttachment, IncomingMessage, MessageKind, OutgoingMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram rejects longer `sendMessage` texts, measured in UTF-16 code units
pub const MAX_MESSAGE_UNITS: usize = 4096;

/// Seconds the server holds a `getUpdates` request open
const LONG_POLL_SECS: u64 = 30;

const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram Bot API channel for one workspace bot
pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    client: Client,
    /// Workspace name, for logs
    label: String,
}

impl TelegramChannel {
    pub fn new(label: impl Into<String>, bot_token: impl Into<String>) -> Result<Self> {
        let bot_token = bot_token.into();
        if bot_token.trim().is_empty() {
            return Err(anyhow!("Telegram bot token cannot be empty"));
        }

        // Must outlive the long-poll hold time
        let client = Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 15))
            .build()
            .context("Failed to build HTTP client for Telegram")?;

        Ok(Self {
            bot_token,
            api_base: DEFAULT_API_BASE.to_string(),
            client,
            label: label.into(),
        })
    }

    /// Point the adapter at a Bot API server other than api.telegram.org
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.bot_token, file_path)
    }

    /// POST a Bot API method and unwrap its `{ok, result}` envelope. Errors never
    /// carry the request URL since it embeds the bot token.
    async fn call<T: DeserializeOwned>(
        client: &Client,
        url: &str,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let response = client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Telegram {} request failed", method))?;

        let status = response.status();
        let payload: TelegramResponse<T> = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Telegram {} returned HTTP {}", method, status))?;

        if !payload.ok {
            return Err(TelecodeError::Transport(format!(
                "Telegram {} failed: {}",
                method,
                payload.description.unwrap_or_else(|| "unknown error".into())
            ))
            .into());
        }

        payload
            .result
            .ok_or_else(|| anyhow!("Telegram {} response missing result", method))
    }
}

#[async_trait]
impl MessageChannel for TelegramChannel {
    async fn start(
        &self,
        tx: mpsc::Sender<IncomingMessage>,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!("[{}] Starting Telegram channel adapter", self.label);

        // Verify token before spawning so a bad token fails this workspace at startup
        let me: TelegramUser = Self::call(&self.client, &self.api_url("getMe"), "getMe", json!({}))
            .await
            .context("Telegram token check failed")?;
        info!(
            "[{}] Telegram bot authenticated as @{}",
            self.label,
            me.username.as_deref().unwrap_or("unknown")
        );

        let client = self.client.clone();
        let updates_url = self.api_url("getUpdates");
        let label = self.label.clone();

        tokio::spawn(async move {
            info!("[{}] Telegram polling task started", label);
            let mut offset: i64 = 0;

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": LONG_POLL_SECS,
                    "allowed_updates": ["message"],
                });

                let polled = tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = Self::call::<Vec<TelegramUpdate>>(&client, &updates_url, "getUpdates", body) => res,
                };

                let updates = match polled {
                    Ok(updates) => updates,
                    Err(e) => {
                        // Log and keep polling
                        error!("[{}] Error during Telegram polling: {:#}", label, e);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(RETRY_BACKOFF) => continue,
                        }
                    }
                };

                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some(msg) = update.message else {
                        continue;
                    };
                    let Some(incoming) = convert_message(msg) else {
                        debug!("[{}] Skipping Telegram message without text or image", label);
                        continue;
                    };

                    debug!(
                        "[{}] Forwarding Telegram message from chat {} ({} chars)",
                        label,
                        incoming.chat_id,
                        incoming.content.len()
                    );
                    if tx.send(incoming).await.is_err() {
                        info!("[{}] Workspace loop closed, stopping Telegram polling", label);
                        return;
                    }
                }
            }

            info!("[{}] Telegram polling task stopped", label);
        });

        Ok(())
    }

    async fn send(&self, msg: OutgoingMessage) -> Result<()> {
        if msg.kind == MessageKind::Acknowledgment {
            let _: bool = Self::call(
                &self.client,
                &self.api_url("sendChatAction"),
                "sendChatAction",
                json!({ "chat_id": msg.chat_id, "action": "typing" }),
            )
            .await?;
            return Ok(());
        }

        let chunks = split_message(&msg.content, MAX_MESSAGE_UNITS);
        if chunks.len() > 1 {
            debug!(
                "[{}] Splitting reply to chat {} into {} messages",
                self.label,
                msg.chat_id,
                chunks.len()
            );
        }

        let url = self.api_url("sendMessage");
        for chunk in chunks {
            let _: TelegramMessage = Self::call(
                &self.client,
                &url,
                "sendMessage",
                json!({ "chat_id": msg.chat_id, "text": chunk }),
            )
            .await?;
        }
        Ok(())
    }

    async fn download_image(&self, image: &ImageAttachment, dest: &Path) -> Result<()> {
        let file: TelegramFile = Self::call(
            &self.client,
            &self.api_url("getFile"),
            "getFile",
            json!({ "file_id": image.file_id }),
        )
        .await?;
        let file_path = file
            .file_path
            .ok_or_else(|| anyhow!("Telegram getFile returned no file_path"))?;

        let response = self
            .client
            .get(self.file_url(&file_path))
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Telegram file download failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("Telegram file download HTTP error: {}", response.status()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Telegram file download was cut short")?;

        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("Failed to write image to {}", dest.display()))?;
        debug!(
            "[{}] Downloaded image {} ({} bytes)",
            self.label,
            image.file_id,
            bytes.len()
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

/// Turn a Telegram message into an inbound event. Photos (largest size) and image
/// documents become attachments with the caption as text; anything with neither
/// text nor image is dropped.
fn convert_message(msg: TelegramMessage) -> Option<IncomingMessage> {
    let image = msg
        .photo
        .as_ref()
        .and_then(|sizes| {
            sizes
                .iter()
                .max_by_key(|size| (size.file_size.unwrap_or(0), size.width * size.height))
        })
        .map(|size| ImageAttachment {
            file_id: size.file_id.clone(),
            file_name: None,
        })
        .or_else(|| {
            msg.document
                .as_ref()
                .filter(|doc| {
                    doc.mime_type
                        .as_deref()
                        .is_some_and(|mime| mime.starts_with("image/"))
                })
                .map(|doc| ImageAttachment {
                    file_id: doc.file_id.clone(),
                    file_name: doc.file_name.clone(),
                })
        });

    let content = msg.text.or(msg.caption).unwrap_or_default();
    if content.trim().is_empty() && image.is_none() {
        if msg.document.is_some() {
            warn!("Ignoring non-image document in chat {}", msg.chat.id);
        }
        return None;
    }

    let sender = msg
        .from
        .map(|from| from.username.unwrap_or_else(|| from.id.to_string()))
        .unwrap_or_else(|| msg.chat.id.to_string());

    Some(IncomingMessage {
        id: format!("tg_{}_{}", msg.chat.id, msg.message_id),
        chat_id: msg.chat.id,
        sender,
        content,
        image,
        timestamp: DateTime::<Utc>::from_timestamp(msg.date, 0).unwrap_or_else(Utc::now),
    })
}

/// Split text into chunks of at most `max_units` UTF-16 code units, preferring
/// to break after a newline
pub fn split_message(text: &str, max_units: usize) -> Vec<String> {
    let max_units = max_units.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.encode_utf16().count() > max_units {
        let mut units = 0;
        let mut hard = rest.len();
        for (idx, ch) in rest.char_indices() {
            units += ch.len_utf16();
            if units > max_units {
                hard = idx;
                break;
            }
        }
        // A character wider than the limit still has to go out on its own
        if hard == 0 {
            hard = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let cut = match rest[..hard].rfind('\n') {
            Some(nl) if nl > 0 => nl + 1,
            _ => hard,
        };
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    date: i64,
    chat: TelegramChat,
    #[serde(default)]
    from: Option<TelegramUser>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    photo: Option<Vec<TelegramPhotoSize>>,
    #[serde(default)]
    document: Option<TelegramDocument>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramPhotoSize {
    file_id: String,
    #[serde(default)]
    width: i64,
    #[serde(default)]
    height: i64,
    #[serde(default)]
    file_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TelegramDocument {
    file_id: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    #[serde(default)]
    file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(value: serde_json::Value) -> TelegramMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(TelegramChannel::new("ws", "  ").is_err());
    }

    #[test]
    fn test_api_urls() {
        let channel = TelegramChannel::new("ws", "123:abc")
            .unwrap()
            .with_api_base("http://localhost:8081/");
        assert_eq!(
            channel.api_url("getUpdates"),
            "http://localhost:8081/bot123:abc/getUpdates"
        );
        assert_eq!(
            channel.file_url("photos/file_1.jpg"),
            "http://localhost:8081/file/bot123:abc/photos/file_1.jpg"
        );
        assert_eq!(channel.name(), "telegram");
    }

    #[test]
    fn test_convert_text_message() {
        let msg = message(json!({
            "message_id": 7,
            "date": 1_700_000_000,
            "chat": {"id": 42, "type": "private"},
            "from": {"id": 42, "is_bot": false, "username": "alice"},
            "text": "/status"
        }));
        let incoming = convert_message(msg).unwrap();
        assert_eq!(incoming.id, "tg_42_7");
        assert_eq!(incoming.chat_id, 42);
        assert_eq!(incoming.sender, "alice");
        assert_eq!(incoming.content, "/status");
        assert!(incoming.image.is_none());
        assert_eq!(incoming.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_convert_photo_picks_largest() {
        let msg = message(json!({
            "message_id": 8,
            "date": 1_700_000_000,
            "chat": {"id": -100},
            "caption": "what is this?",
            "photo": [
                {"file_id": "small", "width": 90, "height": 90, "file_size": 1000},
                {"file_id": "large", "width": 1280, "height": 1280, "file_size": 90000},
                {"file_id": "medium", "width": 320, "height": 320, "file_size": 10000}
            ]
        }));
        let incoming = convert_message(msg).unwrap();
        assert_eq!(incoming.content, "what is this?");
        assert_eq!(incoming.image.unwrap().file_id, "large");
        assert_eq!(incoming.sender, "-100");
    }

    #[test]
    fn test_convert_image_document() {
        let msg = message(json!({
            "message_id": 9,
            "date": 1_700_000_000,
            "chat": {"id": 5},
            "document": {"file_id": "doc1", "file_name": "screen.png", "mime_type": "image/png"}
        }));
        let incoming = convert_message(msg).unwrap();
        assert_eq!(incoming.content, "");
        let image = incoming.image.unwrap();
        assert_eq!(image.file_id, "doc1");
        assert_eq!(image.file_name.as_deref(), Some("screen.png"));
    }

    #[test]
    fn test_convert_drops_empty_and_non_image_documents() {
        let sticker = message(json!({"message_id": 1, "date": 0, "chat": {"id": 5}}));
        assert!(convert_message(sticker).is_none());

        let pdf = message(json!({
            "message_id": 2,
            "date": 0,
            "chat": {"id": 5},
            "document": {"file_id": "d", "mime_type": "application/pdf"}
        }));
        assert!(convert_message(pdf).is_none());
    }

    #[test]
    fn test_update_envelope_parses() {
        let payload: TelegramResponse<Vec<TelegramUpdate>> = serde_json::from_value(json!({
            "ok": true,
            "result": [
                {"update_id": 10, "message": {"message_id": 1, "date": 0, "chat": {"id": 1}, "text": "hi"}},
                {"update_id": 11, "edited_message": {}}
            ]
        }))
        .unwrap();
        let updates = payload.result.unwrap();
        assert_eq!(updates.len(), 2);
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("hello", 4096), vec!["hello"]);
        assert_eq!(split_message("", 4096), vec![""]);
    }

    #[test]
    fn test_split_exact_limit() {
        let text = "a".repeat(4096);
        assert_eq!(split_message(&text, 4096).len(), 1);
        let text = "a".repeat(4097);
        let chunks = split_message(&text, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], "a");
    }

    #[test]
    fn test_split_counts_chars_not_bytes() {
        let text = "é".repeat(10);
        let chunks = split_message(&text, 4);
        assert_eq!(chunks, vec!["éééé", "éééé", "éé"]);
    }

    #[test]
    fn test_split_counts_utf16_units() {
        // Each emoji is two UTF-16 code units
        let text = "😀".repeat(3000);
        let chunks = split_message(&text, 4096);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.encode_utf16().count() <= 4096));
        assert_eq!(chunks[0].chars().count(), 2048);
        assert_eq!(chunks.concat(), text);

        assert_eq!(split_message("😀😀", 1), vec!["😀", "😀"]);
    }

    #[tokio::test]
    async fn test_transport_errors_hide_token() {
        let token = "123456:SECRETSECRET";
        let channel = TelegramChannel::new("ws", token)
            .unwrap()
            .with_api_base("http://127.0.0.1:9");

        let err = channel
            .send(OutgoingMessage {
                chat_id: 1,
                content: "hi".to_string(),
                kind: MessageKind::Response,
                reply_to: None,
            })
            .await
            .unwrap_err();
        let rendered = format!("{:#} {:?}", err, err);
        assert!(rendered.contains("sendMessage request failed"), "{}", rendered);
        assert!(!rendered.contains("SECRETSECRET"), "{}", rendered);

        let image = ImageAttachment {
            file_id: "f1".to_string(),
            file_name: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let err = channel
            .download_image(&image, &dir.path().join("img.jpg"))
            .await
            .unwrap_err();
        assert!(!format!("{:#} {:?}", err, err).contains("SECRETSECRET"));
    }

    #[test]
    fn test_split_prefers_newlines() {
        let chunks = split_message("line one\nline two\nline three", 12);
        assert_eq!(chunks, vec!["line one\n", "line two\n", "line three"]);
        assert_eq!(chunks.concat(), "line one\nline two\nline three");
    }
}
