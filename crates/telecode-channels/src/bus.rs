//! Transport seam between a chat platform and a workspace loop

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use telecode_core::types::{ImageAttachment, IncomingMessage, OutgoingMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Trait that all transports implement
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Start listening for messages, sending them to the provided sender.
    /// Implementations spawn their own task and stop when `cancel` fires.
    async fn start(
        &self,
        tx: mpsc::Sender<IncomingMessage>,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Send a message through this channel, splitting it if the platform needs to
    async fn send(&self, msg: OutgoingMessage) -> Result<()>;

    /// Fetch an inbound image into `dest`
    async fn download_image(&self, image: &ImageAttachment, dest: &Path) -> Result<()>;

    /// Transport name for logs
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use telecode_core::types::MessageKind;

    /// Mock channel for testing
    struct MockChannel {
        sent: Arc<Mutex<Vec<OutgoingMessage>>>,
    }

    #[async_trait]
    impl MessageChannel for MockChannel {
        async fn start(
            &self,
            tx: mpsc::Sender<IncomingMessage>,
            _cancel: CancellationToken,
        ) -> Result<()> {
            tx.send(IncomingMessage::text(1, "hello")).await?;
            Ok(())
        }

        async fn send(&self, msg: OutgoingMessage) -> Result<()> {
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }

        async fn download_image(&self, _image: &ImageAttachment, dest: &Path) -> Result<()> {
            tokio::fs::write(dest, b"img").await?;
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    #[tokio::test]
    async fn test_channel_as_trait_object() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let channel: Arc<dyn MessageChannel> = Arc::new(MockChannel { sent: sent.clone() });
        let (tx, mut rx) = mpsc::channel(4);

        channel.start(tx, CancellationToken::new()).await.unwrap();
        let incoming = rx.recv().await.unwrap();
        assert_eq!(incoming.content, "hello");

        channel
            .send(OutgoingMessage::acknowledgment(&incoming))
            .await
            .unwrap();
        channel
            .send(OutgoingMessage::reply(&incoming, "hi"))
            .await
            .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, MessageKind::Acknowledgment);
        assert_eq!(sent[1].content, "hi");
        assert_eq!(sent[1].reply_to.as_deref(), Some(incoming.id.as_str()));
    }

    #[tokio::test]
    async fn test_download_image_writes_destination() {
        let channel = MockChannel {
            sent: Arc::new(Mutex::new(Vec::new())),
        };
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("photo.jpg");
        let image = ImageAttachment {
            file_id: "abc".into(),
            file_name: None,
        };
        channel.download_image(&image, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"img");
        assert_eq!(channel.name(), "mock");
    }
}
