//! One processing loop per workspace
//!
//! Each workspace owns a transport and a [`WorkspaceHandler`]. Its loop takes
//! inbound events one at a time, so replies keep arrival order inside a
//! workspace while separate workspaces run concurrently.

use crate::bus::MessageChannel;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use telecode_core::router::ChatCommand;
use telecode_core::types::{ImageAttachment, IncomingMessage, OutgoingMessage};
use telecode_core::WorkspaceHandler;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Inbound queue depth per workspace
const INBOUND_BUFFER: usize = 100;

/// A workspace handler paired with the transport that feeds it
pub struct WorkspaceRuntime {
    pub handler: Arc<WorkspaceHandler>,
    pub channel: Arc<dyn MessageChannel>,
}

/// Runs every registered workspace until cancelled
#[derive(Default)]
pub struct WorkspaceDispatcher {
    runtimes: Vec<WorkspaceRuntime>,
}

impl WorkspaceDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<WorkspaceHandler>, channel: Arc<dyn MessageChannel>) {
        info!(
            "Registering workspace {} on {}",
            handler.name(),
            channel.name()
        );
        self.runtimes.push(WorkspaceRuntime { handler, channel });
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    /// Start all workspace loops and wait for them to finish. A workspace that
    /// fails to start is logged and does not stop the others.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!("Starting {} workspace loop(s)", self.runtimes.len());

        let mut loops = JoinSet::new();
        for runtime in self.runtimes {
            let cancel = cancel.child_token();
            loops.spawn(async move {
                let name = runtime.handler.name().to_string();
                let result = run_workspace(runtime.handler, runtime.channel, cancel).await;
                (name, result)
            });
        }

        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok((name, Ok(()))) => info!("Workspace {} stopped", name),
                Ok((name, Err(e))) => error!("Workspace {} failed: {:#}", name, e),
                Err(e) => error!("Workspace loop panicked: {}", e),
            }
        }

        info!("All workspace loops stopped");
        Ok(())
    }
}

/// Drive one workspace: start its transport, then handle events in order until
/// cancelled or the transport closes
pub async fn run_workspace(
    handler: Arc<WorkspaceHandler>,
    channel: Arc<dyn MessageChannel>,
    cancel: CancellationToken,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(INBOUND_BUFFER);
    channel
        .start(tx, cancel.clone())
        .await
        .with_context(|| format!("Failed to start {} for workspace {}", channel.name(), handler.name()))?;

    info!(
        "Workspace {} listening ({})",
        handler.name(),
        handler.workspace().working_dir.display()
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Workspace {} shutting down", handler.name());
                break;
            }
            next = rx.recv() => {
                let Some(msg) = next else {
                    info!("Workspace {} transport closed", handler.name());
                    break;
                };
                process_event(&handler, &channel, msg).await;
            }
        }
    }

    Ok(())
}

/// Handle one event in its own task so a panic is contained to that event.
/// The task is awaited before the next event is taken.
async fn process_event(
    handler: &Arc<WorkspaceHandler>,
    channel: &Arc<dyn MessageChannel>,
    msg: IncomingMessage,
) {
    if !handler.is_allowed(msg.chat_id) {
        debug!(
            "Workspace {} dropping message from chat {} (not allowed)",
            handler.name(),
            msg.chat_id
        );
        return;
    }

    let task_handler = handler.clone();
    let task_channel = channel.clone();
    let chat_id = msg.chat_id;
    let task = tokio::spawn(async move {
        handle_message(&task_handler, task_channel.as_ref(), &msg).await
    });

    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(
            "Workspace {} could not answer chat {}: {:#}",
            handler.name(),
            chat_id,
            e
        ),
        Err(e) => error!(
            "Workspace {} panicked handling chat {}: {}",
            handler.name(),
            chat_id,
            e
        ),
    }
}

async fn handle_message(
    handler: &WorkspaceHandler,
    channel: &dyn MessageChannel,
    msg: &IncomingMessage,
) -> Result<()> {
    let runs_assistant =
        msg.image.is_some() || matches!(ChatCommand::parse(&msg.content), ChatCommand::Prompt(_));
    if runs_assistant && let Err(e) = channel.send(OutgoingMessage::acknowledgment(msg)).await {
        debug!("Typing indicator failed for chat {}: {:#}", msg.chat_id, e);
    }

    // Temp file lives until the turn is over, then is removed on drop
    let image_file = match &msg.image {
        Some(image) => match download_to_temp(channel, image).await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Image download failed for chat {}: {:#}", msg.chat_id, e);
                channel
                    .send(OutgoingMessage::reply(msg, format!("❌ Failed to download image: {}", e)))
                    .await?;
                return Ok(());
            }
        },
        None => None,
    };

    let reply = handler
        .handle(msg, image_file.as_ref().map(|file| file.path()))
        .await;
    drop(image_file);

    if let Some(reply) = reply {
        channel
            .send(OutgoingMessage::reply(msg, reply))
            .await
            .context("Failed to send reply")?;
    }
    Ok(())
}

async fn download_to_temp(
    channel: &dyn MessageChannel,
    image: &ImageAttachment,
) -> Result<tempfile::NamedTempFile> {
    let suffix = image
        .file_name
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| ".jpg".to_string());

    let file = tempfile::Builder::new()
        .prefix("telecode-image-")
        .suffix(&suffix)
        .tempfile()
        .context("Failed to create temp file for image")?;
    channel.download_image(image, file.path()).await?;
    Ok(file)
}
