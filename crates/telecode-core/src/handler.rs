//! Per-workspace message handling: allow-list, command routing and assistant turns

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::controller::ChatSessionController;
use crate::error::Result;
use crate::executors::{BinaryLocator, ExecutorRegistry};
use crate::router::{ChatCommand, HELP_TEXT};
use crate::runner::{CommandOutcome, CommandRunner, ProcessRunner};
use crate::types::{ChatId, IncomingMessage};
use crate::workspace::Workspace;

const DEFAULT_IMAGE_PROMPT: &str = "Please analyze this image.";
const EMPTY_OUTPUT_REPLY: &str = "(no output)";

/// Result of one assistant turn
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub backend: String,
    pub argv: Vec<String>,
    pub outcome: CommandOutcome,
    /// Whether this turn established the chat's session
    pub session_stored: bool,
    pub reply: String,
}

/// Everything one workspace needs to answer its chats
pub struct WorkspaceHandler {
    workspace: Workspace,
    controller: ChatSessionController,
    runner: Arc<dyn ProcessRunner>,
}

impl WorkspaceHandler {
    pub fn new(workspace: Workspace, executors: Arc<ExecutorRegistry>) -> Self {
        let controller = ChatSessionController::new(workspace.default_backend.clone(), executors)
            .with_default_model(workspace.default_model.clone());
        let runner = Arc::new(CommandRunner::for_turn(workspace.command_timeout));
        Self {
            workspace,
            controller,
            runner,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn BinaryLocator>) -> Self {
        self.controller = self.controller.with_locator(locator);
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn name(&self) -> &str {
        &self.workspace.name
    }

    pub fn controller(&self) -> &ChatSessionController {
        &self.controller
    }

    pub fn is_allowed(&self, chat_id: ChatId) -> bool {
        self.workspace.is_allowed(chat_id)
    }

    /// Handle one inbound message. Returns the reply text, or `None` when the
    /// chat is not on the allow-list (no reply is sent in that case).
    pub async fn handle(&self, msg: &IncomingMessage, image_path: Option<&Path>) -> Option<String> {
        if !self.is_allowed(msg.chat_id) {
            debug!(
                "[{}] Ignoring message from chat {} (not allowed)",
                self.workspace.name, msg.chat_id
            );
            return None;
        }

        if let Some(image) = image_path {
            let caption = msg.content.trim();
            let prompt = if caption.is_empty() {
                DEFAULT_IMAGE_PROMPT
            } else {
                caption
            };
            return Some(self.assistant_reply(msg.chat_id, prompt, Some(image)).await);
        }

        let reply = match ChatCommand::parse(&msg.content) {
            ChatCommand::Help => HELP_TEXT.to_string(),
            ChatCommand::NewSession => {
                self.controller.new_session(msg.chat_id).await;
                "🆕 New session started".to_string()
            }
            ChatCommand::Status => {
                format!("📊 Status\n{}", self.controller.status(msg.chat_id).await)
            }
            ChatCommand::SwitchBackend { backend, model } => {
                self.switch_backend(msg.chat_id, backend, model).await
            }
            ChatCommand::SetModel(model) => {
                self.controller.set_model(msg.chat_id, model.as_deref()).await;
                match self.controller.model(msg.chat_id).await {
                    Some(model) => format!("✅ Model set to {}", model),
                    None => "✅ Model reset to default".to_string(),
                }
            }
            ChatCommand::ListModels => self.list_models(msg.chat_id).await,
            ChatCommand::Stats => self.stats(msg.chat_id).await,
            ChatCommand::Prompt(prompt) => {
                if prompt.trim().is_empty() {
                    "Send a text message or a photo.".to_string()
                } else {
                    self.assistant_reply(msg.chat_id, &prompt, None).await
                }
            }
        };
        Some(reply)
    }

    /// Build → run → update session → reply text. Turns of one chat are serialized.
    pub async fn run_turn(
        &self,
        chat_id: ChatId,
        prompt: &str,
        image_path: Option<&Path>,
    ) -> Result<TurnReport> {
        let lock = self.controller.turn_lock(chat_id);
        let _turn = lock.lock().await;

        let backend = self.controller.backend(chat_id).await;
        let argv = self
            .controller
            .build_command(chat_id, prompt, image_path)
            .await?;
        debug!("[{}] chat {} building {} turn", self.workspace.name, chat_id, backend);

        let outcome = self.runner.run(&argv, &self.workspace.working_dir).await;

        let mut session_stored = false;
        let mut body = String::new();
        if let Some(raw) = outcome.raw_output() {
            session_stored = self
                .controller
                .update_session_from_output(chat_id, &backend, raw)
                .await;
            body = match self.controller.executor(&backend) {
                Some(executor) => executor.extract_reply(raw),
                None => raw.to_string(),
            };
        }

        let mut reply = outcome.reply_text(&body);
        if reply.trim().is_empty() {
            reply = EMPTY_OUTPUT_REPLY.to_string();
        }

        match &outcome {
            CommandOutcome::Completed { .. } => info!(
                "[{}] chat {} {} turn succeeded ({} chars)",
                self.workspace.name,
                chat_id,
                backend,
                reply.len()
            ),
            other => warn!(
                "[{}] chat {} {} turn did not succeed: {:?}",
                self.workspace.name,
                chat_id,
                backend,
                other.error().map(|e| e.to_string())
            ),
        }

        Ok(TurnReport {
            backend,
            argv,
            outcome,
            session_stored,
            reply,
        })
    }

    async fn assistant_reply(&self, chat_id: ChatId, prompt: &str, image: Option<&Path>) -> String {
        match self.run_turn(chat_id, prompt, image).await {
            Ok(report) => report.reply,
            Err(e) => {
                warn!("[{}] chat {}: {}", self.workspace.name, chat_id, e);
                format!("❌ {}", e)
            }
        }
    }

    async fn switch_backend(
        &self,
        chat_id: ChatId,
        backend: Option<String>,
        model: Option<String>,
    ) -> String {
        let Some(backend) = backend else {
            let current = self.controller.backend(chat_id).await;
            return format!(
                "Available CLIs: {}\nCurrent: {}\nUsage: /cli <name> [model]",
                self.controller.executors().names().join(", "),
                current
            );
        };

        if let Err(e) = self.controller.set_backend(chat_id, &backend).await {
            return format!("❌ {}", e);
        }

        let mut reply = format!("✅ Switched to {}", backend);
        if let Some(model) = model {
            self.controller.set_model(chat_id, Some(&model)).await;
            reply.push_str(&format!("\nModel: {}", model));
        }
        reply.push_str("\nSession reset");
        reply
    }

    async fn list_models(&self, chat_id: ChatId) -> String {
        let backend = self.controller.backend(chat_id).await;
        match self.controller.list_models(chat_id).await {
            Ok(models) if models.is_empty() => format!("No models reported for {}", backend),
            Ok(models) => {
                let list: Vec<String> = models.iter().map(|m| format!("- {}", m)).collect();
                format!("📋 Models for {}:\n{}", backend, list.join("\n"))
            }
            Err(e) => format!("❌ {}", e),
        }
    }

    async fn stats(&self, chat_id: ChatId) -> String {
        let backend = self.controller.backend(chat_id).await;
        match self.controller.stats(chat_id).await {
            Ok(stats) => format!("📈 {} stats\n{}", backend, stats.trim_end()),
            Err(e) => format!("❌ {}", e),
        }
    }
}
