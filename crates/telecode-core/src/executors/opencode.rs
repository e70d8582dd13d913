//! OpenCode CLI backend
//!
//! Runs `opencode run --format json`, which prints one JSON event per line.
//! Session ids and reply text are read from those events; plain-text output
//! (older CLI versions, error banners) falls back to pattern matching.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CommandRequest, Executor, first_capture, json_lines};
use crate::error::{Result, TelecodeError};
use crate::runner::{CommandOutcome, CommandRunner, ProcessRunner};
use crate::sanitize::strip_terminal_sequences;

/// OpenCode requires a model on every run
pub const DEFAULT_OPENCODE_MODEL: &str = "anthropic/claude-sonnet-4-5";

const FALLBACK_MODELS: &[&str] = &[
    DEFAULT_OPENCODE_MODEL,
    "anthropic/claude-opus-4-1",
    "openai/gpt-5",
    "google/gemini-2.5-pro",
];

/// `opencode stats` / `opencode models` are quick; don't let them hang a chat
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

// Examples:
//   "Continue  opencode -s ses_37f9659a6ffemnd5vvn1GC2Y5Q"
//   "session: ses_abc123"
static SESSION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"--session\s+([a-zA-Z0-9_-]+)",
        r"(?:^|\s)-s\s+([a-zA-Z0-9_-]+)",
        r"session[\s_-]*id[:\s=]+([a-zA-Z0-9_-]+)",
        r"session[:\s]+([a-zA-Z0-9_-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid session pattern"))
    .collect()
});

/// Drives `opencode run <prompt>`
#[derive(Debug, Clone)]
pub struct OpenCodeExecutor {
    default_model: String,
}

impl OpenCodeExecutor {
    pub fn new() -> Self {
        Self {
            default_model: DEFAULT_OPENCODE_MODEL.to_string(),
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    async fn query(&self, args: &[&str]) -> Result<String> {
        let mut argv = vec![self.binary().to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));

        let runner = CommandRunner::new(QUERY_TIMEOUT);
        match runner.run(&argv, Path::new(".")).await {
            CommandOutcome::Completed { output } => Ok(strip_terminal_sequences(&output)),
            other => {
                let reason = other
                    .error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown failure".to_string());
                Err(TelecodeError::unavailable(self.name(), reason))
            }
        }
    }
}

impl Default for OpenCodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Session id carried by an OpenCode JSON event, at the top level or on its part
fn event_session_id(event: &Value) -> Option<String> {
    ["sessionID", "session_id", "sessionId"]
        .iter()
        .find_map(|key| {
            event
                .get(key)
                .or_else(|| event.get("part").and_then(|part| part.get(key)))
                .and_then(|v| v.as_str())
        })
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn event_text(event: &Value) -> Option<&str> {
    if event.get("type").and_then(|v| v.as_str()) != Some("text") {
        return None;
    }
    event
        .get("part")
        .and_then(|part| part.get("text"))
        .and_then(|v| v.as_str())
        .filter(|text| !text.is_empty())
}

#[async_trait]
impl Executor for OpenCodeExecutor {
    fn name(&self) -> &str {
        "opencode"
    }

    fn build_command(&self, request: &CommandRequest<'_>) -> Vec<String> {
        let model = request.model.unwrap_or(&self.default_model);
        let mut cmd = vec![
            self.binary().to_string(),
            "run".to_string(),
            request.prompt.to_string(),
            "--format".to_string(),
            "json".to_string(),
            "--model".to_string(),
            model.to_string(),
        ];

        if let Some(session_id) = request.session_id {
            cmd.push("--session".to_string());
            cmd.push(session_id.to_string());
        }

        if let Some(image) = request.image_path {
            cmd.push("--file".to_string());
            cmd.push(image.display().to_string());
        }

        cmd
    }

    fn parse_session_id(&self, output: &str) -> Option<String> {
        json_lines(output)
            .find_map(|event| event_session_id(&event))
            .or_else(|| first_capture(&SESSION_PATTERNS, output))
    }

    fn extract_reply(&self, output: &str) -> String {
        let texts: Vec<String> = json_lines(output)
            .filter_map(|event| event_text(&event).map(str::to_string))
            .collect();

        if texts.is_empty() {
            return output.to_string();
        }
        texts.join("\n\n")
    }

    async fn stats(&self) -> Result<String> {
        let stats = self.query(&["stats"]).await?;
        if stats.trim().is_empty() {
            return Err(TelecodeError::unavailable(self.name(), "no statistics reported"));
        }
        Ok(stats)
    }

    async fn list_models(&self) -> Vec<String> {
        match self.query(&["models"]).await {
            Ok(output) => {
                let models: Vec<String> = output
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect();
                if models.is_empty() {
                    debug!("opencode reported no models, using defaults");
                    fallback_models()
                } else {
                    models
                }
            }
            Err(e) => {
                warn!("Could not list opencode models, using defaults: {}", e);
                fallback_models()
            }
        }
    }
}

fn fallback_models() -> Vec<String> {
    FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
}
