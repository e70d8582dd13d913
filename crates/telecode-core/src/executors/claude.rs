//! Claude Code CLI backend

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use super::{BinaryLocator, CommandRequest, Executor, PathLocator, first_capture, json_lines};
use crate::error::{Result, TelecodeError};

/// Model aliases the Claude CLI accepts for `--model`
const CLAUDE_MODELS: &[&str] = &["sonnet", "opus", "haiku"];

// Most specific first: "session id: x" must not resolve to "id". Labels must
// open a line and carry a separator so prose like "this session is ready" is
// never taken for a token.
static SESSION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?im)^\s*resuming\s+session\s*[:=]?\s+([a-zA-Z0-9_-]+)",
        r"(?im)^\s*session[\s_-]*id\s*[:=]\s*([a-zA-Z0-9_-]+)",
        r"(?im)^\s*session\s*[:=]\s*([a-zA-Z0-9_-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid session pattern"))
    .collect()
});

/// Drives `claude -p <prompt>`
#[derive(Debug, Clone, Default)]
pub struct ClaudeExecutor;

impl ClaudeExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for ClaudeExecutor {
    fn name(&self) -> &str {
        "claude"
    }

    fn build_command(&self, request: &CommandRequest<'_>) -> Vec<String> {
        let mut cmd = vec![
            self.binary().to_string(),
            "-p".to_string(),
            request.prompt.to_string(),
        ];

        if let Some(session_id) = request.session_id {
            cmd.push("--resume".to_string());
            cmd.push(session_id.to_string());
        }

        if let Some(model) = request.model {
            cmd.push("--model".to_string());
            cmd.push(model.to_string());
        }

        // Claude picks up attached files from trailing path arguments
        if let Some(image) = request.image_path {
            cmd.push(image.display().to_string());
        }

        cmd
    }

    fn parse_session_id(&self, output: &str) -> Option<String> {
        // `--output-format json|stream-json` records carry the id directly
        let from_json = json_lines(output).find_map(|record| {
            record
                .get("session_id")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        });

        from_json.or_else(|| first_capture(&SESSION_PATTERNS, output))
    }

    async fn stats(&self) -> Result<String> {
        // No usage API on the Claude CLI; report the installation instead
        match PathLocator.locate(self.binary()) {
            Some(path) => Ok(format!(
                "Claude Code is installed ({})\nUsage statistics are not exposed by the CLI.",
                path.display()
            )),
            None => Err(TelecodeError::unavailable(
                self.name(),
                "Claude Code is not installed",
            )),
        }
    }

    async fn list_models(&self) -> Vec<String> {
        CLAUDE_MODELS.iter().map(|m| m.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_build_minimal() {
        let exec = ClaudeExecutor::new();
        let cmd = exec.build_command(&CommandRequest::new("hello"));
        assert_eq!(cmd, vec!["claude", "-p", "hello"]);
    }

    #[test]
    fn test_build_full() {
        let exec = ClaudeExecutor::new();
        let request = CommandRequest::new("what is this?")
            .with_session(Some("abc123"))
            .with_model(Some("opus"))
            .with_image(Some(Path::new("/tmp/photo.jpg")));
        let cmd = exec.build_command(&request);
        assert_eq!(
            cmd,
            vec![
                "claude",
                "-p",
                "what is this?",
                "--resume",
                "abc123",
                "--model",
                "opus",
                "/tmp/photo.jpg"
            ]
        );
    }

    #[test]
    fn test_resume_flag_only_with_session() {
        let exec = ClaudeExecutor::new();
        let without = exec.build_command(&CommandRequest::new("x").with_session(None));
        assert!(!without.contains(&"--resume".to_string()));
        let with = exec.build_command(&CommandRequest::new("x").with_session(Some("s1")));
        assert!(with.windows(2).any(|w| w[0] == "--resume" && w[1] == "s1"));
    }

    #[test]
    fn test_parse_plain_session() {
        let exec = ClaudeExecutor::new();
        let output = "Done editing files.\nsession: abc123\n";
        assert_eq!(exec.parse_session_id(output).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_parse_session_id_label() {
        let exec = ClaudeExecutor::new();
        let output = "some text\nsession id: 7f3e-91ab_c\nmore";
        assert_eq!(exec.parse_session_id(output).as_deref(), Some("7f3e-91ab_c"));
    }

    #[test]
    fn test_parse_resuming() {
        let exec = ClaudeExecutor::new();
        let output = "resuming session: xyz-789 (3 messages)";
        assert_eq!(exec.parse_session_id(output).as_deref(), Some("xyz-789"));
    }

    #[test]
    fn test_parse_coloured_label() {
        let exec = ClaudeExecutor::new();
        let output = "Done.\n\x1b[2msession:\x1b[0m \x1b[1mabc123\x1b[0m\n";
        assert_eq!(exec.parse_session_id(output).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_parse_ignores_prose() {
        let exec = ClaudeExecutor::new();
        assert_eq!(exec.parse_session_id("Okay, this session is ready."), None);
        assert_eq!(exec.parse_session_id("Session is ready to go"), None);
        assert_eq!(
            exec.parse_session_id("I reviewed the session handling.\nsession: real-1").as_deref(),
            Some("real-1")
        );
    }

    #[test]
    fn test_parse_json_record() {
        let exec = ClaudeExecutor::new();
        let output = concat!(
            "not json\n",
            "{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"8d1c2f0e-aaaa\"}\n",
            "{\"type\":\"result\",\"result\":\"hi\"}\n"
        );
        assert_eq!(exec.parse_session_id(output).as_deref(), Some("8d1c2f0e-aaaa"));
    }

    #[test]
    fn test_parse_miss() {
        let exec = ClaudeExecutor::new();
        assert_eq!(exec.parse_session_id("Here is your answer.\nAll good."), None);
        assert_eq!(exec.parse_session_id(""), None);
    }

    #[tokio::test]
    async fn test_list_models_static() {
        let models = ClaudeExecutor::new().list_models().await;
        assert_eq!(models, vec!["sonnet", "opus", "haiku"]);
    }
}
