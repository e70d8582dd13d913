//! Backend adapters and their registry
//!
//! Every supported assistant CLI implements [`Executor`]. The controller only
//! talks to backends through this trait, so adding a backend means adding one
//! implementation and one entry in [`ExecutorRegistry::with_defaults`].

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::sanitize::strip_terminal_sequences;

pub mod claude;
pub mod opencode;

pub use claude::ClaudeExecutor;
pub use opencode::OpenCodeExecutor;

/// Uniform request every adapter turns into an argument vector
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRequest<'a> {
    pub prompt: &'a str,
    pub session_id: Option<&'a str>,
    pub image_path: Option<&'a Path>,
    pub model: Option<&'a str>,
}

impl<'a> CommandRequest<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self {
            prompt,
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: Option<&'a str>) -> Self {
        self.session_id = session_id.filter(|s| !s.is_empty());
        self
    }

    pub fn with_image(mut self, image_path: Option<&'a Path>) -> Self {
        self.image_path = image_path.filter(|p| !p.as_os_str().is_empty());
        self
    }

    pub fn with_model(mut self, model: Option<&'a str>) -> Self {
        self.model = model.filter(|m| !m.is_empty());
        self
    }
}

/// A command-line assistant backend
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name users select the backend by (`/cli <name>`)
    fn name(&self) -> &str;

    /// Executable that must be on `PATH` for the backend to run
    fn binary(&self) -> &str {
        self.name()
    }

    fn build_command(&self, request: &CommandRequest<'_>) -> Vec<String>;

    /// Best-effort continuation token extraction. A miss is not an error.
    fn parse_session_id(&self, output: &str) -> Option<String>;

    /// Turn raw process output into the text the user should read
    fn extract_reply(&self, output: &str) -> String {
        output.to_string()
    }

    async fn stats(&self) -> Result<String>;

    /// Available models; falls back to a fixed list when the backend can't be asked
    async fn list_models(&self) -> Vec<String>;
}

/// Locates executables on the host
pub trait BinaryLocator: Send + Sync {
    fn locate(&self, binary: &str) -> Option<PathBuf>;
}

/// Looks binaries up on `PATH`
#[derive(Debug, Clone, Copy, Default)]
pub struct PathLocator;

impl BinaryLocator for PathLocator {
    fn locate(&self, binary: &str) -> Option<PathBuf> {
        which::which(binary).ok()
    }
}

/// Registry of available backends keyed by name
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ClaudeExecutor::new()));
        registry.register(Arc::new(OpenCodeExecutor::new()));
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        let name = executor.name().to_string();
        debug!("Registering executor: {}", name);
        self.executors.insert(name, executor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

/// Parse each non-empty line as a JSON record, skipping lines that aren't one
pub(crate) fn json_lines(output: &str) -> impl Iterator<Item = Value> + '_ {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
}

/// First capture group of the first pattern that matches. Plain-text output is
/// matched after terminal sequences are stripped, so colour codes around a label
/// don't hide the token.
pub(crate) fn first_capture(patterns: &[regex::Regex], output: &str) -> Option<String> {
    let text = strip_terminal_sequences(output);
    patterns
        .iter()
        .find_map(|re| re.captures(&text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyExecutor;

    #[async_trait]
    impl Executor for DummyExecutor {
        fn name(&self) -> &str {
            "dummy"
        }

        fn build_command(&self, request: &CommandRequest<'_>) -> Vec<String> {
            vec!["dummy".to_string(), request.prompt.to_string()]
        }

        fn parse_session_id(&self, _output: &str) -> Option<String> {
            None
        }

        async fn stats(&self) -> Result<String> {
            Ok("dummy stats".to_string())
        }

        async fn list_models(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn test_registry_defaults() {
        let registry = ExecutorRegistry::with_defaults();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["claude", "opencode"]);
        assert!(registry.get("claude").is_some());
        assert!(registry.get("codex").is_none());
    }

    #[test]
    fn test_registry_register_custom() {
        let mut registry = ExecutorRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(DummyExecutor));
        assert!(registry.contains("dummy"));
        let exec = registry.get("dummy").unwrap();
        assert_eq!(exec.binary(), "dummy");
        assert_eq!(exec.extract_reply("raw"), "raw");
    }

    #[test]
    fn test_request_filters_empty_values() {
        let request = CommandRequest::new("hi")
            .with_session(Some(""))
            .with_model(Some(""))
            .with_image(Some(Path::new("")));
        assert!(request.session_id.is_none());
        assert!(request.model.is_none());
        assert!(request.image_path.is_none());
    }

    #[test]
    fn test_first_capture_ignores_colour_codes() {
        let patterns = vec![regex::Regex::new(r"session:\s+(\w+)").unwrap()];
        let output = "Done.\n\x1b[2msession:\x1b[0m \x1b[1mabc123\x1b[0m\n";
        assert_eq!(first_capture(&patterns, output).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_json_lines_skips_garbage() {
        let output = "plain text\n{\"a\":1}\n{broken json\n  {\"b\":2}  \n";
        let records: Vec<Value> = json_lines(output).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["b"], 2);
    }
}
