//! Subprocess execution with a bounded deadline

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{TelecodeError, humanize};
use crate::sanitize::strip_terminal_sequences;

/// Hard ceiling for a single command, regardless of workspace configuration
pub const ADHOC_COMMAND_LIMIT: Duration = Duration::from_secs(5 * 60);

/// Default end-to-end assistant turn bound for a workspace
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// How a command run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exit status zero; `output` is raw combined stdout + stderr
    Completed { output: String },
    /// Non-zero exit or killed by a signal
    Failed { code: Option<i32>, output: String },
    /// Deadline elapsed; the child was killed and its output discarded
    TimedOut { limit: Duration },
    /// The executable could not be started at all
    SpawnFailed { reason: String },
}

impl CommandOutcome {
    /// Raw output usable for session parsing, if the process produced any
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::Completed { output } | Self::Failed { output, .. } => Some(output),
            Self::TimedOut { .. } | Self::SpawnFailed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Error view of a non-successful outcome
    pub fn error(&self) -> Option<TelecodeError> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { code, output } => Some(TelecodeError::CommandFailed {
                code: *code,
                output: output.clone(),
            }),
            Self::TimedOut { limit } => Some(TelecodeError::CommandTimeout { limit: *limit }),
            Self::SpawnFailed { reason } => Some(TelecodeError::CommandFailed {
                code: None,
                output: reason.clone(),
            }),
        }
    }

    /// Text shown to the user. `body` is the already-extracted reply for runs
    /// that produced output; errors are prefixed, timeouts never leak partial output.
    pub fn reply_text(&self, body: &str) -> String {
        let text = match self {
            Self::Completed { .. } => body.to_string(),
            Self::Failed { code, .. } => {
                let status = match code {
                    Some(code) => format!("exit code {}", code),
                    None => "terminated by signal".to_string(),
                };
                format!("Error: command failed ({})\n{}", status, body)
            }
            Self::TimedOut { limit } => {
                format!("Error: Command execution timeout ({})", humanize(*limit))
            }
            Self::SpawnFailed { reason } => format!("Error: {}", reason),
        };
        strip_terminal_sequences(&text)
    }
}

/// Runs an argument vector inside a working directory
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, argv: &[String], working_dir: &Path) -> CommandOutcome;
}

/// `tokio::process` backed runner
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runner for an assistant turn: the workspace bound, capped by the ad-hoc ceiling
    pub fn for_turn(workspace_timeout: Duration) -> Self {
        Self::new(effective_timeout(workspace_timeout))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(ADHOC_COMMAND_LIMIT)
    }
}

/// Both bounds apply to the same subprocess, so the shorter one wins
pub fn effective_timeout(workspace_timeout: Duration) -> Duration {
    workspace_timeout.min(ADHOC_COMMAND_LIMIT)
}

#[async_trait]
impl ProcessRunner for CommandRunner {
    async fn run(&self, argv: &[String], working_dir: &Path) -> CommandOutcome {
        let Some((program, args)) = argv.split_first() else {
            return CommandOutcome::SpawnFailed {
                reason: "Command is empty".to_string(),
            };
        };

        debug!(
            "Running {} with {} args in {} (timeout {:?})",
            program,
            args.len(),
            working_dir.display(),
            self.timeout
        );

        let child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", program, e);
                return CommandOutcome::SpawnFailed {
                    reason: format!("failed to start `{}`: {}", program, e),
                };
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Failed to collect output of {}: {}", program, e);
                return CommandOutcome::SpawnFailed {
                    reason: format!("failed to read output of `{}`: {}", program, e),
                };
            }
            Err(_) => {
                warn!("{} timed out after {:?}", program, self.timeout);
                return CommandOutcome::TimedOut {
                    limit: self.timeout,
                };
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        if output.status.success() {
            debug!("{} completed ({} bytes of output)", program, combined.len());
            CommandOutcome::Completed { output: combined }
        } else {
            warn!("{} exited with {:?}", program, output.status.code());
            CommandOutcome::Failed {
                code: output.status.code(),
                output: combined,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_effective_timeout_is_minimum() {
        assert_eq!(effective_timeout(Duration::from_secs(20 * 60)), ADHOC_COMMAND_LIMIT);
        assert_eq!(
            effective_timeout(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[tokio::test]
    async fn test_run_success_combines_streams() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::default();
        let outcome = runner.run(&sh("echo out; echo err 1>&2"), dir.path()).await;
        match outcome {
            CommandOutcome::Completed { output } => {
                assert!(output.contains("out"));
                assert!(output.contains("err"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_uses_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let runner = CommandRunner::default();
        let outcome = runner.run(&sh("cat marker.txt"), dir.path()).await;
        assert_eq!(outcome.raw_output(), Some("here"));
    }

    #[tokio::test]
    async fn test_run_failure_prefixes_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::default();
        let outcome = runner.run(&sh("echo broken; exit 3"), dir.path()).await;
        assert_eq!(
            outcome,
            CommandOutcome::Failed {
                code: Some(3),
                output: "broken\n".to_string()
            }
        );
        let reply = outcome.reply_text(outcome.raw_output().unwrap());
        assert!(reply.starts_with("Error: command failed (exit code 3)"));
        assert!(reply.contains("broken"));
        assert!(matches!(
            outcome.error(),
            Some(TelecodeError::CommandFailed { code: Some(3), .. })
        ));
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Duration::from_millis(200));
        let outcome = runner.run(&sh("echo partial; sleep 5"), dir.path()).await;
        assert_eq!(
            outcome,
            CommandOutcome::TimedOut {
                limit: Duration::from_millis(200)
            }
        );
        assert_eq!(outcome.raw_output(), None);
        assert!(!outcome.reply_text("partial").contains("partial"));
        assert!(outcome.reply_text("").contains("timeout"));
    }

    #[tokio::test]
    async fn test_run_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::default();
        let argv = vec!["telecode-definitely-missing-binary".to_string()];
        let outcome = runner.run(&argv, dir.path()).await;
        assert!(matches!(outcome, CommandOutcome::SpawnFailed { .. }));
        assert!(outcome.reply_text("").starts_with("Error: failed to start"));
    }

    #[tokio::test]
    async fn test_run_empty_argv() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = CommandRunner::default().run(&[], dir.path()).await;
        assert_eq!(outcome.reply_text(""), "Error: Command is empty");
    }

    #[test]
    fn test_reply_text_is_sanitized() {
        let outcome = CommandOutcome::Completed {
            output: String::new(),
        };
        assert_eq!(outcome.reply_text("\x1b[32mgreen\x1b[0m"), "green");
    }
}
