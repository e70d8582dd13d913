use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TelecodeError>;

#[derive(Debug, Error)]
pub enum TelecodeError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("unsupported CLI `{backend}`")]
    UnknownBackend { backend: String },

    #[error("CLI `{backend}` is not installed")]
    BackendNotInstalled { backend: String },

    #[error("command timed out after {}", humanize_field(.limit))]
    CommandTimeout { limit: Duration },

    #[error("command exited with {}", exit_label(.code))]
    CommandFailed { code: Option<i32>, output: String },

    #[error("{backend} cannot report: {reason}")]
    RuntimeUnavailable { backend: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl TelecodeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigInvalid(message.into())
    }

    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RuntimeUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

/// Renders a duration the way replies show it ("5 minutes", "90 seconds")
pub fn humanize(limit: Duration) -> String {
    let secs = limit.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        let mins = secs / 60;
        format!("{} minute{}", mins, if mins == 1 { "" } else { "s" })
    } else if secs > 0 {
        format!("{} second{}", secs, if secs == 1 { "" } else { "s" })
    } else {
        format!("{} ms", limit.as_millis())
    }
}

fn humanize_field(limit: &Duration) -> String {
    humanize(*limit)
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
