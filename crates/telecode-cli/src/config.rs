use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use telecode_core::workspace::{DEFAULT_BACKEND, Workspace, mask_secret};
use telecode_core::{TelecodeError, runner::DEFAULT_TURN_TIMEOUT};
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = "config.yml";

/// Example written by `telecode init`
pub const EXAMPLE_CONFIG: &str = include_str!("../../../config/example.yml");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelecodeConfig {
    #[serde(default)]
    pub workspaces: Vec<WorkspaceConfig>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub allowed_chats: Vec<i64>,
    #[serde(default = "default_cli")]
    pub default_cli: String,
    #[serde(default = "default_command_timeout", with = "duration_str")]
    pub command_timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl std::fmt::Debug for WorkspaceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceConfig")
            .field("name", &self.name)
            .field("working_dir", &self.working_dir)
            .field("bot_token", &mask_secret(&self.bot_token))
            .field("allowed_chats", &self.allowed_chats)
            .field("default_cli", &self.default_cli)
            .field("command_timeout", &self.command_timeout)
            .field("model", &self.model)
            .finish()
    }
}

fn default_cli() -> String {
    DEFAULT_BACKEND.to_string()
}

fn default_command_timeout() -> Duration {
    DEFAULT_TURN_TIMEOUT
}

/// Durations as humantime strings ("20m", "90s"); bare integers are seconds
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(d)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => {
                humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
            }
        }
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".telecode")
}

/// Locations tried, in order, when no `--config` is given
pub fn default_search_paths() -> Vec<PathBuf> {
    vec![
        config_dir().join(CONFIG_FILE_NAME),
        PathBuf::from("telecode.yml"),
        PathBuf::from("/etc/telecode/config.yml"),
    ]
}

/// Resolve the config file: an explicit path wins, otherwise the first existing
/// default location
pub fn resolve_path(custom_path: &Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = custom_path {
        return Ok(path.clone());
    }
    default_search_paths()
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No config file found. Run `telecode init` or pass --config <path>."
            )
        })
}

impl TelecodeConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<(Self, PathBuf)> {
        let path = resolve_path(custom_path)?;
        let config = Self::load_from(&path)?;
        Ok((config, path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        check_permissions(path)?;

        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `telecode init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config at {}", path.display()))?;
        debug!("Loaded {} workspace(s) from {}", config.workspaces.len(), path.display());
        Ok(config)
    }

    /// Expand, parse and validate YAML text
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yml::from_str(&expanded).context("Failed to parse YAML")?;

        for ws in &config.workspaces {
            // A token that survives expansion verbatim was written into the file
            if !ws.bot_token.is_empty() && content.contains(ws.bot_token.as_str()) {
                warn!(
                    "Bot token for workspace {} is hardcoded in config file. For security, use environment variables: bot_token: \"${{TELECODE_BOT_TOKEN}}\"",
                    ws.name
                );
            }
        }

        config.validate(&known_backends())?;
        Ok(config)
    }

    pub fn validate(&self, backends: &[String]) -> telecode_core::Result<()> {
        if self.workspaces.is_empty() {
            return Err(TelecodeError::config("no workspaces defined"));
        }

        let mut names = HashSet::new();
        for (i, ws) in self.workspaces.iter().enumerate() {
            let name = ws.name.trim();
            if name.is_empty() {
                return Err(TelecodeError::config(format!("workspace {}: name is required", i)));
            }
            if !names.insert(name) {
                return Err(TelecodeError::config(format!(
                    "workspace {}: duplicate name `{}`",
                    i, name
                )));
            }
            if ws.working_dir.trim().is_empty() {
                return Err(TelecodeError::config(format!(
                    "workspace {}: working_dir is required",
                    name
                )));
            }
            if ws.bot_token.trim().is_empty() {
                return Err(TelecodeError::config(format!(
                    "workspace {}: bot_token is required",
                    name
                )));
            }
            if !backends.iter().any(|b| b == &ws.default_cli) {
                return Err(TelecodeError::config(format!(
                    "workspace {}: unknown default_cli `{}` (expected one of: {})",
                    name,
                    ws.default_cli,
                    backends.join(", ")
                )));
            }
            if ws.command_timeout.is_zero() {
                return Err(TelecodeError::config(format!(
                    "workspace {}: command_timeout must be greater than zero",
                    name
                )));
            }
            if ws.allowed_chats.is_empty() {
                warn!("Workspace {} has no allowed_chats; every message will be ignored", name);
            }
        }
        Ok(())
    }

    pub fn to_workspaces(&self) -> Vec<Workspace> {
        self.workspaces.iter().map(WorkspaceConfig::to_workspace).collect()
    }

    /// Copy with bot tokens masked, for display
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        for ws in &mut masked.workspaces {
            ws.bot_token = mask_secret(&ws.bot_token);
        }
        masked
    }
}

impl WorkspaceConfig {
    pub fn to_workspace(&self) -> Workspace {
        Workspace::new(
            self.name.trim(),
            expand_home(&self.working_dir),
            self.bot_token.trim(),
        )
        .with_allowed_chats(self.allowed_chats.iter().copied())
        .with_default_backend(self.default_cli.clone())
        .with_default_model(self.model.clone().filter(|m| !m.trim().is_empty()))
        .with_command_timeout(self.command_timeout)
    }
}

fn known_backends() -> Vec<String> {
    telecode_core::ExecutorRegistry::with_defaults().names()
}

/// Refuse config files other users can reach; they hold bot tokens. A missing
/// file is left for the read to report.
#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        return Ok(());
    };
    let mode = metadata.permissions().mode() & 0o777;
    anyhow::ensure!(
        mode & 0o077 == 0,
        "{} is open to other users (mode {:o}) but holds bot tokens. Fix with: chmod 600 {}",
        path.display(),
        mode,
        path.display()
    );
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

fn expand_home(path: &str) -> PathBuf {
    let path = path.trim();
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

/// Only these variables, plus any TELECODE_* / TELEGRAM_* name, may be expanded
const ALLOWED_ENV_VARS: &[&str] = &["HOME", "USER"];
const ALLOWED_ENV_PREFIXES: &[&str] = &["TELECODE_", "TELEGRAM_"];

fn is_expandable(var_name: &str) -> bool {
    ALLOWED_ENV_VARS.contains(&var_name)
        || ALLOWED_ENV_PREFIXES
            .iter()
            .any(|prefix| var_name.starts_with(prefix) && var_name.len() > prefix.len())
}

static ENV_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("valid env reference pattern"));

/// Replace allowed `${VAR}` references with their values. Disallowed names stay
/// as written so the leftover is visible in the parsed config.
fn expand_env_vars(content: &str) -> String {
    ENV_REFERENCE
        .replace_all(content, |caps: &Captures<'_>| {
            let var_name = &caps[1];
            if !is_expandable(var_name) {
                warn!("Not expanding ${{{}}} in config: variable is not in the allowlist", var_name);
                return caps[0].to_string();
            }
            let value = std::env::var(var_name).unwrap_or_default();
            if value.is_empty() {
                warn!("Environment variable {} referenced in config is empty or unset", var_name);
            }
            value
        })
        .into_owned()
}
