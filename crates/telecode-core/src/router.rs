//! Maps inbound text to an administrative command or an assistant prompt

/// What an inbound message asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// `/start` or `/help`
    Help,
    /// `/new`
    NewSession,
    /// `/status`
    Status,
    /// `/cli [<name> [<model>]]`; without a name it lists the backends
    SwitchBackend {
        backend: Option<String>,
        model: Option<String>,
    },
    /// `/model [<name>]`; without a name it resets to the default
    SetModel(Option<String>),
    /// `/models`
    ListModels,
    /// `/stats`
    Stats,
    /// Anything else goes to the active backend verbatim
    Prompt(String),
}

impl ChatCommand {
    pub fn parse(text: &str) -> Self {
        let Some(command) = leading_command(text) else {
            return Self::Prompt(text.to_string());
        };

        let mut args = text.split_whitespace().skip(1).map(str::to_string);

        match command {
            "/start" | "/help" => Self::Help,
            "/new" => Self::NewSession,
            "/status" => Self::Status,
            "/cli" => Self::SwitchBackend {
                backend: args.next(),
                model: args.next(),
            },
            "/model" => Self::SetModel(args.next()),
            "/models" => Self::ListModels,
            "/stats" => Self::Stats,
            // Unknown commands are prompts: assistants have slash commands of their own
            _ => Self::Prompt(text.to_string()),
        }
    }
}

/// First whitespace-delimited token when it starts with `/`, with any
/// Telegram `@botname` suffix removed
pub fn leading_command(text: &str) -> Option<&str> {
    let token = text.split_whitespace().next()?;
    if !token.starts_with('/') || !text.starts_with('/') {
        return None;
    }
    Some(token.split('@').next().unwrap_or(token))
}

pub const HELP_TEXT: &str = "\
Send any message to talk to the assistant in this workspace.

Commands:
/new - start a new session
/status - show CLI, session and model
/cli <name> [model] - switch CLI (clears the session)
/model [name] - set the model, or reset to default
/models - list models of the current CLI
/stats - show CLI statistics";
