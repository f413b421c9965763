#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    New,
    /// `/thread <id>`; `None` when the id is missing.
    Thread(Option<String>),
    Retry,
    Cancel,
    Quit,
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
/help          show this help
/new           start a fresh thread
/thread <id>   switch to an existing thread
/retry         resume the current thread after a failure
/cancel        stop the running turn after its current tool round
/quit          exit";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.split_whitespace();
    let command = parts.next().unwrap_or(trimmed).to_string();

    let parsed = match command.as_str() {
        "/help" => SlashCommand::Help,
        "/new" => SlashCommand::New,
        "/thread" => SlashCommand::Thread(parts.next().map(str::to_string)),
        "/retry" => SlashCommand::Retry,
        "/cancel" => SlashCommand::Cancel,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}
