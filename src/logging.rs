//! Log setup for the binary. Logs go to stderr; stdout carries the conversation.

use std::env;

use tracing_subscriber::EnvFilter;

use crate::config::LOG_ENV_VAR;

pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Picks `MEME_AGENT_LOG`, then `RUST_LOG`, then the default.
fn filter_directive(agent_log: Option<String>, rust_log: Option<String>) -> String {
    [agent_log, rust_log]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

#[must_use]
pub fn env_filter() -> EnvFilter {
    let directive = filter_directive(env::var(LOG_ENV_VAR).ok(), env::var("RUST_LOG").ok());
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

pub fn init_logging() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::filter_directive;

    #[test]
    fn agent_log_wins_over_rust_log() {
        assert_eq!(
            filter_directive(Some("meme_agent=debug".into()), Some("info".into())),
            "meme_agent=debug"
        );
    }

    #[test]
    fn blank_values_fall_through_to_the_default() {
        assert_eq!(filter_directive(Some("  ".into()), None), "warn");
        assert_eq!(filter_directive(None, Some("info".into())), "info");
    }
}
