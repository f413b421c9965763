use std::io::{self, Write};
use std::sync::Arc;

use agent_provider::Role;
use anyhow::{anyhow, Context, Result};
use meme_agent::agent::IN_PROGRESS_PLACEHOLDER;
use meme_agent::commands::{parse_slash_command, SlashCommand, HELP_TEXT};
use meme_agent::config::AppConfig;
use meme_agent::{bootstrap, logging, providers};
use meme_agent::{RuntimeController, TurnError, TurnHandle, TurnUpdate};
use thread_store::new_thread_id;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

type InputLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging().map_err(|error| anyhow!("failed to install logging: {error}"))?;

    let config = AppConfig::from_env().context("failed to load configuration")?;
    let provider =
        providers::provider_from_config(&config).context("failed to initialize the model provider")?;
    let profile = provider.profile();
    let agent = bootstrap::build_agent(&config, provider).context("failed to assemble the agent")?;
    let controller = RuntimeController::new(Arc::new(agent));

    let mut thread_id = new_thread_id();
    println!(
        "meme_agent ({}/{}), thread {thread_id}. Type /help for commands.",
        profile.provider_id, profile.model_id
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let handle = match parse_slash_command(&line) {
            Some(SlashCommand::Help) => {
                println!("{HELP_TEXT}");
                continue;
            }
            Some(SlashCommand::New) => {
                thread_id = new_thread_id();
                println!("Started thread {thread_id}.");
                continue;
            }
            Some(SlashCommand::Thread(Some(id))) => {
                match controller.agent().store().get(&id) {
                    Ok(Some(thread)) => println!(
                        "Switched to thread {id} ({} messages).",
                        thread.messages.len()
                    ),
                    Ok(None) => println!("Thread {id} is new; it will be created on your next message."),
                    Err(error) => {
                        println!("Cannot open thread {id}: {error}");
                        continue;
                    }
                }
                thread_id = id;
                continue;
            }
            Some(SlashCommand::Thread(None)) => {
                println!("Usage: /thread <id>");
                continue;
            }
            Some(SlashCommand::Cancel) => {
                println!("No turn is running.");
                continue;
            }
            Some(SlashCommand::Quit) => break,
            Some(SlashCommand::Unknown(command)) => {
                println!("Unknown command {command}. Type /help for commands.");
                continue;
            }
            Some(SlashCommand::Retry) => controller.resume(&thread_id),
            None if line.trim().is_empty() => continue,
            None => controller.submit(&thread_id, line),
        };

        match handle {
            Ok(handle) => drive_turn(handle, &mut lines).await?,
            Err(error) => report_error(&error),
        }
    }

    Ok(())
}

/// Prints updates until the turn ends. `/cancel` or Ctrl-C stop it after the
/// current step.
async fn drive_turn(mut handle: TurnHandle, lines: &mut InputLines) -> Result<()> {
    let mut printer = StreamPrinter::default();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            update = handle.next_update() => match update {
                Some(update) => printer.show(&update)?,
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if parse_slash_command(&line) == Some(SlashCommand::Cancel) => {
                    handle.cancel();
                    eprintln!("Cancelling after the current step...");
                }
                Some(_) => eprintln!("A turn is running; type /cancel to stop it."),
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                eprintln!("Cancelling after the current step...");
            }
        }
    }

    printer.finish()?;
    if let Err(error) = handle.finish().await {
        report_error(&error);
    }
    Ok(())
}

fn report_error(error: &TurnError) {
    match error {
        TurnError::ModelUnavailable(reason) => println!(
            "The model is unavailable right now ({reason}). Your message is saved; type /retry to try again."
        ),
        TurnError::Cancelled => println!("Turn cancelled."),
        TurnError::NothingToResume(_) => println!("Nothing to retry on this thread."),
        other => println!("Error: {other}"),
    }
}

/// Renders cumulative assistant text as a stream of suffixes.
#[derive(Default)]
struct StreamPrinter {
    printed: String,
}

impl StreamPrinter {
    fn show(&mut self, update: &TurnUpdate) -> io::Result<()> {
        let mut out = io::stdout().lock();
        if update.role == Role::Tool {
            self.break_line(&mut out)?;
            writeln!(out, "  [tool] {}", update.content)?;
            return out.flush();
        }

        if update.content == IN_PROGRESS_PLACEHOLDER && !update.is_final {
            return self.break_line(&mut out);
        }

        let suffix = match update.content.strip_prefix(self.printed.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => {
                self.break_line(&mut out)?;
                update.content.clone()
            }
        };
        write!(out, "{suffix}")?;
        self.printed.push_str(&suffix);

        if update.is_final {
            self.break_line(&mut out)?;
        }
        out.flush()
    }

    fn break_line(&mut self, out: &mut impl Write) -> io::Result<()> {
        if !self.printed.is_empty() {
            writeln!(out)?;
            self.printed.clear();
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        let mut out = io::stdout().lock();
        self.break_line(&mut out)?;
        out.flush()
    }
}
