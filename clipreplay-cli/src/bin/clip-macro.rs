//! Tokenize, check and run keystroke macros.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};

use clipreplay_cli::{exit_with, init_logging, load_config};
use clipreplay_core::errors::{ClipReplayError, Result};
use clipreplay_core::input::{KeystrokeSimulator, RecordingKeyboard};
use clipreplay_core::macros::{self, CancelToken, MacroInterpreter};
use clipreplay_core::platform;
use clipreplay_core::replay::ReplayEngine;

#[derive(Parser)]
#[command(name = "clip-macro", about = "Tokenize, check and replay keystroke macros")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the token stream as JSON
    Tokens {
        /// Macro text, e.g. "^a{TAB 2}hello{ENTER}"
        text: String,
    },
    /// Exit 0 if the macro is safe to run, 1 otherwise
    Check {
        text: String,
    },
    /// Replay the macro into the foreground window
    Run {
        text: String,

        /// Seconds to wait so another window can be focused
        #[arg(long, default_value = "3")]
        delay: u64,

        /// Run even if the macro closes too many windows
        #[arg(long)]
        force: bool,

        /// Print the key events instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
}

fn run_macro(
    text: &str,
    delay: u64,
    force: bool,
    dry_run: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    if !force && !macros::is_macro_safe(text) {
        return Err(ClipReplayError::InvalidArgument(
            "macro closes more than two windows; pass --force to run it".into(),
        ));
    }
    let config = load_config(config_path.as_deref())?;

    if dry_run {
        let keyboard = Arc::new(RecordingKeyboard::new());
        let interpreter = MacroInterpreter::new(
            KeystrokeSimulator::new(Arc::clone(&keyboard) as _),
            &config.replay,
        );
        let report = interpreter.run(text, &CancelToken::new())?;
        for event in keyboard.events() {
            println!("{}", serde_json::to_string(&event)?);
        }
        log::info!("{} token(s), {} event(s)", report.tokens, report.events_accepted);
        return Ok(());
    }

    let mut engine = ReplayEngine::new(
        platform::keyboard()?,
        platform::windows()?,
        platform::clipboard_writer(0)?,
        &config,
    );
    log::info!("focus the target window; replaying in {delay}s");
    thread::sleep(Duration::from_secs(delay));
    let report = engine.run_macro(text, &CancelToken::new())?;
    if let Some(target) = engine.current_target() {
        log::info!("replayed into {} ({})", target.process_name, target.window_title);
    }
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let result = match args.command {
        Command::Tokens { text } => serde_json::to_string_pretty(&macros::tokenize(&text))
            .map(|json| println!("{json}"))
            .map_err(ClipReplayError::from),
        Command::Check { text } => {
            let safe = macros::is_macro_safe(&text);
            println!("{}", if safe { "safe" } else { "unsafe" });
            if !safe {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Run {
            text,
            delay,
            force,
            dry_run,
        } => run_macro(&text, delay, force, dry_run, args.config),
    };
    if let Err(e) = result {
        exit_with("clip-macro", e);
    }
}
