//! Inspect replay target resolution for the foreground window.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};

use clipreplay_cli::{exit_with, init_logging, load_config};
use clipreplay_core::errors::Result;
use clipreplay_core::platform;
use clipreplay_core::target::TargetResolver;

#[derive(Parser)]
#[command(name = "clip-target", about = "Show which window a replay would target")]
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
    /// Resolve the target once and print it as JSON
    Resolve {
        /// Lock the resolved target, then resolve again to show the lock holds
        #[arg(long)]
        lock: bool,
    },
    /// Poll and print the target whenever it changes
    Watch {
        /// Poll interval in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,

        /// Stop after this many changes
        #[arg(long)]
        count: Option<usize>,
    },
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut resolver = TargetResolver::new(platform::windows()?, &config.target);

    match args.command {
        Command::Resolve { lock } => {
            let target = resolver.resolve_foreground_target();
            println!("{}", serde_json::to_string_pretty(&target)?);
            if lock {
                resolver.set_target_lock(true)?;
                let locked = resolver.resolve_foreground_target();
                println!("{}", serde_json::to_string_pretty(&locked)?);
            }
            log::info!("mode: {:?}", resolver.mode());
        }
        Command::Watch { interval_ms, count } => {
            let mut last = None;
            let mut changes = 0;
            loop {
                let target = resolver.resolve_foreground_target();
                let handle = target.as_ref().map(|t| t.window_handle);
                if handle != last {
                    println!("{}", serde_json::to_string(&target)?);
                    last = handle;
                    changes += 1;
                    if count.is_some_and(|n| changes >= n) {
                        break;
                    }
                }
                thread::sleep(Duration::from_millis(interval_ms));
            }
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);
    if let Err(e) = run(args) {
        exit_with("clip-target", e);
    }
}
