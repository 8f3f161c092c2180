//! Watch the clipboard and print each dispatched item as a JSON line.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use clipreplay_cli::{exit_with, init_logging, load_config};
use clipreplay_core::content::ClipCandidate;
use clipreplay_core::errors::Result;
use clipreplay_core::monitor::{
    CaptureObserver, CaptureOutcome, ChangeListener, ClipboardMonitor, MonitorHooks,
};
use clipreplay_core::platform;

#[derive(Parser)]
#[command(name = "clip-watch", about = "Print captured clipboard changes as JSON lines")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Exit after this many items
    #[arg(long)]
    count: Option<usize>,

    /// Log every capture decision, including skipped changes
    #[arg(long)]
    trace: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Logs each pipeline decision.
struct TraceObserver;

impl CaptureObserver for TraceObserver {
    fn on_intentional_repeat(&self, candidate: &ClipCandidate) {
        log::info!("intentional repeat: {}", candidate.title());
    }

    fn on_clipboard_erased(&self) {
        log::info!("clipboard erased");
    }

    fn on_capture(&self, outcome: CaptureOutcome) {
        log::info!("capture outcome: {outcome:?}");
    }
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut hooks = MonitorHooks {
        windows: platform::windows().ok(),
        ..MonitorHooks::default()
    };
    if args.trace {
        hooks.observer = Arc::new(TraceObserver);
    }

    let monitor = Arc::new(ClipboardMonitor::new(
        config.capture,
        platform::clipboard()?,
        hooks,
    ));
    let reader = monitor.reader();
    monitor.start_monitoring()?;
    let listener = platform::Listener::start(Arc::clone(&monitor) as Arc<dyn ChangeListener>)?;
    log::info!("watching clipboard");

    let mut printed = 0;
    while let Some(candidate) = reader.recv() {
        println!("{}", serde_json::to_string(&candidate)?);
        printed += 1;
        if args.count.is_some_and(|n| printed >= n) {
            break;
        }
    }

    listener.stop();
    monitor.close();
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);
    if let Err(e) = run(args) {
        exit_with("clip-watch", e);
    }
}
