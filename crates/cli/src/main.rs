//! treewatch - print filesystem events for whole directory trees

use anyhow::{bail, Context, Result};
use clap::Parser;
use nix::sys::signal::{SigSet, Signal};
use owo_colors::OwoColorize;
use std::io::{IsTerminal, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use treewatch::{Event, EventMask, EventStream, PollTreeWatcher, WaitOutcome, WatchConfig};

/// Watch directory trees and print every event as it happens
#[derive(Parser, Debug)]
#[command(name = "treewatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Events to report, e.g. "CREATE|DELETE|MOVE" [default: ALL_EVENTS]
    #[arg(short, long)]
    mask: Option<EventMask>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Watch only the given paths, not their subdirectories
    #[arg(long)]
    no_recursive: bool,

    /// Give up after this many seconds without events
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<f64>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Paths to watch
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => WatchConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => WatchConfig::default(),
    };
    let mask = requested_mask(&cli, &config);
    let timeout = cli
        .timeout
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("Invalid timeout")?;

    let (trigger, stop) = UnixStream::pair().context("Failed to create stop channel")?;
    forward_signals(trigger)?;

    let mut watcher = PollTreeWatcher::open(&config, Some(stop.as_fd()))
        .context("Failed to open inotify")?;

    let result = run(&mut watcher, &cli, mask, timeout);
    let closed = watcher.close().context("Failed to close watcher");
    result.and(closed)
}

/// `--mask` wins over the configured default
fn requested_mask(cli: &Cli, config: &WatchConfig) -> EventMask {
    cli.mask.unwrap_or(config.default_mask)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Turn SIGINT and SIGTERM into a write on `trigger`
///
/// Must run before any other thread is spawned so every thread inherits the
/// blocked mask.
fn forward_signals(mut trigger: UnixStream) -> Result<()> {
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block().context("Failed to block signals")?;

    thread::Builder::new()
        .name("signals".into())
        .spawn(move || match signals.wait() {
            Ok(signal) => {
                debug!(?signal, "received signal");
                if let Err(err) = trigger.write_all(&[0]) {
                    warn!(%err, "failed to request stop");
                }
            }
            Err(err) => warn!(%err, "waiting for signals failed"),
        })
        .context("Failed to spawn signal thread")?;

    Ok(())
}

fn run(
    watcher: &mut PollTreeWatcher<'_>,
    cli: &Cli,
    mask: EventMask,
    timeout: Option<Duration>,
) -> Result<()> {
    for path in &cli.paths {
        let added = if cli.no_recursive {
            watcher.add_watch(path, mask)
        } else {
            watcher.add_tree(path, mask)
        };
        added.with_context(|| format!("Failed to watch {}", path.display()))?;
    }
    info!(paths = cli.paths.len(), %mask, "watching");

    let color = std::io::stdout().is_terminal();
    let mut stdout = std::io::stdout().lock();

    loop {
        match watcher.wait(timeout)? {
            WaitOutcome::Ready => {
                for event in watcher.events() {
                    writeln!(stdout, "{}", format_event(&event?, color))?;
                }
                stdout.flush()?;
            }
            WaitOutcome::Stopped => {
                info!("stop requested");
                return Ok(());
            }
            WaitOutcome::TimedOut => {
                bail!("No events within {:?}", timeout.unwrap_or_default());
            }
        }
    }
}

fn format_event(event: &Event, color: bool) -> String {
    let path = event
        .full_path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "(queue overflow)".to_string());
    let names = event.mask.names().collect::<Vec<_>>().join(", ");

    if color {
        format!("{}: {}", path.cyan(), names.yellow())
    } else {
        format!("{}: {}", path, names)
    }
}
