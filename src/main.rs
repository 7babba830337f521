// jukebox - headless live-room player
// Wires the core together, restores saved playlists, runs until Ctrl-C, saves again.

use anyhow::Result;
use clap::Parser;
use jukebox::config::Config;
use jukebox::context::Context;
use jukebox::library;
use jukebox::persist::PlaylistStore;
use jukebox::player::{EngineSignal, NullEngine, PlaybackEngine};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "jukebox")]
#[command(about = "Live-room jukebox: chat requests, playlists and playback on one event bus")]
struct Args {
    /// Enable developer logging (stderr + debug output)
    #[arg(long)]
    dev: bool,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fill the system playlist with the audio files under this directory
    #[arg(long)]
    library: Option<PathBuf>,
}

fn init_logging(dev: bool, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(log_dir, "jukebox.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Base filter: info level for general logs, debug for jukebox
    let base_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,jukebox=debug"));

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false);
    let stderr_layer = dev.then(|| fmt::layer().with_writer(std::io::stderr).with_target(true));

    tracing_subscriber::registry()
        .with(base_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    // Prevent the guard from being dropped
    std::mem::forget(_guard);

    Ok(())
}

/// rodio when it's compiled in and an output device opens, headless otherwise
fn build_engine(config: &Config) -> (Box<dyn PlaybackEngine>, Option<mpsc::UnboundedReceiver<EngineSignal>>) {
    #[cfg(feature = "audio")]
    {
        let (signals, receiver) = mpsc::unbounded_channel();
        let poll = std::time::Duration::from_millis(config.player.poll_interval_ms.max(10));
        match jukebox::player::RodioEngine::spawn(config.player.volume, poll, signals) {
            Ok(engine) => return (Box::new(engine), Some(receiver)),
            Err(e) => warn!("{:#}; running without audio", e),
        }
    }
    #[cfg(not(feature = "audio"))]
    let _ = config;

    (Box::new(NullEngine), None)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    init_logging(args.dev, &config.log_dir)?;
    info!("jukebox starting up");

    let (engine, signals) = build_engine(&config);
    let ctx = Context::initialize(&config, engine)?;
    if let Some(signals) = signals {
        tokio::spawn(ctx.bridge.clone().run_signals(signals));
    }

    let store = PlaylistStore::new(&config.playlists_path);
    store.restore(&ctx.playlists, &ctx.bus);

    if let Some(dir) = &args.library {
        let medias = library::scan_directory(dir);
        ctx.playlists.system().replace(medias)?;
    }

    ctx.start_plugins(&config);
    if config.player.auto_play {
        ctx.controller.play_next();
    }

    info!("Running, Ctrl-C to quit");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let shutdown = ctx.stop();
    if let Err(e) = store.save(&shutdown.saved) {
        error!("{}", e);
    }

    let mut config = config;
    if config.playlist.system_mode != shutdown.system_mode {
        config.playlist.system_mode = shutdown.system_mode;
        let saved = match &args.config {
            Some(path) => config.save_to(path),
            None => config.save(),
        };
        if let Err(e) = saved {
            error!("Failed to save config: {:#}", e);
        }
    }

    Ok(())
}
