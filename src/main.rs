use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;
use voxlive_audio::{
    CpalFrameSource, DeviceManager, Direction, FrameSource, NullSink, OutputNode,
    PlaybackScheduler, SyntheticFrameSource, SyntheticSignal, SystemClock,
};
use voxlive_core::{AppConfig, AssistantState, UiCommand};
use voxlive_session::{StreamSession, TransportRegistry};

const DEFAULT_CONFIG_PATH: &str = "voxlive.toml";
const LOG_CAPACITY: usize = 1000;

#[derive(Parser)]
#[command(name = "voxlive", about = "Live voice conversation with a streaming speech model")]
struct Cli {
    /// Path to the configuration file (defaults to voxlive.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stream a synthetic tone instead of the microphone
    #[arg(long)]
    synthetic_input: bool,

    /// Discard model audio instead of playing it
    #[arg(long)]
    no_playback: bool,

    /// Print input and output device names and exit
    #[arg(long)]
    list_devices: bool,
}

fn load_config(explicit: Option<&Path>, default: &Path) -> Result<AppConfig> {
    match explicit {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {:?}", path)),
        None if default.exists() => AppConfig::load_from_file(default)
            .with_context(|| format!("failed to load config from {:?}", default)),
        None => Ok(AppConfig::default()),
    }
}

fn list_devices() -> Result<()> {
    let manager = DeviceManager::new();
    for (label, direction) in [("input", Direction::Input), ("output", Direction::Output)] {
        let names = manager
            .names(direction)
            .with_context(|| format!("failed to enumerate {label} devices"))?;
        println!("{label} devices:");
        for name in names {
            println!("  {name}");
        }
    }
    Ok(())
}

/// Build the playback scheduler. Falls back to a silent clock when playback is
/// disabled or the output device cannot be opened.
fn build_scheduler(config: &AppConfig, no_playback: bool) -> (Arc<PlaybackScheduler>, Option<OutputNode>) {
    if no_playback || !config.audio.playback {
        tracing::info!("playback disabled");
        return (silent_scheduler(), None);
    }

    match OutputNode::start(&config.audio.output_device) {
        Ok((node, handle)) => {
            tracing::info!(
                device = %config.audio.output_device,
                rate = handle.device_rate(),
                "playback started"
            );
            let scheduler = PlaybackScheduler::new(Arc::new(handle.clone()), Arc::new(handle));
            (Arc::new(scheduler), Some(node))
        }
        Err(e) => {
            tracing::warn!("output unavailable, model audio will be discarded: {}", e);
            (silent_scheduler(), None)
        }
    }
}

fn silent_scheduler() -> Arc<PlaybackScheduler> {
    Arc::new(PlaybackScheduler::new(
        Arc::new(SystemClock::new()),
        Arc::new(NullSink),
    ))
}

fn build_source(config: &AppConfig, synthetic: bool) -> Box<dyn FrameSource> {
    let audio = &config.audio;
    if synthetic {
        tracing::info!("using synthetic tone input");
        Box::new(SyntheticFrameSource::new(
            audio.input_sample_rate,
            audio.block_size,
            SyntheticSignal::Tone {
                frequency: 440.0,
                amplitude: 0.2,
            },
        ))
    } else {
        tracing::info!(device = %audio.input_device, "using microphone input");
        Box::new(CpalFrameSource::new(
            &audio.input_device,
            audio.input_sample_rate,
            audio.block_size,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_devices {
        return list_devices();
    }

    let config = load_config(cli.config.as_deref(), Path::new(DEFAULT_CONFIG_PATH))?;

    // Set up TUI log buffer and layered tracing subscriber
    let log_buffer = voxlive_tui::new_log_buffer();
    let tui_log_layer = voxlive_tui::TuiLogLayer::new(Arc::clone(&log_buffer), LOG_CAPACITY);

    let env_filter = EnvFilter::try_new(&config.general.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tui_log_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    tracing::info!("voxlive starting");

    let (scheduler, mut output_node) = build_scheduler(&config, cli.no_playback);
    let source = build_source(&config, cli.synthetic_input);

    let registry = TransportRegistry::new();
    let transport = registry
        .create(&config.session.transport)
        .with_context(|| format!("available transports: {:?}", registry.list_transports()))?;
    tracing::info!(
        transport = transport.name(),
        model = %config.session.model,
        "session configured"
    );

    let session = Arc::new(StreamSession::new(&config, transport, source, scheduler));

    // Set up TUI communication channels
    let (state_tx, state_rx) = tokio::sync::watch::channel(AssistantState::default());
    let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel::<UiCommand>();

    // Spawn state broadcast task (~30Hz)
    let broadcast_session = Arc::clone(&session);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(33));
        loop {
            interval.tick().await;
            if state_tx.send(broadcast_session.snapshot()).is_err() {
                break; // TUI closed
            }
        }
    });

    // Spawn command handler task
    let cmd_session = Arc::clone(&session);
    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                UiCommand::StartSession => {
                    // Opening waits on the network; keep the command loop free.
                    let session = Arc::clone(&cmd_session);
                    tokio::spawn(async move {
                        if let Err(e) = session.open().await {
                            tracing::error!("failed to start session: {}", e);
                        }
                    });
                }
                UiCommand::EndSession => {
                    if let Err(e) = cmd_session.close().await {
                        tracing::warn!("failed to end session: {}", e);
                    }
                }
                UiCommand::Quit => {
                    break;
                }
            }
        }
    });

    tracing::info!("TUI active, press 's' to start and 'q' to quit");

    // Run TUI (blocks until user quits)
    voxlive_tui::run(state_rx, cmd_tx, log_buffer)
        .await
        .context("TUI error")?;

    tracing::info!("shutting down");
    if let Err(e) = session.close().await {
        tracing::debug!("no session to close: {}", e);
    }
    if let Some(node) = output_node.as_mut() {
        node.stop();
    }

    Ok(())
}
