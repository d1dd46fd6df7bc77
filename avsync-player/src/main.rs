//! avsync player - command-line entry point
//!
//! Plays a generated A/V session through the engine in real time and
//! reports the outcome. Audio goes to the simulated device, or to the
//! platform output with `--real-audio` (feature `cpal-output`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use avsync_common::config::{ConfigResolver, ConfigSource};
use avsync_common::events::PlayerEvent;
use avsync_common::time::{MonotonicClock, SystemClock};
use avsync_player::audio::AudioDeviceFactory;
use avsync_player::sim::{
    LoopbackDecoderFactory, SimulatedAudioDeviceFactory, SyntheticSource, SyntheticTrack,
};
use avsync_player::{Player, PlayerConfig};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for avsync-player
#[derive(Parser, Debug)]
#[command(name = "avsync-player")]
#[command(about = "Audio/video synchronization engine")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "AVSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Number of generated audio chunks (0 for no audio track)
    #[arg(long, default_value = "250")]
    audio_chunks: usize,

    /// Bytes per generated audio chunk
    #[arg(long, default_value = "3840")]
    chunk_bytes: usize,

    /// Number of generated video frames (0 for no video track)
    #[arg(long, default_value = "150")]
    video_frames: usize,

    /// Video frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Audio sample rate (Hz)
    #[arg(long, default_value = "48000")]
    sample_rate: u32,

    /// Audio channel count
    #[arg(long, default_value = "2")]
    channels: u32,

    /// Give up after this many seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Log level, overrides the config file (RUST_LOG overrides both)
    #[arg(long)]
    log_level: Option<String>,

    /// Print the final statistics as JSON
    #[arg(long)]
    json: bool,

    /// Print the effective [player] configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Play audio through the default output device
    #[cfg(feature = "cpal-output")]
    #[arg(long)]
    real_audio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is loaded before tracing so its log level can apply
    let (toml_config, source) = ConfigResolver::new()
        .load(args.config.as_deref())
        .context("Failed to load configuration")?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| toml_config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("avsync_player={0},avsync_common={0}", level))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting avsync-player v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &source {
        ConfigSource::File(path) => info!("Configuration: {}", path.display()),
        ConfigSource::Defaults => info!("Configuration: built-in defaults"),
    }

    let config = PlayerConfig::from_toml(&toml_config).context("Invalid [player] configuration")?;
    debug!("Player configuration: {:?}", config);
    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    if args.audio_chunks == 0 && args.video_frames == 0 {
        bail!("Nothing to play: both --audio-chunks and --video-frames are 0");
    }

    let clock: Arc<dyn MonotonicClock> = Arc::new(SystemClock::new());
    let player = Arc::new(
        Player::new(
            config,
            Arc::new(LoopbackDecoderFactory::new()),
            audio_devices(&args, &clock),
            Arc::clone(&clock),
        )
        .context("Failed to create player")?,
    );

    let mut events = player.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PlayerEvent::FrameDropped {
                    presentation_time_us,
                    late_us,
                    ..
                }) => debug!("Dropped frame at {} us ({} us late)", presentation_time_us, late_us),
                Ok(PlayerEvent::PlaybackFailed { message, .. }) => {
                    error!("Playback failed: {}", message)
                }
                Ok(other) => info!("{}: {:?}", other.event_type(), other),
                Err(RecvError::Lagged(missed)) => warn!("Event log missed {} events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if args.audio_chunks > 0 {
        let source = SyntheticSource::new().with_track(SyntheticTrack::audio(
            args.sample_rate,
            args.channels,
            args.audio_chunks,
            args.chunk_bytes,
        ));
        player.set_audio_source(Box::new(source))?;
    }
    if args.video_frames > 0 {
        let source = SyntheticSource::new().with_track(SyntheticTrack::video(
            1280,
            720,
            args.video_frames,
            args.fps,
            4096,
        ));
        player.set_video_source(Box::new(source))?;
    }

    player.start()?;
    player.prepare().context("Failed to prepare playback")?;
    if let Some(duration_ms) = player.duration_ms()? {
        info!("Session duration: {} ms", duration_ms);
    }
    player.start_worker().context("Failed to start playback")?;

    let finished = wait_for_end(&player, Duration::from_secs(args.timeout_secs)).await?;

    let stats = player.stats()?;
    player.reset().context("Failed to reset player")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "session {} {}: position {} ms of {:?} ms, master clock {} us",
            stats.session_id,
            if stats.ended { "ended" } else { "stopped" },
            stats.position_ms,
            stats.duration_ms,
            stats.master_clock_us
        );
        for track in &stats.tracks {
            println!(
                "  track {} ({}): fed {}, rendered {}, dropped {}, audio bytes {}",
                track.track_index,
                track.kind,
                track.samples_fed,
                track.frames_rendered,
                track.frames_dropped,
                track.audio_bytes_queued
            );
        }
    }

    if let Some(message) = stats.last_error {
        bail!("Playback failed: {}", message);
    }
    if !finished {
        warn!("Playback did not reach end of stream");
    }
    Ok(())
}

#[cfg(feature = "cpal-output")]
fn audio_devices(args: &Args, clock: &Arc<dyn MonotonicClock>) -> Arc<dyn AudioDeviceFactory> {
    if args.real_audio {
        info!("Audio output: default device");
        return Arc::new(avsync_player::audio::CpalAudioDeviceFactory);
    }
    Arc::new(SimulatedAudioDeviceFactory::new(Arc::clone(clock)))
}

#[cfg(not(feature = "cpal-output"))]
fn audio_devices(_args: &Args, clock: &Arc<dyn MonotonicClock>) -> Arc<dyn AudioDeviceFactory> {
    Arc::new(SimulatedAudioDeviceFactory::new(Arc::clone(clock)))
}

/// Poll until playback ends, fails, times out or is interrupted.
///
/// Returns true if every track reached end of stream.
async fn wait_for_end(player: &Player, timeout: Duration) -> Result<bool> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            _ = poll.tick() => {
                if player.is_ended()? {
                    info!("All tracks reached end of stream");
                    return Ok(true);
                }
                if player.last_error()?.is_some() {
                    return Ok(false);
                }
            }
            _ = &mut deadline => {
                warn!("Timed out after {:?}", timeout);
                return Ok(false);
            }
            result = signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, stopping");
                return Ok(false);
            }
        }
    }
}
