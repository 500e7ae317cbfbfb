mod config;
#[cfg(feature = "audio-device")]
mod device;
mod player;
#[cfg(feature = "terminal")]
mod terminal;
mod viewer;

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tracing::{info, warn};

use wlcast_media::{JpegFrameDecoder, OpusDecoder};
use wlcast_proto::transport::buffer_sizes;
use wlcast_proto::{FrameReceiver, StreamLogger, TracingLogger};

use crate::config::{AudioSink, Display, ViewerConfig};
use crate::player::{AudioOutput, AudioPlayer};
use crate::viewer::{FramePresenter, LatestFrame, Viewer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // stdout belongs to the terminal display.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wlcast_view=info,wlcast_proto=info,wlcast_media=info".into()),
        )
        .init();

    let config = ViewerConfig::from_env().context("invalid viewer configuration")?;
    let logger: Arc<dyn StreamLogger> = Arc::new(TracingLogger);

    let receiver = FrameReceiver::bind(config.bind, config.chunk_size)
        .with_context(|| format!("failed to bind {}", config.bind))?;
    match buffer_sizes(receiver.socket()) {
        Ok((send, recv)) => info!(
            "listening on {} chunk_size={} (sndbuf={} rcvbuf={})",
            config.bind,
            config.chunk_size.get(),
            send,
            recv
        ),
        Err(e) => warn!("listening on {}, buffer sizes unknown: {}", config.bind, e),
    }

    let player = if config.audio {
        match start_player(&config.audio_out) {
            Ok(player) => Some(player),
            Err(e) => {
                warn!("failed to start audio player, continuing without audio: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let presenter = presenter(config.display)?;
    let mut viewer = Viewer::new(receiver, JpegFrameDecoder, presenter, player, logger);

    let running = Arc::new(AtomicBool::new(true));
    let viewer_running = running.clone();
    let mut handle = tokio::task::spawn_blocking(move || {
        let result = viewer.run(&viewer_running);
        viewer.stop_audio();
        result
    });

    let finished = tokio::select! {
        _ = shutdown_signal() => None,
        _ = quit_requested(config.display, running.clone()) => {
            info!("Quit key pressed, shutting down...");
            None
        }
        joined = &mut handle => Some(joined),
    };
    running.store(false, Ordering::Relaxed);
    let result = match finished {
        Some(joined) => joined,
        None => handle.await,
    };

    result.context("viewer thread panicked")??;
    Ok(())
}

fn start_player(sink: &AudioSink) -> anyhow::Result<AudioPlayer> {
    let decoder = OpusDecoder::new().context("failed to create opus decoder")?;
    let output = match sink {
        #[cfg(feature = "audio-device")]
        AudioSink::Device => AudioOutput::Device,
        #[cfg(not(feature = "audio-device"))]
        AudioSink::Device => anyhow::bail!("built without sound device output"),
        AudioSink::File(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create audio output {}", path.display()))?;
            AudioOutput::Writer(Box::new(BufWriter::new(file)))
        }
        AudioSink::Discard => AudioOutput::Discard,
    };
    Ok(AudioPlayer::start(decoder, output)?)
}

fn presenter(display: Display) -> anyhow::Result<Box<dyn FramePresenter + Send>> {
    match display {
        #[cfg(feature = "terminal")]
        Display::Terminal => {
            let terminal = terminal::TerminalPresenter::new().context("failed to set up the terminal")?;
            Ok(Box::new(terminal))
        }
        #[cfg(not(feature = "terminal"))]
        Display::Terminal => anyhow::bail!("built without terminal display, set WLCAST_DISPLAY=none"),
        Display::Headless => Ok(Box::new(LatestFrame::default())),
    }
}

/// Resolves when the terminal display's quit key is pressed. Pending forever
/// for other displays.
async fn quit_requested(display: Display, running: Arc<AtomicBool>) {
    #[cfg(feature = "terminal")]
    if display == Display::Terminal {
        match tokio::task::spawn_blocking(move || terminal::wait_for_quit(&running)).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => warn!("terminal input failed: {}", e),
            Err(e) => warn!("terminal input task failed: {}", e),
        }
    }
    #[cfg(not(feature = "terminal"))]
    let _ = (display, running);
    std::future::pending::<()>().await
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
