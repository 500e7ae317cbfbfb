mod audio;
mod config;
mod pipeline;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tracing::{info, warn};

use wlcast_media::{Cropped, FrameSource, JpegFrameEncoder, OpusEncoder, TestPattern, ToneSource};
use wlcast_proto::transport::bind_sender;
use wlcast_proto::{FrameSender, QualityController, StreamLogger, TracingLogger};

use crate::audio::AudioStreamer;
use crate::config::{SourceKind, StreamerConfig};
use crate::pipeline::Pipeline;

const TONE_HZ: f32 = 440.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wlcast_stream=info,wlcast_proto=info,wlcast_media=info".into()),
        )
        .init();

    let config = StreamerConfig::from_env().context("invalid streamer configuration")?;
    let logger: Arc<dyn StreamLogger> = Arc::new(TracingLogger);

    let base: Box<dyn FrameSource + Send> = match config.source {
        SourceKind::Screen => screen_source(&config)?,
        SourceKind::Pattern => {
            info!(
                "streaming a {}x{} test pattern",
                config.source_width, config.source_height
            );
            Box::new(TestPattern::new(
                config.source_width,
                config.source_height,
                config.source_hz,
            ))
        }
    };
    let source: Box<dyn FrameSource + Send> = match config.region {
        Some(region) => {
            info!("capturing region {}", region);
            Box::new(Cropped::new(base, region))
        }
        None => base,
    };

    let sender = FrameSender::connect(config.dest, config.chunk_size)
        .with_context(|| format!("failed to open video socket for {}", config.dest))?;
    let controller = QualityController::new(config.controller(), config.quality);
    let mut pipeline = Pipeline::new(
        source,
        JpegFrameEncoder::new(config.quality),
        sender,
        controller,
        logger.clone(),
    );

    // Audio gets its own socket so it never competes with video for the
    // send buffer. Failing to start it leaves video running.
    let mut audio = if config.audio {
        match start_audio(&config, logger.clone()) {
            Ok(streamer) => Some(streamer),
            Err(e) => {
                warn!("audio disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let running = Arc::new(AtomicBool::new(true));
    let pipeline_running = running.clone();
    let mut handle = tokio::task::spawn_blocking(move || pipeline.run(&pipeline_running));

    let finished = tokio::select! {
        _ = shutdown_signal() => None,
        joined = &mut handle => Some(joined),
    };
    let result = match finished {
        Some(joined) => joined,
        None => {
            running.store(false, Ordering::Relaxed);
            handle.await
        }
    };

    if let Some(audio) = audio.as_mut() {
        if !audio.is_running() {
            warn!("audio thread exited before shutdown");
        }
        audio.stop();
    }

    result.context("streamer thread panicked")??;
    Ok(())
}

#[cfg(feature = "screen")]
fn screen_source(config: &StreamerConfig) -> anyhow::Result<Box<dyn FrameSource + Send>> {
    let hz = if config.fps_limit > 0 {
        config.fps_limit
    } else {
        config.source_hz
    };
    let screen = wlcast_media::ScreenSource::primary(hz).context("failed to capture the primary display")?;
    Ok(Box::new(screen))
}

#[cfg(not(feature = "screen"))]
fn screen_source(_config: &StreamerConfig) -> anyhow::Result<Box<dyn FrameSource + Send>> {
    anyhow::bail!("built without screen capture, set WLCAST_SOURCE=pattern")
}

fn start_audio(config: &StreamerConfig, logger: Arc<dyn StreamLogger>) -> anyhow::Result<AudioStreamer> {
    let encoder = OpusEncoder::new().context("failed to create opus encoder")?;
    let socket = bind_sender(config.dest).context("failed to open audio socket")?;
    let streamer = AudioStreamer::start(ToneSource::new(TONE_HZ), encoder, socket, config.dest, logger)
        .context("failed to start audio thread")?;
    Ok(streamer)
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
