//! Streaming voice client
//!
//! Captures the default microphone, streams PCM to the configured
//! endpoints, and plays the streamed response. Ctrl+C stops the session.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voicelink::{
    audio::{list_input_devices, CpalMic, CpalSink},
    config::AppConfig,
    net::WsConnector,
    Notification, SessionController,
};

const STATS_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting voicelink client");

    // Optional config file as first argument
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&PathBuf::from(path))?,
        None => AppConfig::default(),
    };

    tracing::info!(
        outbound = %config.transport.outbound_url,
        inbound = ?config.transport.inbound_url,
        capture_rate = config.capture.sample_rate,
        "configuration loaded"
    );

    // List available microphones
    match list_input_devices() {
        Ok(devices) => {
            for device in &devices {
                tracing::info!(
                    name = %device.name,
                    default = device.is_default,
                    "input device"
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not enumerate input devices"),
    }

    let (handle, mut notifications) = SessionController::spawn(
        config,
        Box::new(CpalMic::new()),
        Box::new(CpalSink::new(None)),
        Arc::new(WsConnector),
    );

    handle.start().await?;
    tracing::info!("Session started - press Ctrl+C to stop");

    let mut stats_timer =
        tokio::time::interval(std::time::Duration::from_secs(STATS_INTERVAL_SECS));
    stats_timer.tick().await; // immediate first tick

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stopping session");
                handle.stop().await;
                break;
            }
            _ = stats_timer.tick() => {
                let stats = handle.stats().await;
                tracing::info!(
                    chunks_emitted = stats.capture.chunks_emitted,
                    chunks_sent = stats.connection.chunks_sent,
                    chunks_dropped = stats.connection.chunks_dropped,
                    reconnects = stats.connection.reconnects,
                    segments_played = stats.playback.segments_played,
                    "session stats"
                );
            }
            notification = notifications.recv() => match notification {
                Some(Notification::ConnectivityChanged(connected)) => {
                    tracing::info!(connected, "connectivity changed");
                }
                Some(Notification::CaptureActiveChanged(active)) => {
                    tracing::info!(active, "capture state changed");
                }
                Some(Notification::Fatal { kind, message }) => {
                    tracing::error!(?kind, %message, "session terminated");
                    break;
                }
                None => break,
            },
        }
    }

    Ok(())
}
