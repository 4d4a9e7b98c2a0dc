//! Client configuration
//!
//! Defaults cover the common deployment (16 kHz mono mic, 24 kHz raw PCM
//! responses); a TOML file can override any section.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::*;
use crate::error::{Error, Result};

/// Microphone capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device name, or `None` for the system default input
    pub device: Option<String>,

    /// Sample rate to acquire the microphone at (16000 or 24000 typically)
    pub sample_rate: u32,

    /// Requested input block size in samples
    pub block_size: u32,

    /// Interval between outbound drains in milliseconds (100-200 sensible)
    pub drain_interval_ms: u64,

    /// Backend processing hints; honored where the platform supports them
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: DEFAULT_CAPTURE_SAMPLE_RATE,
            block_size: DEFAULT_CAPTURE_BLOCK_SIZE,
            drain_interval_ms: DEFAULT_DRAIN_INTERVAL_MS,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: true,
        }
    }
}

/// Framing of raw (headerless) inbound PCM. Ignored for WAV-wrapped
/// messages, which carry their own format fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for InboundFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_INBOUND_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

/// Socket endpoints and lifecycle tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Outbound (send-only) socket endpoint; required
    pub outbound_url: String,

    /// Inbound (receive-only) socket endpoint; some deployments have none
    pub inbound_url: Option<String>,

    /// Sample rate negotiated for outbound PCM
    pub outbound_sample_rate: u32,

    /// Raw-PCM framing assumed for inbound messages without a WAV header
    pub inbound: InboundFormat,

    /// Socket open deadline in milliseconds
    pub connect_timeout_ms: u64,

    /// Reconnect attempts before entering the terminal failed state
    pub reconnect_attempts: u32,

    /// Fixed delay between reconnect attempts in milliseconds
    pub reconnect_backoff_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            outbound_url: "ws://127.0.0.1:8765/audio/in".to_string(),
            inbound_url: Some("ws://127.0.0.1:8765/audio/out".to_string()),
            outbound_sample_rate: DEFAULT_CAPTURE_SAMPLE_RATE,
            inbound: InboundFormat::default(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff_ms: RECONNECT_BACKOFF_MS,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub transport: TransportConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }
}
