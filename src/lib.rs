//! # Voicelink
//!
//! Real-time voice streaming client core: captures microphone input,
//! converts it to transport-ready 16-bit PCM, streams it over a persistent
//! socket pair, and plays the streamed response back gaplessly.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        SESSION CONTROLLER                        │
//! │                                                                  │
//! │  ┌────────────┐  AudioFrame  ┌───────────┐  PcmChunk  ┌───────┐  │
//! │  │ Microphone │─────────────▶│  Capture  │───────────▶│ Conn. │──┼──▶ outbound socket
//! │  │  (cpal)    │  ring buffer │ Pipeline  │ 150ms drain│ Mgr.  │  │    (raw PCM16 LE)
//! │  └────────────┘              └───────────┘            └───┬───┘  │
//! │                                                           │      │
//! │  ┌────────────┐  DecodedSegment  ┌───────────┐   bytes    │      │
//! │  │  Speaker   │◀─────────────────│ Playback  │◀───decode──┴──────┼─── inbound socket
//! │  │  (cpal)    │  one at a time   │  Queue    │  (raw PCM / WAV)  │    (PCM16 or WAV)
//! │  └────────────┘                  └───────────┘                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The session controller runs a single event loop: capture drain ticks,
//! inbound socket messages, playback completions and reconnect timers are
//! all delivered to it as queued events, never as ad hoc callbacks. The
//! only blocking work (the cpal input/output streams) lives on dedicated
//! threads that communicate through lock-free buffers.
//!
//! Connection loss triggers a bounded reconnect loop (3 attempts, fixed
//! 2 s backoff); exhausting it tears the session down with a single fatal
//! notification to the embedding host.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod net;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};
pub use session::{Notification, SessionController, SessionHandle, SessionStats};

/// Application-wide constants
pub mod constants {
    /// Default microphone sample rate (matches the common deployment)
    pub const DEFAULT_CAPTURE_SAMPLE_RATE: u32 = 16_000;

    /// Default sample rate of raw inbound PCM when no WAV header is present
    pub const DEFAULT_INBOUND_SAMPLE_RATE: u32 = 24_000;

    /// The pipeline is mono end to end
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Interval between outbound chunk drains
    pub const DEFAULT_DRAIN_INTERVAL_MS: u64 = 150;

    /// Socket open deadline
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1_500;

    /// Reconnect attempts before giving up
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

    /// Fixed delay between reconnect attempts
    pub const RECONNECT_BACKOFF_MS: u64 = 2_000;

    /// Capture block size in samples (~128 ms at 16 kHz)
    pub const DEFAULT_CAPTURE_BLOCK_SIZE: u32 = 2_048;

    /// Lock-free pending buffer capacity (in frames)
    pub const PENDING_BUFFER_CAPACITY: usize = 256;
}
