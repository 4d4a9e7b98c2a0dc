//! Audio subsystem: capture, resampling, and gapless playback

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;
pub mod resample;

pub use buffer::{create_pending_buffer, AudioFrame, DecodedSegment, SharedPendingBuffer};
pub use capture::{CaptureEvent, CapturePipeline, CpalMic, MicSource};
pub use device::{default_input_device_name, list_input_devices, DeviceInfo};
pub use playback::{CpalSink, OutputSink, PlaybackEvent, PlaybackQueue};
pub use resample::resample;
