//! Audio device enumeration
//!
//! Listing is a host-facing convenience (pick a device name for
//! `CaptureConfig::device`); the capture pipeline itself looks devices up by
//! name at start.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::DeviceError;

/// One selectable input device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// List the available microphone devices. Devices whose name cannot be read
/// are skipped.
pub fn list_input_devices() -> Result<Vec<DeviceInfo>, DeviceError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::PermissionDenied(e.to_string()))?;

    let mut out = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            let is_default = default_name.as_deref() == Some(name.as_str());
            out.push(DeviceInfo { name, is_default });
        }
    }
    Ok(out)
}

/// Name of the system default microphone, if one exists
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| d.name().ok())
}
