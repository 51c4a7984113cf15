//! Audio capture module
//!
//! Provides microphone access through the [`DeviceGateway`] trait. The real
//! implementation uses cpal, which works with PipeWire, PulseAudio, and ALSA
//! backends; [`scripted::ScriptedGateway`] stands in for hardware in tests
//! and `--simulate` runs.

pub mod cpal_capture;
pub mod level;
pub mod scripted;
pub mod wav;

use crate::config::AudioConfig;
use crate::error::DeviceError;

/// PCM format shared by the device, the level meter and the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub little_endian: bool,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44_100,
            bits_per_sample: 16,
            channels: 1,
            little_endian: true,
        }
    }
}

impl AudioFormat {
    /// Bytes per frame (one sample across all channels)
    pub fn frame_size(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// Duration of `frames` frames at this format's rate
    pub fn frames_to_duration(&self, frames: u32) -> std::time::Duration {
        if self.sample_rate_hz == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(frames as f64 / self.sample_rate_hz as f64)
    }

    /// Reject formats the engine cannot capture or encode
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.bits_per_sample != 16 {
            return Err(DeviceError::Unsupported(format!(
                "{}-bit samples (only 16-bit PCM is supported)",
                self.bits_per_sample
            )));
        }
        if !self.little_endian {
            return Err(DeviceError::Unsupported(
                "big-endian samples".to_string(),
            ));
        }
        if self.channels == 0 || self.sample_rate_hz == 0 {
            return Err(DeviceError::Unsupported(format!(
                "{} Hz, {} channel(s)",
                self.sample_rate_hz, self.channels
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit, {} channel(s), {}",
            self.sample_rate_hz,
            self.bits_per_sample,
            self.channels,
            if self.little_endian { "LE" } else { "BE" }
        )
    }
}

/// Opens capture devices for a fixed format
///
/// A gateway has no notion of sessions: it hands out devices, and whoever
/// holds a device owns it until it is closed or dropped.
pub trait DeviceGateway: Send + Sync {
    /// Open the input device for `format`
    fn open(&self, format: &AudioFormat) -> Result<Box<dyn CaptureDevice>, DeviceError>;

    /// Cheap open/close probe used for permission checks
    fn probe(&self, format: &AudioFormat) -> Result<(), DeviceError> {
        let mut device = self.open(format)?;
        device.close();
        Ok(())
    }
}

/// An opened input device
///
/// Implementations must close the underlying device on drop so that a
/// panicking reader never leaks it.
pub trait CaptureDevice: Send {
    /// Read up to `max_bytes` of PCM data
    ///
    /// Blocks until at least one frame is available. Returns an empty vector
    /// only once the device has been closed or its stream has ended.
    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, DeviceError>;

    /// Close the device. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Factory function to create the hardware gateway
pub fn create_gateway(config: &AudioConfig) -> Box<dyn DeviceGateway> {
    Box::new(cpal_capture::CpalGateway::new(config))
}

/// Names of all input devices the default host can see
pub fn list_input_devices() -> Result<Vec<String>, DeviceError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::Connection(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}
