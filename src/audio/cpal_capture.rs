//! cpal-based audio capture
//!
//! Uses the cpal crate for cross-platform audio input.
//! Works with PipeWire, PulseAudio, and ALSA backends.
//!
//! Note: cpal::Stream is not Send, so each opened device runs its stream in
//! a dedicated thread and hands PCM to the reader over a channel. Closing
//! the device stops that thread, which drops the stream.

use super::{AudioFormat, CaptureDevice, DeviceGateway};
use crate::config::AudioConfig;
use crate::error::DeviceError;
use std::sync::mpsc;
use std::thread;

/// Messages from the stream thread to the reader
enum StreamMessage {
    /// Little-endian 16-bit PCM, whole frames
    Data(Vec<u8>),
    /// Error reported by the driver
    Error(String),
}

/// Gateway for hardware input devices
pub struct CpalGateway {
    /// Device name from config, or "default"
    device: String,
}

impl CpalGateway {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            device: config.device.clone(),
        }
    }
}

/// Find an audio input device by name with flexible matching.
///
/// Matching strategy (in order):
/// 1. Exact match (case-sensitive)
/// 2. Exact match (case-insensitive)
/// 3. Substring match: device name contains the search term (case-insensitive)
fn find_audio_device(host: &cpal::Host, device_name: &str) -> Result<cpal::Device, DeviceError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| DeviceError::Connection(e.to_string()))?
        .collect();

    let names: Vec<Option<String>> = devices.iter().map(|d| d.name().ok()).collect();
    let search_lower = device_name.to_lowercase();

    let position = names
        .iter()
        .position(|n| n.as_deref() == Some(device_name))
        .or_else(|| {
            names
                .iter()
                .position(|n| n.as_ref().is_some_and(|n| n.to_lowercase() == search_lower))
        })
        .or_else(|| {
            names.iter().position(|n| {
                n.as_ref()
                    .is_some_and(|n| n.to_lowercase().contains(&search_lower))
            })
        });

    if let Some(index) = position {
        tracing::debug!(
            "Matched audio device {:?} (searched for: {})",
            names[index],
            device_name
        );
        return devices
            .into_iter()
            .nth(index)
            .ok_or_else(|| DeviceError::NotFound(device_name.to_string()));
    }

    // No match found - provide helpful error with available devices
    let known: Vec<&String> = names.iter().flatten().collect();
    let available = if known.is_empty() {
        "No audio input devices found.".to_string()
    } else {
        format!(
            "Available devices:\n{}",
            known
                .iter()
                .map(|n| format!("  - {}", n))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };

    Err(DeviceError::NotFoundWithList {
        requested: device_name.to_string(),
        available,
    })
}

/// Pick an input config that delivers `format` without resampling or mixing
fn select_config(
    device: &cpal::Device,
    format: &AudioFormat,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    use cpal::traits::DeviceTrait;

    let rate = cpal::SampleRate(format.sample_rate_hz);
    let mut candidates: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_input_configs()
        .map_err(|e| DeviceError::Connection(e.to_string()))?
        .filter(|c| {
            c.channels() == format.channels
                && c.min_sample_rate() <= rate
                && rate <= c.max_sample_rate()
        })
        .collect();

    // Native 16-bit first, then formats we can convert losslessly enough
    candidates.sort_by_key(|c| match c.sample_format() {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::U16 => 2,
        _ => 3,
    });

    candidates
        .into_iter()
        .find(|c| {
            matches!(
                c.sample_format(),
                cpal::SampleFormat::I16 | cpal::SampleFormat::F32 | cpal::SampleFormat::U16
            )
        })
        .map(|c| c.with_sample_rate(rate))
        .ok_or_else(|| DeviceError::Unsupported(format!("device cannot capture {}", format)))
}

/// Resolve the device, build and start its stream. Runs on the stream thread.
fn open_stream(
    device_name: &str,
    format: &AudioFormat,
    tx: mpsc::Sender<StreamMessage>,
) -> Result<(cpal::Stream, String), DeviceError> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();

    let device = if device_name == "default" {
        host.default_input_device()
            .ok_or_else(|| DeviceError::NotFound("default".to_string()))?
    } else {
        find_audio_device(&host, device_name)?
    };

    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let supported = select_config(&device, format)?;
    let sample_format = supported.sample_format();

    tracing::debug!(
        "Device config: {} Hz, {} channel(s), format: {:?}",
        supported.sample_rate().0,
        supported.channels(),
        sample_format
    );

    let stream_config = cpal::StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, tx)?,
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, tx)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, tx)?,
        other => {
            return Err(DeviceError::Unsupported(format!(
                "sample format {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| DeviceError::Stream(e.to_string()))?;

    Ok((stream, name))
}

/// Build an input stream for a specific sample type
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: mpsc::Sender<StreamMessage>,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    i16: cpal::FromSample<T>,
{
    use cpal::traits::DeviceTrait;

    let err_tx = tx.clone();
    let err_fn = move |err: cpal::StreamError| {
        tracing::error!("Audio stream error: {}", err);
        let _ = err_tx.send(StreamMessage::Error(err.to_string()));
    };

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Receiver gone means the device is closing
                let _ = tx.send(StreamMessage::Data(to_le_bytes(data)));
            },
            err_fn,
            None,
        )
        .map_err(|e| DeviceError::Stream(e.to_string()))
}

/// Convert driver samples to little-endian signed 16-bit bytes
fn to_le_bytes<T>(data: &[T]) -> Vec<u8>
where
    T: cpal::Sample,
    i16: cpal::FromSample<T>,
{
    data.iter()
        .flat_map(|&s| <i16 as cpal::FromSample<T>>::from_sample_(s).to_le_bytes())
        .collect()
}

/// Take at most `max_bytes` whole frames off the front of `pending`
fn take_frames(pending: &mut Vec<u8>, max_bytes: usize, frame_size: usize) -> Vec<u8> {
    let limit = (max_bytes / frame_size).max(1) * frame_size;
    let n = limit.min(pending.len() / frame_size * frame_size);
    pending.drain(..n).collect()
}

impl DeviceGateway for CpalGateway {
    fn open(&self, format: &AudioFormat) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        format.validate()?;

        let (data_tx, data_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let device_name = self.device.clone();
        let stream_format = *format;

        let thread_handle = thread::Builder::new()
            .name("echonote-stream".to_string())
            .spawn(move || {
                let stream = match open_stream(&device_name, &stream_format, data_tx) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                tracing::debug!("Audio stream thread started");

                // Returns on an explicit stop or when the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);

                tracing::debug!("Audio stream thread stopped");
            })
            .map_err(|e| DeviceError::Connection(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(name)) => {
                tracing::info!("Using audio device: {} ({})", name, format);
                Ok(Box::new(CpalDevice {
                    rx: data_rx,
                    pending: Vec::new(),
                    frame_size: format.frame_size(),
                    stop_tx: Some(stop_tx),
                    thread_handle: Some(thread_handle),
                    closed: false,
                }))
            }
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(DeviceError::Connection(
                    "audio stream thread exited during setup".to_string(),
                ))
            }
        }
    }
}

/// An open hardware input device
pub struct CpalDevice {
    rx: mpsc::Receiver<StreamMessage>,
    /// Bytes delivered by the driver but not yet handed to the reader
    pending: Vec<u8>,
    frame_size: usize,
    stop_tx: Option<mpsc::Sender<()>>,
    thread_handle: Option<thread::JoinHandle<()>>,
    closed: bool,
}

impl CaptureDevice for CpalDevice {
    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, DeviceError> {
        if self.closed {
            return Ok(Vec::new());
        }

        while self.pending.len() < self.frame_size {
            match self.rx.recv() {
                Ok(StreamMessage::Data(data)) => self.pending.extend_from_slice(&data),
                Ok(StreamMessage::Error(e)) => return Err(DeviceError::Stream(e)),
                Err(_) => return Err(DeviceError::Closed),
            }
        }

        Ok(take_frames(&mut self.pending, max_bytes, self.frame_size))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.pending.clear();
        tracing::debug!("Audio device closed");
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}
