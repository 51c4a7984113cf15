//! Scripted capture device
//!
//! A deterministic stand-in for a microphone. It produces a fixed or
//! unbounded number of chunks of silence or a sine tone, can be told to
//! fail on a particular read or to refuse to open, and keeps counters that
//! tests use to check the device was closed on every path.

use super::{AudioFormat, CaptureDevice, DeviceGateway};
use crate::error::DeviceError;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// What the scripted device records
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Silence,
    /// Sine tone at `frequency_hz` with peak `amplitude` in [0, 1]
    Tone { frequency_hz: f32, amplitude: f32 },
}

/// Behaviour of devices opened from a [`ScriptedGateway`]
#[derive(Debug, Clone)]
pub struct Script {
    /// Number of chunks before the device reports end of stream (None = never)
    pub chunks: Option<usize>,
    pub signal: Signal,
    /// 1-based read that fails with a stream error, counted across every
    /// device the gateway opens, so a reopened device reads cleanly
    pub fail_on_read: Option<usize>,
    /// Refuse to open at all
    pub unavailable: bool,
    /// Delay before each read returns, to mimic a real-time device
    pub read_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            chunks: None,
            signal: Signal::Silence,
            fail_on_read: None,
            unavailable: false,
            read_delay: Duration::from_millis(1),
        }
    }
}

impl Script {
    /// Stop after exactly `n` chunks
    pub fn chunks(n: usize) -> Self {
        Self {
            chunks: Some(n),
            ..Self::default()
        }
    }

    /// Endless tone paced like a real microphone
    pub fn realtime_tone() -> Self {
        Self {
            signal: Signal::Tone {
                frequency_hz: 440.0,
                amplitude: 0.3,
            },
            read_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Counters shared between a gateway and the devices it opens
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStats {
    pub opens: usize,
    pub closes: usize,
    pub reads: usize,
}

impl DeviceStats {
    /// Devices opened but not yet closed
    pub fn open_devices(&self) -> usize {
        self.opens - self.closes
    }
}

#[derive(Default)]
struct SharedStats {
    stats: Mutex<DeviceStats>,
    changed: Condvar,
}

impl SharedStats {
    fn update(&self, f: impl FnOnce(&mut DeviceStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
            self.changed.notify_all();
        }
    }

    /// Count one read and return its gateway-wide index
    fn record_read(&self) -> usize {
        let mut index = 0;
        self.update(|s| {
            s.reads += 1;
            index = s.reads;
        });
        index
    }
}

/// Gateway that opens [`ScriptedDevice`]s
pub struct ScriptedGateway {
    script: Script,
    shared: Arc<SharedStats>,
}

impl ScriptedGateway {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            shared: Arc::new(SharedStats::default()),
        }
    }

    /// Snapshot of the open/close/read counters
    pub fn stats(&self) -> DeviceStats {
        self.shared
            .stats
            .lock()
            .map(|s| *s)
            .unwrap_or_default()
    }

    /// Block until at least `reads` reads have completed, or `timeout` passes
    pub fn wait_for_reads(&self, reads: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Ok(mut stats) = self.shared.stats.lock() else {
            return false;
        };
        while stats.reads < reads {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            stats = match self.shared.changed.wait_timeout(stats, remaining) {
                Ok((guard, _)) => guard,
                Err(_) => return false,
            };
        }
        true
    }
}

impl DeviceGateway for ScriptedGateway {
    fn open(&self, format: &AudioFormat) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        format.validate()?;
        if self.script.unavailable {
            return Err(DeviceError::NotFound("scripted".to_string()));
        }

        self.shared.update(|s| s.opens += 1);
        tracing::debug!("Opened scripted device ({})", format);

        Ok(Box::new(ScriptedDevice {
            script: self.script.clone(),
            format: *format,
            shared: Arc::clone(&self.shared),
            reads: 0,
            position: 0,
            closed: false,
        }))
    }
}

/// A device opened from a [`ScriptedGateway`]
pub struct ScriptedDevice {
    script: Script,
    format: AudioFormat,
    shared: Arc<SharedStats>,
    reads: usize,
    /// Frames generated so far, keeps the tone phase continuous across chunks
    position: u64,
    closed: bool,
}

impl ScriptedDevice {
    fn chunk_delay(&self, frames: usize) -> Duration {
        if !self.script.read_delay.is_zero() {
            return self.script.read_delay;
        }
        // Real-time pacing
        self.format.frames_to_duration(frames as u32)
    }

    fn generate(&mut self, frames: usize) -> Vec<u8> {
        let channels = self.format.channels as usize;
        let mut out = Vec::with_capacity(frames * self.format.frame_size());
        for i in 0..frames {
            let value = match self.script.signal {
                Signal::Silence => 0i16,
                Signal::Tone {
                    frequency_hz,
                    amplitude,
                } => {
                    let t = (self.position + i as u64) as f32 / self.format.sample_rate_hz as f32;
                    let s = (2.0 * std::f32::consts::PI * frequency_hz * t).sin() * amplitude;
                    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                }
            };
            for _ in 0..channels {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        self.position += frames as u64;
        out
    }
}

impl CaptureDevice for ScriptedDevice {
    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, DeviceError> {
        if self.closed {
            return Ok(Vec::new());
        }
        if self.script.chunks.is_some_and(|n| self.reads >= n) {
            // Script exhausted: behave like a device that went away cleanly
            return Ok(Vec::new());
        }

        let frames = (max_bytes / self.format.frame_size()).max(1);
        std::thread::sleep(self.chunk_delay(frames));

        self.reads += 1;
        let chunk = self.generate(frames);

        let read_index = self.shared.record_read();
        if self.script.fail_on_read == Some(read_index) {
            return Err(DeviceError::Stream(format!(
                "scripted failure on read {}",
                read_index
            )));
        }
        Ok(chunk)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.update(|s| s.closes += 1);
        tracing::debug!("Closed scripted device after {} reads", self.reads);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ScriptedDevice {
    fn drop(&mut self) {
        self.close();
    }
}
