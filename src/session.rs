//! Capture session: one recording from `start` to `stop`
//!
//! A session owns the capture thread for as long as it runs. The thread
//! owns the device and the sample buffer; both come back to the session as
//! the thread's return value, so the buffer is only ever touched by one
//! thread at a time and the join in [`CaptureSession::stop`] is the hand-off
//! point. The only state shared while the thread runs is the cancellation
//! flag, the error slot and the state cell.
//!
//! Cancellation is cooperative: the flag is checked before every device
//! read, so a stop takes effect at most one chunk late.

use crate::audio::{level, wav, AudioFormat, CaptureDevice, DeviceGateway};
use crate::config::AudioConfig;
use crate::error::{CaptureError, DeviceError};
use crate::state::{SessionState, StateCell};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Receives one loudness value in [0, 1] per captured chunk
///
/// Called on the capture thread. A panicking sink is ignored and capture
/// continues; UIs that need the value on another thread must forward it
/// themselves.
pub type LevelSink = Box<dyn FnMut(f64) + Send>;

/// Outcome of a successful recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResult {
    /// The finished WAV file
    pub output_path: PathBuf,
    /// Frames in the file
    pub frame_count: u32,
    /// Audio length
    pub duration: Duration,
}

/// What the capture thread hands back when it exits
struct CaptureOutput {
    buffer: Vec<u8>,
    device: Box<dyn CaptureDevice>,
    chunks: usize,
}

/// Bookkeeping for the recording in progress
struct ActiveCapture {
    output_path: PathBuf,
    cancel: Arc<AtomicBool>,
    thread_handle: thread::JoinHandle<CaptureOutput>,
    started_at: Instant,
}

type ErrorSlot = Arc<Mutex<Option<DeviceError>>>;

/// Recording state machine. Reusable for any number of sequential recordings.
pub struct CaptureSession {
    gateway: Arc<dyn DeviceGateway>,
    format: AudioFormat,
    chunk_bytes: usize,
    state: Arc<StateCell>,
    error_slot: ErrorSlot,
    active: Option<ActiveCapture>,
}

impl CaptureSession {
    /// Create an idle session. `chunk_bytes` is rounded down to whole frames.
    pub fn new(gateway: Arc<dyn DeviceGateway>, format: AudioFormat, chunk_bytes: usize) -> Self {
        let frame = format.frame_size().max(1);
        Self {
            gateway,
            format,
            chunk_bytes: (chunk_bytes / frame).max(1) * frame,
            state: Arc::new(StateCell::new()),
            error_slot: Arc::new(Mutex::new(None)),
            active: None,
        }
    }

    /// Create a session using the format and chunk size from `config`
    pub fn from_config(gateway: Arc<dyn DeviceGateway>, config: &AudioConfig) -> Self {
        Self::new(gateway, config.format(), config.chunk_bytes_aligned())
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Shared handle for lock-free state snapshots from other threads
    pub fn state_handle(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }

    pub fn is_recording(&self) -> bool {
        self.state.get().is_recording()
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Destination of the recording in progress
    pub fn output_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.output_path.as_path())
    }

    /// Time since the current recording started
    pub fn elapsed(&self) -> Option<Duration> {
        self.active.as_ref().map(|a| a.started_at.elapsed())
    }

    /// Open the device and start capturing into a fresh buffer
    ///
    /// Returns as soon as the capture thread is running. On error the
    /// session stays idle and no thread is left behind.
    pub fn start(
        &mut self,
        output_path: impl Into<PathBuf>,
        level_sink: Option<LevelSink>,
    ) -> Result<(), CaptureError> {
        if !self.state.get().is_idle() || self.active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        let output_path = output_path.into();
        if output_path.as_os_str().is_empty() {
            return Err(CaptureError::InvalidPath(output_path));
        }

        self.format
            .validate()
            .map_err(CaptureError::DeviceUnavailable)?;
        let device = self
            .gateway
            .open(&self.format)
            .map_err(CaptureError::DeviceUnavailable)?;

        take_error(&self.error_slot);
        let cancel = Arc::new(AtomicBool::new(false));

        let thread_handle = {
            let cancel = Arc::clone(&cancel);
            let error_slot = Arc::clone(&self.error_slot);
            let chunk_bytes = self.chunk_bytes;
            // If spawning fails the closure, and with it the device, is dropped
            thread::Builder::new()
                .name("echonote-capture".to_string())
                .spawn(move || capture_loop(device, chunk_bytes, &cancel, &error_slot, level_sink))
                .map_err(|e| CaptureError::DeviceUnavailable(DeviceError::Connection(e.to_string())))?
        };

        tracing::info!("Recording started: {:?}", output_path);

        self.active = Some(ActiveCapture {
            output_path,
            cancel,
            thread_handle,
            started_at: Instant::now(),
        });
        self.state.set(SessionState::Recording);

        Ok(())
    }

    /// Stop capturing and write the recording
    ///
    /// Blocks until the capture thread has exited. The device is closed
    /// before this returns, whatever the outcome.
    pub fn stop(&mut self) -> Result<SessionResult, CaptureError> {
        let Some(active) = self.active.take() else {
            return Err(CaptureError::NotRecording);
        };

        active.cancel.store(true, Ordering::Release);
        self.state.set(SessionState::Stopping);

        let joined = active.thread_handle.join();
        let captured_error = take_error(&self.error_slot);

        let result = match joined {
            Ok(mut output) => {
                output.device.close();
                match captured_error {
                    Some(e) => {
                        tracing::warn!("Recording failed after {} chunks: {}", output.chunks, e);
                        Err(CaptureError::CaptureFailed(e))
                    }
                    None => self.finish(&active.output_path, &output),
                }
            }
            // The device was dropped, and so closed, while unwinding
            Err(_) => Err(CaptureError::CaptureFailed(captured_error.unwrap_or_else(|| {
                DeviceError::Stream("capture thread panicked".to_string())
            }))),
        };

        self.state.set(SessionState::Idle);
        result
    }

    fn finish(
        &self,
        output_path: &Path,
        output: &CaptureOutput,
    ) -> Result<SessionResult, CaptureError> {
        let frame_count = wav::encode(&output.buffer, &self.format, output_path)
            .map_err(CaptureError::EncodeFailed)?;
        let duration = self.format.frames_to_duration(frame_count);

        tracing::info!(
            "Recording saved: {:?} ({} chunks, {:.2}s)",
            output_path,
            output.chunks,
            duration.as_secs_f32()
        );

        Ok(SessionResult {
            output_path: output_path.to_path_buf(),
            frame_count,
            duration,
        })
    }

    /// Cancel the capture and drop the samples without writing anything
    fn abort(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.store(true, Ordering::Release);
            self.state.set(SessionState::Stopping);
            if let Ok(mut output) = active.thread_handle.join() {
                output.device.close();
            }
            take_error(&self.error_slot);
            self.state.set(SessionState::Idle);
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.active.is_some() {
            tracing::warn!("Capture session dropped while recording; discarding audio");
            self.abort();
        }
    }
}

fn take_error(slot: &ErrorSlot) -> Option<DeviceError> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Body of the capture thread
fn capture_loop(
    mut device: Box<dyn CaptureDevice>,
    chunk_bytes: usize,
    cancel: &AtomicBool,
    error_slot: &ErrorSlot,
    mut level_sink: Option<LevelSink>,
) -> CaptureOutput {
    let mut buffer = Vec::new();
    let mut chunks = 0usize;

    tracing::debug!("Capture thread started ({} byte chunks)", chunk_bytes);

    while !cancel.load(Ordering::Acquire) {
        let chunk = match device.read(chunk_bytes) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::error!("Device read failed: {}", e);
                *error_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                device.close();
                break;
            }
        };

        if chunk.is_empty() {
            tracing::debug!("Device reported end of stream");
            break;
        }

        buffer.extend_from_slice(&chunk);
        chunks += 1;

        if let Some(sink) = level_sink.as_mut() {
            let value = level::level(&chunk);
            if panic::catch_unwind(AssertUnwindSafe(|| sink(value))).is_err() {
                tracing::warn!("Level sink panicked; ignoring");
            }
        }
    }

    tracing::debug!(
        "Capture thread stopped: {} chunks, {} bytes",
        chunks,
        buffer.len()
    );

    CaptureOutput {
        buffer,
        device,
        chunks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::scripted::{Script, ScriptedGateway, Signal};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    const CHUNK: usize = 256;
    const WAIT: Duration = Duration::from_secs(5);

    fn session(script: Script) -> (CaptureSession, Arc<ScriptedGateway>) {
        let gateway = Arc::new(ScriptedGateway::new(script));
        let session = CaptureSession::new(gateway.clone(), AudioFormat::default(), CHUNK);
        (session, gateway)
    }

    fn frames_in(path: &Path) -> u32 {
        hound::WavReader::open(path).unwrap().duration()
    }

    #[test]
    fn test_new_session_is_idle() {
        let (session, _) = session(Script::default());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.output_path().is_none());
        assert!(session.elapsed().is_none());
    }

    #[test]
    fn test_chunk_rounded_to_frames() {
        let gateway = Arc::new(ScriptedGateway::new(Script::default()));
        let session = CaptureSession::new(gateway, AudioFormat::default(), 1001);
        assert_eq!(session.chunk_bytes(), 1000);
    }

    #[test]
    fn test_three_chunks_recorded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.wav");
        let (mut session, gateway) = session(Script::chunks(3));

        session.start(&path, None).unwrap();
        assert!(session.is_recording());
        assert!(gateway.wait_for_reads(3, WAIT));

        let result = session.stop().unwrap();
        assert_eq!(result.output_path, path);
        assert_eq!(result.frame_count, 3 * (CHUNK / 2) as u32);
        assert_eq!(frames_in(&path), result.frame_count);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(gateway.stats().open_devices(), 0);
    }

    #[test]
    fn test_immediate_stop_writes_valid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quick.wav");
        let (mut session, _) = session(Script::default());

        session.start(&path, None).unwrap();
        let result = session.stop().unwrap();

        assert_eq!(frames_in(&path), result.frame_count);
        assert_eq!(result.frame_count % (CHUNK / 2) as u32, 0);
    }

    #[test]
    fn test_start_while_recording_fails() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.wav");
        let (mut session, gateway) = session(Script::default());

        session.start(&first, None).unwrap();
        let err = session.start(dir.path().join("second.wav"), None).unwrap_err();
        assert!(matches!(err, CaptureError::AlreadyRecording));
        assert!(session.is_recording());
        assert_eq!(session.output_path(), Some(first.as_path()));
        assert_eq!(gateway.stats().opens, 1);

        session.stop().unwrap();
        assert!(first.exists());
        assert!(!dir.path().join("second.wav").exists());
    }

    #[test]
    fn test_stop_while_idle_does_no_io() {
        let (mut session, gateway) = session(Script::default());

        assert!(matches!(session.stop(), Err(CaptureError::NotRecording)));
        assert_eq!(gateway.stats(), Default::default());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_read_failure_reported_on_stop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.wav");
        let (mut session, gateway) = session(Script {
            fail_on_read: Some(2),
            ..Script::chunks(10)
        });

        session.start(&path, None).unwrap();
        assert!(gateway.wait_for_reads(2, WAIT));

        let err = session.stop().unwrap_err();
        assert!(matches!(err, CaptureError::CaptureFailed(DeviceError::Stream(_))));
        assert!(!path.exists());
        assert_eq!(gateway.stats().open_devices(), 0);
        assert_eq!(session.state(), SessionState::Idle);

        // The error was consumed; the next recording starts clean
        let retry = dir.path().join("retry.wav");
        session.start(&retry, None).unwrap();
        assert!(gateway.wait_for_reads(3, WAIT));

        let result = session.stop().unwrap();
        assert_eq!(result.output_path, retry);
        assert!(result.frame_count >= (CHUNK / 2) as u32);
        assert_eq!(frames_in(&retry), result.frame_count);
    }

    #[test]
    fn test_unavailable_device_leaves_session_idle() {
        let dir = TempDir::new().unwrap();
        let (mut session, gateway) = session(Script {
            unavailable: true,
            ..Script::default()
        });

        let err = session.start(dir.path().join("x.wav"), None).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(matches!(session.stop(), Err(CaptureError::NotRecording)));
        assert_eq!(gateway.stats().opens, 0);
    }

    #[test]
    fn test_unsupported_format_is_unavailable() {
        let gateway = Arc::new(ScriptedGateway::new(Script::default()));
        let format = AudioFormat {
            bits_per_sample: 8,
            ..AudioFormat::default()
        };
        let mut session = CaptureSession::new(gateway, format, CHUNK);

        assert!(matches!(
            session.start("/tmp/never.wav", None),
            Err(CaptureError::DeviceUnavailable(DeviceError::Unsupported(_)))
        ));
    }

    #[test]
    fn test_empty_path_rejected() {
        let (mut session, gateway) = session(Script::default());
        assert!(matches!(
            session.start("", None),
            Err(CaptureError::InvalidPath(_))
        ));
        assert_eq!(gateway.stats().opens, 0);
    }

    #[test]
    fn test_level_sink_receives_every_chunk() {
        let dir = TempDir::new().unwrap();
        let levels = Arc::new(Mutex::new(Vec::<f64>::new()));
        let sink_levels = Arc::clone(&levels);
        let (mut session, gateway) = session(Script {
            signal: Signal::Tone {
                frequency_hz: 1000.0,
                amplitude: 0.8,
            },
            ..Script::chunks(4)
        });

        session
            .start(
                dir.path().join("meter.wav"),
                Some(Box::new(move |level: f64| sink_levels.lock().unwrap().push(level))),
            )
            .unwrap();
        assert!(gateway.wait_for_reads(4, WAIT));
        session.stop().unwrap();

        let levels = levels.lock().unwrap();
        assert_eq!(levels.len(), 4);
        assert!(levels.iter().all(|l| (0.0..=1.0).contains(l) && *l > 0.1));
    }

    #[test]
    fn test_panicking_sink_does_not_stop_capture() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sink.wav");
        let calls = Arc::new(AtomicUsize::new(0));
        let sink_calls = Arc::clone(&calls);
        let (mut session, gateway) = session(Script::chunks(3));

        session
            .start(
                &path,
                Some(Box::new(move |_: f64| {
                    sink_calls.fetch_add(1, Ordering::SeqCst);
                    panic!("display went away");
                })),
            )
            .unwrap();
        assert!(gateway.wait_for_reads(3, WAIT));

        let result = session.stop().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.frame_count, 3 * (CHUNK / 2) as u32);
    }

    #[test]
    fn test_encode_failure_is_distinct() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let (mut session, gateway) = session(Script::chunks(1));

        session.start(blocker.join("take.wav"), None).unwrap();
        assert!(gateway.wait_for_reads(1, WAIT));

        assert!(matches!(session.stop(), Err(CaptureError::EncodeFailed(_))));
        assert_eq!(gateway.stats().open_devices(), 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_sequential_recordings_do_not_share_samples() {
        let dir = TempDir::new().unwrap();
        let (mut session, gateway) = session(Script::chunks(2));

        session.start(dir.path().join("one.wav"), None).unwrap();
        assert!(gateway.wait_for_reads(2, WAIT));
        let one = session.stop().unwrap();

        session.start(dir.path().join("two.wav"), None).unwrap();
        assert!(gateway.wait_for_reads(4, WAIT));
        let two = session.stop().unwrap();

        assert_ne!(one.output_path, two.output_path);
        assert_eq!(one.frame_count, two.frame_count);
        assert_eq!(frames_in(&two.output_path), 2 * (CHUNK / 2) as u32);
        assert_eq!(gateway.stats().opens, 2);
        assert_eq!(gateway.stats().open_devices(), 0);
    }

    #[test]
    fn test_drop_while_recording_closes_device() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dropped.wav");
        let (mut session, gateway) = session(Script::default());

        session.start(&path, None).unwrap();
        drop(session);

        assert_eq!(gateway.stats().open_devices(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_state_handle_tracks_session() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = session(Script::default());
        let handle = session.state_handle();

        session.start(dir.path().join("h.wav"), None).unwrap();
        assert_eq!(handle.get(), SessionState::Recording);
        session.stop().unwrap();
        assert_eq!(handle.get(), SessionState::Idle);
    }
}
