//! Session controller: the recording API used by front ends
//!
//! Wraps a [`CaptureSession`] with a permission probe, fixed-duration
//! recordings driven by a timer thread, and helpers that pick output paths.
//! [`SessionController::is_recording`] reads an atomic snapshot and never
//! waits on the session, so it is safe to poll from a UI thread.

use crate::audio::{self, AudioFormat, DeviceGateway};
use crate::config::{Config, RecordingsConfig};
use crate::error::{CaptureError, DeviceError};
use crate::session::{CaptureSession, LevelSink, SessionResult};
use crate::state::{SessionState, StateCell};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Timer thread for a fixed-duration recording
///
/// The thread yields the result of its own stop, or `None` when it was
/// cancelled or found the recording already stopped.
struct DurationTimer {
    cancel_tx: mpsc::Sender<()>,
    thread_handle: thread::JoinHandle<Option<Result<SessionResult, CaptureError>>>,
}

pub struct SessionController {
    session: Arc<Mutex<CaptureSession>>,
    state: Arc<StateCell>,
    gateway: Arc<dyn DeviceGateway>,
    format: AudioFormat,
    recordings: RecordingsConfig,
    permitted: bool,
    timer: Option<DurationTimer>,
}

impl SessionController {
    pub fn new(gateway: Arc<dyn DeviceGateway>, config: &Config) -> Self {
        let session = CaptureSession::from_config(Arc::clone(&gateway), &config.audio);
        Self {
            state: session.state_handle(),
            format: *session.format(),
            session: Arc::new(Mutex::new(session)),
            gateway,
            recordings: config.recordings.clone(),
            permitted: false,
            timer: None,
        }
    }

    /// Controller for the hardware device named in `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::from(audio::create_gateway(&config.audio)), config)
    }

    /// Probe the microphone with a quick open and close
    ///
    /// Must succeed once before recordings can start.
    pub fn request_permissions(&mut self) -> Result<(), CaptureError> {
        if self.is_recording() {
            // The device is already open for us
            return Ok(());
        }

        match self.gateway.probe(&self.format) {
            Ok(()) => {
                tracing::debug!("Microphone probe succeeded");
                self.permitted = true;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Microphone probe failed: {}", e);
                self.permitted = false;
                Err(CaptureError::PermissionDenied(e.to_string()))
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state.get().is_recording()
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Length of the current recording so far
    pub fn elapsed(&self) -> Option<Duration> {
        // A stop in progress holds the lock; report nothing rather than wait
        self.session.try_lock().ok().and_then(|s| s.elapsed())
    }

    /// Start an open-ended recording to `output_path`
    pub fn start(
        &mut self,
        output_path: impl Into<PathBuf>,
        level_sink: Option<LevelSink>,
    ) -> Result<(), CaptureError> {
        self.ensure_permitted()?;
        // A timer-driven stop may still be encoding; never wait on it here
        if !self.state().is_idle() {
            return Err(CaptureError::AlreadyRecording);
        }
        self.reap_timer();
        self.lock_session().start(output_path, level_sink)
    }

    /// Start an open-ended recording in the recordings directory
    ///
    /// The file is named `<prefix><timestamp>.wav`; the path is returned.
    /// The directory is created first, so an unusable one fails here rather
    /// than after the meeting has been captured.
    pub fn start_interactive(
        &mut self,
        prefix: Option<&str>,
        level_sink: Option<LevelSink>,
    ) -> Result<PathBuf, CaptureError> {
        self.ensure_permitted()?;
        if !self.state().is_idle() {
            return Err(CaptureError::AlreadyRecording);
        }
        let path = self.next_recording_path(prefix)?;
        self.start(path.clone(), level_sink)?;
        Ok(path)
    }

    /// Stop the current recording, whether open-ended or fixed-duration
    ///
    /// If a fixed-duration recording already stopped itself, its result is
    /// returned here.
    pub fn stop(&mut self) -> Result<SessionResult, CaptureError> {
        let timer_result = self.cancel_timer();

        match self.lock_session().stop() {
            Err(e) if e.is_not_recording() => timer_result.unwrap_or(Err(e)),
            other => other,
        }
    }

    /// Start a recording that stops itself after `duration`
    pub fn begin(
        &mut self,
        output_path: impl Into<PathBuf>,
        duration: Duration,
        level_sink: Option<LevelSink>,
    ) -> Result<(), CaptureError> {
        self.start(output_path, level_sink)?;

        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let session = Arc::clone(&self.session);
        let spawned = thread::Builder::new()
            .name("echonote-timer".to_string())
            .spawn(move || match cancel_rx.recv_timeout(duration) {
                Err(RecvTimeoutError::Timeout) => {
                    tracing::debug!("Recording duration of {:?} elapsed", duration);
                    let result = session
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .stop();
                    match result {
                        // Stopped by hand first
                        Err(e) if e.is_not_recording() => None,
                        other => Some(other),
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => None,
            });

        match spawned {
            Ok(thread_handle) => {
                self.timer = Some(DurationTimer {
                    cancel_tx,
                    thread_handle,
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to start recording timer: {}", e);
                // Without a timer the recording would never end on its own
                let _ = self.lock_session().stop();
                Err(CaptureError::DeviceUnavailable(DeviceError::Connection(
                    e.to_string(),
                )))
            }
        }
    }

    /// Finish a fixed-duration recording early, or collect its result
    pub fn end(&mut self) -> Result<SessionResult, CaptureError> {
        self.stop()
    }

    /// Record for exactly `duration`, blocking until the file is written
    pub fn record_for(
        &mut self,
        output_path: impl Into<PathBuf>,
        duration: Duration,
        level_sink: Option<LevelSink>,
    ) -> Result<SessionResult, CaptureError> {
        self.begin(output_path, duration, level_sink)?;

        if let Some(DurationTimer {
            cancel_tx,
            thread_handle,
        }) = self.timer.take()
        {
            let fired = thread_handle.join().ok().flatten();
            drop(cancel_tx);
            if let Some(result) = fired {
                return result;
            }
        }

        self.lock_session().stop()
    }

    /// Fixed-duration recording into a new file in the system temp directory
    ///
    /// The file is kept after the recording; the caller owns it.
    pub fn begin_temp(
        &mut self,
        prefix: &str,
        duration: Duration,
        level_sink: Option<LevelSink>,
    ) -> Result<PathBuf, CaptureError> {
        let path = unique_path(&std::env::temp_dir(), prefix);
        self.begin(path.clone(), duration, level_sink)?;
        Ok(path)
    }

    fn ensure_permitted(&self) -> Result<(), CaptureError> {
        if self.permitted {
            Ok(())
        } else {
            Err(CaptureError::PermissionDenied(
                "microphone access has not been requested".to_string(),
            ))
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, CaptureSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the timer, if any, and return what it produced
    fn cancel_timer(&mut self) -> Option<Result<SessionResult, CaptureError>> {
        let timer = self.timer.take()?;
        let _ = timer.cancel_tx.send(());
        timer.thread_handle.join().ok().flatten()
    }

    /// Drop a timer left over from a fixed-duration recording nobody ended
    fn reap_timer(&mut self) {
        if self.timer.is_some() && self.state().is_idle() {
            match self.cancel_timer() {
                Some(Ok(result)) => tracing::debug!(
                    "Discarding uncollected result for {:?}",
                    result.output_path
                ),
                Some(Err(e)) => tracing::warn!("Uncollected recording failed: {}", e),
                None => {}
            }
        }
    }

    /// Fresh timestamped path in the recordings directory
    ///
    /// Creates the directory if it does not exist yet.
    pub fn next_recording_path(&self, prefix: Option<&str>) -> Result<PathBuf, CaptureError> {
        let dir = &self.recordings.dir;
        std::fs::create_dir_all(dir).map_err(|source| CaptureError::OutputDir {
            path: dir.clone(),
            source,
        })?;

        Ok(unique_path(dir, prefix.unwrap_or(&self.recordings.prefix)))
    }
}

/// `<dir>/<prefix><timestamp>.wav`, with a counter appended if that exists
fn unique_path(dir: &Path, prefix: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");

    let mut path = dir.join(format!("{}{}.wav", prefix, stamp));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}{}-{}.wav", prefix, stamp, n));
        n += 1;
    }
    path
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // Lets the session's own drop abort any capture still running
        if let Some(timer) = self.timer.take() {
            let _ = timer.cancel_tx.send(());
            let _ = timer.thread_handle.join();
        }
    }
}
