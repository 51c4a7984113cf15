//! Error types for echonote
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues.

use thiserror::Error;

/// Top-level error type for the echonote application
#[derive(Error, Debug)]
pub enum EchonoteError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Recording error: {0}")]
    Capture(#[from] CaptureError),
}

/// Errors reported by the capture session and its controller
///
/// Every variant is returned synchronously from the call that detected it
/// (`start`, `begin`, `stop` or `end`). Nothing is retried automatically.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Microphone unavailable: {0}")]
    DeviceUnavailable(#[source] DeviceError),

    #[error("Microphone access denied: {0}\n  Check that an input device is connected and that this user may open it.")]
    PermissionDenied(String),

    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("No recording is in progress")]
    NotRecording,

    #[error("Invalid output path: {0:?}")]
    InvalidPath(std::path::PathBuf),

    #[error("Cannot create recordings directory {path:?}: {source}")]
    OutputDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Recording failed: {0}")]
    CaptureFailed(#[source] DeviceError),

    #[error("Failed to write recording: {0}")]
    EncodeFailed(#[source] EncodeError),
}

/// Errors raised by an audio device gateway
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Audio device not found: '{0}'. List devices with: echonote devices")]
    NotFound(String),

    #[error("Audio device not found: '{requested}'\n{available}")]
    NotFoundWithList { requested: String, available: String },

    #[error("Unsupported audio format: {0}")]
    Unsupported(String),

    #[error("Audio connection failed: {0}")]
    Connection(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Audio device closed unexpectedly")]
    Closed,
}

/// Errors raised while writing a WAV container
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),
}

impl CaptureError {
    /// True for the benign "nothing to stop" outcome
    pub fn is_not_recording(&self) -> bool {
        matches!(self, CaptureError::NotRecording)
    }
}

/// Result type alias using EchonoteError
pub type Result<T> = std::result::Result<T, EchonoteError>;
