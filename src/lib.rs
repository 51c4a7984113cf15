//! Echonote: microphone capture for meeting notes
//!
//! This library provides the recording engine behind the echonote
//! front ends:
//! - Opening the microphone via cpal (supports PipeWire, PulseAudio, ALSA)
//! - Capturing PCM on a dedicated thread with cooperative cancellation
//! - Live loudness metering for level displays
//! - Writing recordings as 16-bit PCM WAV files, atomically
//! - Open-ended and fixed-duration recordings behind a permission check
//!
//! The finished file path is the only thing handed on to transcription.
//!
//! # Architecture
//!
//! ```text
//!          ┌──────────────────────────────────────────────┐
//!          │              SessionController               │
//!          │  permissions · start/stop · begin/end+timer  │
//!          └──────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//!          ┌──────────────────────────────────────────────┐
//!          │                CaptureSession                │
//!          │      Idle ──▶ Recording ──▶ Stopping ──▶ Idle │
//!          └──────────────────────────────────────────────┘
//!                                 │ spawn / join
//!                                 ▼
//!          ┌──────────────┐  chunk  ┌──────────────┐
//!          │    Device    │ ──────▶ │Capture thread│ ──▶ level sink
//!          │ (cpal/script)│         │ owns buffer  │
//!          └──────────────┘         └──────────────┘
//!                                          │ buffer (after join)
//!                                          ▼
//!                                   ┌──────────────┐
//!                                   │  WAV encoder │ ──▶ output path
//!                                   │   (hound)    │
//!                                   └──────────────┘
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod session;
pub mod state;

pub use audio::AudioFormat;
pub use cli::{Cli, Commands};
pub use config::Config;
pub use controller::SessionController;
pub use error::{CaptureError, EchonoteError, Result};
pub use session::{CaptureSession, LevelSink, SessionResult};
pub use state::SessionState;
