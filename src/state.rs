//! State machine for capture sessions
//!
//! Defines the states of a single recording:
//! Idle → Recording → Stopping → Idle

use std::sync::atomic::{AtomicU8, Ordering};

/// Capture session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No recording; initial and terminal state
    #[default]
    Idle,

    /// Capture thread is reading from the device
    Recording,

    /// Stop requested, waiting for the capture thread and the encoder
    Stopping,
}

impl SessionState {
    /// Check if in idle state
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    /// Check if in recording state
    pub fn is_recording(&self) -> bool {
        matches!(self, SessionState::Recording)
    }

    fn to_u8(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Recording => 1,
            SessionState::Stopping => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Recording,
            2 => SessionState::Stopping,
            _ => SessionState::Idle,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Recording => write!(f, "recording"),
            SessionState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Session state readable from any thread
///
/// Only the session that owns the cell writes it; everyone else gets a
/// snapshot that may be stale by the time it is acted on.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: SessionState) {
        let previous = SessionState::from_u8(self.0.swap(state.to_u8(), Ordering::AcqRel));
        if previous != state {
            tracing::trace!("Session state: {} -> {}", previous, state);
        }
    }
}
