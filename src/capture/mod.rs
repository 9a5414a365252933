//! Microphone capture
//!
//! Acquires an exclusive microphone handle via CPAL and exposes the signal as
//! a sequence of timed, sequenced PCM16 chunks. The OS audio handle is held
//! for exactly as long as a `CaptureHandle` is alive; every exit path
//! (explicit stop, drop, error) releases it so the next session can acquire
//! the device.

mod source;

use chrono::{DateTime, Utc};

pub use source::{CaptureHandle, MicSource};

/// Capture constraints for a speech-oriented signal.
#[derive(Debug, Clone, Copy)]
pub struct AudioConstraints {
    pub channels: u16,
    pub sample_rate: u32,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        // Mono 16 kHz suits speech extraction models
        Self {
            channels: 1,
            sample_rate: 16_000,
        }
    }
}

/// An immutable slice of captured audio. Ownership moves to the channel on
/// emission; chunks are never retained after being sent.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// PCM16 little-endian mono samples.
    pub bytes: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    /// Monotonically increasing per session.
    pub sequence: u64,
}

impl AudioChunk {
    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        let samples = (self.bytes.len() / 2) as u64;
        samples * 1000 / sample_rate as u64
    }
}

/// Errors opening the microphone. Fatal to the session, never auto-retried;
/// the controller surfaces them to the user.
#[derive(Debug, Clone)]
pub enum DeviceError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::NoInputDevice => write!(f, "No audio input device found"),
            DeviceError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            DeviceError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream (device busy or denied): {}", e)
            }
        }
    }
}

impl std::error::Error for DeviceError {}
