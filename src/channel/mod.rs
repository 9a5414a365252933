//! Transcription channel
//!
//! One long-lived bidirectional WebSocket connection per recording session.
//! Outbound binary frames carry raw audio chunks; inbound text frames carry
//! JSON result messages. Audio delivery is best-effort: chunks are never
//! buffered or retried, since stale audio has no value to the service.

mod client;
pub mod protocol;

pub use client::{ChannelEvent, TranscriptionChannel};

/// Errors raised by the transport. Connect failures and mid-session drops
/// are session-fatal; the controller decides what the user sees.
#[derive(Debug, Clone)]
pub enum ChannelError {
    InvalidEndpoint(String),
    ConnectionFailed(String),
    SendFailed(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::InvalidEndpoint(e) => {
                write!(f, "Invalid extraction service endpoint: {}", e)
            }
            ChannelError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to extraction service: {}", e)
            }
            ChannelError::SendFailed(e) => write!(f, "Failed to send frame: {}", e),
        }
    }
}

impl std::error::Error for ChannelError {}
