//! Engine configuration.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::AudioConstraints;

const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws/transcription/";

/// Configuration for a session engine. All fields have working defaults so
/// `EngineConfig::default()` talks to a local service; embedders override
/// what they need (usually just the endpoint and token).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// WebSocket endpoint of the extraction service.
    pub endpoint: String,
    /// Optional bearer token, sent as `Authorization: Token <value>`.
    pub auth_token: Option<String>,
    /// Capture sample rate in Hz. The service expects 16 kHz mono PCM16.
    pub sample_rate: u32,
    /// Capture channel count.
    pub channels: u16,
    /// Audio chunk cadence in milliseconds.
    pub chunk_duration_ms: u64,
    /// How long to wait for the WebSocket handshake.
    pub connect_timeout_ms: u64,
    /// Grace window after stop for the final authoritative sweep.
    pub finalize_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            auth_token: None,
            sample_rate: 16_000,
            channels: 1,
            chunk_duration_ms: 1_000,
            connect_timeout_ms: 10_000,
            finalize_timeout_ms: 8_000,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `VOICEFORM_ENDPOINT` / `VOICEFORM_AUTH_TOKEN`
    /// when set.
    pub fn from_env() -> Self {
        let mut config = EngineConfig::default();
        if let Ok(endpoint) = env::var("VOICEFORM_ENDPOINT") {
            if !endpoint.is_empty() {
                config.endpoint = endpoint;
            }
        }
        if let Ok(token) = env::var("VOICEFORM_AUTH_TOKEN") {
            if !token.is_empty() {
                config.auth_token = Some(token);
            }
        }
        config
    }

    pub fn constraints(&self) -> AudioConstraints {
        AudioConstraints {
            channels: self.channels,
            sample_rate: self.sample_rate,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_local_service() {
        let config = EngineConfig::default();
        assert_eq!(config.endpoint, "ws://localhost:8000/ws/transcription/");
        assert_eq!(config.auth_token, None);
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.chunk_duration_ms, 1_000);
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"endpoint": "wss://example.com/ws/", "auth_token": "t0k"}"#)
                .unwrap();
        assert_eq!(config.endpoint, "wss://example.com/ws/");
        assert_eq!(config.auth_token.as_deref(), Some("t0k"));
        assert_eq!(config.finalize_timeout_ms, 8_000);
    }

    #[test]
    fn durations_derive_from_millis() {
        let config = EngineConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.finalize_timeout(), Duration::from_secs(8));
    }
}
