//! WebSocket client for the extraction service
//!
//! Manages the connection lifecycle for one recording session:
//!
//! 1. `connect()` - establish the WebSocket with a bounded handshake timeout
//! 2. `send_chunk()` - stream binary audio frames
//! 3. `send_end_of_stream()` - request the final authoritative sweep
//! 4. `close()` - clean shutdown
//!
//! A background reader task parses inbound text frames and forwards the
//! classified result messages over an mpsc channel. Malformed frames are
//! logged and dropped; they never kill the reader. A mid-session disconnect
//! is reported as `ChannelEvent::Closed` and is session-fatal - there is no
//! automatic reconnect.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::protocol::{parse_frame, ControlMessage, ResultMessage};
use super::ChannelError;
use crate::capture::AudioChunk;
use crate::config::EngineConfig;

/// What the reader task surfaces to the session loop.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(ResultMessage),
    /// The connection is gone, cleanly or not. No further events follow.
    Closed { reason: Option<String> },
}

/// Handle to an open connection. Owned exclusively by the effect runner;
/// no other component writes to the socket.
pub struct TranscriptionChannel {
    write: futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl TranscriptionChannel {
    /// Connect to the configured endpoint and start the reader task.
    ///
    /// Parsed result messages and the eventual close notification arrive on
    /// `events_tx`.
    pub async fn connect(
        config: &EngineConfig,
        events_tx: mpsc::Sender<ChannelEvent>,
    ) -> Result<Self, ChannelError> {
        let mut request = config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::InvalidEndpoint(e.to_string()))?;

        if let Some(token) = &config.auth_token {
            request.headers_mut().insert(
                "Authorization",
                HeaderValue::from_str(&format!("Token {}", token))
                    .map_err(|e| ChannelError::InvalidEndpoint(e.to_string()))?,
            );
        }

        log::info!("Connecting to extraction service: {}", config.endpoint);

        let (ws_stream, _response) = timeout(
            config.connect_timeout(),
            connect_async_with_config(request, None, true),
        )
        .await
        .map_err(|_| ChannelError::ConnectionFailed("connection timeout".to_string()))?
        .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        log::info!("Extraction service connected");

        let (write, mut read) = ws_stream.split();

        let reader_task = tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                        Ok(messages) => {
                            for message in messages {
                                if events_tx.send(ChannelEvent::Message(message)).await.is_err() {
                                    log::debug!("Channel event receiver dropped, reader exiting");
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            log::warn!("Dropping malformed frame: {}", e);
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("Extraction service closed the connection");
                        break frame.map(|f| f.reason.to_string());
                    }
                    // The service never sends binary; ping/pong is transport noise
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("Channel read error: {}", e);
                        break Some(e.to_string());
                    }
                    None => break None,
                }
            };
            let _ = events_tx.send(ChannelEvent::Closed { reason }).await;
        });

        Ok(Self { write, reader_task })
    }

    /// Send one audio chunk as a binary frame. The chunk is consumed; it is
    /// never retained or retried after this call.
    pub async fn send_chunk(&mut self, chunk: AudioChunk) -> Result<(), ChannelError> {
        self.write
            .send(Message::Binary(chunk.bytes))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    /// Signal end-of-stream, requesting the final authoritative sweep.
    pub async fn send_end_of_stream(&mut self) -> Result<(), ChannelError> {
        let json = serde_json::to_string(&ControlMessage::StopRecording)
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        log::info!("Sending end-of-stream control frame");
        self.write
            .send(Message::Text(json))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    /// Gracefully close the connection and stop the reader task.
    pub async fn close(mut self) {
        self.reader_task.abort();
        if let Err(e) = self.write.close().await {
            log::debug!("Error closing channel: {}", e);
        }
    }
}

impl Drop for TranscriptionChannel {
    fn drop(&mut self) {
        // Ensure the reader stops even without an explicit close()
        self.reader_task.abort();
    }
}
