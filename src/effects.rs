//! Effect execution.
//!
//! The reducer in `controller` is pure; this module is where its effects
//! touch the world. `SessionEffectRunner` owns the live capture handle and
//! transcription channel, and every effect completion is reported back to
//! the session loop as an `Event` so the state machine stays the single
//! source of truth.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::capture::{CaptureHandle, MicSource};
use crate::channel::{ChannelEvent, TranscriptionChannel};
use crate::config::EngineConfig;
use crate::controller::{Effect, Event};

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// An open microphone plus the task pumping its chunks to the channel.
/// Stopping the handle ends the capture thread, which closes the chunk
/// channel, which lets the pump drain and exit.
struct ActiveCapture {
    handle: CaptureHandle,
    pump: tokio::task::JoinHandle<()>,
}

impl ActiveCapture {
    /// Stop capture and wait until every buffered chunk, including the
    /// trailing flush, has been handed to the channel.
    async fn release(self) {
        let ActiveCapture { handle, pump } = self;
        // stop() joins the capture thread
        let _ = tokio::task::spawn_blocking(move || handle.stop()).await;
        let _ = pump.await;
    }
}

/// Production runner: real microphone, real WebSocket.
///
/// The capture and channel live in shared slots so the chunk pump can
/// reach the channel and teardown effects can take them out independently
/// of each other.
pub struct SessionEffectRunner {
    config: EngineConfig,
    capture: Arc<Mutex<Option<ActiveCapture>>>,
    channel: Arc<Mutex<Option<TranscriptionChannel>>>,
}

impl SessionEffectRunner {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(SessionEffectRunner {
            config,
            capture: Arc::new(Mutex::new(None)),
            channel: Arc::new(Mutex::new(None)),
        })
    }
}

impl EffectRunner for SessionEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::OpenAudio { id } => {
                let constraints = self.config.constraints();
                let chunk_duration_ms = self.config.chunk_duration_ms as u32;
                let capture = self.capture.clone();
                let channel = self.channel.clone();
                tokio::spawn(async move {
                    // Chunk cadence is roughly one per second, so a small
                    // buffer is plenty.
                    let (chunk_tx, mut chunk_rx) = mpsc::channel(8);
                    let opened = tokio::task::spawn_blocking(move || {
                        MicSource::open(constraints, chunk_duration_ms, chunk_tx)
                    })
                    .await;
                    match opened {
                        Ok(Ok(handle)) => {
                            // Pump chunks into the channel for as long as
                            // both ends live. Chunks arriving before the
                            // channel opens (or after it closes) are dropped.
                            let pump = tokio::spawn(async move {
                                while let Some(chunk) = chunk_rx.recv().await {
                                    let mut slot = channel.lock().await;
                                    match slot.as_mut() {
                                        Some(ch) => {
                                            if let Err(e) = ch.send_chunk(chunk).await {
                                                log::warn!("Dropping audio chunk: {}", e);
                                            }
                                        }
                                        None => {
                                            log::debug!("No channel open, dropping audio chunk");
                                        }
                                    }
                                }
                                log::debug!("Chunk pump finished");
                            });
                            *capture.lock().await = Some(ActiveCapture { handle, pump });
                            let _ = tx.send(Event::AudioOpened { id }).await;
                        }
                        Ok(Err(e)) => {
                            let _ = tx
                                .send(Event::AudioFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Event::AudioFailed {
                                    id,
                                    err: format!("capture task panicked: {}", e),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::OpenChannel { id } => {
                let config = self.config.clone();
                let channel = self.channel.clone();
                tokio::spawn(async move {
                    let (channel_tx, mut channel_rx) = mpsc::channel(100);
                    match TranscriptionChannel::connect(&config, channel_tx).await {
                        Ok(ch) => {
                            *channel.lock().await = Some(ch);
                            // Bridge channel events into session events.
                            let bridge_tx = tx.clone();
                            tokio::spawn(async move {
                                while let Some(event) = channel_rx.recv().await {
                                    match event {
                                        ChannelEvent::Message(message) => {
                                            let _ = bridge_tx
                                                .send(Event::ResultReceived { id, message })
                                                .await;
                                        }
                                        ChannelEvent::Closed { reason } => {
                                            let _ = bridge_tx
                                                .send(Event::ChannelClosed { id, reason })
                                                .await;
                                            break;
                                        }
                                    }
                                }
                            });
                            let _ = tx.send(Event::ChannelOpened { id }).await;
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Event::ChannelFailed {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::ReleaseAudio { .. } => {
                let capture = self.capture.clone();
                tokio::spawn(async move {
                    if let Some(active) = capture.lock().await.take() {
                        active.release().await;
                    }
                });
            }

            Effect::FinishStream { .. } => {
                let capture = self.capture.clone();
                let channel = self.channel.clone();
                tokio::spawn(async move {
                    // Drain capture fully so the trailing flush chunk
                    // reaches the service before the stop frame.
                    if let Some(active) = capture.lock().await.take() {
                        active.release().await;
                    }
                    let mut slot = channel.lock().await;
                    match slot.as_mut() {
                        Some(ch) => {
                            if let Err(e) = ch.send_end_of_stream().await {
                                log::warn!("Failed to send end-of-stream: {}", e);
                            }
                        }
                        None => log::debug!("No channel open, skipping end-of-stream"),
                    }
                });
            }

            Effect::StartFinalizeTimeout { id } => {
                let timeout = self.config.finalize_timeout();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    // Stale-id guarding in the reducer makes a late timer
                    // harmless.
                    let _ = tx.send(Event::FinalizeTimeout { id }).await;
                });
            }

            Effect::CloseChannel { .. } => {
                let channel = self.channel.clone();
                tokio::spawn(async move {
                    if let Some(ch) = channel.lock().await.take() {
                        ch.close().await;
                    }
                });
            }

            // Handled at the session-loop edge, never dispatched here.
            Effect::Notify { .. } | Effect::EmitStatus => {
                unreachable!("loop-edge effect reached the runner")
            }
        }
    }
}

/// Test runner: no devices, no network. Resource opens succeed instantly
/// and the finalize timeout is configurable so tests can exercise the
/// timeout path without waiting for the production grace window.
pub struct StubEffectRunner {
    pub finalize_timeout: std::time::Duration,
    pub open_audio_count: std::sync::atomic::AtomicUsize,
    pub end_of_stream_count: std::sync::atomic::AtomicUsize,
}

impl StubEffectRunner {
    pub fn new() -> Arc<Self> {
        Self::with_finalize_timeout(std::time::Duration::from_secs(5))
    }

    pub fn with_finalize_timeout(finalize_timeout: std::time::Duration) -> Arc<Self> {
        Arc::new(StubEffectRunner {
            finalize_timeout,
            open_audio_count: std::sync::atomic::AtomicUsize::new(0),
            end_of_stream_count: std::sync::atomic::AtomicUsize::new(0),
        })
    }
}

impl EffectRunner for StubEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        use std::sync::atomic::Ordering;
        match effect {
            Effect::OpenAudio { id } => {
                self.open_audio_count.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let _ = tx.send(Event::AudioOpened { id }).await;
                });
            }
            Effect::OpenChannel { id } => {
                tokio::spawn(async move {
                    let _ = tx.send(Event::ChannelOpened { id }).await;
                });
            }
            Effect::FinishStream { .. } => {
                self.end_of_stream_count.fetch_add(1, Ordering::SeqCst);
            }
            Effect::StartFinalizeTimeout { id } => {
                let timeout = self.finalize_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = tx.send(Event::FinalizeTimeout { id }).await;
                });
            }
            Effect::ReleaseAudio { .. } | Effect::CloseChannel { .. } => {}
            Effect::Notify { .. } | Effect::EmitStatus => {
                unreachable!("loop-edge effect reached the runner")
            }
        }
    }
}
