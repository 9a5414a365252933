//! voiceform - voice-driven form filling core.
//!
//! The engine captures microphone audio, streams it to an extraction
//! service over WebSocket, reconciles the partial/final attribute results
//! it gets back, and projects them onto a form schema. Embedders observe
//! the session through `watch` channels and drive it through a
//! `SessionHandle`.
//!
//! Architecture: a pure reducer (`controller`) owns all state transitions;
//! effects (`effects`) run asynchronously and report completions back as
//! events. The session loop below is the only writer of application state.

pub mod capture;
pub mod channel;
pub mod config;
pub mod controller;
pub mod effects;
pub mod form;
pub mod reconcile;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use channel::protocol::ResultMessage;
use config::EngineConfig;
use controller::{reduce, Effect, Event, SessionNotice, State};
use effects::{EffectRunner, SessionEffectRunner};
use form::{FilledForm, FormSchema};
use reconcile::AttributeReconciler;

/// Observable session status.
/// Tagged union format: `{ "status": "idle" }` or
/// `{ "status": "recording", "sessionId": "...", "startedAt": "..." }`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SessionStatus {
    Idle,
    Starting {
        #[serde(rename = "sessionId")]
        session_id: uuid::Uuid,
    },
    Recording {
        #[serde(rename = "sessionId")]
        session_id: uuid::Uuid,
        #[serde(rename = "startedAt")]
        started_at: chrono::DateTime<chrono::Utc>,
    },
    Stopping {
        #[serde(rename = "sessionId")]
        session_id: uuid::Uuid,
    },
}

fn state_to_status(state: &State) -> SessionStatus {
    match state {
        State::Idle => SessionStatus::Idle,
        State::Starting { session_id, .. } => SessionStatus::Starting {
            session_id: *session_id,
        },
        State::Recording {
            session_id,
            started_at,
        } => SessionStatus::Recording {
            session_id: *session_id,
            started_at: *started_at,
        },
        State::Stopping { session_id, .. } => SessionStatus::Stopping {
            session_id: *session_id,
        },
    }
}

/// Handle for driving a running session engine.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Event>,
}

impl SessionHandle {
    pub async fn start_recording(&self) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(Event::StartRequested).await
    }

    pub async fn stop_recording(&self) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(Event::StopRequested).await
    }

    /// Send a raw event to the session loop.
    pub async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(event).await
    }
}

/// Receivers for everything a session produces.
pub struct SessionOutputs {
    /// Current projection of results onto the schema. Updated on every
    /// observable mapping change.
    pub form: watch::Receiver<FilledForm>,
    /// Latest corrected transcript. Full replacement each time.
    pub transcript: watch::Receiver<String>,
    pub status: watch::Receiver<SessionStatus>,
    /// User-visible session reports (failures, completion).
    pub notices: mpsc::Receiver<SessionNotice>,
}

/// The session engine. Owns the session loop.
pub struct SessionEngine;

impl SessionEngine {
    /// Start an engine against the real microphone and network.
    pub fn start(config: EngineConfig, schema: FormSchema) -> (SessionHandle, SessionOutputs) {
        let runner = SessionEffectRunner::new(config);
        Self::start_with_runner(schema, runner)
    }

    /// Start an engine with a caller-supplied effect runner.
    pub fn start_with_runner(
        schema: FormSchema,
        runner: Arc<dyn EffectRunner>,
    ) -> (SessionHandle, SessionOutputs) {
        let (tx, rx) = mpsc::channel(100);
        let (form_tx, form_rx) = watch::channel(FilledForm::default());
        let (transcript_tx, transcript_rx) = watch::channel(String::new());
        let (status_tx, status_rx) = watch::channel(SessionStatus::Idle);
        let (notice_tx, notice_rx) = mpsc::channel(16);

        tokio::spawn(run_session_loop(
            schema,
            rx,
            tx.clone(),
            runner,
            form_tx,
            transcript_tx,
            status_tx,
            notice_tx,
        ));

        (
            SessionHandle { tx },
            SessionOutputs {
                form: form_rx,
                transcript: transcript_rx,
                status: status_rx,
                notices: notice_rx,
            },
        )
    }
}

/// Run the session loop: reduce events, dispatch effects, and apply result
/// messages to the reconciler at the edge.
#[allow(clippy::too_many_arguments)]
async fn run_session_loop(
    schema: FormSchema,
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    runner: Arc<dyn EffectRunner>,
    form_tx: watch::Sender<FilledForm>,
    transcript_tx: watch::Sender<String>,
    status_tx: watch::Sender<SessionStatus>,
    notice_tx: mpsc::Sender<SessionNotice>,
) {
    let mut state = State::default();
    let mut reconciler = AttributeReconciler::new();

    log::info!("Session loop started");

    while let Some(event) = rx.recv().await {
        log::debug!("Received event: {:?}", event);

        // Result messages feed the reconciler here, at the edge; only a
        // final sweep continues into the reducer, as `FinalReceived`.
        let event = match event {
            Event::ResultReceived { id, message } => {
                if state.session_id() != Some(id) {
                    log::debug!("Dropping result for stale session {}", id);
                    continue;
                }
                let changed = reconciler.apply(&message);
                if changed {
                    match &message {
                        ResultMessage::CorrectedText { .. } => {
                            let text = reconciler.transcript().unwrap_or_default().to_string();
                            let _ = transcript_tx.send(text);
                        }
                        _ => {
                            let _ = form_tx.send(form::project(&schema, reconciler.mapping()));
                        }
                    }
                }
                match message {
                    ResultMessage::FinalAttributes { .. } => Event::FinalReceived { id },
                    _ => continue,
                }
            }
            other => other,
        };

        let fresh_session = matches!(
            (&state, &event),
            (State::Idle, Event::StartRequested)
        );

        let old_discriminant = std::mem::discriminant(&state);
        let (next, effects) = reduce(&state, event);
        let new_discriminant = std::mem::discriminant(&next);

        if old_discriminant != new_discriminant {
            log::info!("State transition: {:?} -> {:?}", state, next);
        }

        state = next;

        // A new session starts from a clean slate.
        if fresh_session && matches!(state, State::Starting { .. }) {
            reconciler.reset();
            let _ = form_tx.send(form::project(&schema, reconciler.mapping()));
            let _ = transcript_tx.send(String::new());
        }

        for eff in effects {
            match eff {
                Effect::EmitStatus => {
                    let _ = status_tx.send(state_to_status(&state));
                }
                Effect::Notify { notice } => {
                    // Never block the loop on a slow notice consumer.
                    if let Err(e) = notice_tx.try_send(notice) {
                        log::warn!("Dropping session notice: {}", e);
                    }
                }
                other => runner.spawn(other, tx.clone()),
            }
        }
    }

    log::info!("Session loop ended");
}
