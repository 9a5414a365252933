//! Recording controller state machine
//!
//! This module implements the session state machine using a single-writer
//! pattern: all transitions go through `reduce()`, which returns the next
//! state and a list of effects to execute. The controller is the only place
//! recording and stop logic is decided - capture and transport only emit
//! events for it to consume.
//!
//! States run `Idle -> Starting -> Recording -> Stopping -> Idle`. `Starting`
//! waits for both the microphone and the channel; either failure returns to
//! `Idle` with the other resource released. `Stopping` awaits the final
//! sweep or a bounded timeout, after which the last partial mapping stands.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::channel::protocol::ResultMessage;

/// Authoritative session state. Each session carries a fresh id so events
/// from a dead session can be dropped as stale.
#[derive(Debug, Clone)]
pub enum State {
    Idle,
    Starting {
        session_id: Uuid,
        audio_ready: bool,
        channel_ready: bool,
    },
    Recording {
        session_id: Uuid,
        started_at: DateTime<Utc>,
    },
    Stopping {
        session_id: Uuid,
        started_at: DateTime<Utc>,
    },
}

impl Default for State {
    fn default() -> Self {
        State::Idle
    }
}

impl State {
    /// Id of the session currently owning the microphone/channel, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            State::Idle => None,
            State::Starting { session_id, .. } => Some(*session_id),
            State::Recording { session_id, .. } => Some(*session_id),
            State::Stopping { session_id, .. } => Some(*session_id),
        }
    }
}

/// Events consumed by the reducer. Sent by the embedder (start/stop) and by
/// the effect runner (everything else).
#[derive(Debug, Clone)]
pub enum Event {
    /// User requested a recording session. No-op unless `Idle`.
    StartRequested,
    /// User requested stop (or cancel, while still `Starting`).
    StopRequested,

    // Capture events
    AudioOpened { id: Uuid },
    AudioFailed { id: Uuid, err: String },

    // Channel lifecycle events
    ChannelOpened { id: Uuid },
    ChannelFailed { id: Uuid, err: String },
    ChannelClosed { id: Uuid, reason: Option<String> },

    /// A result message arrived. Handled at the session-loop edge (it feeds
    /// the reconciler); only a final sweep reaches the reducer, as
    /// `FinalReceived`.
    ResultReceived { id: Uuid, message: ResultMessage },
    /// The final authoritative sweep was applied.
    FinalReceived { id: Uuid },
    /// The stop-grace window elapsed without a final sweep.
    FinalizeTimeout { id: Uuid },
}

/// Effects to execute after a transition. The runner handles these
/// asynchronously; `EmitStatus` and `Notify` are handled by the loop itself.
#[derive(Debug, Clone)]
pub enum Effect {
    OpenAudio { id: Uuid },
    OpenChannel { id: Uuid },
    /// Stop chunk emission and release the microphone.
    ReleaseAudio { id: Uuid },
    /// Stop capture, deliver the trailing audio, then ask the service for
    /// its final authoritative sweep.
    FinishStream { id: Uuid },
    StartFinalizeTimeout { id: Uuid },
    CloseChannel { id: Uuid },
    /// Surface a user-visible report. The controller is the sole authority
    /// for these.
    Notify { notice: SessionNotice },
    EmitStatus,
}

/// User-visible session reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionNotice {
    /// Microphone unavailable or denied. Fatal to the session.
    DeviceFailed { message: String },
    /// Could not reach the extraction service.
    ConnectionFailed { message: String },
    /// The connection dropped mid-recording. The session ends; the user may
    /// start a fresh one manually.
    ConnectionLost { message: String },
    /// No final sweep arrived in time; the last partial mapping stands.
    /// Informational, not an error.
    FinalizationTimeout,
    /// The final sweep arrived and the session finished cleanly.
    SessionComplete,
}

/// Reducer: `(state, event) -> (next_state, effects)`.
///
/// Rules:
/// - never mutate state in place
/// - drop events carrying a stale session id
/// - re-entrant start requests outside `Idle` are no-ops
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current_id = state.session_id();
    let is_stale = |eid: Uuid| current_id.is_some() && Some(eid) != current_id;

    match (state, event) {
        // -----------------
        // Idle
        // -----------------
        (Idle, StartRequested) => {
            let id = Uuid::new_v4();
            (
                Starting {
                    session_id: id,
                    audio_ready: false,
                    channel_ready: false,
                },
                vec![OpenAudio { id }, OpenChannel { id }, EmitStatus],
            )
        }

        // A session already owns the resources: starting again is a no-op.
        // This also makes a start during `Stopping` wait for `Idle`.
        (_, StartRequested) => (state.clone(), vec![]),

        // -----------------
        // Starting
        // -----------------
        (
            Starting {
                session_id,
                channel_ready,
                ..
            },
            AudioOpened { id },
        ) if *session_id == id => {
            if *channel_ready {
                (
                    Recording {
                        session_id: id,
                        started_at: Utc::now(),
                    },
                    vec![EmitStatus],
                )
            } else {
                (
                    Starting {
                        session_id: id,
                        audio_ready: true,
                        channel_ready: false,
                    },
                    vec![],
                )
            }
        }
        (
            Starting {
                session_id,
                audio_ready,
                ..
            },
            ChannelOpened { id },
        ) if *session_id == id => {
            if *audio_ready {
                (
                    Recording {
                        session_id: id,
                        started_at: Utc::now(),
                    },
                    vec![EmitStatus],
                )
            } else {
                (
                    Starting {
                        session_id: id,
                        audio_ready: false,
                        channel_ready: true,
                    },
                    vec![],
                )
            }
        }
        (Starting { session_id, .. }, AudioFailed { id, err }) if *session_id == id => (
            Idle,
            vec![
                CloseChannel { id },
                Notify {
                    notice: SessionNotice::DeviceFailed { message: err },
                },
                EmitStatus,
            ],
        ),
        (Starting { session_id, .. }, ChannelFailed { id, err }) if *session_id == id => (
            Idle,
            vec![
                ReleaseAudio { id },
                Notify {
                    notice: SessionNotice::ConnectionFailed { message: err },
                },
                EmitStatus,
            ],
        ),
        // User aborted before both resources were ready (covers giving up on
        // a pending microphone permission prompt). Release both: audio may
        // have opened between the request and this event.
        (Starting { session_id, .. }, StopRequested) => (
            Idle,
            vec![
                ReleaseAudio { id: *session_id },
                CloseChannel { id: *session_id },
                EmitStatus,
            ],
        ),

        // -----------------
        // Recording
        // -----------------
        (
            Recording {
                session_id,
                started_at,
            },
            StopRequested,
        ) => (
            Stopping {
                session_id: *session_id,
                started_at: *started_at,
            },
            vec![
                // Chunk emission stops immediately; the sweep request goes
                // out only once the trailing audio has been delivered.
                FinishStream { id: *session_id },
                StartFinalizeTimeout { id: *session_id },
                EmitStatus,
            ],
        ),
        // Session-fatal: never silently resume sending audio into a dead
        // channel. The user may start a fresh session manually.
        (Recording { session_id, .. }, ChannelClosed { id, reason }) if *session_id == id => (
            Idle,
            vec![
                ReleaseAudio { id },
                Notify {
                    notice: SessionNotice::ConnectionLost {
                        message: reason.unwrap_or_else(|| "connection dropped".to_string()),
                    },
                },
                EmitStatus,
            ],
        ),

        // -----------------
        // Stopping
        // -----------------
        (Stopping { session_id, .. }, FinalReceived { id }) if *session_id == id => (
            Idle,
            vec![
                CloseChannel { id },
                Notify {
                    notice: SessionNotice::SessionComplete,
                },
                EmitStatus,
            ],
        ),
        (Stopping { session_id, .. }, FinalizeTimeout { id }) if *session_id == id => (
            Idle,
            vec![
                CloseChannel { id },
                Notify {
                    notice: SessionNotice::FinalizationTimeout,
                },
                EmitStatus,
            ],
        ),
        // No sweep can arrive once the peer is gone; finalize with partials.
        (Stopping { session_id, .. }, ChannelClosed { id, .. }) if *session_id == id => (
            Idle,
            vec![
                CloseChannel { id },
                Notify {
                    notice: SessionNotice::FinalizationTimeout,
                },
                EmitStatus,
            ],
        ),

        // -----------------
        // Late resource opens
        // -----------------
        // A slow open can complete after its session is already gone
        // (cancelled during `Starting`, or torn down by the other resource
        // failing). The teardown emptied the slot before the open stored
        // its handle, so the resource must be released here or it leaks
        // until the next session overwrites it.
        (_, AudioOpened { id }) if current_id != Some(id) => {
            (state.clone(), vec![ReleaseAudio { id }])
        }
        (_, ChannelOpened { id }) if current_id != Some(id) => {
            (state.clone(), vec![CloseChannel { id }])
        }

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, AudioFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, ChannelFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, ChannelClosed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, FinalReceived { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, FinalizeTimeout { id }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starting(id: Uuid) -> State {
        State::Starting {
            session_id: id,
            audio_ready: false,
            channel_ready: false,
        }
    }

    fn recording(id: Uuid) -> State {
        State::Recording {
            session_id: id,
            started_at: Utc::now(),
        }
    }

    fn stopping(id: Uuid) -> State {
        State::Stopping {
            session_id: id,
            started_at: Utc::now(),
        }
    }

    fn has_notice(effects: &[Effect], wanted: &SessionNotice) -> bool {
        effects
            .iter()
            .any(|e| matches!(e, Effect::Notify { notice } if notice == wanted))
    }

    #[test]
    fn idle_start_opens_both_resources() {
        let (next, effects) = reduce(&State::Idle, Event::StartRequested);
        assert!(matches!(next, State::Starting { .. }));
        assert!(effects.iter().any(|e| matches!(e, Effect::OpenAudio { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::OpenChannel { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitStatus)));
    }

    #[test]
    fn second_start_while_starting_is_a_no_op() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&starting(id), Event::StartRequested);
        // Still the same session; no second resource pair is created
        assert!(matches!(next, State::Starting { session_id, .. } if session_id == id));
        assert!(effects.is_empty());
    }

    #[test]
    fn start_while_stopping_waits_for_idle() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&stopping(id), Event::StartRequested);
        assert!(matches!(next, State::Stopping { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn recording_begins_only_when_both_resources_are_ready() {
        let id = Uuid::new_v4();

        let (next, effects) = reduce(&starting(id), Event::AudioOpened { id });
        assert!(matches!(
            next,
            State::Starting {
                audio_ready: true,
                channel_ready: false,
                ..
            }
        ));
        assert!(effects.is_empty());

        let (next, effects) = reduce(&next, Event::ChannelOpened { id });
        assert!(matches!(next, State::Recording { .. }));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitStatus)));
    }

    #[test]
    fn channel_first_then_audio_also_starts_recording() {
        let id = Uuid::new_v4();
        let (next, _) = reduce(&starting(id), Event::ChannelOpened { id });
        let (next, _) = reduce(&next, Event::AudioOpened { id });
        assert!(matches!(next, State::Recording { .. }));
    }

    #[test]
    fn device_failure_during_starting_reports_and_releases_channel() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(
            &starting(id),
            Event::AudioFailed {
                id,
                err: "no device".to_string(),
            },
        );
        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseChannel { .. })));
        assert!(has_notice(
            &effects,
            &SessionNotice::DeviceFailed {
                message: "no device".to_string()
            }
        ));
    }

    #[test]
    fn connect_failure_during_starting_reports_and_releases_audio() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(
            &starting(id),
            Event::ChannelFailed {
                id,
                err: "refused".to_string(),
            },
        );
        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::ReleaseAudio { .. })));
        assert!(has_notice(
            &effects,
            &SessionNotice::ConnectionFailed {
                message: "refused".to_string()
            }
        ));
    }

    #[test]
    fn cancel_during_starting_releases_both_resources() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&starting(id), Event::StopRequested);
        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::ReleaseAudio { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseChannel { .. })));
    }

    #[test]
    fn stop_during_recording_finishes_the_stream_and_bounds_the_wait() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&recording(id), Event::StopRequested);
        assert!(matches!(next, State::Stopping { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::FinishStream { .. })));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartFinalizeTimeout { .. })));
    }

    #[test]
    fn connection_drop_while_recording_is_session_fatal() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(
            &recording(id),
            Event::ChannelClosed {
                id,
                reason: Some("reset by peer".to_string()),
            },
        );
        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::ReleaseAudio { .. })));
        assert!(has_notice(
            &effects,
            &SessionNotice::ConnectionLost {
                message: "reset by peer".to_string()
            }
        ));
    }

    #[test]
    fn final_sweep_completes_the_session() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&stopping(id), Event::FinalReceived { id });
        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseChannel { .. })));
        assert!(has_notice(&effects, &SessionNotice::SessionComplete));
    }

    #[test]
    fn finalize_timeout_stands_on_partials_with_informational_notice() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&stopping(id), Event::FinalizeTimeout { id });
        assert!(matches!(next, State::Idle));
        assert!(has_notice(&effects, &SessionNotice::FinalizationTimeout));
    }

    #[test]
    fn stale_finalize_timeout_is_ignored() {
        let id = Uuid::new_v4();
        let stale = Uuid::new_v4();
        let (next, effects) = reduce(&stopping(id), Event::FinalizeTimeout { id: stale });
        assert!(matches!(next, State::Stopping { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn stale_audio_failure_is_ignored() {
        let id = Uuid::new_v4();
        let stale = Uuid::new_v4();
        let (next, effects) = reduce(
            &starting(id),
            Event::AudioFailed {
                id: stale,
                err: "gone".to_string(),
            },
        );
        assert!(matches!(next, State::Starting { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn late_audio_open_after_cancel_releases_the_device() {
        // Cancel during Starting already emptied the capture slot; when the
        // slow open completes in Idle its handle must still be released.
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&State::Idle, Event::AudioOpened { id });
        assert!(matches!(next, State::Idle));
        assert_eq!(effects.len(), 1);
        assert!(matches!(
            effects[0],
            Effect::ReleaseAudio { id: eid } if eid == id
        ));
    }

    #[test]
    fn late_channel_open_after_cancel_closes_the_connection() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&State::Idle, Event::ChannelOpened { id });
        assert!(matches!(next, State::Idle));
        assert_eq!(effects.len(), 1);
        assert!(matches!(
            effects[0],
            Effect::CloseChannel { id: eid } if eid == id
        ));
    }

    #[test]
    fn late_open_for_an_earlier_session_is_released_not_adopted() {
        let current = Uuid::new_v4();
        let old = Uuid::new_v4();
        let (next, effects) = reduce(&starting(current), Event::AudioOpened { id: old });
        assert!(matches!(
            next,
            State::Starting {
                session_id,
                audio_ready: false,
                ..
            } if session_id == current
        ));
        assert!(matches!(
            effects[..],
            [Effect::ReleaseAudio { id }] if id == old
        ));
    }

    #[test]
    fn final_after_timeout_is_dropped() {
        // Timeout already returned the machine to Idle; a late sweep for the
        // dead session must not disturb anything.
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&State::Idle, Event::FinalReceived { id });
        assert!(matches!(next, State::Idle));
        assert!(effects.is_empty());
    }
}
