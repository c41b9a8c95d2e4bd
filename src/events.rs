//! Turn events
//!
//! Every state transition of a voice session is reported as a [`TurnEvent`]
//! to an [`EventSink`], in the order it happens. Sinks are called on the
//! session's own threads; anything slow (UI rendering, network) belongs on
//! the consumer's side of a channel, which is what the
//! `mpsc::UnboundedSender` sink provides.

use serde::Serialize;
use tokio::sync::mpsc;

/// A notification about the state of the current turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Collaborators are set up and the session is about to listen
    Ready,
    Listening,
    SpeechStarted,
    SpeechEnded,
    Transcribing,
    Thinking,
    Speaking,
    /// Accepted transcript about to be dispatched
    Transcript { text: String },
    /// Audio was captured but nothing was transcribed
    TranscriptEmpty,
    /// Transcript shorter than the configured minimum
    TranscriptRejected { text: String },
    /// Raw reply text, reasoning included
    Response { text: String },
    /// Playback was cut short by barge-in
    TtsInterrupted,
    /// Capture ended without speech; `max_rms` is the loudest block seen
    NoSpeechDetected { max_rms: f32 },
    /// Barge-in monitoring could not start, playback is not interruptible
    BargeInUnavailable { error: String },
    /// Input level for metering, `0.0..=1.0`
    MicLevel { level: f32 },
    /// Playback fell back to a simpler path or failed
    PlaybackDegraded { reason: String },
}

impl TurnEvent {
    /// Wire name of the event, as used in the serialized `type` tag
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Listening => "listening",
            Self::SpeechStarted => "speech_started",
            Self::SpeechEnded => "speech_ended",
            Self::Transcribing => "transcribing",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Transcript { .. } => "transcript",
            Self::TranscriptEmpty => "transcript_empty",
            Self::TranscriptRejected { .. } => "transcript_rejected",
            Self::Response { .. } => "response",
            Self::TtsInterrupted => "tts_interrupted",
            Self::NoSpeechDetected { .. } => "no_speech_detected",
            Self::BargeInUnavailable { .. } => "barge_in_unavailable",
            Self::MicLevel { .. } => "mic_level",
            Self::PlaybackDegraded { .. } => "playback_degraded",
        }
    }
}

/// Receives turn events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TurnEvent);
}

impl<F> EventSink for F
where
    F: Fn(TurnEvent) + Send + Sync,
{
    fn emit(&self, event: TurnEvent) {
        self(event);
    }
}

impl EventSink for mpsc::UnboundedSender<TurnEvent> {
    fn emit(&self, event: TurnEvent) {
        // A dropped receiver means nobody is listening anymore
        if self.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TurnEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(TurnEvent::NoSpeechDetected { max_rms: 0.5 }).unwrap();
        assert_eq!(json["type"], "no_speech_detected");
        assert_eq!(json["max_rms"], 0.5);

        let json = serde_json::to_value(TurnEvent::TtsInterrupted).unwrap();
        assert_eq!(json, serde_json::json!({"type": "tts_interrupted"}));
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let events = [
            TurnEvent::Ready,
            TurnEvent::Transcript {
                text: "hi".to_string(),
            },
            TurnEvent::BargeInUnavailable {
                error: "busy".to_string(),
            },
            TurnEvent::MicLevel { level: 0.1 },
            TurnEvent::PlaybackDegraded {
                reason: "x".to_string(),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.kind());
        }
    }

    #[tokio::test]
    async fn channel_sink_preserves_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(TurnEvent::Listening);
        tx.emit(TurnEvent::SpeechStarted);
        drop(tx);

        assert_eq!(rx.recv().await, Some(TurnEvent::Listening));
        assert_eq!(rx.recv().await, Some(TurnEvent::SpeechStarted));
        assert_eq!(rx.recv().await, None);
    }
}
