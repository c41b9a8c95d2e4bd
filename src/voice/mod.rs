//! Voice processing module
//!
//! Handles voice activity detection, utterance capture, barge-in monitoring,
//! and playback. STT and TTS collaborators are reached through the
//! [`Transcriber`] and [`SpeechSynthesizer`] traits.

pub mod barge_in;
pub mod capture;
pub mod playback;
pub mod stt;
pub mod tts;
pub mod vad;

pub use barge_in::BargeInMonitor;
pub use capture::{Capture, Utterance, UtteranceEnd, capture_until_pause};
pub use playback::{
    PlaybackEngine, PlaybackOutcome, PlaybackRoute, PlaybackStrategy, RoutedPlayback,
    SimplePlayback, resample_linear, route_clip,
};
pub use stt::{Transcriber, WhisperTranscriber};
pub use tts::{SpeechClient, SpeechSynthesizer, decode_mp3};
pub use vad::{EarshotModel, SpeechModel, VadDecision, VoiceActivityClassifier};
