//! Parley - hands-free spoken dialogue for AI assistants
//!
//! This library provides a turn-taking engine for voice conversations with a
//! language model:
//! - Utterance capture with voice activity detection and pause hysteresis
//! - Interruptible reply playback with device routing and fallback
//! - Barge-in: speaking over a reply cuts it short
//! - Pluggable speech-to-text, reply generation, and text-to-speech
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Session                          │
//! │  Listening → Transcribing → Dispatching → Speaking   │
//! └───────┬──────────────┬──────────────┬───────────────┘
//!         │              │              │
//! ┌───────▼──────┐ ┌─────▼──────┐ ┌─────▼──────────────┐
//! │   Capture    │ │ Transcriber│ │ Playback + Barge-in│
//! │  VAD + hyst. │ │ Generator  │ │  route → chunks    │
//! └───────┬──────┘ │ Synthesizer│ └─────┬──────────────┘
//!         │        └────────────┘       │
//! ┌───────▼─────────────────────────────▼───────────────┐
//! │           AudioBackend (cpal / memory)               │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod dialogue;
pub mod error;
pub mod events;
pub mod session;
pub mod signal;
pub mod voice;

pub use agent::{ChatClient, ReplyGenerator};
pub use audio::{AudioBackend, AudioBlock, AudioClip, DeviceSelector};
pub use config::{CaptureConfig, Config, SessionConfig};
pub use dialogue::{DialogueHistory, DialogueMessage, Role};
pub use error::{Error, Result};
pub use events::{EventSink, TurnEvent};
pub use session::{Delivery, Session, SessionBuilder, TurnOutcome, TurnState};
pub use signal::Signal;
pub use voice::{SpeechSynthesizer, Transcriber, Utterance, VoiceActivityClassifier};
