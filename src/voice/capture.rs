//! Utterance capture
//!
//! Reads classified blocks from an input stream and decides when the user has
//! finished speaking. Speech time accumulates over speech blocks and any
//! speech block resets the silence run; once enough speech has been heard, a
//! long enough silence run ends the utterance.

use std::time::Duration;

use crate::audio::{BlockRead, BlockSource, mic_level};
use crate::config::CaptureConfig;
use crate::events::{EventSink, TurnEvent};
use crate::signal::Signal;
use crate::Result;

use super::vad::VoiceActivityClassifier;

/// How long to wait for a block before re-checking the stop signal
pub const BLOCK_WAIT: Duration = Duration::from_millis(200);

/// Why capture stopped collecting audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceEnd {
    /// Enough silence followed enough speech
    Pause,
    /// The capture ran into `max_utterance_secs`
    MaxDuration,
    /// The input stream produced no more blocks
    StreamClosed,
}

/// Captured user speech, ready for transcription
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Every block consumed by the capture, concatenated
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub ended_by: UtteranceEnd,
}

impl Utterance {
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_precision_loss)]
        let secs = self.samples.len() as f64 / f64::from(self.sample_rate);
        Duration::from_secs_f64(secs)
    }
}

/// Result of one capture attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    Utterance(Utterance),
    /// No speech started, or the capture was stopped
    NoSpeech { peak_rms: f32 },
}

/// Speech/silence bookkeeping for one capture
#[derive(Debug, Default, Clone, Copy)]
struct Hysteresis {
    started: bool,
    speech_ms: u32,
    silence_ms: u32,
}

impl Hysteresis {
    /// Account for one block; returns `true` when this block started speech
    fn observe(&mut self, speech: bool, block_ms: u32) -> bool {
        if speech {
            self.speech_ms = self.speech_ms.saturating_add(block_ms);
            self.silence_ms = 0;
            let first = !self.started;
            self.started = true;
            first
        } else {
            self.silence_ms = self.silence_ms.saturating_add(block_ms);
            false
        }
    }

    fn paused(&self, config: &CaptureConfig) -> bool {
        self.started
            && self.speech_ms >= config.min_speech_ms
            && self.silence_ms >= config.min_silence_ms
    }
}

/// Capture one utterance from an open input stream
///
/// Emits `MicLevel` for every block, `SpeechStarted` on the first speech
/// block, then either `SpeechEnded` when a pause ends the utterance or a
/// single `NoSpeechDetected` when the capture ends without `min_speech_ms` of
/// speech. A capture cut by the duration cap or a closed stream still yields
/// an utterance if enough speech was heard. A set `stop` signal returns
/// [`Capture::NoSpeech`] without further events.
///
/// # Errors
///
/// Returns error if the input stream fails
pub fn capture_until_pause(
    source: &mut dyn BlockSource,
    classifier: &VoiceActivityClassifier,
    config: &CaptureConfig,
    stop: &Signal,
    sink: &dyn EventSink,
) -> Result<Capture> {
    let max_utterance = config.max_utterance();
    let mut state = Hysteresis::default();
    let mut peak_rms = 0.0_f32;
    let mut captured: Vec<f32> = Vec::new();

    let ended_by = loop {
        if stop.is_set() {
            tracing::debug!("capture stopped");
            return Ok(Capture::NoSpeech { peak_rms });
        }
        if source.elapsed() > max_utterance {
            break UtteranceEnd::MaxDuration;
        }

        let block = match source.next_block(BLOCK_WAIT)? {
            BlockRead::Block(block) => block,
            BlockRead::Pending => continue,
            BlockRead::Closed => break UtteranceEnd::StreamClosed,
        };

        let decision = classifier.assess(&block.samples);
        sink.emit(TurnEvent::MicLevel {
            level: mic_level(decision.rms),
        });
        peak_rms = peak_rms.max(decision.rms);
        captured.extend_from_slice(&block.samples);

        if state.observe(decision.speech, config.block_ms) {
            tracing::debug!(at_ms = block.captured_at.as_millis(), "speech started");
            sink.emit(TurnEvent::SpeechStarted);
        }

        if state.paused(config) {
            sink.emit(TurnEvent::SpeechEnded);
            break UtteranceEnd::Pause;
        }
    };

    // Speech too short to count is reported like silence
    if !state.started || state.speech_ms < config.min_speech_ms || captured.is_empty() {
        tracing::debug!(
            peak_rms,
            speech_ms = state.speech_ms,
            reason = ?ended_by,
            "no speech detected"
        );
        sink.emit(TurnEvent::NoSpeechDetected { max_rms: peak_rms });
        return Ok(Capture::NoSpeech { peak_rms });
    }

    tracing::debug!(
        samples = captured.len(),
        speech_ms = state.speech_ms,
        reason = ?ended_by,
        "utterance captured"
    );

    Ok(Capture::Utterance(Utterance {
        samples: captured,
        sample_rate: config.sample_rate,
        ended_by,
    }))
}
