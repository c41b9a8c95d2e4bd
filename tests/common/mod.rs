//! Shared test utilities
#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use parley_voice::audio::AudioClip;
use parley_voice::voice::{SpeechSynthesizer, Transcriber, Utterance};
use parley_voice::{
    CaptureConfig, DialogueMessage, Error, EventSink, ReplyGenerator, Result, Signal, TurnEvent,
    VoiceActivityClassifier,
};

/// Samples per 32 ms block at 16 kHz
pub const BLOCK: usize = 512;

/// RMS level that separates speech from silence in tests
pub const ENERGY_THRESHOLD: f32 = 0.05;

/// A block loud enough to count as speech
#[allow(clippy::cast_precision_loss)]
pub fn speech_block() -> Vec<f32> {
    (0..BLOCK)
        .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 16_000.0).sin())
        .collect()
}

pub fn silence_block() -> Vec<f32> {
    vec![0.0; BLOCK]
}

/// A constant block at the given level (its RMS equals `level`)
pub fn level_block(level: f32) -> Vec<f32> {
    vec![level; BLOCK]
}

/// `speech` speech blocks followed by `silence` silent blocks
pub fn utterance_blocks(speech: usize, silence: usize) -> Vec<Vec<f32>> {
    let mut blocks = vec![speech_block(); speech];
    blocks.extend(vec![silence_block(); silence]);
    blocks
}

/// Default capture config with the test energy threshold
pub fn capture_config() -> CaptureConfig {
    CaptureConfig {
        energy_threshold: ENERGY_THRESHOLD,
        ..CaptureConfig::default()
    }
}

/// Energy-only classifier, so tests do not depend on the model
pub fn classifier() -> VoiceActivityClassifier {
    VoiceActivityClassifier::energy_only(ENERGY_THRESHOLD)
}

/// Records every event; optionally sets a signal when a given event kind arrives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TurnEvent>>,
    stop_on: Mutex<Option<(&'static str, Signal)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `signal` as soon as an event of this kind is emitted
    pub fn stop_on(&self, kind: &'static str, signal: Signal) {
        *self.stop_on.lock().unwrap() = Some((kind, signal));
    }

    pub fn events(&self) -> Vec<TurnEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event kinds in order, without mic levels
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events()
            .iter()
            .map(TurnEvent::kind)
            .filter(|k| *k != "mic_level")
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: TurnEvent) {
        if let Some((kind, signal)) = self.stop_on.lock().unwrap().as_ref() {
            if event.kind() == *kind {
                signal.set();
            }
        }
        self.events.lock().unwrap().push(event);
    }
}

/// Returns the same transcript for every utterance
pub struct FixedTranscriber {
    text: String,
    pub calls: AtomicUsize,
    pub sample_counts: Mutex<Vec<usize>>,
}

impl FixedTranscriber {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
            sample_counts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, utterance: Utterance, _language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sample_counts.lock().unwrap().push(utterance.samples.len());
        Ok(self.text.clone())
    }
}

pub struct FailingTranscriber;

#[async_trait]
impl Transcriber for FailingTranscriber {
    async fn transcribe(&self, _utterance: Utterance, _language: &str) -> Result<String> {
        Err(Error::Stt("service unavailable".to_string()))
    }
}

/// Replies with fixed text and records the history it was given
pub struct FixedGenerator {
    reply: String,
    tools: bool,
    pub histories: Mutex<Vec<Vec<DialogueMessage>>>,
    pub tool_calls: AtomicUsize,
}

impl FixedGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            tools: false,
            histories: Mutex::new(Vec::new()),
            tool_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_tools(mut self) -> Self {
        self.tools = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.histories.lock().unwrap().len()
    }

    pub fn last_history(&self) -> Vec<DialogueMessage> {
        self.histories
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReplyGenerator for FixedGenerator {
    async fn complete(&self, history: &[DialogueMessage]) -> Result<String> {
        self.histories.lock().unwrap().push(history.to_vec());
        Ok(self.reply.clone())
    }

    async fn complete_with_tools(&self, history: &[DialogueMessage]) -> Result<String> {
        self.tool_calls.fetch_add(1, Ordering::SeqCst);
        self.complete(history).await
    }

    fn supports_tools(&self) -> bool {
        self.tools
    }
}

pub struct FailingGenerator;

#[async_trait]
impl ReplyGenerator for FailingGenerator {
    async fn complete(&self, _history: &[DialogueMessage]) -> Result<String> {
        Err(Error::Llm("rate limited".to_string()))
    }
}

/// Fails the first call, then answers like a [`FixedGenerator`]
pub struct FlakyGenerator {
    failures_left: AtomicUsize,
    pub inner: FixedGenerator,
}

impl FlakyGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            failures_left: AtomicUsize::new(1),
            inner: FixedGenerator::new(reply),
        }
    }
}

#[async_trait]
impl ReplyGenerator for FlakyGenerator {
    async fn complete(&self, history: &[DialogueMessage]) -> Result<String> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Llm("timed out".to_string()));
        }
        self.inner.complete(history).await
    }
}

pub struct FailingSynthesizer;

#[async_trait]
impl SpeechSynthesizer for FailingSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<AudioClip> {
        Err(Error::Tts("empty audio response".to_string()))
    }
}

/// Synthesizes a fixed-length tone and records the text it was asked to speak
pub struct ToneSynthesizer {
    seconds: f32,
    pub texts: Mutex<Vec<String>>,
}

impl ToneSynthesizer {
    pub fn new(seconds: f32) -> Self {
        Self {
            seconds,
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for ToneSynthesizer {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        self.texts.lock().unwrap().push(text.to_string());
        let frames = (16_000.0 * self.seconds) as usize;
        Ok(AudioClip::mono(vec![0.1; frames], 16_000))
    }
}
