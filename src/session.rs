//! Turn-taking session
//!
//! A [`Session`] runs the listen, transcribe, reply, speak loop. Each turn
//! captures one utterance, turns it into text, asks the reply generator for an
//! answer over the dialogue window and, if speech output is enabled, plays the
//! answer while the barge-in monitor listens for the user cutting in.
//!
//! Audio work happens in `spawn_blocking` tasks because device streams must
//! stay on the thread that opened them. The stop signal is checked at the top
//! of every turn, between phases, and at every block or chunk boundary inside
//! capture and playback.

use std::sync::Arc;

use crate::agent::ReplyGenerator;
use crate::audio::{AudioBackend, AudioClip};
use crate::config::{CaptureConfig, SessionConfig};
use crate::dialogue::{DialogueHistory, effective_system_prompt, strip_thinking};
use crate::events::{EventSink, NullSink, TurnEvent};
use crate::signal::Signal;
use crate::voice::{
    BargeInMonitor, Capture, PlaybackEngine, PlaybackOutcome, PlaybackRoute, SpeechSynthesizer,
    Transcriber, Utterance, VoiceActivityClassifier, capture_until_pause,
};
use crate::{Error, Result};

/// Where the session is in the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening,
    Transcribing,
    Dispatching,
    Speaking,
    Terminal,
}

/// What happened to a spoken reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Speech output disabled or nothing left to say after cleanup
    Silent,
    Played(PlaybackOutcome),
    /// Every playback strategy failed
    Failed(String),
}

/// How a single turn ended
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The stop signal was set
    Stopped,
    NoSpeech { peak_rms: f32 },
    TranscriptEmpty,
    TranscriptRejected { text: String },
    Replied {
        transcript: String,
        /// Raw reply, reasoning included
        reply: String,
        delivery: Delivery,
    },
}

/// Builds a [`Session`] from its collaborators
pub struct SessionBuilder {
    config: SessionConfig,
    backend: Arc<dyn AudioBackend>,
    transcriber: Option<Arc<dyn Transcriber>>,
    generator: Option<Arc<dyn ReplyGenerator>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    classifier: Option<Arc<VoiceActivityClassifier>>,
    playback: Option<PlaybackEngine>,
    sink: Arc<dyn EventSink>,
}

impl SessionBuilder {
    #[must_use]
    pub fn transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn ReplyGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Use this classifier instead of the earshot-backed default
    #[must_use]
    pub fn classifier(mut self, classifier: VoiceActivityClassifier) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    #[must_use]
    pub fn playback(mut self, playback: PlaybackEngine) -> Self {
        self.playback = Some(playback);
        self
    }

    #[must_use]
    pub fn events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Assemble the session
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the capture config is invalid or a
    /// required collaborator is missing, and `DependenciesUnavailable` if the
    /// default voice-activity model cannot run with this config
    pub fn build(self) -> Result<Session> {
        self.config.capture.validate()?;

        let transcriber = self
            .transcriber
            .ok_or_else(|| Error::Config("session needs a transcriber".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| Error::Config("session needs a reply generator".to_string()))?;
        let classifier = match self.classifier {
            Some(classifier) => classifier,
            None => Arc::new(VoiceActivityClassifier::for_config(&self.config.capture)?),
        };

        Ok(Session {
            history: DialogueHistory::new(self.config.history_cap),
            config: self.config,
            backend: self.backend,
            classifier,
            transcriber,
            generator,
            synthesizer: self.synthesizer,
            playback: Arc::new(self.playback.unwrap_or_default()),
            sink: self.sink,
            stop: Signal::new(),
            state: TurnState::Idle,
        })
    }
}

/// A spoken dialogue session
pub struct Session {
    config: SessionConfig,
    backend: Arc<dyn AudioBackend>,
    classifier: Arc<VoiceActivityClassifier>,
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    playback: Arc<PlaybackEngine>,
    sink: Arc<dyn EventSink>,
    history: DialogueHistory,
    stop: Signal,
    state: TurnState,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("classifier", &self.classifier)
            .field("playback", &self.playback)
            .field("history", &self.history)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start building a session over an audio backend
    #[must_use]
    pub fn builder(config: SessionConfig, backend: Arc<dyn AudioBackend>) -> SessionBuilder {
        SessionBuilder {
            config,
            backend,
            transcriber: None,
            generator: None,
            synthesizer: None,
            classifier: None,
            playback: None,
            sink: Arc::new(NullSink),
        }
    }

    /// Handle that stops the session when set
    #[must_use]
    pub fn stop_handle(&self) -> Signal {
        self.stop.clone()
    }

    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    #[must_use]
    pub const fn history(&self) -> &DialogueHistory {
        &self.history
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Check that the devices and collaborators this session needs exist
    ///
    /// # Errors
    ///
    /// Returns `DependenciesUnavailable` naming the first missing piece
    pub fn preflight(&self) -> Result<()> {
        self.check_input()?;

        if self.config.speak {
            if self.synthesizer.is_none() {
                return Err(Error::DependenciesUnavailable(
                    "speech output is enabled but no synthesizer is configured".to_string(),
                ));
            }
            self.backend
                .output_format(&self.config.capture.output_device)
                .map_err(|e| {
                    Error::DependenciesUnavailable(format!("no usable output device: {e}"))
                })?;
        }

        Ok(())
    }

    fn check_input(&self) -> Result<()> {
        let name = self
            .backend
            .input_name(&self.config.capture.input_device)
            .map_err(|e| Error::DependenciesUnavailable(format!("no usable input device: {e}")))?;
        tracing::debug!(device = %name, "input device resolved");
        Ok(())
    }

    /// Run turns until the stop signal is set
    ///
    /// # Errors
    ///
    /// Returns the preflight error, or the first collaborator or input error
    pub async fn run(&mut self) -> Result<()> {
        self.preflight()?;

        tracing::info!(
            speak = self.config.speak,
            barge_in = self.config.capture.allow_barge_in,
            model = ?self.classifier.model_name(),
            "voice session ready"
        );
        self.sink.emit(TurnEvent::Ready);

        let result = loop {
            if self.stop.is_set() {
                break Ok(());
            }
            match self.run_turn().await {
                Ok(outcome) => tracing::debug!(?outcome, "turn finished"),
                Err(e) => break Err(e),
            }
        };

        self.state = TurnState::Terminal;
        result
    }

    /// Run a single pass of the turn state machine
    ///
    /// # Errors
    ///
    /// Returns input stream errors and transcriber or generator failures
    /// unchanged. Synthesis and playback failures are reported as
    /// `PlaybackDegraded` events and a [`Delivery::Failed`] reply instead.
    pub async fn run_turn(&mut self) -> Result<TurnOutcome> {
        if self.stop.is_set() {
            self.state = TurnState::Terminal;
            return Ok(TurnOutcome::Stopped);
        }

        self.state = TurnState::Listening;
        self.sink.emit(TurnEvent::Listening);

        let utterance = match self.capture().await? {
            Capture::Utterance(utterance) => utterance,
            Capture::NoSpeech { peak_rms } => {
                if self.stop.is_set() {
                    return Ok(self.stopped());
                }
                return Ok(TurnOutcome::NoSpeech { peak_rms });
            }
        };
        if self.stop.is_set() {
            return Ok(self.stopped());
        }

        self.state = TurnState::Transcribing;
        self.sink.emit(TurnEvent::Transcribing);
        let transcript = self.transcribe(utterance).await?;

        if transcript.is_empty() {
            self.sink.emit(TurnEvent::TranscriptEmpty);
            self.state = TurnState::Listening;
            return Ok(TurnOutcome::TranscriptEmpty);
        }
        if transcript.chars().count() < self.config.min_transcript_chars {
            tracing::debug!(transcript = %transcript, "transcript too short");
            self.sink.emit(TurnEvent::TranscriptRejected {
                text: transcript.clone(),
            });
            self.state = TurnState::Listening;
            return Ok(TurnOutcome::TranscriptRejected { text: transcript });
        }
        self.sink.emit(TurnEvent::Transcript {
            text: transcript.clone(),
        });
        if self.stop.is_set() {
            return Ok(self.stopped());
        }

        self.state = TurnState::Dispatching;
        self.sink.emit(TurnEvent::Thinking);
        let reply = self.dispatch(&transcript).await?;
        self.sink.emit(TurnEvent::Response {
            text: reply.clone(),
        });

        let spoken = strip_thinking(&reply);
        let delivery = if !self.config.speak || spoken.is_empty() || self.stop.is_set() {
            Delivery::Silent
        } else {
            self.state = TurnState::Speaking;
            self.sink.emit(TurnEvent::Speaking);
            self.speak(&spoken).await?
        };

        self.state = if self.stop.is_set() {
            TurnState::Terminal
        } else {
            TurnState::Listening
        };

        Ok(TurnOutcome::Replied {
            transcript,
            reply,
            delivery,
        })
    }

    /// Capture one utterance and return its trimmed transcript
    ///
    /// Returns `None` if no speech was captured or the transcript is shorter
    /// than the configured minimum.
    ///
    /// # Errors
    ///
    /// Returns `DependenciesUnavailable` without an input device, and input
    /// or transcriber errors unchanged
    pub async fn transcribe_once(&mut self) -> Result<Option<String>> {
        self.check_input()?;

        self.state = TurnState::Listening;
        self.sink.emit(TurnEvent::Listening);
        let Capture::Utterance(utterance) = self.capture().await? else {
            self.state = TurnState::Idle;
            return Ok(None);
        };

        self.state = TurnState::Transcribing;
        self.sink.emit(TurnEvent::Transcribing);
        let transcript = self.transcribe(utterance).await?;
        self.state = TurnState::Idle;

        if transcript.chars().count() < self.config.min_transcript_chars.max(1) {
            return Ok(None);
        }
        Ok(Some(transcript))
    }

    fn stopped(&mut self) -> TurnOutcome {
        self.state = TurnState::Terminal;
        TurnOutcome::Stopped
    }

    async fn capture(&self) -> Result<Capture> {
        let backend = Arc::clone(&self.backend);
        let classifier = Arc::clone(&self.classifier);
        let config: CaptureConfig = self.config.capture.clone();
        let stop = self.stop.clone();
        let sink = Arc::clone(&self.sink);

        tokio::task::spawn_blocking(move || {
            let mut source =
                backend.open_input(&config.input_device, config.sample_rate, config.block_size())?;
            capture_until_pause(source.as_mut(), &classifier, &config, &stop, sink.as_ref())
        })
        .await
        .map_err(|e| Error::Audio(format!("capture task failed: {e}")))?
    }

    async fn transcribe(&self, utterance: Utterance) -> Result<String> {
        tracing::debug!(
            duration_ms = utterance.duration().as_millis(),
            ended_by = ?utterance.ended_by,
            "transcribing utterance"
        );
        let text = self
            .transcriber
            .transcribe(utterance, &self.config.language)
            .await?;
        Ok(text.trim().to_string())
    }

    /// Ask the generator for a reply and record the exchange
    ///
    /// The history only changes once a reply arrives, so a failed call leaves
    /// it as it was before the turn.
    async fn dispatch(&mut self, transcript: &str) -> Result<String> {
        let mut next = self.history.clone();
        if next.is_empty() {
            let system = effective_system_prompt(
                self.config.system_prompt.as_deref(),
                self.config.enable_thinking,
            );
            if let Some(system) = system {
                next.pin_system(system);
            }
        }
        next.push_user(transcript);

        let use_tools = self.config.use_tools && self.generator.supports_tools();
        let reply = if use_tools {
            self.generator.complete_with_tools(next.messages()).await?
        } else {
            self.generator.complete(next.messages()).await?
        };

        // Keep reasoning out of the window so it does not crowd the context
        let visible = strip_thinking(&reply);
        if visible.is_empty() {
            next.push_assistant(reply.clone());
        } else {
            next.push_assistant(visible);
        }
        next.trim();
        self.history = next;

        tracing::debug!(
            chars = reply.len(),
            history = self.history.len(),
            tools = use_tools,
            "reply received"
        );
        Ok(reply)
    }

    async fn speak(&self, text: &str) -> Result<Delivery> {
        let Some(synthesizer) = self.synthesizer.as_ref() else {
            return Err(Error::DependenciesUnavailable(
                "speech output is enabled but no synthesizer is configured".to_string(),
            ));
        };
        let clip = match synthesizer.synthesize(text).await {
            Ok(clip) => clip,
            Err(e) => {
                tracing::warn!(error = %e, "speech synthesis failed");
                self.sink.emit(TurnEvent::PlaybackDegraded {
                    reason: format!("synthesis: {e}"),
                });
                return Ok(Delivery::Failed(e.to_string()));
            }
        };
        if clip.is_empty() {
            tracing::debug!("synthesizer returned no audio");
            return Ok(Delivery::Silent);
        }

        let played = self.play(clip).await?;
        let delivery = match played {
            Ok(outcome) => {
                if let PlaybackRoute::Fallback { strategy, reason } = &outcome.route {
                    tracing::warn!(strategy, reason = %reason, "playback degraded");
                    self.sink.emit(TurnEvent::PlaybackDegraded {
                        reason: reason.clone(),
                    });
                }
                if outcome.interrupted {
                    tracing::info!("reply interrupted by barge-in");
                    self.sink.emit(TurnEvent::TtsInterrupted);
                }
                Delivery::Played(outcome)
            }
            Err(e) => {
                tracing::warn!(error = %e, "playback failed");
                self.sink.emit(TurnEvent::PlaybackDegraded {
                    reason: e.to_string(),
                });
                Delivery::Failed(e.to_string())
            }
        };
        Ok(delivery)
    }

    /// Play a clip with barge-in monitoring; the inner result is the playback result
    async fn play(&self, clip: AudioClip) -> Result<Result<PlaybackOutcome>> {
        let backend = Arc::clone(&self.backend);
        let classifier = Arc::clone(&self.classifier);
        let playback = Arc::clone(&self.playback);
        let config = self.config.capture.clone();
        let stop = self.stop.clone();
        let sink = Arc::clone(&self.sink);

        tokio::task::spawn_blocking(move || {
            // Fresh per reply so an earlier barge-in never cuts this one
            let interrupted = Signal::new();
            let monitor = config.allow_barge_in.then(|| {
                BargeInMonitor::start(
                    Arc::clone(&backend),
                    classifier,
                    &config,
                    interrupted.clone(),
                    stop.clone(),
                    sink,
                )
            });

            let result = playback.play(
                backend.as_ref(),
                &clip,
                &config.output_device,
                &interrupted,
                &stop,
            );

            if let Some(monitor) = monitor {
                monitor.finish();
            }
            result
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))
    }
}
