//! Voice activity classification
//!
//! A block counts as speech when the voice-activity model flags it or, failing
//! that, when its RMS energy reaches the configured fallback threshold. The
//! classifier holds no mutable state, so one instance is shared by the capture
//! loop and the barge-in monitor.

use std::sync::Arc;

use earshot::{VoiceActivityDetector, VoiceActivityProfile};

use crate::audio::rms;
use crate::config::CaptureConfig;
use crate::{Error, Result};

/// Sample rate the earshot model runs at
pub const EARSHOT_SAMPLE_RATE: u32 = 16_000;

/// 10 ms frame at 16 kHz
const EARSHOT_FRAME: usize = 160;

/// A trained voice-activity model
pub trait SpeechModel: Send + Sync {
    /// Short identifier for logs and diagnostics
    fn name(&self) -> &'static str;

    /// Whether the samples contain speech at the given threshold (`0.0..=1.0`)
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot evaluate the samples
    fn detect(&self, samples: &[f32], threshold: f32) -> Result<bool>;
}

/// Earshot (WebRTC-style) voice-activity model
///
/// A fresh detector is built per call so concurrent callers never share
/// detector state; the block is judged as 10 ms frames and any voiced frame
/// flags it.
#[derive(Debug, Clone, Copy)]
pub struct EarshotModel;

impl EarshotModel {
    /// Create the model for a capture sample rate
    ///
    /// # Errors
    ///
    /// Returns `DependenciesUnavailable` if the model cannot run at that rate
    pub fn new(sample_rate: u32) -> Result<Self> {
        if sample_rate != EARSHOT_SAMPLE_RATE {
            return Err(Error::DependenciesUnavailable(format!(
                "voice activity model needs {EARSHOT_SAMPLE_RATE} Hz capture, got {sample_rate} Hz"
            )));
        }
        Ok(Self)
    }

    /// Higher thresholds demand more confidence before flagging speech
    fn profile_for(threshold: f32) -> VoiceActivityProfile {
        match threshold {
            t if t < 0.25 => VoiceActivityProfile::QUALITY,
            t if t < 0.5 => VoiceActivityProfile::LBR,
            t if t < 0.75 => VoiceActivityProfile::AGGRESSIVE,
            _ => VoiceActivityProfile::VERY_AGGRESSIVE,
        }
    }
}

impl SpeechModel for EarshotModel {
    fn name(&self) -> &'static str {
        "earshot"
    }

    fn detect(&self, samples: &[f32], threshold: f32) -> Result<bool> {
        if samples.is_empty() {
            return Ok(false);
        }

        let mut detector = VoiceActivityDetector::new(Self::profile_for(threshold));
        let mut frame = [0i16; EARSHOT_FRAME];

        for chunk in samples.chunks(EARSHOT_FRAME) {
            frame.fill(0);
            for (out, &sample) in frame.iter_mut().zip(chunk) {
                #[allow(clippy::cast_possible_truncation)]
                let value = (sample.clamp(-1.0, 1.0) * 32_767.0) as i16;
                *out = value;
            }
            let voiced = detector
                .predict_16khz(&frame)
                .map_err(|e| Error::Vad(format!("{e:?}")))?;
            if voiced {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

/// How a block was judged
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadDecision {
    pub speech: bool,
    /// Whether the model (rather than the energy fallback) flagged speech
    pub by_model: bool,
    pub rms: f32,
}

/// Model-plus-energy speech classifier
#[derive(Clone)]
pub struct VoiceActivityClassifier {
    model: Option<Arc<dyn SpeechModel>>,
    threshold: f32,
    energy_threshold: f32,
}

impl std::fmt::Debug for VoiceActivityClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceActivityClassifier")
            .field("model", &self.model.as_ref().map(|m| m.name()))
            .field("threshold", &self.threshold)
            .field("energy_threshold", &self.energy_threshold)
            .finish()
    }
}

impl VoiceActivityClassifier {
    /// Classifier with an explicit model
    #[must_use]
    pub fn new(model: Option<Arc<dyn SpeechModel>>, config: &CaptureConfig) -> Self {
        Self {
            model,
            threshold: config.vad_threshold,
            energy_threshold: config.energy_threshold,
        }
    }

    /// Classifier backed by the earshot model
    ///
    /// # Errors
    ///
    /// Returns `DependenciesUnavailable` if the model cannot run with this config
    pub fn for_config(config: &CaptureConfig) -> Result<Self> {
        let model = EarshotModel::new(config.sample_rate)?;
        tracing::debug!(
            model = model.name(),
            threshold = config.vad_threshold,
            energy_threshold = config.energy_threshold,
            "voice activity classifier ready"
        );
        Ok(Self::new(Some(Arc::new(model)), config))
    }

    /// Classifier that only uses the energy threshold
    #[must_use]
    pub const fn energy_only(energy_threshold: f32) -> Self {
        Self {
            model: None,
            threshold: 0.0,
            energy_threshold,
        }
    }

    /// Name of the model in use, if any
    #[must_use]
    pub fn model_name(&self) -> Option<&'static str> {
        self.model.as_ref().map(|m| m.name())
    }

    /// Whether the block contains speech
    #[must_use]
    pub fn classify(&self, samples: &[f32]) -> bool {
        self.assess(samples).speech
    }

    /// Classify a block and report what decided it
    #[must_use]
    pub fn assess(&self, samples: &[f32]) -> VadDecision {
        let rms = rms(samples);
        if samples.is_empty() {
            return VadDecision {
                speech: false,
                by_model: false,
                rms,
            };
        }

        let by_model = self.model.as_ref().is_some_and(|model| {
            model
                .detect(samples, self.threshold)
                .unwrap_or_else(|e| {
                    tracing::trace!(
                        model = model.name(),
                        error = %e,
                        "vad model failed, using energy"
                    );
                    false
                })
        });

        VadDecision {
            speech: by_model || rms >= self.energy_threshold,
            by_model,
            rms,
        }
    }
}
