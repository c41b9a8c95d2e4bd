//! Configuration management
//!
//! [`CaptureConfig`] and [`SessionConfig`] are the immutable values a voice
//! session runs with. [`Config`] bundles them with collaborator endpoints and
//! is resolved from environment > TOML file > defaults; CLI flags are applied
//! on top by the binary.

pub mod file;

use std::time::Duration;

use crate::audio::DeviceSelector;
use crate::{Error, Result};

use file::ParleyConfigFile;

/// Default OpenAI-compatible API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Audio capture and turn-taking thresholds
///
/// Created once per session and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Duration of one input block in milliseconds
    pub block_ms: u32,
    /// Voice-activity model threshold (0.0 to 1.0)
    pub vad_threshold: f32,
    /// RMS level at or above which a block counts as speech regardless of the model
    pub energy_threshold: f32,
    /// Speech needed before a pause may end the utterance
    pub min_speech_ms: u32,
    /// Silence that ends an utterance
    pub min_silence_ms: u32,
    /// Hard cap on a single capture
    pub max_utterance_secs: f32,
    pub input_device: DeviceSelector,
    pub output_device: DeviceSelector,
    /// Whether speaking during playback interrupts it
    pub allow_barge_in: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            block_ms: 32,
            vad_threshold: 0.3,
            energy_threshold: 0.003,
            min_speech_ms: 250,
            min_silence_ms: 1200,
            max_utterance_secs: 12.0,
            input_device: DeviceSelector::Default,
            output_device: DeviceSelector::Default,
            allow_barge_in: true,
        }
    }
}

impl CaptureConfig {
    /// Samples per input block
    #[must_use]
    pub const fn block_size(&self) -> usize {
        (self.sample_rate as u64 * self.block_ms as u64 / 1000) as usize
    }

    #[must_use]
    pub fn max_utterance(&self) -> Duration {
        Duration::from_secs_f32(self.max_utterance_secs.max(0.0))
    }

    /// Reject values the capture engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending field
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".to_string()));
        }
        if self.block_ms == 0 || self.block_size() == 0 {
            return Err(Error::Config("block_ms must yield at least one sample".to_string()));
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            return Err(Error::Config("vad_threshold must be within 0.0..=1.0".to_string()));
        }
        if self.energy_threshold < 0.0 {
            return Err(Error::Config("energy_threshold must not be negative".to_string()));
        }
        if !self.max_utterance_secs.is_finite() || self.max_utterance_secs <= 0.0 {
            return Err(Error::Config("max_utterance_secs must be positive".to_string()));
        }
        Ok(())
    }
}

/// Everything a voice session needs besides its collaborators
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub capture: CaptureConfig,
    /// STT language code
    pub language: String,
    /// Trimmed transcripts shorter than this are treated as noise
    pub min_transcript_chars: usize,
    /// Speak replies aloud
    pub speak: bool,
    /// Dispatch through the tool-calling path when the generator supports it
    pub use_tools: bool,
    pub system_prompt: Option<String>,
    /// Allow `<think>` reasoning in replies
    pub enable_thinking: bool,
    /// Dialogue messages kept after the system prompt
    pub history_cap: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            language: "en".to_string(),
            min_transcript_chars: 2,
            speak: true,
            use_tools: false,
            system_prompt: None,
            enable_thinking: false,
            history_cap: crate::dialogue::DEFAULT_HISTORY_CAP,
        }
    }
}

/// Reply generation backend
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Tool call rounds before giving up on a final answer
    pub max_tool_rounds: usize,
}

/// Speech-to-text backend
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub base_url: String,
    /// STT model (e.g. "whisper-1")
    pub model: String,
    pub api_key: Option<String>,
}

/// Text-to-speech backend
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub base_url: String,
    /// TTS model (e.g. "tts-1")
    pub model: String,
    pub voice: String,
    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,
    pub api_key: Option<String>,
}

/// Full application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub llm: LlmConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if the resolved capture values are invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Load configuration from the environment and a specific config file
    ///
    /// # Errors
    ///
    /// Returns error if the resolved capture values are invalid
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let fc = file::load_config_file_from(path);
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration with priority env > file > default
    ///
    /// # Errors
    ///
    /// Returns error if the resolved capture values are invalid
    pub fn resolve(fc: ParleyConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = CaptureConfig::default();
        let capture = CaptureConfig {
            sample_rate: fc.capture.sample_rate.unwrap_or(defaults.sample_rate),
            block_ms: fc.capture.block_ms.unwrap_or(defaults.block_ms),
            vad_threshold: fc.capture.vad_threshold.unwrap_or(defaults.vad_threshold),
            energy_threshold: fc
                .capture
                .energy_threshold
                .unwrap_or(defaults.energy_threshold),
            min_speech_ms: fc.capture.min_speech_ms.unwrap_or(defaults.min_speech_ms),
            min_silence_ms: fc.capture.min_silence_ms.unwrap_or(defaults.min_silence_ms),
            max_utterance_secs: fc
                .capture
                .max_utterance_secs
                .unwrap_or(defaults.max_utterance_secs),
            input_device: env("PARLEY_INPUT_DEVICE")
                .map(|s| s.parse::<DeviceSelector>().unwrap_or_default())
                .or(fc.capture.input_device)
                .unwrap_or_default(),
            output_device: env("PARLEY_OUTPUT_DEVICE")
                .map(|s| s.parse::<DeviceSelector>().unwrap_or_default())
                .or(fc.capture.output_device)
                .unwrap_or_default(),
            allow_barge_in: fc.capture.allow_barge_in.unwrap_or(defaults.allow_barge_in),
        };
        capture.validate()?;

        let session_defaults = SessionConfig::default();
        let session = SessionConfig {
            capture,
            language: fc.session.language.unwrap_or(session_defaults.language),
            min_transcript_chars: fc
                .session
                .min_transcript_chars
                .unwrap_or(session_defaults.min_transcript_chars),
            speak: fc.session.speak.unwrap_or(session_defaults.speak),
            use_tools: fc.session.use_tools.unwrap_or(session_defaults.use_tools),
            system_prompt: env("PARLEY_SYSTEM_PROMPT").or(fc.session.system_prompt),
            enable_thinking: env("PARLEY_ENABLE_THINKING")
                .map(|v| parse_flag(&v))
                .or(fc.session.enable_thinking)
                .unwrap_or(session_defaults.enable_thinking),
            history_cap: fc
                .session
                .history_cap
                .unwrap_or(session_defaults.history_cap),
        };

        let openai_key = env("OPENAI_API_KEY");

        let llm_base_url = env("PARLEY_LLM_BASE_URL")
            .or(fc.llm.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let llm_key = env("PARLEY_LLM_API_KEY")
            .or_else(|| {
                llm_base_url
                    .contains("openrouter.ai")
                    .then(|| env("OPENROUTER_API_KEY"))
                    .flatten()
            })
            .or(fc.llm.api_key)
            .or_else(|| openai_key.clone());
        let llm = LlmConfig {
            base_url: llm_base_url,
            model: env("PARLEY_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            api_key: llm_key,
            max_tool_rounds: fc.llm.max_tool_rounds.unwrap_or(5),
        };

        let stt = SttConfig {
            base_url: fc
                .stt
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env("PARLEY_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            api_key: fc.stt.api_key.or_else(|| openai_key.clone()),
        };

        let tts = TtsConfig {
            base_url: fc
                .tts
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env("PARLEY_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| "tts-1".to_string()),
            voice: env("PARLEY_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| "alloy".to_string()),
            speed: fc.tts.speed.unwrap_or(1.0),
            api_key: fc.tts.api_key.or(openai_key),
        };

        Ok(Self {
            session,
            llm,
            stt,
            tts,
        })
    }
}

/// Interpret `1`/`true`/`yes`/`on` (any case) as enabled
#[must_use]
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
