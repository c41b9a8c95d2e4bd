//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::audio::DeviceSelector;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfigFile {
    /// Audio capture and turn-taking thresholds
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Dialogue behavior
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Reply generation backend
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech-to-text backend
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech backend
    #[serde(default)]
    pub tts: TtsFileConfig,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub sample_rate: Option<u32>,
    pub block_ms: Option<u32>,
    /// Voice-activity model threshold (0.0 to 1.0)
    pub vad_threshold: Option<f32>,
    /// RMS fallback threshold for speech detection
    pub energy_threshold: Option<f32>,
    pub min_speech_ms: Option<u32>,
    pub min_silence_ms: Option<u32>,
    pub max_utterance_secs: Option<f32>,
    /// Input device index or name substring
    pub input_device: Option<DeviceSelector>,
    /// Output device index or name substring
    pub output_device: Option<DeviceSelector>,
    pub allow_barge_in: Option<bool>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// STT language code (e.g. "en")
    pub language: Option<String>,
    pub min_transcript_chars: Option<usize>,
    /// Speak replies aloud
    pub speak: Option<bool>,
    pub use_tools: Option<bool>,
    pub system_prompt: Option<String>,
    pub enable_thinking: Option<bool>,
    /// Dialogue messages kept after the system prompt
    pub history_cap: Option<usize>,
}

/// LLM configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// OpenAI-compatible base URL (e.g. `https://openrouter.ai/api/v1`)
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub max_tool_rounds: Option<usize>,
}

/// STT configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    pub base_url: Option<String>,
    /// STT model (e.g. "whisper-1")
    pub model: Option<String>,
    pub api_key: Option<String>,
}

/// TTS configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub base_url: Option<String>,
    /// TTS model (e.g. "tts-1")
    pub model: Option<String>,
    /// TTS voice identifier (e.g. "alloy")
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub api_key: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    config_file_path().map_or_else(ParleyConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_from(path: &Path) -> ParleyConfigFile {
    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ParleyConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let fc: ParleyConfigFile = toml::from_str(
            r#"
            [capture]
            min_silence_ms = 900
            input_device = "USB"

            [tts]
            voice = "nova"
            "#,
        )
        .unwrap();

        assert_eq!(fc.capture.min_silence_ms, Some(900));
        assert_eq!(
            fc.capture.input_device,
            Some(DeviceSelector::Name("USB".to_string()))
        );
        assert_eq!(fc.tts.voice.as_deref(), Some("nova"));
        assert!(fc.llm.model.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let fc = load_config_file_from(Path::new("/nonexistent/parley/config.toml"));
        assert!(fc.capture.sample_rate.is_none());
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[capture\nsample_rate = ").unwrap();

        let fc = load_config_file_from(&path);
        assert!(fc.capture.sample_rate.is_none());
    }
}
