//! Speech-to-text (STT) processing

use async_trait::async_trait;

use crate::audio::samples_to_wav;
use crate::config::SttConfig;
use crate::{Error, Result};

use super::capture::Utterance;

/// Turns captured speech into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an utterance; an empty string means nothing was recognized
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    async fn transcribe(&self, utterance: Utterance, language: &str) -> Result<String>;
}

/// Response from an OpenAI-compatible transcription endpoint
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Whisper transcription over an OpenAI-compatible `/audio/transcriptions` API
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl WhisperTranscriber {
    /// Create a transcriber
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(base_url: &str, api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "API key required for Whisper transcription".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    /// Create a transcriber from resolved configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn from_config(config: &SttConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.api_key.clone().unwrap_or_default(),
            config.model.clone(),
        )
    }

    /// Transcribe WAV bytes
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the API reports an error
    pub async fn transcribe_wav(&self, wav: Vec<u8>, language: &str) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), language, "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());
        if !language.is_empty() {
            form = form.text("language", language.to_string());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        let text = result.text.trim().to_string();
        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, utterance: Utterance, language: &str) -> Result<String> {
        let wav = samples_to_wav(&utterance.samples, utterance.sample_rate)?;
        self.transcribe_wav(wav, language).await
    }
}
