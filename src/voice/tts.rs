//! Text-to-speech (TTS) processing

use std::io::Cursor;

use async_trait::async_trait;

use crate::audio::AudioClip;
use crate::config::TtsConfig;
use crate::{Error, Result};

/// Turns reply text into audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize text to a playable clip
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<AudioClip>;
}

/// Speech synthesis over an OpenAI-compatible `/audio/speech` API
#[derive(Debug, Clone)]
pub struct SpeechClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
}

impl SpeechClient {
    /// Create a synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        base_url: &str,
        api_key: String,
        voice: String,
        speed: f32,
        model: String,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            voice,
            speed: speed.clamp(0.25, 4.0),
            model,
        })
    }

    /// Create a synthesizer from resolved configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn from_config(config: &TtsConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.api_key.clone().unwrap_or_default(),
            config.voice.clone(),
            config.speed,
            config.model.clone(),
        )
    }

    /// Fetch MP3 audio for the text
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the API reports an error
    pub async fn synthesize_mp3(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        tracing::debug!(chars = text.len(), voice = %self.voice, "requesting speech");

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechClient {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        let mp3 = self.synthesize_mp3(text).await?;
        decode_mp3(&mp3)
    }
}

/// Decode MP3 bytes, keeping the stream's channel layout
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<AudioClip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut format: Option<(u32, u16)> = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                let rate = u32::try_from(frame.sample_rate)
                    .map_err(|_| Error::Tts("invalid MP3 sample rate".to_string()))?;
                let channels = u16::try_from(frame.channels)
                    .map_err(|_| Error::Tts("invalid MP3 channel count".to_string()))?;
                match format {
                    None => format = Some((rate, channels)),
                    Some(existing) if existing != (rate, channels) => {
                        return Err(Error::Tts(
                            "MP3 stream changes format mid-stream".to_string(),
                        ));
                    }
                    Some(_) => {}
                }
                samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Tts(format!("MP3 decode error: {e}"))),
        }
    }

    let Some((sample_rate, channels)) = format else {
        return Err(Error::Tts("MP3 stream contained no audio".to_string()));
    };

    Ok(AudioClip {
        samples,
        sample_rate,
        channels,
    })
}
