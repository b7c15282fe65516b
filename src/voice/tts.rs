//! Text-to-speech (TTS) client

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Finite byte stream of raw PCM audio
///
/// Dropping the stream closes the underlying connection, which is how
/// cancellation abandons a partially consumed synthesis response.
pub type PcmStream = BoxStream<'static, Result<Bytes>>;

/// Synthesizes speech from a text span
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    /// Synthesize text, returning a stream of PCM bytes
    ///
    /// # Errors
    ///
    /// Returns error if the synthesis request fails; a per-sentence
    /// failure skips that sentence's audio and the turn continues
    async fn synthesize(&self, text: &str) -> Result<PcmStream>;
}

/// OpenAI TTS-backed synthesis client
pub struct OpenAiTts {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    voice: String,
    speed: f64,
}

impl OpenAiTts {
    /// Create a new TTS client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(
        api_key: SecretString,
        base_url: String,
        model: String,
        voice: String,
        speed: f64,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            voice,
            speed,
        })
    }
}

#[async_trait]
impl SynthesisClient for OpenAiTts {
    async fn synthesize(&self, text: &str) -> Result<PcmStream> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            response_format: &'a str,
            speed: f64,
        }

        tracing::debug!(chars = text.len(), "requesting synthesis");

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "pcm",
            speed: self.speed,
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS API error {status}: {body}")));
        }

        Ok(response.bytes_stream().map(|chunk| chunk.map_err(Error::from)).boxed())
    }
}
