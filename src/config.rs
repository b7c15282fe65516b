//! Configuration management for the parley pipeline
//!
//! Configuration is assembled from three layers: built-in defaults, an
//! optional TOML file (`~/.config/parley/config.toml`, all fields
//! optional), and environment variables. API keys never appear in debug
//! output.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::{Error, Result};

/// Parley configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Utterance capture tuning
    pub recorder: RecorderConfig,

    /// Chat completion settings
    pub llm: LlmConfig,

    /// Transcription settings
    pub stt: SttConfig,

    /// Speech synthesis settings
    pub tts: TtsConfig,

    /// Tool-call policy
    pub policy: PolicyConfig,

    /// API keys for external services
    pub api_keys: ApiKeys,
}

/// Adaptive recorder tuning
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// How long to wait for speech onset before giving up
    pub onset_window: Duration,

    /// Trailing silence that ends an utterance
    pub silence_threshold: Duration,

    /// webrtc-vad aggressiveness (0 = lenient, 3 = strict)
    pub vad_mode: u8,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            onset_window: Duration::from_secs(3),
            silence_threshold: Duration::from_secs(1),
            vad_mode: 3,
        }
    }
}

/// Chat completion settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: String,

    /// API base URL (OpenAI-compatible)
    pub base_url: String,

    /// System prompt seeded into every conversation
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
        }
    }
}

/// Transcription settings
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// STT model (e.g. "whisper-1")
    pub model: String,

    /// Spoken language hint (ISO 639-1)
    pub language: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            language: "en".to_string(),
        }
    }
}

/// Speech synthesis settings
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// TTS model (e.g. "tts-1")
    pub model: String,

    /// Voice identifier (e.g. "nova")
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f64,

    /// Sample rate of the PCM the service returns
    pub sample_rate: u32,

    /// Concurrent synthesis requests in flight
    pub workers: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: "nova".to_string(),
            speed: 1.0,
            sample_rate: 24_000,
            workers: 2,
        }
    }
}

/// Tool-call policy lists
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    /// Tool names always allowed
    pub allow: Vec<String>,

    /// Tool names always denied
    pub deny: Vec<String>,

    /// Verdict for tools on neither list
    pub default_allow: bool,
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (chat, Whisper and TTS)
    pub openai: Option<SecretString>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("openai", &self.openai.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Top-level TOML configuration file schema. All fields optional; the
/// file is a partial overlay on top of defaults.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    recorder: RecorderFileConfig,

    #[serde(default)]
    llm: LlmFileConfig,

    #[serde(default)]
    stt: SttFileConfig,

    #[serde(default)]
    tts: TtsFileConfig,

    #[serde(default)]
    policy: PolicyFileConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RecorderFileConfig {
    /// Onset window in seconds
    onset_window_secs: Option<f64>,

    /// Trailing silence threshold in seconds
    silence_threshold_secs: Option<f64>,

    /// webrtc-vad aggressiveness (0-3)
    vad_mode: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmFileConfig {
    model: Option<String>,
    base_url: Option<String>,
    system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SttFileConfig {
    model: Option<String>,
    language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TtsFileConfig {
    model: Option<String>,
    voice: Option<String>,
    speed: Option<f64>,
    sample_rate: Option<u32>,
    workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyFileConfig {
    allow: Option<Vec<String>>,
    deny: Option<Vec<String>>,
    default_allow: Option<bool>,
}

impl Config {
    /// Load configuration from defaults, config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if the config file exists but cannot be parsed, or
    /// if a value is out of range
    pub fn load() -> Result<Self> {
        let file = match config_file_path() {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(&path)?;
                let parsed: ConfigFile = toml::from_str(&raw)?;
                tracing::debug!(path = %path.display(), "loaded config file");
                parsed
            }
            _ => ConfigFile::default(),
        };

        let mut config = Self {
            recorder: RecorderConfig::default(),
            llm: LlmConfig::default(),
            stt: SttConfig::default(),
            tts: TtsConfig::default(),
            policy: PolicyConfig::default(),
            api_keys: ApiKeys::default(),
        };

        config.apply_file(file)?;
        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(secs) = file.recorder.onset_window_secs {
            self.recorder.onset_window = duration_from_secs(secs, "recorder.onset_window_secs")?;
        }
        if let Some(secs) = file.recorder.silence_threshold_secs {
            self.recorder.silence_threshold =
                duration_from_secs(secs, "recorder.silence_threshold_secs")?;
        }
        if let Some(mode) = file.recorder.vad_mode {
            self.recorder.vad_mode = mode;
        }

        if let Some(model) = file.llm.model {
            self.llm.model = model;
        }
        if let Some(url) = file.llm.base_url {
            self.llm.base_url = url;
        }
        if let Some(prompt) = file.llm.system_prompt {
            self.llm.system_prompt = prompt;
        }

        if let Some(model) = file.stt.model {
            self.stt.model = model;
        }
        if let Some(language) = file.stt.language {
            self.stt.language = language;
        }

        if let Some(model) = file.tts.model {
            self.tts.model = model;
        }
        if let Some(voice) = file.tts.voice {
            self.tts.voice = voice;
        }
        if let Some(speed) = file.tts.speed {
            self.tts.speed = speed;
        }
        if let Some(rate) = file.tts.sample_rate {
            self.tts.sample_rate = rate;
        }
        if let Some(workers) = file.tts.workers {
            self.tts.workers = workers;
        }

        if let Some(allow) = file.policy.allow {
            self.policy.allow = allow;
        }
        if let Some(deny) = file.policy.deny {
            self.policy.deny = deny;
        }
        if let Some(default_allow) = file.policy.default_allow {
            self.policy.default_allow = default_allow;
        }

        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.api_keys.openai = Some(SecretString::from(key));
            }
        }
        if let Ok(model) = std::env::var("PARLEY_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(url) = std::env::var("PARLEY_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(language) = std::env::var("PARLEY_LANGUAGE") {
            self.stt.language = language;
        }
        if let Ok(voice) = std::env::var("PARLEY_TTS_VOICE") {
            self.tts.voice = voice;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.recorder.vad_mode > 3 {
            return Err(Error::Config(format!(
                "recorder.vad_mode must be 0-3, got {}",
                self.recorder.vad_mode
            )));
        }
        if !(0.25..=4.0).contains(&self.tts.speed) {
            return Err(Error::Config(format!(
                "tts.speed must be between 0.25 and 4.0, got {}",
                self.tts.speed
            )));
        }
        if self.tts.workers == 0 {
            return Err(Error::Config("tts.workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn duration_from_secs(secs: f64, field: &str) -> Result<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(Error::Config(format!(
            "{field} must be a positive number, got {secs}"
        )))
    }
}

/// Config file location: `~/.config/parley/config.toml`
fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("parley").join("config.toml"))
}
