use std::net::SocketAddr;
use std::time::Duration;

use mindflow_core::completion::OPENROUTER_BASE_URL;
use mindflow_core::speech::transcribe::{
    DEFAULT_TRANSCRIPTION_BASE_URL, DEFAULT_TRANSCRIPTION_MODEL,
};
use secrecy::SecretString;
use tracing::Level;

use crate::sessions::DEFAULT_IDLE_TIMEOUT;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openrouter_api_key: SecretString,
    pub openrouter_base_url: String,
    pub transcription_base_url: String,
    pub transcription_api_key: Option<SecretString>,
    pub transcription_model: String,
    pub tts_language: String,
    pub listen_max: Duration,
    pub session_idle_timeout: Duration,
    pub max_upload_bytes: usize,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory
    /// and load the following variables:
    ///
    /// *   `OPENROUTER_API_KEY`: Key for the OpenRouter API. Required.
    /// *   `OPENROUTER_BASE_URL`: (Optional) Defaults to "https://openrouter.ai/api/v1".
    /// *   `BIND_ADDRESS`: (Optional) Defaults to "127.0.0.1:8501".
    /// *   `TRANSCRIPTION_BASE_URL`: (Optional) OpenAI-compatible speech-to-text API. Defaults to Groq.
    /// *   `TRANSCRIPTION_API_KEY`: (Optional) Without it every voice answer fails to transcribe.
    /// *   `TRANSCRIPTION_MODEL`: (Optional) Defaults to "whisper-large-v3-turbo".
    /// *   `TTS_LANGUAGE`: (Optional) Spoken language. Defaults to "en".
    /// *   `LISTEN_MAX_SECS`: (Optional) Longest single answer recording. Defaults to 30.
    /// *   `SESSION_IDLE_SECS`: (Optional) Idle sessions older than this are dropped. Defaults to 3600.
    /// *   `MAX_UPLOAD_BYTES`: (Optional) Upload size limit. Defaults to 50 MiB.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any variable lookup.
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let openrouter_api_key = var("OPENROUTER_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENROUTER_API_KEY".to_string()))?;

        let openrouter_base_url =
            var("OPENROUTER_BASE_URL").unwrap_or_else(|| OPENROUTER_BASE_URL.to_string());

        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "127.0.0.1:8501".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let transcription_base_url = var("TRANSCRIPTION_BASE_URL")
            .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_BASE_URL.to_string());
        let transcription_api_key = var("TRANSCRIPTION_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);
        let transcription_model =
            var("TRANSCRIPTION_MODEL").unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string());

        let tts_language = var("TTS_LANGUAGE").unwrap_or_else(|| "en".to_string());

        let listen_max = match var("LISTEN_MAX_SECS") {
            Some(raw) => {
                let secs = raw.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidValue("LISTEN_MAX_SECS".to_string(), e.to_string())
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue(
                        "LISTEN_MAX_SECS".to_string(),
                        "must be at least 1".to_string(),
                    ));
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(30),
        };

        let session_idle_timeout = match var("SESSION_IDLE_SECS") {
            Some(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue("SESSION_IDLE_SECS".to_string(), e.to_string())
            })?),
            None => DEFAULT_IDLE_TIMEOUT,
        };

        let max_upload_bytes = match var("MAX_UPLOAD_BYTES") {
            Some(raw) => raw.parse::<usize>().map_err(|e| {
                ConfigError::InvalidValue("MAX_UPLOAD_BYTES".to_string(), e.to_string())
            })?,
            None => 50 * 1024 * 1024,
        };

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openrouter_api_key,
            openrouter_base_url,
            transcription_base_url,
            transcription_api_key,
            transcription_model,
            tts_language,
            listen_max,
            session_idle_timeout,
            max_upload_bytes,
            log_level,
        })
    }
}
