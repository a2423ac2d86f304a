//! Application configuration for the interview service.
//!
//! Settings come from environment variables (with `.env` support for local
//! development) and CLI flags layered on top in `main`.

use std::env;
use std::time::Duration;
use tracing::Level;

/// Samples per chunk sent from the microphone input stream.
pub const INPUT_CHUNK_SIZE: usize = 1024;
/// Samples per chunk for the audio output stream.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// Latency of the output ring buffer in milliseconds.
pub const OUTPUT_LATENCY_MS: usize = 1000;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub chat_model: String,
    pub tts_model: String,
    pub transcribe_model: String,
    pub session_budget: Duration,
    pub question_count: usize,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {var}: {value}")]
    InvalidVar { var: String, value: String },
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// *   `OPENAI_API_KEY`: Required. Secret key for all OpenAI calls.
    /// *   `CHAT_MODEL`: (Optional) Model for question generation and answer
    ///     analysis. Defaults to "gpt-4o".
    /// *   `TTS_MODEL`: (Optional) Speech synthesis model. Defaults to "tts-1".
    /// *   `TRANSCRIBE_MODEL`: (Optional) Speech-to-text model. Defaults to
    ///     "whisper-1".
    /// *   `SESSION_MINUTES`: (Optional) Whole-session time budget. Defaults
    ///     to 15.
    /// *   `QUESTION_COUNT`: (Optional) Questions requested per session.
    ///     Defaults to 3.
    /// *   `RUST_LOG`: (Optional) Logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Ignored if no .env file is present.
        dotenvy::dotenv().ok();

        let openai_api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let chat_model = env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let tts_model = env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        let transcribe_model =
            env::var("TRANSCRIBE_MODEL").unwrap_or_else(|_| "whisper-1".to_string());

        let session_budget = Duration::from_secs(60 * parse_or("SESSION_MINUTES", 15u64)?);
        let question_count = parse_or("QUESTION_COUNT", 3usize)?;

        let log_level_str = env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            openai_api_key,
            chat_model,
            tts_model,
            transcribe_model,
            session_budget,
            question_count,
            log_level,
        })
    }
}

fn parse_or<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value.parse::<T>().map_err(|_| ConfigError::InvalidVar {
            var: var.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}
