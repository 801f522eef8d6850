//! Configuration module for the VoiceBot Gateway server.
//!
//! Configuration is assembled from several sources with the priority
//! YAML file > environment variables > `.env` values > built-in defaults.
//! `.env` loading happens in `main` (via `dotenvy`) before `from_env` runs,
//! so by the time this module reads the process environment both sources
//! are visible through the same lookup.
//!
//! # Example
//! ```rust,no_run
//! use voicebot_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub mod yaml;

pub use yaml::YamlConfig;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable or YAML value could not be parsed.
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// The YAML configuration file could not be read.
    #[error("Failed to read config file {path}: {reason}")]
    FileRead { path: PathBuf, reason: String },

    /// The YAML configuration file could not be parsed.
    #[error("Failed to parse config file {path}: {reason}")]
    FileParse { path: PathBuf, reason: String },
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains everything needed to run the gateway: listener settings,
/// collaborator service endpoints and credentials, pipeline policy knobs,
/// and security settings (CORS, rate limiting, connection limits).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    /// Absolute base used when handing out audio artifact URLs
    /// (e.g. "https://bot.example.com"). Relative URLs are used when unset.
    pub public_base_url: Option<String>,

    // Speech-to-text collaborator
    pub stt_provider: String,
    pub stt_api_key: Option<String>,
    pub stt_api_url: String,
    pub stt_model: String,

    // Retrieval collaborator
    pub retrieval_provider: String,
    pub retrieval_url: String,
    pub retrieval_top_k: usize,

    // Answer generation collaborator
    pub llm_provider: String,
    pub llm_api_key: Option<String>,
    pub llm_api_url: String,
    pub llm_model: String,

    // Speech synthesis collaborator
    pub tts_provider: String,
    pub tts_api_key: Option<String>,
    pub tts_api_url: String,
    pub tts_model: String,
    pub tts_voice: String,

    // Conversation behavior
    pub greeting_text: String,
    pub default_language: String,

    // Audio delivery: inline base64 payloads, or URLs backed by the TTL store
    pub inline_audio: bool,
    pub audio_cache_ttl_seconds: u64,

    // Pipeline policy
    pub stage_timeout_seconds: u64,
    pub session_retention_seconds: u64,

    // Security settings
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables (plus defaults).
    pub fn from_env() -> Result<Self, ConfigError> {
        let tls = match (env_var("TLS_CERT_PATH"), env_var("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            _ => None,
        };

        let config = Self {
            host: env_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parsed("PORT")?.unwrap_or(8000),
            tls,
            public_base_url: env_var("PUBLIC_BASE_URL"),

            stt_provider: env_var("STT_PROVIDER").unwrap_or_else(|| "whisper".to_string()),
            stt_api_key: env_var("STT_API_KEY").or_else(|| env_var("OPENAI_API_KEY")),
            stt_api_url: env_var("STT_API_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1/audio/transcriptions".to_string()),
            stt_model: env_var("STT_MODEL").unwrap_or_else(|| "whisper-1".to_string()),

            retrieval_provider: env_var("RETRIEVAL_PROVIDER").unwrap_or_else(|| "http".to_string()),
            retrieval_url: env_var("RETRIEVAL_URL")
                .unwrap_or_else(|| "http://localhost:8001".to_string()),
            retrieval_top_k: env_parsed("RETRIEVAL_TOP_K")?.unwrap_or(4),

            llm_provider: env_var("LLM_PROVIDER").unwrap_or_else(|| "gemini".to_string()),
            llm_api_key: env_var("LLM_API_KEY").or_else(|| env_var("GOOGLE_API_KEY")),
            llm_api_url: env_var("LLM_API_URL")
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            llm_model: env_var("LLM_MODEL").unwrap_or_else(|| "gemini-2.5-flash-lite".to_string()),

            tts_provider: env_var("TTS_PROVIDER").unwrap_or_else(|| "openai".to_string()),
            tts_api_key: env_var("TTS_API_KEY").or_else(|| env_var("OPENAI_API_KEY")),
            tts_api_url: env_var("TTS_API_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1/audio/speech".to_string()),
            tts_model: env_var("TTS_MODEL").unwrap_or_else(|| "gpt-4o-mini-tts".to_string()),
            tts_voice: env_var("TTS_VOICE").unwrap_or_else(|| "alloy".to_string()),

            greeting_text: env_var("GREETING_TEXT").unwrap_or_else(|| {
                "Hello! My name is VOICE, how can I assist you today?".to_string()
            }),
            default_language: env_var("DEFAULT_LANGUAGE").unwrap_or_else(|| "en".to_string()),

            inline_audio: env_parsed("INLINE_AUDIO")?.unwrap_or(true),
            audio_cache_ttl_seconds: env_parsed("AUDIO_CACHE_TTL_SECONDS")?.unwrap_or(3600),

            stage_timeout_seconds: env_parsed("STAGE_TIMEOUT_SECONDS")?.unwrap_or(30),
            session_retention_seconds: env_parsed("SESSION_RETENTION_SECONDS")?.unwrap_or(300),

            cors_allowed_origins: env_var("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: env_parsed("RATE_LIMIT_REQUESTS_PER_SECOND")?
                .unwrap_or(60),
            rate_limit_burst_size: env_parsed("RATE_LIMIT_BURST_SIZE")?.unwrap_or(10),
            max_websocket_connections: env_parsed("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: env_parsed("MAX_CONNECTIONS_PER_IP")?.unwrap_or(64),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, with environment variables as
    /// fallback for anything the file does not set.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::load(path)?;
        let mut config = Self::from_env()?;
        yaml.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// The socket address string the server binds to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether TLS serving is configured.
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Per-collaborator-call deadline.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_seconds)
    }

    /// How long a detached session survives before the registry drops it.
    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval_top_k == 0 {
            return Err(ConfigError::Invalid {
                field: "retrieval_top_k".to_string(),
                reason: "retrieval fan-out must be at least 1".to_string(),
            });
        }
        if self.stage_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "stage_timeout_seconds".to_string(),
                reason: "stage timeout must be at least 1 second".to_string(),
            });
        }
        if self.max_connections_per_ip == 0 {
            return Err(ConfigError::Invalid {
                field: "max_connections_per_ip".to_string(),
                reason: "per-IP connection limit must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            field: name.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(None),
    }
}
