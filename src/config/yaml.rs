//! YAML configuration file loading.
//!
//! The file mirrors the environment variables in structured form; any value
//! present in the file overrides the corresponding environment/default value.
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 8000
//! providers:
//!   stt:
//!     api_url: https://api.openai.com/v1/audio/transcriptions
//!     model: whisper-1
//!   retrieval:
//!     url: http://vector-store:8001
//!     top_k: 4
//! pipeline:
//!   stage_timeout_seconds: 30
//!   session_retention_seconds: 300
//! security:
//!   cors_allowed_origins: "*"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{ConfigError, ServerConfig, TlsConfig};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub providers: ProvidersSection,
    #[serde(default)]
    pub conversation: ConversationSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub security: SecuritySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub public_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidersSection {
    #[serde(default)]
    pub stt: SttSection,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub tts: TtsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SttSection {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalSection {
    pub provider: Option<String>,
    pub url: Option<String>,
    pub top_k: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmSection {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TtsSection {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationSection {
    pub greeting_text: Option<String>,
    pub default_language: Option<String>,
    pub inline_audio: Option<bool>,
    pub audio_cache_ttl_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    pub stage_timeout_seconds: Option<u64>,
    pub session_retention_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecuritySection {
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<usize>,
}

impl YamlConfig {
    /// Read and parse the YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::FileParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Parse YAML configuration from a string (used by tests).
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|e| ConfigError::FileParse {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })
    }

    /// Overlay every value the file carries onto `config`.
    pub fn apply(self, config: &mut ServerConfig) {
        let Self {
            server,
            providers,
            conversation,
            pipeline,
            security,
        } = self;

        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let (Some(cert_path), Some(key_path)) = (server.tls_cert_path, server.tls_key_path) {
            config.tls = Some(TlsConfig { cert_path, key_path });
        }
        if server.public_base_url.is_some() {
            config.public_base_url = server.public_base_url;
        }

        apply_opt(&mut config.stt_provider, providers.stt.provider);
        if providers.stt.api_key.is_some() {
            config.stt_api_key = providers.stt.api_key;
        }
        apply_opt(&mut config.stt_api_url, providers.stt.api_url);
        apply_opt(&mut config.stt_model, providers.stt.model);

        apply_opt(&mut config.retrieval_provider, providers.retrieval.provider);
        apply_opt(&mut config.retrieval_url, providers.retrieval.url);
        apply_opt(&mut config.retrieval_top_k, providers.retrieval.top_k);

        apply_opt(&mut config.llm_provider, providers.llm.provider);
        if providers.llm.api_key.is_some() {
            config.llm_api_key = providers.llm.api_key;
        }
        apply_opt(&mut config.llm_api_url, providers.llm.api_url);
        apply_opt(&mut config.llm_model, providers.llm.model);

        apply_opt(&mut config.tts_provider, providers.tts.provider);
        if providers.tts.api_key.is_some() {
            config.tts_api_key = providers.tts.api_key;
        }
        apply_opt(&mut config.tts_api_url, providers.tts.api_url);
        apply_opt(&mut config.tts_model, providers.tts.model);
        apply_opt(&mut config.tts_voice, providers.tts.voice);

        apply_opt(&mut config.greeting_text, conversation.greeting_text);
        apply_opt(&mut config.default_language, conversation.default_language);
        apply_opt(&mut config.inline_audio, conversation.inline_audio);
        apply_opt(
            &mut config.audio_cache_ttl_seconds,
            conversation.audio_cache_ttl_seconds,
        );

        apply_opt(
            &mut config.stage_timeout_seconds,
            pipeline.stage_timeout_seconds,
        );
        apply_opt(
            &mut config.session_retention_seconds,
            pipeline.session_retention_seconds,
        );

        if security.cors_allowed_origins.is_some() {
            config.cors_allowed_origins = security.cors_allowed_origins;
        }
        apply_opt(
            &mut config.rate_limit_requests_per_second,
            security.rate_limit_requests_per_second,
        );
        apply_opt(
            &mut config.rate_limit_burst_size,
            security.rate_limit_burst_size,
        );
        if security.max_websocket_connections.is_some() {
            config.max_websocket_connections = security.max_websocket_connections;
        }
        apply_opt(
            &mut config.max_connections_per_ip,
            security.max_connections_per_ip,
        );
    }
}

fn apply_opt<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}
