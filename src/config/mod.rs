//! Configuration module for the gateway server.
//!
//! Configuration is loaded from environment variables (optionally seeded
//! from a `.env` file) and can be overridden by a YAML file:
//! YAML > environment > defaults.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::session::SessionTuning;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the configuration file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Could not parse the configuration file
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Invalid combination of settings
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// TLS configuration for HTTPS and WSS.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Default greeting prompt.
const DEFAULT_GREETING_PROMPT: &str =
    "You are answering an incoming call. Greet the caller naturally and ask how you can help.";

/// Default active idle reprompt.
const DEFAULT_ACTIVE_IDLE_PROMPT: &str =
    "The caller has been quiet for a while. Briefly and naturally check in with them.";

/// Default silent idle reprompt.
const DEFAULT_SILENT_IDLE_PROMPT: &str = "No one is speaking. Reflect on the conversation so far \
     and decide silently whether anything needs follow-up. Do not address the caller.";

/// Server configuration.
///
/// Contains everything needed to run the gateway: server settings, upstream
/// provider credentials, security settings and per-session defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    /// Upstream realtime endpoint; the provider variant is inferred from it
    pub realtime_base_url: Option<String>,
    /// Credential for the direct variant
    pub openai_api_key: Option<String>,
    /// Credential for the Azure variant
    pub azure_api_key: Option<String>,
    /// Default model for new sessions
    pub default_model: String,
    /// Default voice for new sessions
    pub default_voice: Option<String>,
    /// Reconnect dropped upstream connections automatically
    pub auto_reconnect: bool,
    /// Verbose wire-frame logging
    pub debug_frames: bool,

    // Security settings
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u64,
    pub rate_limit_burst_size: u32,

    // Per-session defaults
    pub greeting_prompt: String,
    pub active_idle_prompt: String,
    pub silent_idle_prompt: String,
    pub idle_base_delay_ms: u64,
    pub idle_max_delay_ms: u64,
    pub idle_silent_after_ms: u64,
    pub echo_block_ms: u64,
    pub tool_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let tuning = SessionTuning::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls: None,
            realtime_base_url: None,
            openai_api_key: None,
            azure_api_key: None,
            default_model: "gpt-4o-realtime-preview".to_string(),
            default_voice: None,
            auto_reconnect: true,
            debug_frames: false,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 100,
            rate_limit_burst_size: 50,
            greeting_prompt: DEFAULT_GREETING_PROMPT.to_string(),
            active_idle_prompt: DEFAULT_ACTIVE_IDLE_PROMPT.to_string(),
            silent_idle_prompt: DEFAULT_SILENT_IDLE_PROMPT.to_string(),
            idle_base_delay_ms: tuning.idle_base_delay_ms,
            idle_max_delay_ms: tuning.idle_max_delay_ms,
            idle_silent_after_ms: tuning.idle_silent_after_ms,
            echo_block_ms: tuning.echo_block_ms,
            tool_timeout_ms: tuning.tool_timeout_ms,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = env_string("HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse::<u16>("PORT") {
            config.port = port;
        }

        let cert_path = env_string("TLS_CERT_PATH");
        let key_path = env_string("TLS_KEY_PATH");
        config.tls = match (cert_path, key_path) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
                ));
            }
        };

        config.realtime_base_url = env_string("REALTIME_BASE_URL");
        config.openai_api_key = env_string("OPENAI_API_KEY");
        config.azure_api_key = env_string("AZURE_OPENAI_API_KEY");
        if let Some(model) = env_string("REALTIME_MODEL") {
            config.default_model = model;
        }
        config.default_voice = env_string("REALTIME_VOICE");
        if let Some(flag) = env_bool("AUTO_RECONNECT") {
            config.auto_reconnect = flag;
        }
        if let Some(flag) = env_bool("DEBUG_FRAMES") {
            config.debug_frames = flag;
        }

        config.cors_allowed_origins = env_string("CORS_ALLOWED_ORIGINS");
        if let Some(rps) = env_parse::<u64>("RATE_LIMIT_RPS") {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = env_parse::<u32>("RATE_LIMIT_BURST") {
            config.rate_limit_burst_size = burst;
        }

        if let Some(prompt) = env_string("GREETING_PROMPT") {
            config.greeting_prompt = prompt;
        }
        if let Some(prompt) = env_string("ACTIVE_IDLE_PROMPT") {
            config.active_idle_prompt = prompt;
        }
        if let Some(prompt) = env_string("SILENT_IDLE_PROMPT") {
            config.silent_idle_prompt = prompt;
        }
        if let Some(v) = env_parse::<u64>("IDLE_BASE_DELAY_MS") {
            config.idle_base_delay_ms = v;
        }
        if let Some(v) = env_parse::<u64>("IDLE_MAX_DELAY_MS") {
            config.idle_max_delay_ms = v;
        }
        if let Some(v) = env_parse::<u64>("IDLE_SILENT_AFTER_MS") {
            config.idle_silent_after_ms = v;
        }
        if let Some(v) = env_parse::<u64>("ECHO_BLOCK_MS") {
            config.echo_block_ms = v;
        }
        if let Some(v) = env_parse::<u64>("TOOL_TIMEOUT_MS") {
            config.tool_timeout_ms = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, with environment variables
    /// filling anything the file leaves unset.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let yaml: YamlConfig = serde_yaml::from_str(&text)?;
        let mut config = Self::from_env()?;
        yaml.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Bind address in `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether TLS is configured.
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Per-session timing parameters.
    pub fn session_tuning(&self) -> SessionTuning {
        SessionTuning {
            idle_base_delay_ms: self.idle_base_delay_ms,
            idle_max_delay_ms: self.idle_max_delay_ms,
            idle_silent_after_ms: self.idle_silent_after_ms,
            echo_block_ms: self.echo_block_ms,
            tool_timeout_ms: self.tool_timeout_ms,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "idle_base_delay_ms must be positive".to_string(),
            ));
        }
        if self.idle_max_delay_ms < self.idle_base_delay_ms {
            return Err(ConfigError::Invalid(
                "idle_max_delay_ms must be >= idle_base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

// =============================================================================
// YAML layer
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    #[serde(default)]
    server: YamlServer,
    #[serde(default)]
    provider: YamlProvider,
    #[serde(default)]
    security: YamlSecurity,
    #[serde(default)]
    session: YamlSession,
}

#[derive(Debug, Default, Deserialize)]
struct YamlServer {
    host: Option<String>,
    port: Option<u16>,
    tls_cert_path: Option<PathBuf>,
    tls_key_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlProvider {
    base_url: Option<String>,
    openai_api_key: Option<String>,
    azure_api_key: Option<String>,
    model: Option<String>,
    voice: Option<String>,
    auto_reconnect: Option<bool>,
    debug_frames: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlSecurity {
    cors_allowed_origins: Option<String>,
    rate_limit_requests_per_second: Option<u64>,
    rate_limit_burst_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlSession {
    greeting_prompt: Option<String>,
    active_idle_prompt: Option<String>,
    silent_idle_prompt: Option<String>,
    idle_base_delay_ms: Option<u64>,
    idle_max_delay_ms: Option<u64>,
    idle_silent_after_ms: Option<u64>,
    echo_block_ms: Option<u64>,
    tool_timeout_ms: Option<u64>,
}

impl YamlConfig {
    fn apply(self, config: &mut ServerConfig) -> Result<(), ConfigError> {
        if let Some(host) = self.server.host {
            config.host = host;
        }
        if let Some(port) = self.server.port {
            config.port = port;
        }
        match (self.server.tls_cert_path, self.server.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                config.tls = Some(TlsConfig {
                    cert_path,
                    key_path,
                });
            }
            (None, None) => {}
            _ => {
                return Err(ConfigError::Invalid(
                    "tls_cert_path and tls_key_path must be set together".to_string(),
                ));
            }
        }

        if self.provider.base_url.is_some() {
            config.realtime_base_url = self.provider.base_url;
        }
        if self.provider.openai_api_key.is_some() {
            config.openai_api_key = self.provider.openai_api_key;
        }
        if self.provider.azure_api_key.is_some() {
            config.azure_api_key = self.provider.azure_api_key;
        }
        if let Some(model) = self.provider.model {
            config.default_model = model;
        }
        if self.provider.voice.is_some() {
            config.default_voice = self.provider.voice;
        }
        if let Some(flag) = self.provider.auto_reconnect {
            config.auto_reconnect = flag;
        }
        if let Some(flag) = self.provider.debug_frames {
            config.debug_frames = flag;
        }

        if self.security.cors_allowed_origins.is_some() {
            config.cors_allowed_origins = self.security.cors_allowed_origins;
        }
        if let Some(rps) = self.security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = self.security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }

        if let Some(prompt) = self.session.greeting_prompt {
            config.greeting_prompt = prompt;
        }
        if let Some(prompt) = self.session.active_idle_prompt {
            config.active_idle_prompt = prompt;
        }
        if let Some(prompt) = self.session.silent_idle_prompt {
            config.silent_idle_prompt = prompt;
        }
        if let Some(v) = self.session.idle_base_delay_ms {
            config.idle_base_delay_ms = v;
        }
        if let Some(v) = self.session.idle_max_delay_ms {
            config.idle_max_delay_ms = v;
        }
        if let Some(v) = self.session.idle_silent_after_ms {
            config.idle_silent_after_ms = v;
        }
        if let Some(v) = self.session.echo_block_ms {
            config.echo_block_ms = v;
        }
        if let Some(v) = self.session.tool_timeout_ms {
            config.tool_timeout_ms = v;
        }

        Ok(())
    }
}
