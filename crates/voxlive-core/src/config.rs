use crate::error::ConfigError;
use crate::types::AudioFormat;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_device_name")]
    pub input_device: String,

    #[serde(default = "default_device_name")]
    pub output_device: String,

    #[serde(default = "default_input_sample_rate")]
    pub input_sample_rate: u32,

    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,

    /// Samples per capture frame.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    #[serde(default = "default_true")]
    pub playback: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: default_device_name(),
            output_device: default_device_name(),
            input_sample_rate: default_input_sample_rate(),
            output_sample_rate: default_output_sample_rate(),
            block_size: default_block_size(),
            playback: default_true(),
        }
    }
}

impl AudioConfig {
    pub fn input_format(&self) -> AudioFormat {
        AudioFormat::mono(self.input_sample_rate)
    }

    pub fn output_format(&self) -> AudioFormat {
        AudioFormat::mono(self.output_sample_rate)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_transport")]
    pub transport: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Falls back to `GEMINI_API_KEY` when not configured.
    #[serde(default = "default_api_key")]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default)]
    pub system_instruction: Option<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            endpoint: default_endpoint(),
            api_key: default_api_key(),
            model: default_model(),
            voice: default_voice(),
            system_instruction: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_device_name() -> String {
    "default".to_string()
}

fn default_input_sample_rate() -> u32 {
    16000
}

fn default_output_sample_rate() -> u32 {
    24000
}

fn default_block_size() -> usize {
    4096
}

fn default_true() -> bool {
    true
}

fn default_transport() -> String {
    "gemini".to_string()
}

fn default_endpoint() -> String {
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string()
}

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

fn default_api_key() -> String {
    api_key_from_env(API_KEY_ENV)
}

fn api_key_from_env(var: &str) -> String {
    std::env::var(var).unwrap_or_default()
}

fn default_model() -> String {
    "gemini-2.5-flash-native-audio-preview-12-2025".to_string()
}

fn default_voice() -> String {
    "Zephyr".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static pattern is valid"))
}

/// Interpolate `${VAR}` patterns with environment variable values.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing = None;
    let result = env_var_pattern().replace_all(input, |cap: &regex::Captures<'_>| {
        match std::env::var(&cap[1]) {
            Ok(val) => val,
            Err(_) => {
                missing.get_or_insert_with(|| cap[1].to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::EnvVarNotFound(name)),
        None => Ok(result.into_owned()),
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, with environment variable interpolation.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!(path = %path.display(), "loading config");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(s)?;
        let config: AppConfig = toml::from_str(&interpolated)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(ConfigError::Invalid("sample rates must be non-zero".into()));
        }
        if self.audio.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be non-zero".into()));
        }
        if self.session.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
