//! Configuration module for the narrator gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use narrator_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

pub use utils::log_level_directive;

use crate::core::job::ConversionDefaults;
use crate::core::retry::RetryPolicy;
use crate::core::service::ProviderDefaults;
use crate::core::tts::local::DEFAULT_PIPER_SAMPLE_RATE;
use crate::core::tts::{AudioFormat, LocalEngineConfig, ProviderKind, SecretString};

/// Log output format, selected with `LOG_FORMAT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "plain" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("Invalid LOG_FORMAT '{other}'. Must be 'text' or 'json'")),
        }
    }
}

/// Server configuration
///
/// Contains all configuration needed to run the gateway, including:
/// - Server settings (host, port)
/// - Provider credentials and the local Piper engine
/// - Conversion defaults applied to requests that leave a setting out
/// - Retry policy for provider calls
/// - Job retention
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Logging
    /// One of DEBUG, INFO, WARNING, ERROR, CRITICAL
    pub log_level: Option<String>,
    pub log_format: LogFormat,

    // Providers
    /// OpenAI API key for the speech endpoint
    pub openai_api_key: Option<String>,
    pub openai_tts_url: String,

    // Local Piper engine
    pub piper_binary: PathBuf,
    pub piper_model_dir: Option<PathBuf>,
    pub local_engine_slots: usize,
    pub local_default_voice: String,

    // Conversion defaults
    pub chunk_size: usize,
    pub default_provider: ProviderKind,
    pub default_voice: Option<String>,
    pub default_model: Option<String>,
    pub default_format: AudioFormat,
    pub worker_pool_size: usize,
    pub max_text_chars: usize,
    /// Deadline for a whole job; `None` means no deadline
    pub job_timeout_secs: Option<u64>,

    // Retry policy
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub attempt_timeout_secs: u64,

    // Job store
    pub job_retention_secs: u64,
    pub max_jobs: u64,
    pub deduplicate_jobs: bool,
}

/// Implement Drop to zeroize all secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // Note: .env file is loaded in main.rs at application startup
        let yaml_config = yaml::YamlConfig::from_file(path)?;

        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;

        Ok(config)
    }

    /// Check the merged configuration for values no job could run with.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_conversion(self)?;
        validation::validate_retry(self)?;
        validation::validate_log_level(&self.log_level)?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Filter directive derived from `LOG_LEVEL`, if set.
    pub fn log_directive(&self) -> Option<&'static str> {
        self.log_level.as_deref().and_then(log_level_directive)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn conversion_defaults(&self) -> ConversionDefaults {
        ConversionDefaults {
            chunk_size_limit: self.chunk_size,
            worker_pool_size: self.worker_pool_size,
            max_text_chars: self.max_text_chars,
            job_timeout: self.job_timeout_secs.map(Duration::from_secs),
            ..Default::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            backoff_multiplier: self.retry_backoff_multiplier,
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            ..Default::default()
        }
    }

    pub fn local_engine_config(&self) -> LocalEngineConfig {
        LocalEngineConfig {
            binary: self.piper_binary.clone(),
            model_dir: self.piper_model_dir.clone(),
            slots: self.local_engine_slots,
            sample_rate: DEFAULT_PIPER_SAMPLE_RATE,
            default_voice: self.local_default_voice.clone(),
        }
    }

    pub fn provider_defaults(&self) -> ProviderDefaults {
        ProviderDefaults {
            kind: self.default_provider,
            voice: self.default_voice.clone(),
            model: self.default_model.clone(),
            format: self.default_format,
            openai_api_key: self.openai_api_key.clone().map(SecretString::from),
            openai_endpoint: Some(self.openai_tts_url.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    fn cleanup_env_vars() {
        unsafe {
            for var in [
                "HOST",
                "PORT",
                "LOG_LEVEL",
                "LOG_FORMAT",
                "OPENAI_API_KEY",
                "PIPER_MODEL_DIR",
                "TTS_CHUNK_SIZE",
                "TTS_DEFAULT_PROVIDER",
                "TTS_WORKER_POOL_SIZE",
                "TTS_MAX_ATTEMPTS",
                "TTS_RETRY_BACKOFF_MULTIPLIER",
                "TTS_JOB_TIMEOUT_SECS",
            ] {
                env::remove_var(var);
            }
        }
    }

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.yaml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(
            &temp_dir,
            r#"
server:
  host: "127.0.0.1"
  port: 8080
providers:
  openai_api_key: "sk-yaml"
local:
  model_dir: "/opt/piper"
conversion:
  chunk_size: 1200
  job_timeout_secs: 300
"#,
        );

        let config = ServerConfig::from_file(&config_path).unwrap();

        assert_eq!(config.address(), "127.0.0.1:8080");
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-yaml"));
        assert_eq!(config.piper_model_dir, Some(PathBuf::from("/opt/piper")));
        assert_eq!(config.chunk_size, 1200);
        assert_eq!(config.job_timeout_secs, Some(300));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, "server:\n  port: 8080\n");

        unsafe {
            env::set_var("PORT", "9999");
            env::set_var("HOST", "10.1.1.1");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "10.1.1.1");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();
        let result = ServerConfig::from_file(&PathBuf::from("/nonexistent/config.yaml"));
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    #[serial]
    fn test_from_env_validation() {
        let cases = [
            ("TTS_CHUNK_SIZE", "0", "TTS_CHUNK_SIZE"),
            ("TTS_WORKER_POOL_SIZE", "0", "TTS_WORKER_POOL_SIZE"),
            ("TTS_WORKER_POOL_SIZE", "65", "TTS_WORKER_POOL_SIZE"),
            ("TTS_MAX_ATTEMPTS", "0", "TTS_MAX_ATTEMPTS"),
            ("TTS_RETRY_BACKOFF_MULTIPLIER", "0.5", "TTS_RETRY_BACKOFF_MULTIPLIER"),
            ("TTS_JOB_TIMEOUT_SECS", "0", "TTS_JOB_TIMEOUT_SECS"),
            ("LOG_LEVEL", "VERBOSE", "LOG_LEVEL"),
            ("PORT", "99999", "PORT"),
        ];

        for (var, value, expected) in cases {
            cleanup_env_vars();
            unsafe {
                env::set_var(var, value);
            }
            let err = ServerConfig::from_env().unwrap_err().to_string();
            assert!(err.contains(expected), "{var}={value}: {err}");
        }

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_derived_settings() {
        cleanup_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("LOG_LEVEL", "WARNING");
            env::set_var("TTS_JOB_TIMEOUT_SECS", "120");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.log_directive(), Some("warn"));

        let defaults = config.conversion_defaults();
        assert_eq!(defaults.chunk_size_limit, 4000);
        assert_eq!(defaults.job_timeout, Some(Duration::from_secs(120)));

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(1000));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(30));

        let provider = config.provider_defaults();
        assert_eq!(provider.kind, ProviderKind::OpenAI);
        assert_eq!(provider.openai_api_key.unwrap().expose(), "sk-env");

        let local = config.local_engine_config();
        assert_eq!(local.slots, 2);
        assert!(local.model_dir.is_none());

        cleanup_env_vars();
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_debug_never_prints_key() {
        let provider = ProviderDefaults {
            openai_api_key: Some(SecretString::new("sk-secret")),
            ..Default::default()
        };
        assert!(!format!("{provider:?}").contains("sk-secret"));
    }
}
