use serde::Deserialize;
use std::path::PathBuf;

use crate::core::tts::{AudioFormat, ProviderKind};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// take priority over environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8142
///
/// logging:
///   level: "INFO"
///   format: "json"
///
/// providers:
///   openai_api_key: "sk-..."
///   openai_tts_url: "https://api.openai.com/v1/audio/speech"
///
/// local:
///   binary: "/usr/local/bin/piper"
///   model_dir: "/opt/piper/models"
///   slots: 2
///   default_voice: "en_US-lessac-medium"
///
/// conversion:
///   chunk_size: 4000
///   default_provider: "openai"
///   default_voice: "nova"
///   default_model: "tts-1"
///   default_format: "mp3"
///   worker_pool_size: 4
///   max_text_chars: 1000000
///   job_timeout_secs: 900
///
/// retry:
///   max_attempts: 3
///   base_delay_ms: 1000
///   max_delay_ms: 30000
///   backoff_multiplier: 2.0
///   attempt_timeout_secs: 30
///
/// jobs:
///   retention_secs: 3600
///   max_jobs: 1000
///   deduplicate: true
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub logging: Option<LoggingYaml>,
    pub providers: Option<ProvidersYaml>,
    pub local: Option<LocalYaml>,
    pub conversion: Option<ConversionYaml>,
    pub retry: Option<RetryYaml>,
    pub jobs: Option<JobsYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingYaml {
    pub level: Option<String>,
    /// "json" or "text"
    pub format: Option<String>,
}

/// Provider credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    pub openai_api_key: Option<String>,
    pub openai_tts_url: Option<String>,
}

/// Local Piper engine settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LocalYaml {
    pub binary: Option<String>,
    pub model_dir: Option<String>,
    pub slots: Option<usize>,
    pub default_voice: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConversionYaml {
    pub chunk_size: Option<usize>,
    pub default_provider: Option<ProviderKind>,
    pub default_voice: Option<String>,
    pub default_model: Option<String>,
    pub default_format: Option<AudioFormat>,
    pub worker_pool_size: Option<usize>,
    pub max_text_chars: Option<usize>,
    pub job_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RetryYaml {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub attempt_timeout_secs: Option<u64>,
}

/// Job store settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct JobsYaml {
    pub retention_secs: Option<u64>,
    pub max_jobs: Option<u64>,
    /// Return the retained job for a repeated identical request
    pub deduplicate: Option<bool>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_yaml() {
        let config: YamlConfig = serde_yaml::from_str("").unwrap_or_default();
        assert!(config.server.is_none());
        assert!(config.conversion.is_none());
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000
logging:
  level: "DEBUG"
  format: "json"
providers:
  openai_api_key: "sk-yaml"
local:
  model_dir: "/opt/piper"
  slots: 3
conversion:
  chunk_size: 2000
  default_provider: "piper"
  default_format: "wav"
retry:
  max_attempts: 5
  backoff_multiplier: 1.5
jobs:
  retention_secs: 60
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(server.port, Some(9000));
        assert_eq!(config.logging.unwrap().format.as_deref(), Some("json"));
        assert_eq!(
            config.providers.unwrap().openai_api_key.as_deref(),
            Some("sk-yaml")
        );
        assert_eq!(config.local.unwrap().slots, Some(3));

        let conversion = config.conversion.unwrap();
        assert_eq!(conversion.chunk_size, Some(2000));
        assert_eq!(conversion.default_provider, Some(ProviderKind::Local));
        assert_eq!(conversion.default_format, Some(AudioFormat::Wav));

        let retry = config.retry.unwrap();
        assert_eq!(retry.max_attempts, Some(5));
        assert_eq!(retry.backoff_multiplier, Some(1.5));
        assert!(retry.base_delay_ms.is_none());
        assert_eq!(config.jobs.unwrap().retention_secs, Some(60));
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "server:\n  port: 8200\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(config.server.unwrap().port, Some(8200));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        fs::write(&config_path, "server: [unclosed").unwrap();

        let result = YamlConfig::from_file(&config_path);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let result: Result<YamlConfig, _> =
            serde_yaml::from_str("conversion:\n  default_format: \"mp4\"\n");
        assert!(result.is_err());
    }
}
