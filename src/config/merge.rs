use std::env;
use std::path::PathBuf;

use crate::core::tts::local::{
    DEFAULT_LOCAL_ENGINE_SLOTS, DEFAULT_LOCAL_VOICE, DEFAULT_PIPER_BINARY,
};
use crate::core::tts::{AudioFormat, OPENAI_TTS_URL, ProviderKind};

use super::utils::parse_bool;
use super::yaml::YamlConfig;
use super::{LogFormat, ServerConfig};

const DEFAULT_OPENAI_VOICE: &str = "nova";
const DEFAULT_OPENAI_MODEL: &str = "tts-1";

/// Merge YAML configuration with environment variables
///
/// Priority order (highest to lowest):
/// 1. YAML configuration values
/// 2. Environment variables
/// 3. Default values
///
/// # Arguments
/// * `yaml_config` - Optional YAML configuration to use as overrides
///
/// # Returns
/// * `Result<ServerConfig, Box<dyn std::error::Error>>` - The merged configuration or an error
pub fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let yaml = yaml_config.unwrap_or_default();

    // Helper macro to get value with priority: YAML > ENV > Default
    macro_rules! get_value {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            $yaml_value
                .or_else(|| env::var($env_var).ok())
                .unwrap_or_else(|| $default.to_string())
        };
    }

    // Helper macro for optional values: YAML > ENV
    macro_rules! get_optional {
        ($env_var:expr, $yaml_value:expr) => {
            $yaml_value.or_else(|| env::var($env_var).ok())
        };
    }

    // Helper macro for typed values: YAML > parsed ENV > Default
    macro_rules! get_parsed {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            match $yaml_value {
                Some(value) => value,
                None => match env::var($env_var) {
                    Ok(raw) => raw.trim().parse().map_err(|e| {
                        format!("Invalid {} environment variable: {e}", $env_var)
                    })?,
                    Err(_) => $default,
                },
            }
        };
    }

    let server = yaml.server.as_ref();
    let logging = yaml.logging.as_ref();
    let providers = yaml.providers.as_ref();
    let local = yaml.local.as_ref();
    let conversion = yaml.conversion.as_ref();
    let retry = yaml.retry.as_ref();
    let jobs = yaml.jobs.as_ref();

    // Server configuration
    let host = get_value!("HOST", server.and_then(|s| s.host.clone()), "0.0.0.0");
    let port: u16 = get_parsed!("PORT", server.and_then(|s| s.port), 8142);

    // Logging
    let log_level = get_optional!("LOG_LEVEL", logging.and_then(|l| l.level.clone()));
    let log_format = match get_optional!("LOG_FORMAT", logging.and_then(|l| l.format.clone())) {
        Some(format) => format.parse::<LogFormat>()?,
        None => LogFormat::default(),
    };

    // Providers
    let openai_api_key = get_optional!(
        "OPENAI_API_KEY",
        providers.and_then(|p| p.openai_api_key.clone())
    )
    .filter(|key| !key.is_empty());
    let openai_tts_url = get_value!(
        "OPENAI_TTS_URL",
        providers.and_then(|p| p.openai_tts_url.clone()),
        OPENAI_TTS_URL
    );

    // Local engine
    let piper_binary = PathBuf::from(get_value!(
        "PIPER_BINARY",
        local.and_then(|l| l.binary.clone()),
        DEFAULT_PIPER_BINARY
    ));
    let piper_model_dir =
        get_optional!("PIPER_MODEL_DIR", local.and_then(|l| l.model_dir.clone()))
            .map(PathBuf::from);
    let local_engine_slots: usize = get_parsed!(
        "LOCAL_ENGINE_SLOTS",
        local.and_then(|l| l.slots),
        DEFAULT_LOCAL_ENGINE_SLOTS
    );
    let local_default_voice = get_value!(
        "PIPER_DEFAULT_VOICE",
        local.and_then(|l| l.default_voice.clone()),
        DEFAULT_LOCAL_VOICE
    );

    // Conversion defaults
    let chunk_size: usize = get_parsed!(
        "TTS_CHUNK_SIZE",
        conversion.and_then(|c| c.chunk_size),
        4000
    );
    let default_provider: ProviderKind = get_parsed!(
        "TTS_DEFAULT_PROVIDER",
        conversion.and_then(|c| c.default_provider),
        ProviderKind::OpenAI
    );
    let default_format: AudioFormat = get_parsed!(
        "TTS_DEFAULT_FORMAT",
        conversion.and_then(|c| c.default_format),
        AudioFormat::Mp3
    );

    // OpenAI voice and model defaults mean nothing to the local engine
    let openai_default =
        |value: &str| (default_provider == ProviderKind::OpenAI).then(|| value.to_string());
    let default_voice = get_optional!(
        "TTS_DEFAULT_VOICE",
        conversion.and_then(|c| c.default_voice.clone())
    )
    .or_else(|| openai_default(DEFAULT_OPENAI_VOICE));
    let default_model = get_optional!(
        "TTS_DEFAULT_MODEL",
        conversion.and_then(|c| c.default_model.clone())
    )
    .or_else(|| openai_default(DEFAULT_OPENAI_MODEL));

    let worker_pool_size: usize = get_parsed!(
        "TTS_WORKER_POOL_SIZE",
        conversion.and_then(|c| c.worker_pool_size),
        4
    );
    let max_text_chars: usize = get_parsed!(
        "TTS_MAX_TEXT_CHARS",
        conversion.and_then(|c| c.max_text_chars),
        1_000_000
    );
    let job_timeout_secs: Option<u64> = match conversion.and_then(|c| c.job_timeout_secs) {
        Some(secs) => Some(secs),
        None => match env::var("TTS_JOB_TIMEOUT_SECS") {
            Ok(raw) => Some(raw.trim().parse().map_err(|e| {
                format!("Invalid TTS_JOB_TIMEOUT_SECS environment variable: {e}")
            })?),
            Err(_) => None,
        },
    };

    // Retry policy
    let max_attempts: u32 = get_parsed!(
        "TTS_MAX_ATTEMPTS",
        retry.and_then(|r| r.max_attempts),
        3
    );
    let retry_base_delay_ms: u64 = get_parsed!(
        "TTS_RETRY_BASE_DELAY_MS",
        retry.and_then(|r| r.base_delay_ms),
        1000
    );
    let retry_max_delay_ms: u64 = get_parsed!(
        "TTS_RETRY_MAX_DELAY_MS",
        retry.and_then(|r| r.max_delay_ms),
        30_000
    );
    let retry_backoff_multiplier: f64 = get_parsed!(
        "TTS_RETRY_BACKOFF_MULTIPLIER",
        retry.and_then(|r| r.backoff_multiplier),
        2.0
    );
    let attempt_timeout_secs: u64 = get_parsed!(
        "TTS_ATTEMPT_TIMEOUT_SECS",
        retry.and_then(|r| r.attempt_timeout_secs),
        30
    );

    // Job store
    let job_retention_secs: u64 = get_parsed!(
        "TTS_JOB_RETENTION_SECS",
        jobs.and_then(|j| j.retention_secs),
        3600
    );
    let max_jobs: u64 = get_parsed!("TTS_MAX_JOBS", jobs.and_then(|j| j.max_jobs), 1000);
    let deduplicate_jobs = match jobs.and_then(|j| j.deduplicate) {
        Some(value) => value,
        None => match env::var("TTS_DEDUPLICATE_JOBS") {
            Ok(raw) => parse_bool(&raw).ok_or_else(|| {
                format!("Invalid TTS_DEDUPLICATE_JOBS environment variable: {raw}")
            })?,
            Err(_) => true,
        },
    };

    Ok(ServerConfig {
        host,
        port,
        log_level,
        log_format,
        openai_api_key,
        openai_tts_url,
        piper_binary,
        piper_model_dir,
        local_engine_slots,
        local_default_voice,
        chunk_size,
        default_provider,
        default_voice,
        default_model,
        default_format,
        worker_pool_size,
        max_text_chars,
        job_timeout_secs,
        max_attempts,
        retry_base_delay_ms,
        retry_max_delay_ms,
        retry_backoff_multiplier,
        attempt_timeout_secs,
        job_retention_secs,
        max_jobs,
        deduplicate_jobs,
    })
}
