use crate::core::job::MAX_WORKER_POOL_SIZE;

use super::ServerConfig;
use super::utils::log_level_directive;

/// Validate conversion defaults
///
/// Rejects settings that would make every job fail at planning time.
pub fn validate_conversion(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.chunk_size == 0 {
        return Err("TTS_CHUNK_SIZE must be greater than 0".into());
    }

    if config.worker_pool_size == 0 || config.worker_pool_size > MAX_WORKER_POOL_SIZE {
        return Err(format!(
            "TTS_WORKER_POOL_SIZE must be between 1 and {MAX_WORKER_POOL_SIZE}, got {}",
            config.worker_pool_size
        )
        .into());
    }

    if config.max_text_chars == 0 {
        return Err("TTS_MAX_TEXT_CHARS must be greater than 0".into());
    }

    if config.job_timeout_secs == Some(0) {
        return Err("TTS_JOB_TIMEOUT_SECS must be greater than 0".into());
    }

    if config.local_engine_slots == 0 {
        return Err("LOCAL_ENGINE_SLOTS must be greater than 0".into());
    }

    Ok(())
}

/// Validate retry settings
pub fn validate_retry(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.max_attempts == 0 {
        return Err("TTS_MAX_ATTEMPTS must be at least 1".into());
    }

    if config.retry_backoff_multiplier.is_nan() || config.retry_backoff_multiplier < 1.0 {
        return Err(format!(
            "TTS_RETRY_BACKOFF_MULTIPLIER must be at least 1.0, got {}",
            config.retry_backoff_multiplier
        )
        .into());
    }

    if config.retry_max_delay_ms < config.retry_base_delay_ms {
        return Err("TTS_RETRY_MAX_DELAY_MS must not be lower than TTS_RETRY_BASE_DELAY_MS".into());
    }

    if config.attempt_timeout_secs == 0 {
        return Err("TTS_ATTEMPT_TIMEOUT_SECS must be greater than 0".into());
    }

    Ok(())
}

/// Validate the optional `LOG_LEVEL` value
pub fn validate_log_level(level: &Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(level) = level
        && log_level_directive(level).is_none()
    {
        return Err(format!(
            "Invalid LOG_LEVEL '{level}'. Must be one of DEBUG, INFO, WARNING, ERROR, CRITICAL"
        )
        .into());
    }
    Ok(())
}
